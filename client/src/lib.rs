mod protocol;

pub use protocol::auth::*;
pub use protocol::client::*;
pub use protocol::commands::DeviceCommand;
pub use protocol::error::SdmClientError;
pub use protocol::pubsub::*;
pub use protocol::traits::*;
