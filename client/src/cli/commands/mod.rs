mod control;
mod device_info;
mod listen;

pub use control::{set_cool, set_heat, set_mode};
pub use device_info::{device_info, list_devices};
pub use listen::listen;
