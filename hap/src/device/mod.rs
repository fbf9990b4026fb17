pub(crate) mod backoff;
pub(crate) mod bootstrap;
pub(crate) mod dispatcher;
pub(crate) mod events;
