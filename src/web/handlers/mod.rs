pub(crate) mod agents;
pub(crate) mod conversations;
pub(crate) mod experiments;
pub(crate) mod export;
pub(crate) mod users;
