mod notification_hub;
mod push_server;
pub use notification_hub::*;
pub use push_server::*;
