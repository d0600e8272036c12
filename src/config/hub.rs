use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Push-channel server and subscriber delivery queues
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HubConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Per-subscriber queue capacity; the oldest message is dropped when full
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,

    /// Send the currently present slots to a client right after it connects
    #[serde(default = "default_replay_on_connect")]
    pub replay_on_connect: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            subscriber_buffer_size: default_subscriber_buffer_size(),
            replay_on_connect: default_replay_on_connect(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer_size == 0 {
            return Err(Error::InvalidConfig("hub.subscriber_buffer_size must be > 0".into()));
        }
        Ok(())
    }
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8765))
}
fn default_subscriber_buffer_size() -> usize {
    64
}
fn default_replay_on_connect() -> bool {
    true
}
