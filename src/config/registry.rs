use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Consecutive observations a slot must be missing before it counts as vanished
    #[serde(default = "default_vanish_after_misses")]
    pub vanish_after_misses: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            vanish_after_misses: default_vanish_after_misses(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vanish_after_misses == 0 {
            return Err(Error::InvalidConfig("registry.vanish_after_misses must be >= 1".into()));
        }
        Ok(())
    }
}

fn default_vanish_after_misses() -> u32 {
    2
}
