use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Site adapters shipped with the crate
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    /// service.berlin.de appointment calendar
    #[default]
    Berlin,
}

impl SiteKind {
    /// Timezone the site's calendar dates are expressed in
    pub fn timezone(&self) -> Tz {
        match self {
            SiteKind::Berlin => chrono_tz::Europe::Berlin,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchConfig {
    /// Upper bound for fetching every page of one location
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    #[serde(default)]
    pub site: SiteKind,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            site: SiteKind::default(),
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("fetch.request_timeout_ms must be > 0".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::InvalidConfig("fetch.user_agent cannot be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    20_000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0".into()
}
fn default_accept_language() -> String {
    "de-DE,de;q=0.8,en-US;q=0.5,en;q=0.3".into()
}
