use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::RequesterIdentity;
use crate::Result;
use crate::WatchTarget;

/// What the session watches
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetConfig {
    /// Public service page, e.g. `https://service.berlin.de/dienstleistung/120686/`
    #[serde(default)]
    pub service_url: String,

    /// Requester tool id forwarded as request metadata
    #[serde(default)]
    pub tool_id: Option<String>,

    /// Requester email forwarded as request metadata
    #[serde(default)]
    pub email: Option<String>,

    /// Location/office identifiers to poll independently
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            tool_id: None,
            email: None,
            locations: default_locations(),
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.service_url.trim().is_empty() {
            return Err(Error::InvalidConfig("target.service_url must be set".into()));
        }
        url::Url::parse(&self.service_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "target.service_url {} is not a valid URL: {}",
                self.service_url, e
            ))
        })?;

        if self.locations.is_empty() {
            return Err(Error::InvalidConfig(
                "target.locations must contain at least one location".into(),
            ));
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            if location.trim().is_empty() {
                return Err(Error::InvalidConfig("target.locations contains an empty id".into()));
            }
            if !seen.insert(location.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate location {} in target.locations",
                    location
                )));
            }
        }

        Ok(())
    }

    /// Freezes the configuration into the read-only session target
    pub fn to_watch_target(&self) -> WatchTarget {
        WatchTarget {
            service_url: self.service_url.trim().to_string(),
            identity: RequesterIdentity {
                tool_id: non_empty(&self.tool_id),
                email: non_empty(&self.email),
            },
            locations: self.locations.iter().map(|l| l.trim().to_string()).collect(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn default_locations() -> Vec<String> {
    vec!["all".to_string()]
}
