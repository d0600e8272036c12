//! Calendar retrieval and classification.
//!
//! A [`CalendarFetcher`] turns one poll of one location into a
//! [`FetchOutcome`]. The HTTP implementation delegates everything
//! site-specific (page URLs, HTML parsing, block detection) to a
//! [`SiteAdapter`].
mod berlin_adapter;
mod http_fetcher;
mod site_adapter;
pub use berlin_adapter::*;
pub use http_fetcher::*;
pub use site_adapter::*;

#[cfg(test)]
mod http_fetcher_test;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::ProxyEndpoint;

/// A bookable time slot at one location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub location: String,
    #[serde(with = "wire_datetime")]
    pub date_time: DateTime<Utc>,
    /// Unique within a location and date
    pub slot_id: String,
    pub capacity: Option<u32>,
}

impl AppointmentSlot {
    pub fn new(
        location: impl Into<String>,
        date_time: DateTime<Utc>,
        slot_id: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            date_time,
            slot_id: slot_id.into(),
            capacity: None,
        }
    }
}

/// Result of polling one location once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Slots(Vec<AppointmentSlot>),
    Empty,
    /// Rate-limited, challenged or refused
    Blocked,
    /// Retry later with backoff
    TransientError(String),
    /// The page no longer looks like a calendar; needs an operator
    FatalError(String),
}

impl FetchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Slots(_) => "slots",
            FetchOutcome::Empty => "empty",
            FetchOutcome::Blocked => "blocked",
            FetchOutcome::TransientError(_) => "transient",
            FetchOutcome::FatalError(_) => "fatal",
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CalendarFetcher: Send + Sync + 'static {
    /// Fetches every page of `location`, through `proxy` when given.
    ///
    /// Never fails: transport and parsing problems are folded into the outcome.
    async fn fetch(
        &self,
        location: &str,
        proxy: Option<ProxyEndpoint>,
    ) -> FetchOutcome;
}

mod wire_datetime {
    use chrono::DateTime;
    use chrono::NaiveDateTime;
    use chrono::Utc;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
