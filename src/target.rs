use serde::Deserialize;
use serde::Serialize;

/// Pass-through metadata identifying who is polling the calendar.
///
/// Forwarded on every request so the site operator can contact the requester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterIdentity {
    pub tool_id: Option<String>,
    pub email: Option<String>,
}

impl RequesterIdentity {
    pub fn is_empty(&self) -> bool {
        self.tool_id.is_none() && self.email.is_none()
    }
}

/// Immutable description of what one session watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub service_url: String,
    pub identity: RequesterIdentity,
    /// Polled independently, in this order
    pub locations: Vec<String>,
}
