use chrono::DateTime;
use chrono::Utc;

use super::AppointmentSlot;
use crate::constants::BLOCK_SIGNATURES;
use crate::ParseFailure;
use crate::WatchTarget;

/// Site-specific knowledge: where the calendar lives and how to read it
pub trait SiteAdapter: Send + Sync + 'static {
    /// Calendar pages to fetch for `location`, in order
    fn page_urls(
        &self,
        target: &WatchTarget,
        location: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ParseFailure>;

    /// Extracts the bookable slots of one page
    fn parse(
        &self,
        location: &str,
        raw: &str,
    ) -> Result<Vec<AppointmentSlot>, ParseFailure>;

    /// Whether a successful response is actually a throttling or challenge page
    fn is_blocked(
        &self,
        raw: &str,
    ) -> bool {
        contains_block_signature(raw)
    }
}

pub fn contains_block_signature(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    BLOCK_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}
