use chrono::DateTime;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use super::contains_block_signature;
use super::AppointmentSlot;
use super::SiteAdapter;
use crate::constants::ALL_LOCATIONS;
use crate::constants::BERLIN_BASE_URL;
use crate::utils::time::first_of_next_month;
use crate::utils::time::from_unix_seconds;
use crate::ParseFailure;
use crate::WatchTarget;

lazy_static! {
    static ref TABLE_RE: Regex = Regex::new(r"(?i)<table\b").expect("valid regex");
    static ref BOOKABLE_CELL_RE: Regex = Regex::new(
        r#"(?is)<td\b[^>]*\bclass\s*=\s*["'][^"']*\bbuchbar\b[^"']*["'][^>]*>(.*?)</td>"#
    )
    .expect("valid regex");
    static ref HREF_RE: Regex =
        Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("valid regex");
}

/// Calendar of the Berlin citizen service portal (service.berlin.de).
///
/// The calendar shows two months per request; the second month is fetched
/// from the `day` page of the first day of next month. Every bookable day
/// links to a URL ending in its unix timestamp, which becomes the slot id.
#[derive(Debug, Clone)]
pub struct BerlinServiceAdapter {
    base_url: String,
}

impl Default for BerlinServiceAdapter {
    fn default() -> Self {
        Self::with_base_url(BERLIN_BASE_URL)
    }
}

impl BerlinServiceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points the adapter at another host, e.g. a local mirror
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Service id: last non-empty path segment of the public service page
    pub fn service_id(service_url: &str) -> Result<String, ParseFailure> {
        let url = url::Url::parse(service_url)
            .map_err(|e| ParseFailure::InvalidServiceUrl(format!("{service_url}: {e}")))?;
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(|| ParseFailure::InvalidServiceUrl(format!("{service_url}: no service id in path")))
    }

    fn has_calendar(raw: &str) -> bool {
        TABLE_RE.is_match(raw)
    }
}

impl SiteAdapter for BerlinServiceAdapter {
    fn page_urls(
        &self,
        target: &WatchTarget,
        location: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ParseFailure> {
        let service_id = Self::service_id(&target.service_url)?;

        let first = if location == ALL_LOCATIONS {
            format!("{}/terminvereinbarung/termin/all/{}/", self.base_url, service_id)
        } else {
            format!(
                "{}/terminvereinbarung/termin/tag.php?termin=1&anliegen[]={}&dienstleisterlist={}",
                self.base_url, service_id, location
            )
        };
        let second = format!(
            "{}/terminvereinbarung/termin/day/{}/",
            self.base_url,
            first_of_next_month(now).timestamp()
        );

        Ok(vec![first, second])
    }

    fn parse(
        &self,
        location: &str,
        raw: &str,
    ) -> Result<Vec<AppointmentSlot>, ParseFailure> {
        if !Self::has_calendar(raw) {
            return Err(ParseFailure::UnexpectedShape("no calendar table in page".into()));
        }

        let mut slots = Vec::new();
        for cell in BOOKABLE_CELL_RE.captures_iter(raw) {
            let Some(href) = HREF_RE.captures(&cell[1]).map(|c| c[1].to_string()) else {
                // bookable cell without a link: nothing to book
                continue;
            };
            let tail = href
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default();
            let date_time = tail
                .parse::<i64>()
                .ok()
                .and_then(from_unix_seconds)
                .ok_or_else(|| ParseFailure::InvalidSlot(format!("bookable link {href}")))?;

            slots.push(AppointmentSlot::new(location, date_time, tail));
        }
        Ok(slots)
    }

    fn is_blocked(
        &self,
        raw: &str,
    ) -> bool {
        !Self::has_calendar(raw) && contains_block_signature(raw)
    }
}
