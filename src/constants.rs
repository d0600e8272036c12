use std::time::Duration;

// -
// Upstream request headers

/// Requester identity headers (lowercase, as `HeaderName::from_static` requires)
pub(crate) const REQUESTER_EMAIL_HEADER: &str = "from";
pub(crate) const REQUESTER_ID_HEADER: &str = "x-requester-id";

pub(crate) const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Route name of fetches that use no proxy
pub(crate) const DIRECT_ROUTE: &str = "direct";

// -
// Block detection

/// Lowercased fragments of pages served instead of the calendar when a
/// client is throttled or challenged.
pub(crate) const BLOCK_SIGNATURES: &[&str] = &[
    "captcha",
    "zu viele zugriffe",
    "too many requests",
    "access denied",
    "rate limit",
];

// -
// Berlin service portal

pub(crate) const BERLIN_BASE_URL: &str = "https://service.berlin.de";

/// Location id meaning "any office offering the service"
pub(crate) const ALL_LOCATIONS: &str = "all";

// -
// Push channel

pub(crate) const WS_CLOSE_REASON_SHUTDOWN: &str = "server shutting down";

/// Upper bound for delivering the close frame to a client that stopped reading
pub(crate) const WS_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
