//! Watches a public appointment calendar and pushes newly released slots to
//! subscribers.
//!
//! A [`WatchSession`] polls every configured location through a rotating
//! [`ProxyPool`], classifies each poll as a [`FetchOutcome`], diffs the slots
//! in a [`SlotRegistry`] and fans new ones out through a [`NotificationHub`]
//! to WebSocket clients of the [`PushServer`].
mod config;
mod constants;
mod errors;
mod fetch;
pub mod metrics;
mod notify;
mod proxy;
mod registry;
mod scheduler;
mod session;
mod target;
mod utils;

pub use config::*;
pub use errors::*;
pub use fetch::*;
pub use notify::*;
pub use proxy::*;
pub use registry::*;
pub use scheduler::*;
pub use session::*;
pub use target::*;
