mod fatal_reporter;
mod location_cycle;
mod watch_scheduler;
pub use fatal_reporter::*;
pub use location_cycle::*;
pub use watch_scheduler::*;
