mod builder;
mod session;
pub use builder::*;
pub use session::*;
