//! Flood control logic and per-identity state.

mod backend;
mod identity;
mod limiter;
mod record;

pub use backend::{Decision, FloodCheck};
pub use identity::Identity;
pub use limiter::FloodControl;
pub use record::{CallRecord, PayloadError};
