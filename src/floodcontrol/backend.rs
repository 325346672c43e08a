//! Flood check trait for abstracting over limiter implementations.

use async_trait::async_trait;

use super::identity::Identity;
use crate::error::Result;

/// Outcome of a flood check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call is within the limit
    Allowed,
    /// The identity exceeded its call limit for the current window
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Trait for flood control implementations.
///
/// `Err` means no decision could be made; callers pick their own
/// fail-open or fail-closed policy for that case.
#[async_trait]
pub trait FloodCheck: Send + Sync {
    /// Decide whether a call from `identity` may proceed, recording it if so.
    async fn check(&self, identity: &Identity) -> Result<Decision>;
}
