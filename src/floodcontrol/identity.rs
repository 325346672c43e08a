//! Caller identities.

use std::fmt;

/// The key that partitions flood control state, e.g. a user ID.
///
/// Its string form is used verbatim as the store key, so the integer `1`
/// and the string `"1"` name the same caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The store key for this identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for Identity {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

macro_rules! identity_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Identity {
                fn from(id: $t) -> Self {
                    Self(id.to_string())
                }
            }
        )*
    };
}

identity_from_int!(i32, i64, u32, u64);
