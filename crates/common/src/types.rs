use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Random bytes in a prefixed identifier; hex-encoded to twice as many chars.
const RANDOM_BYTES: usize = 8;

fn random_hex() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix every generated identifier of this kind starts with.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new random identifier (`<prefix>-<16 hex chars>`).
            pub fn new() -> Self {
                Self(format!("{}-{}", Self::PREFIX, random_hex()))
            }

            /// Wraps an identifier that was previously generated and stored.
            pub fn from_string(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

prefixed_id!(
    /// Unique identifier for a persisted synchronization conflict.
    ConflictId,
    "conflict"
);

prefixed_id!(
    /// Unique identifier for a saga and its execution record.
    SagaId,
    "saga"
);
