//! Newtype domain identifiers.
//!
//! Every upstream concept that has an identity is represented as a distinct
//! newtype wrapping a primitive. This prevents accidentally interchanging, for
//! example, an [`IssueKey`] (`"ABC-1"`) with an [`IssueId`] (`"10001"`) even
//! though both are strings on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: tracker-assigned
// ---------------------------------------------------------------------------

string_id! {
    /// The human-facing key of a tracker issue (e.g. `"ABC-1"`).
    ///
    /// Stable and unique within one tracker; used as the document id of the
    /// mirrored issue in the document store.
    IssueKey
}

string_id! {
    /// The tracker's internal numeric identifier of an issue, kept as a string
    /// because that is how the tracker serialises it (e.g. `"10001"`).
    ///
    /// Only the linked-resource API is addressed by this identifier.
    IssueId
}

string_id! {
    /// Identifies a document in the document store.
    DocumentId
}

impl DocumentId {
    /// Prefix applied to the issue key to form a lead-time document id.
    pub const LEAD_TIME_PREFIX: &'static str = "lead-";

    /// Document id of the mirrored issue itself: the issue key, unchanged.
    pub fn for_issue(key: &IssueKey) -> Self {
        Self(key.as_str().to_owned())
    }

    /// Document id of the lead-time record derived from `key`.
    pub fn for_lead_time(key: &IssueKey) -> Self {
        Self(format!("{}{}", Self::LEAD_TIME_PREFIX, key))
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single poll cycle (one invocation of "run one cycle").
///
/// Generated fresh for every cycle and attached to the cycle's tracing span so
/// that every request and emission of one cycle can be correlated, including
/// when two cycles overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Generates a new random cycle identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
