//! Shared fact/atom/identifier vocabulary for the shard fabric.
//!
//! Every shard communicates exclusively through facts stored in the Kernel
//! (see the `kernel-api` crate for the trait boundary). This crate defines
//! the primitive argument type those facts are built from, plus the
//! identifier newtypes (`IntentId`, `ActionId`) and error type shared across
//! the workspace.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An interned name constant beginning with `/`, used where an enum would be
/// used in other systems (e.g. `/read_file`, `/security_violation`).
///
/// The sentinel value `none` is preserved without a leading slash; every
/// other name is normalized to carry exactly one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Atom(String);

impl Atom {
    /// Construct an atom, normalizing `name` per [`normalize_atom`].
    pub fn new(name: impl AsRef<str>) -> Self {
        Atom(normalize_atom(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The atom's name with its leading `/` stripped (or the bare sentinel).
    pub fn stripped(&self) -> &str {
        self.0.strip_prefix('/').unwrap_or(&self.0)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::new(s)
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::new(s)
    }
}

/// Normalize an atom name: prepend `/` unless the name already has one or is
/// the sentinel `"none"`.
pub fn normalize_atom(name: &str) -> String {
    if name == "none" || name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

/// A fact argument. Dynamic payloads (e.g. tool call parameters) are modeled
/// as this sum type rather than a dynamic container, so they round-trip
/// stably into fact arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Atom(Atom),
    Str(String),
    Int(i64),
    Float(f64),
    Map(BTreeMap<String, FactValue>),
}

impl FactValue {
    pub fn atom(name: impl AsRef<str>) -> Self {
        FactValue::Atom(Atom::new(name))
    }

    pub fn str(s: impl Into<String>) -> Self {
        FactValue::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Str(s) => Some(s),
            FactValue::Atom(a) => Some(a.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FactValue>> {
        match self {
            FactValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        FactValue::Str(s.to_string())
    }
}

impl From<String> for FactValue {
    fn from(s: String) -> Self {
        FactValue::Str(s)
    }
}

impl From<i64> for FactValue {
    fn from(n: i64) -> Self {
        FactValue::Int(n)
    }
}

impl From<f64> for FactValue {
    fn from(n: f64) -> Self {
        FactValue::Float(n)
    }
}

/// A tuple `predicate(arg1, ..., argN)` stored in the Kernel — the sole
/// inter-shard communication medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<FactValue>,
    /// Monotonic Unix timestamp, present on every predicate that requires
    /// pruning. `None` for predicates that don't carry one.
    pub ts: Option<DateTime<Utc>>,
}

impl Fact {
    pub fn new(predicate: impl Into<String>, args: Vec<FactValue>) -> Self {
        Fact {
            predicate: predicate.into(),
            args,
            ts: None,
        }
    }

    pub fn with_ts(predicate: impl Into<String>, args: Vec<FactValue>, ts: DateTime<Utc>) -> Self {
        Fact {
            predicate: predicate.into(),
            args,
            ts: Some(ts),
        }
    }

    /// Match on predicate name only, ignoring arguments — used for
    /// predicate-level retraction.
    pub fn matches_predicate(&self, predicate: &str) -> bool {
        self.predicate == predicate
    }
}

/// Correlates `pending_action -> permitted_action -> routing_result` for a
/// single action. Opaque beyond equality/ordering to avoid accidental mixups
/// with [`IntentId`] at call sites.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        ActionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `/current_intent` is canonical and unique per active turn; historical
/// intents use `/intent_<unix_nanos>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(Atom);

impl IntentId {
    /// The canonical, always-current intent slot.
    pub fn current() -> Self {
        IntentId(Atom::new("current_intent"))
    }

    /// A historical intent snapshot, addressed by the nanosecond timestamp
    /// at which it was superseded.
    pub fn historical(unix_nanos: i128) -> Self {
        IntentId(Atom::new(format!("intent_{unix_nanos}")))
    }

    pub fn as_atom(&self) -> &Atom {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Parse the embedded nanosecond timestamp out of a historical intent
    /// id, if this is one (used to pick the latest historical intent when
    /// `/current_intent` is absent).
    pub fn parsed_nanos(&self) -> Option<i128> {
        self.0
            .stripped()
            .strip_prefix("intent_")
            .and_then(|rest| rest.parse().ok())
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A truncated record of a tool invocation, published to the optional tool
/// event bus (`shard-middleware`) by the Router. Distinct from the Kernel's
/// `routing_result` fact, which is the authoritative record; this is a
/// best-effort broadcast for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub action_id: ActionId,
    pub tool_name: String,
    pub success: bool,
    /// Output truncated to the Router's 500-character cap.
    pub output: String,
    pub ts: DateTime<Utc>,
}

/// Shared error type for argument/timestamp handling in this crate. Other
/// crates define their own `thiserror` enums and wrap this one with
/// `#[from]` where it can occur.
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
