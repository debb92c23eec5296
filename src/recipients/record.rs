use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

const SENT_LABEL: &str = "sent";
const FAILED_PREFIX: &str = "failed";

/// Stable ordinal identifier assigned by the recipient store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(u64);

impl RecipientId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recipient:{}", self.0)
    }
}

/// Outcome label persisted next to a recipient after a send attempt.
///
/// Serialized as `"sent"` or `"failed: <reason>"` so exported records stay
/// readable without a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DispatchStatus {
    Sent,
    Failed(String),
}

impl DispatchStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchStatus::Sent)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            DispatchStatus::Sent => None,
            DispatchStatus::Failed(reason) => Some(reason),
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStatus::Sent => f.write_str(SENT_LABEL),
            DispatchStatus::Failed(reason) => write!(f, "{FAILED_PREFIX}: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised dispatch status {0:?}")]
pub struct ParseStatusError(String);

impl FromStr for DispatchStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim() == SENT_LABEL {
            return Ok(DispatchStatus::Sent);
        }
        // the reason is kept byte for byte after the `failed: ` separator
        match value.strip_prefix(FAILED_PREFIX) {
            Some("") => Ok(DispatchStatus::Failed(String::new())),
            Some(rest) => match rest.strip_prefix(':') {
                Some(reason) => {
                    let reason = reason.strip_prefix(' ').unwrap_or(reason);
                    Ok(DispatchStatus::Failed(reason.to_owned()))
                }
                None => Err(ParseStatusError(value.to_owned())),
            },
            None => Err(ParseStatusError(value.to_owned())),
        }
    }
}

impl From<DispatchStatus> for String {
    fn from(status: DispatchStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for DispatchStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Outcome of one dispatch task. Produced exactly once per task and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub sent_at: Option<DateTime<Utc>>,
    pub status: DispatchStatus,
}

impl DispatchResult {
    pub fn sent(at: DateTime<Utc>) -> Self {
        Self {
            sent_at: Some(at),
            status: DispatchStatus::Sent,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            sent_at: None,
            status: DispatchStatus::Failed(reason.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status.is_sent()
    }
}

/// One addressable target of a bulk send.
///
/// `fields` carries the template-fillable values; `sent_at` and `status`
/// are the only values the dispatch engine ever writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<DispatchStatus>,
}

impl Recipient {
    pub fn new(id: RecipientId, fields: Map<String, Value>) -> Self {
        Self {
            id,
            fields,
            sent_at: None,
            status: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Values exposed to message templates: every field plus the recipient id.
    pub fn render_context(&self) -> Value {
        let mut context = self.fields.clone();
        context
            .entry("id")
            .or_insert_with(|| Value::from(self.id.get()));
        Value::Object(context)
    }
}

/// Partial update merged into a stored recipient by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientPatch {
    pub fields: Map<String, Value>,
    pub outcome: Option<DispatchResult>,
}

impl RecipientPatch {
    pub fn outcome(result: DispatchResult) -> Self {
        Self {
            fields: Map::new(),
            outcome: Some(result),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn apply_to(self, recipient: &mut Recipient) {
        recipient.fields.extend(self.fields);
        if let Some(outcome) = self.outcome {
            recipient.sent_at = outcome.sent_at;
            recipient.status = Some(outcome.status);
        }
    }
}

impl From<DispatchResult> for RecipientPatch {
    fn from(result: DispatchResult) -> Self {
        Self::outcome(result)
    }
}
