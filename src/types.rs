//! Core types for the a3s-realtime system
//!
//! Filters are strongly typed and validated when a subscription is created.
//! All serializable types use camelCase JSON for wire compatibility.

use crate::error::{CallbackError, RealtimeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unique identifier for one subscription registration (`sub-<uuid>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(format!("sub-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row change type for table-change subscriptions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Any change (`*`)
    #[default]
    #[serde(rename = "*")]
    All,
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Wire representation (`*`, `INSERT`, `UPDATE`, `DELETE`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::All => "*",
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "*" => Ok(ChangeKind::All),
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(RealtimeError::InvalidFilter(format!(
                "unknown change event '{}'",
                other
            ))),
        }
    }
}

/// Comparison operator in a row filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::In => "in",
        }
    }
}

/// Row filter in the backend's `column=op.value` syntax
///
/// `in` takes a parenthesised list: `status=in.(paid,shipped)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

impl RowFilter {
    /// Parse `column=op.value`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            RealtimeError::InvalidFilter(format!("row filter '{}': {}", raw, reason))
        };

        let (column, rest) = raw.split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(invalid("empty column"));
        }

        let (op, value) = rest.split_once('.').ok_or_else(|| invalid("missing operator"))?;
        let op = match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "in" => FilterOp::In,
            other => return Err(invalid(&format!("unsupported operator '{}'", other))),
        };

        let values = if op == FilterOp::In {
            let list = value
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| invalid("'in' expects a parenthesised list"))?;
            list.split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
        } else {
            vec![value.to_string()]
        };

        if values.is_empty() {
            return Err(invalid("empty value"));
        }

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }

    /// Evaluate the filter against a row object
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => value_eq(actual, &self.values[0]),
            FilterOp::Neq => !value_eq(actual, &self.values[0]),
            FilterOp::In => self.values.iter().any(|v| value_eq(actual, v)),
            FilterOp::Lt => compare(actual, &self.values[0]).is_some_and(|o| o.is_lt()),
            FilterOp::Lte => compare(actual, &self.values[0]).is_some_and(|o| o.is_le()),
            FilterOp::Gt => compare(actual, &self.values[0]).is_some_and(|o| o.is_gt()),
            FilterOp::Gte => compare(actual, &self.values[0]).is_some_and(|o| o.is_ge()),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == FilterOp::In {
            write!(f, "{}=in.({})", self.column, self.values.join(","))
        } else {
            write!(f, "{}={}.{}", self.column, self.op.as_str(), self.values[0])
        }
    }
}

fn value_eq(actual: &serde_json::Value, expected: &str) -> bool {
    match actual {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => n.to_string() == expected,
        },
        serde_json::Value::Bool(b) => b.to_string() == expected,
        serde_json::Value::Null => expected == "null",
        other => other.to_string() == expected,
    }
}

fn compare(actual: &serde_json::Value, expected: &str) -> Option<std::cmp::Ordering> {
    match actual {
        serde_json::Value::Number(n) => {
            let b = expected.parse::<f64>().ok()?;
            n.as_f64()?.partial_cmp(&b)
        }
        serde_json::Value::String(s) => Some(s.as_str().cmp(expected)),
        _ => None,
    }
}

/// What a subscription listens to on its channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum EventFilter {
    /// Row changes on a backend table
    TableChange {
        event: ChangeKind,
        schema: String,
        table: String,
        #[serde(
            default,
            rename = "rowFilter",
            skip_serializing_if = "Option::is_none"
        )]
        row_filter: Option<RowFilter>,
    },
    /// Named broadcast events (`*` for all)
    Broadcast { event: String },
}

impl EventFilter {
    /// Table-change filter on `schema.table` for every change type
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        EventFilter::TableChange {
            event: ChangeKind::All,
            schema: schema.into(),
            table: table.into(),
            row_filter: None,
        }
    }

    /// Broadcast filter for a named event
    pub fn broadcast(event: impl Into<String>) -> Self {
        EventFilter::Broadcast {
            event: event.into(),
        }
    }

    /// Build a filter from loose option fields
    ///
    /// A table makes it a table-change filter (schema defaults to `public`,
    /// event to `*`); otherwise it is a broadcast filter on `event` or `*`.
    pub fn from_parts(
        event: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Self> {
        let built = match table {
            Some(table) => EventFilter::TableChange {
                event: event.map(ChangeKind::from_str).transpose()?.unwrap_or_default(),
                schema: schema.unwrap_or("public").to_string(),
                table: table.to_string(),
                row_filter: filter.map(RowFilter::parse).transpose()?,
            },
            None => {
                if filter.is_some() {
                    return Err(RealtimeError::InvalidFilter(
                        "row filter requires a table".to_string(),
                    ));
                }
                EventFilter::Broadcast {
                    event: event.unwrap_or("*").to_string(),
                }
            }
        };
        built.validate()?;
        Ok(built)
    }

    /// Restrict a table-change filter to one change type
    pub fn with_event(mut self, kind: ChangeKind) -> Self {
        if let EventFilter::TableChange { ref mut event, .. } = self {
            *event = kind;
        }
        self
    }

    /// Attach a row filter to a table-change filter
    pub fn with_row_filter(mut self, filter: RowFilter) -> Self {
        if let EventFilter::TableChange {
            ref mut row_filter, ..
        } = self
        {
            *row_filter = Some(filter);
        }
        self
    }

    /// Check required fields are present
    pub fn validate(&self) -> Result<()> {
        match self {
            EventFilter::TableChange { schema, table, .. } => {
                if schema.trim().is_empty() {
                    return Err(RealtimeError::InvalidFilter("empty schema".to_string()));
                }
                if table.trim().is_empty() {
                    return Err(RealtimeError::InvalidFilter("empty table".to_string()));
                }
            }
            EventFilter::Broadcast { event } => {
                if event.trim().is_empty() {
                    return Err(RealtimeError::InvalidFilter(
                        "empty broadcast event".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether an incoming event is selected by this filter
    pub fn matches(&self, incoming: &RealtimeEvent) -> bool {
        match (self, &incoming.kind) {
            (
                EventFilter::TableChange {
                    event,
                    schema,
                    table,
                    row_filter,
                },
                EventKind::TableChange {
                    change,
                    schema: in_schema,
                    table: in_table,
                },
            ) => {
                (*event == ChangeKind::All || event == change)
                    && schema == in_schema
                    && table == in_table
                    && row_filter
                        .as_ref()
                        .map_or(true, |f| f.matches(incoming.row()))
            }
            (EventFilter::Broadcast { event }, EventKind::Broadcast { event: in_event }) => {
                event == "*" || event == in_event
            }
            _ => false,
        }
    }
}

/// Scheduling hint carried with a subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Options for creating a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    pub filter: EventFilter,

    #[serde(default)]
    pub priority: Priority,
}

impl SubscribeOptions {
    pub fn new(filter: EventFilter) -> Self {
        Self {
            filter,
            priority: Priority::Normal,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl From<EventFilter> for SubscribeOptions {
    fn from(filter: EventFilter) -> Self {
        Self::new(filter)
    }
}

/// Kind of an incoming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum EventKind {
    TableChange {
        change: ChangeKind,
        schema: String,
        table: String,
    },
    Broadcast {
        event: String,
    },
}

/// An event delivered to subscriber callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    /// Channel the event arrived on
    pub channel: String,

    pub kind: EventKind,

    /// Event payload; table changes carry `new` and `old` row objects
    pub payload: serde_json::Value,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl RealtimeEvent {
    /// Create a table-change event
    pub fn table_change(
        channel: impl Into<String>,
        change: ChangeKind,
        schema: impl Into<String>,
        table: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            kind: EventKind::TableChange {
                change,
                schema: schema.into(),
                table: table.into(),
            },
            payload,
            timestamp: now_millis(),
        }
    }

    /// Create a broadcast event
    pub fn broadcast(
        channel: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            kind: EventKind::Broadcast {
                event: event.into(),
            },
            payload,
            timestamp: now_millis(),
        }
    }

    /// Row a row filter is evaluated against: `new`, then `old`, then the payload
    pub fn row(&self) -> &serde_json::Value {
        let non_empty = |v: &&serde_json::Value| v.as_object().is_some_and(|o| !o.is_empty());
        self.payload
            .get("new")
            .filter(non_empty)
            .or_else(|| self.payload.get("old").filter(non_empty))
            .unwrap_or(&self.payload)
    }
}

/// Outbound broadcast message sent through a transport channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: serde_json::Value,
}

impl BroadcastMessage {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Liveness probe carrying the send time
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", serde_json::json!({ "timestamp": now_millis() }))
    }
}

/// Status reported by a transport channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError(String),
    TimedOut,
}

/// Overall connectivity status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    CircuitOpen,
}

/// Snapshot of connection health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub reconnect_attempts: u32,
    /// Last heartbeat round trip in milliseconds
    pub latency_ms: f64,
    pub subscription_count: usize,
}

/// Read-only view of a registered subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub channel: String,
    pub filter: EventFilter,
    pub priority: Priority,
}

/// Subscriber callback invoked for every matching event
pub type SubscriptionCallback =
    Arc<dyn Fn(&RealtimeEvent) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Wrap a closure as a [`SubscriptionCallback`]
pub fn callback<F>(f: F) -> SubscriptionCallback
where
    F: Fn(&RealtimeEvent) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
