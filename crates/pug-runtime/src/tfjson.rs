//! Terraform machine-readable UI messages.
//!
//! With `-json`, terraform prints one JSON object per line. Every
//! message shares an envelope (`@level`, `@message`, `@module`,
//! `@timestamp`, `type`) and carries a payload that depends on `type`.
//!
//! ```text
//! {"@level":"info","@message":"Plan: 1 to add, 0 to change, 0 to destroy.","@module":"terraform.ui",
//!  "@timestamp":"2024-05-01T10:00:00.000000+00:00","changes":{"add":1,"change":0,"remove":0,"operation":"plan"},
//!  "type":"change_summary"}
//! ```
//!
//! Messages of a type not modelled here parse as [`Body::Unknown`];
//! lines that are not JSON at all are skipped.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One line of machine-readable output.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub level: String,
    pub message: String,
    pub module: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub body: Body,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "@level", default)]
    level: String,
    #[serde(rename = "@message", default)]
    message: String,
    #[serde(rename = "@module", default)]
    module: String,
    #[serde(rename = "@timestamp", default)]
    timestamp: Option<DateTime<FixedOffset>>,
}

/// Type-specific payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Version {
        #[serde(default)]
        terraform: Option<String>,
        #[serde(default)]
        tofu: Option<String>,
        ui: String,
    },
    PlannedChange {
        change: ResourceChange,
    },
    ResourceDrift {
        change: ResourceChange,
    },
    ChangeSummary {
        changes: Changes,
    },
    Outputs {
        outputs: BTreeMap<String, Output>,
    },
    Diagnostic {
        diagnostic: Diagnostic,
    },
    ApplyStart {
        hook: Hook,
    },
    ApplyProgress {
        hook: Hook,
    },
    ApplyComplete {
        hook: Hook,
    },
    ApplyErrored {
        hook: Hook,
    },
    ProvisionStart {
        hook: Hook,
    },
    ProvisionProgress {
        hook: Hook,
    },
    ProvisionComplete {
        hook: Hook,
    },
    ProvisionErrored {
        hook: Hook,
    },
    RefreshStart {
        hook: Hook,
    },
    RefreshComplete {
        hook: Hook,
    },
    #[serde(other)]
    Unknown,
}

/// What terraform will do, or did, to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Noop,
    Create,
    Read,
    Update,
    Replace,
    Delete,
    Move,
    Import,
    Forget,
    #[serde(other)]
    Other,
}

/// A resource instance address broken into parts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceAddr {
    pub addr: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub implied_provider: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_name: String,
    #[serde(default)]
    pub resource_key: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceChange {
    pub resource: ResourceAddr,
    pub action: Action,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub previous_resource: Option<ResourceAddr>,
    #[serde(default)]
    pub importing: Option<Importing>,
    #[serde(default)]
    pub generated_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Importing {
    #[serde(default)]
    pub id: String,
}

/// Counts from a `change_summary` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Changes {
    #[serde(default)]
    pub add: u32,
    #[serde(default)]
    pub change: u32,
    #[serde(default)]
    pub remove: u32,
    #[serde(default)]
    pub import: u32,
    #[serde(default)]
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub action: Option<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default)]
    pub snippet: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Range {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub byte: u32,
}

/// Payload of apply, provision and refresh hook messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hook {
    pub resource: ResourceAddr,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub elapsed_seconds: Option<u64>,
    #[serde(default)]
    pub id_key: Option<String>,
    #[serde(default)]
    pub id_value: Option<String>,
    #[serde(default)]
    pub provisioner: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl Message {
    /// Parses a single line.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the line is not a message.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        let envelope = Envelope::deserialize(&value)?;
        let body = Body::deserialize(&value)?;
        Ok(Self {
            level: envelope.level,
            message: envelope.message,
            module: envelope.module,
            timestamp: envelope.timestamp,
            body,
        })
    }

    /// Returns `true` for error diagnostics.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == "error"
    }
}

/// Parses newline-delimited messages, skipping lines that do not parse.
#[must_use]
pub fn parse_messages(output: &[u8]) -> Vec<Message> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| match Message::parse(l) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::trace!(error = %e, "skipping unparseable json line");
                None
            }
        })
        .collect()
}

/// Returns the last `change_summary` in `messages`.
#[must_use]
pub fn change_summary(messages: &[Message]) -> Option<Changes> {
    messages.iter().rev().find_map(|m| match &m.body {
        Body::ChangeSummary { changes } => Some(changes.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{"@level":"info","@message":"Terraform 1.8.2","@module":"terraform.ui","@timestamp":"2024-05-01T10:00:00.000000+00:00","terraform":"1.8.2","type":"version","ui":"1.2"}
{"@level":"info","@message":"random_pet.animal: Plan to create","@module":"terraform.ui","@timestamp":"2024-05-01T10:00:01.000000+00:00","change":{"resource":{"addr":"random_pet.animal","module":"","resource":"random_pet.animal","implied_provider":"random","resource_type":"random_pet","resource_name":"animal","resource_key":null},"action":"create"},"type":"planned_change"}
not json at all
{"@level":"info","@message":"Plan: 1 to add, 0 to change, 0 to destroy.","@module":"terraform.ui","@timestamp":"2024-05-01T10:00:01.000000+00:00","changes":{"add":1,"change":0,"import":0,"remove":0,"operation":"plan"},"type":"change_summary"}
{"@level":"info","@message":"Outputs: 1","@module":"terraform.ui","@timestamp":"2024-05-01T10:00:01.000000+00:00","outputs":{"name":{"sensitive":false,"action":"create"}},"type":"outputs"}
{"@level":"info","@message":"something new","@module":"terraform.ui","@timestamp":"2024-05-01T10:00:01.000000+00:00","type":"test_summary"}
"#;

    #[test]
    fn parses_plan_stream() {
        let msgs = parse_messages(PLAN.as_bytes());
        assert_eq!(msgs.len(), 5);

        assert!(matches!(
            &msgs[0].body,
            Body::Version { terraform: Some(v), .. } if v == "1.8.2"
        ));
        match &msgs[1].body {
            Body::PlannedChange { change } => {
                assert_eq!(change.resource.addr, "random_pet.animal");
                assert_eq!(change.action, Action::Create);
            }
            other => panic!("unexpected body: {other:?}"),
        }
        assert_eq!(msgs[4].body, Body::Unknown);
        assert!(msgs[0].timestamp.is_some());
    }

    #[test]
    fn finds_last_change_summary() {
        let msgs = parse_messages(PLAN.as_bytes());
        let changes = change_summary(&msgs).unwrap();
        assert_eq!((changes.add, changes.change, changes.remove), (1, 0, 0));
        assert_eq!(changes.operation, "plan");
    }

    #[test]
    fn parses_diagnostic_and_hook() {
        let diag = r#"{"@level":"error","@message":"Error: bad","@module":"terraform.ui","diagnostic":{"severity":"error","summary":"bad","detail":"very bad","range":{"filename":"main.tf","start":{"line":1,"column":1,"byte":0},"end":{"line":1,"column":5,"byte":4}}},"type":"diagnostic"}"#;
        let msg = Message::parse(diag).unwrap();
        assert!(msg.is_error());
        match msg.body {
            Body::Diagnostic { diagnostic } => {
                assert_eq!(diagnostic.summary, "bad");
                assert_eq!(diagnostic.range.unwrap().end.column, 5);
            }
            other => panic!("unexpected body: {other:?}"),
        }

        let hook = r#"{"@level":"info","@message":"random_pet.animal: Creation complete after 0s [id=x]","hook":{"resource":{"addr":"random_pet.animal"},"action":"create","id_key":"id","id_value":"x","elapsed_seconds":0},"type":"apply_complete"}"#;
        match Message::parse(hook).unwrap().body {
            Body::ApplyComplete { hook } => {
                assert_eq!(hook.elapsed_seconds, Some(0));
                assert_eq!(hook.id_value.as_deref(), Some("x"));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn message_without_type_is_rejected() {
        assert!(Message::parse(r#"{"@level":"info"}"#).is_err());
    }
}
