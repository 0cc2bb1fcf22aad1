use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role label derived from a conversation entry's `incoming` and `private` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persona {
    Customer,
    InternalCustomerSide,
    AgentReply,
    InternalSupport,
    Unknown,
}

impl Persona {
    /// Total over every flag combination; a missing flag yields `Unknown`.
    pub fn from_flags(incoming: Option<bool>, private: Option<bool>) -> Self {
        match (incoming, private) {
            (Some(true), Some(false)) => Persona::Customer,
            (Some(true), Some(true)) => Persona::InternalCustomerSide,
            (Some(false), Some(false)) => Persona::AgentReply,
            (Some(false), Some(true)) => Persona::InternalSupport,
            _ => Persona::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Customer => "Customer",
            Persona::InternalCustomerSide => "internal-customer-side discussion",
            Persona::AgentReply => "support agent reply",
            Persona::InternalSupport => "internal support discussion",
            Persona::Unknown => "unknown",
        }
    }

    pub fn internal_labels() -> [&'static str; 2] {
        [
            Persona::InternalCustomerSide.as_str(),
            Persona::InternalSupport.as_str(),
        ]
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub region: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub created_at: Option<String>,
    pub incoming: Option<bool>,
    pub private: Option<bool>,
    pub body: Option<String>,
}

impl Conversation {
    pub fn persona(&self) -> Persona {
        Persona::from_flags(self.incoming, self.private)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedConversation {
    pub id: i64,
    pub created_at: Option<String>,
    pub persona: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
}

/// One line of the export file, also the input record of the training formatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTicket {
    #[serde(alias = "ticket_id")]
    pub id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subject: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub conversations: Vec<ExportedConversation>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn severity_label(priority: &Value) -> Option<String> {
    match priority {
        Value::Number(n) => Some(match n.as_i64() {
            Some(1) => "Low".to_string(),
            Some(2) => "Medium".to_string(),
            Some(3) => "High".to_string(),
            Some(4) => "Urgent".to_string(),
            _ => n.to_string(),
        }),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

impl Ticket {
    /// Maps a raw Freshdesk ticket record. Returns `None` without a numeric `id`.
    pub fn from_record(record: &Value) -> Option<Self> {
        let id = record.get("id").and_then(Value::as_i64)?;
        let description =
            str_field(record, "description_text").or_else(|| str_field(record, "description"));
        let region = record
            .get("custom_fields")
            .and_then(|fields| fields.get("cf_region"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .or_else(|| str_field(record, "region"));

        Some(Self {
            id,
            created_at: str_field(record, "created_at"),
            updated_at: str_field(record, "updated_at"),
            subject: str_field(record, "subject"),
            description,
            severity: record.get("priority").and_then(severity_label),
            region,
            raw: record.clone(),
        })
    }
}

impl Conversation {
    /// Maps a raw Freshdesk conversation record. Returns `None` without a numeric `id`.
    pub fn from_record(record: &Value) -> Option<Self> {
        let id = record.get("id").and_then(Value::as_i64)?;
        Some(Self {
            id,
            created_at: str_field(record, "created_at"),
            incoming: record.get("incoming").and_then(Value::as_bool),
            private: record.get("private").and_then(Value::as_bool),
            body: str_field(record, "body_text").or_else(|| str_field(record, "body")),
        })
    }
}
