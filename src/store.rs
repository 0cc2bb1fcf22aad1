use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{Conversation, ExportedConversation, ExportedTicket, Persona, Ticket};
use crate::text::strip_email_headers;

const SCHEMA: &str = "
PRAGMA foreign_keys = OFF;
CREATE TABLE IF NOT EXISTS tickets (
  id INTEGER PRIMARY KEY,
  created_at TEXT,
  updated_at TEXT,
  subject TEXT,
  description TEXT,
  severity TEXT,
  region TEXT,
  raw_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  conversation_id INTEGER NOT NULL,
  ticket_id INTEGER NOT NULL REFERENCES tickets(id),
  created_at TEXT,
  persona TEXT NOT NULL,
  body TEXT
);
CREATE INDEX IF NOT EXISTS idx_conversations_conversation_id ON conversations(conversation_id);
CREATE INDEX IF NOT EXISTS idx_conversations_ticket_id ON conversations(ticket_id);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredConversation {
    pub conversation_id: i64,
    pub ticket_id: i64,
    pub created_at: Option<String>,
    pub persona: String,
    pub body: Option<String>,
}

/// Tickets and conversations, keyed for idempotent re-insertion.
///
/// The foreign key from conversations to tickets is declared but not enforced:
/// a range sync stores conversations for tickets that were never stored.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(Path::new(":memory:"))
    }

    pub fn has_ticket(&self, ticket_id: i64) -> Result<bool, rusqlite::Error> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM tickets WHERE id = ?1",
                params![ticket_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Inserts the ticket unless its id is already stored. Existing rows are never updated.
    pub fn store_ticket(&self, ticket: &Ticket) -> Result<StoreOutcome, rusqlite::Error> {
        if self.has_ticket(ticket.id)? {
            return Ok(StoreOutcome::AlreadyPresent);
        }

        let description = ticket.description.as_deref().map(strip_email_headers);
        self.conn.execute(
            "
INSERT INTO tickets(id, created_at, updated_at, subject, description, severity, region, raw_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
",
            params![
                ticket.id,
                ticket.created_at,
                ticket.updated_at,
                ticket.subject,
                description,
                ticket.severity,
                ticket.region,
                ticket.raw.to_string(),
            ],
        )?;
        Ok(StoreOutcome::Inserted)
    }

    /// Inserts the conversation unless its id is already stored.
    pub fn store_conversation(
        &self,
        ticket_id: i64,
        conversation: &Conversation,
    ) -> Result<StoreOutcome, rusqlite::Error> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM conversations WHERE conversation_id = ?1",
                params![conversation.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(StoreOutcome::AlreadyPresent);
        }

        self.conn.execute(
            "
INSERT INTO conversations(conversation_id, ticket_id, created_at, persona, body)
VALUES (?1, ?2, ?3, ?4, ?5)
",
            params![
                conversation.id,
                ticket_id,
                conversation.created_at,
                conversation.persona().as_str(),
                conversation.body,
            ],
        )?;
        Ok(StoreOutcome::Inserted)
    }

    pub fn ticket_count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))
    }

    pub fn conversation_count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
    }

    pub fn conversations_for_ticket(
        &self,
        ticket_id: i64,
    ) -> Result<Vec<StoredConversation>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "
SELECT conversation_id, ticket_id, created_at, persona, body
FROM conversations
WHERE ticket_id = ?1
ORDER BY created_at ASC, id ASC
",
        )?;
        let rows = stmt.query_map(params![ticket_id], |row| {
            Ok(StoredConversation {
                conversation_id: row.get(0)?,
                ticket_id: row.get(1)?,
                created_at: row.get(2)?,
                persona: row.get(3)?,
                body: row.get(4)?,
            })
        })?;
        let conversations = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    /// Stored tickets by ascending id, each with its customer-visible
    /// conversations in ascending creation order.
    pub fn export_tickets(&self) -> Result<Vec<ExportedTicket>, rusqlite::Error> {
        let mut tickets_stmt = self.conn.prepare(
            "
SELECT id, created_at, updated_at, subject, description, severity, region
FROM tickets
ORDER BY id ASC
",
        )?;
        let mut conversations_stmt = self.conn.prepare(
            "
SELECT conversation_id, created_at, persona, body
FROM conversations
WHERE ticket_id = ?1 AND persona NOT IN (?2, ?3)
ORDER BY created_at ASC, id ASC
",
        )?;
        let [internal_a, internal_b] = Persona::internal_labels();

        let tickets = tickets_stmt
            .query_map([], |row| {
                Ok(ExportedTicket {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    updated_at: row.get(2)?,
                    subject: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    severity: row.get(5)?,
                    region: row.get(6)?,
                    conversations: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(tickets.len());
        for mut ticket in tickets {
            ticket.conversations = conversations_stmt
                .query_map(params![ticket.id, internal_a, internal_b], |row| {
                    Ok(ExportedConversation {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        persona: row.get(2)?,
                        body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.push(ticket);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ticket(id: i64, subject: &str) -> Ticket {
        Ticket {
            id,
            created_at: Some("2024-01-01T00:00:00Z".into()),
            updated_at: Some("2024-01-02T00:00:00Z".into()),
            subject: Some(subject.into()),
            description: Some("From: someone\n\nactual body".into()),
            severity: Some("High".into()),
            region: Some("EMEA".into()),
            raw: json!({"id": id, "subject": subject}),
        }
    }

    fn conversation(id: i64, created_at: &str, incoming: bool, private: bool) -> Conversation {
        Conversation {
            id,
            created_at: Some(created_at.into()),
            incoming: Some(incoming),
            private: Some(private),
            body: Some(format!("body {id}")),
        }
    }

    #[test]
    fn ticket_insert_is_idempotent_and_never_updates() {
        let store = Store::open_in_memory().expect("db open");
        assert_eq!(
            store.store_ticket(&ticket(1, "first")).expect("insert"),
            StoreOutcome::Inserted
        );
        assert_eq!(
            store.store_ticket(&ticket(1, "changed")).expect("insert"),
            StoreOutcome::AlreadyPresent
        );
        assert_eq!(store.ticket_count().expect("count"), 1);

        let exported = store.export_tickets().expect("export");
        assert_eq!(exported[0].subject, "first");
        assert_eq!(exported[0].description, "actual body");
    }

    #[test]
    fn conversation_insert_is_idempotent() {
        let store = Store::open_in_memory().expect("db open");
        let conv = conversation(10, "2024-01-01T00:00:00Z", true, false);
        assert_eq!(
            store.store_conversation(1, &conv).expect("insert"),
            StoreOutcome::Inserted
        );
        assert_eq!(
            store.store_conversation(1, &conv).expect("insert"),
            StoreOutcome::AlreadyPresent
        );
        assert_eq!(store.conversation_count().expect("count"), 1);
    }

    #[test]
    fn conversations_may_reference_unknown_tickets() {
        let store = Store::open_in_memory().expect("db open");
        store
            .store_conversation(404, &conversation(1, "2024-01-01T00:00:00Z", false, false))
            .expect("dangling reference allowed");

        let stored = store.conversations_for_ticket(404).expect("read");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].persona, "support agent reply");
        assert_eq!(store.ticket_count().expect("count"), 0);
    }

    #[test]
    fn export_excludes_internal_personas_and_orders_by_creation() {
        let store = Store::open_in_memory().expect("db open");
        store.store_ticket(&ticket(2, "second")).expect("insert");
        store.store_ticket(&ticket(1, "first")).expect("insert");

        store
            .store_conversation(1, &conversation(13, "2024-01-03T00:00:00Z", false, false))
            .expect("insert");
        store
            .store_conversation(1, &conversation(11, "2024-01-01T00:00:00Z", true, false))
            .expect("insert");
        store
            .store_conversation(1, &conversation(12, "2024-01-02T00:00:00Z", false, true))
            .expect("insert");
        store
            .store_conversation(1, &conversation(14, "2024-01-04T00:00:00Z", true, true))
            .expect("insert");
        store
            .store_conversation(
                1,
                &Conversation {
                    incoming: None,
                    ..conversation(15, "2024-01-05T00:00:00Z", true, false)
                },
            )
            .expect("insert");

        let exported = store.export_tickets().expect("export");
        assert_eq!(
            exported.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let first = &exported[0];
        assert_eq!(
            first.conversations.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![11, 13, 15]
        );
        assert!(first
            .conversations
            .iter()
            .all(|c| !Persona::internal_labels().contains(&c.persona.as_str())));
        assert!(exported[1].conversations.is_empty());
    }

    #[test]
    fn reopening_a_file_keeps_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tickets.db");
        {
            let store = Store::open(&path).expect("db open");
            store.store_ticket(&ticket(7, "persisted")).expect("insert");
        }
        let store = Store::open(&path).expect("db reopen");
        assert!(store.has_ticket(7).expect("lookup"));
        assert_eq!(
            store.store_ticket(&ticket(7, "again")).expect("insert"),
            StoreOutcome::AlreadyPresent
        );
    }
}
