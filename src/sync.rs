use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::freshdesk::{conversations_path, FreshdeskClient, FreshdeskError, TICKETS_PATH};
use crate::logging;
use crate::metrics::Metrics;
use crate::model::{Conversation, Ticket};
use crate::pagination::{FetchOptions, PaginatedFetcher};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::store::{Store, StoreOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Every ticket the list endpoint returns.
    Full,
    /// Tickets updated since an RFC 3339 timestamp.
    UpdatedSince(String),
    /// Inclusive id range, filtered client-side from the full list.
    Range { low: i64, high: i64 },
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// When a ticket row already exists, trust that its conversations were
    /// stored by an earlier run and do not fetch them again.
    pub assume_conversations_synced_if_ticket_exists: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            assume_conversations_synced_if_ticket_exists: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketConversations {
    pub ticket_id: i64,
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub tickets_seen: usize,
    pub tickets_inserted: usize,
    pub tickets_skipped: usize,
    pub conversations_inserted: usize,
    pub conversations_skipped: usize,
    pub failed_tickets: Vec<(i64, String)>,
    pub fetched: Vec<TicketConversations>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(FreshdeskError),
    #[error("sync aborted: {0}")]
    RateLimitExceeded(RateLimitError),
    #[error("ticket store failed: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("invalid --since value '{0}': expected YYYY-MM-DD or an RFC 3339 timestamp")]
    InvalidSince(String),
}

impl From<FreshdeskError> for SyncError {
    fn from(err: FreshdeskError) -> Self {
        match err {
            FreshdeskError::RateLimit(inner) => SyncError::RateLimitExceeded(inner),
            other => SyncError::Api(other),
        }
    }
}

/// Accepts `YYYY-MM-DD` or RFC 3339 and renders `YYYY-MM-DDTHH:MM:SSZ`.
pub fn normalize_since(raw: &str) -> Result<String, SyncError> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| SyncError::InvalidSince(raw.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| SyncError::InvalidSince(raw.to_string()))?;
    Ok(midnight
        .and_utc()
        .to_rfc3339_opts(SecondsFormat::Secs, true))
}

struct Progress {
    total: usize,
    current: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self { total, current: 0 }
    }

    fn advance(&mut self, ticket_id: i64) {
        self.current += 1;
        logging::info(format!(
            "[{}/{}] ticket {}",
            self.current, self.total, ticket_id
        ));
    }
}

pub struct SyncEngine {
    client: FreshdeskClient,
    limiter: RateLimiter,
    options: FetchOptions,
    policy: SyncPolicy,
    metrics: Arc<Metrics>,
}

impl SyncEngine {
    pub fn new(
        client: FreshdeskClient,
        limiter: RateLimiter,
        options: FetchOptions,
        policy: SyncPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            limiter,
            options,
            policy,
            metrics,
        }
    }

    fn fetcher(&self) -> PaginatedFetcher<'_> {
        PaginatedFetcher::new(&self.client, &self.limiter, &self.options)
    }

    pub fn run(&self, store: &Store, mode: &SyncMode) -> Result<SyncReport, SyncError> {
        match mode {
            SyncMode::Full => {
                logging::info("full sync of all tickets");
                let tickets = self.fetch_tickets(&[])?;
                self.sync_tickets(store, tickets)
            }
            SyncMode::UpdatedSince(since) => {
                logging::info(format!("incremental sync of tickets updated since {}", since));
                let tickets = self.fetch_tickets(&[("updated_since", since.clone())])?;
                self.sync_tickets(store, tickets)
            }
            SyncMode::Range { low, high } => self.sync_range(store, *low, *high),
        }
    }

    /// List failures propagate; only per-ticket conversation fetches are tolerated.
    fn fetch_tickets(&self, filter: &[(&str, String)]) -> Result<Vec<Ticket>, SyncError> {
        let listing = self.fetcher().fetch_all(TICKETS_PATH, filter)?;
        if let Some(status) = listing.stopped_on {
            logging::warn(format!(
                "ticket listing stopped early on HTTP {}; continuing with {} record(s)",
                status,
                listing.records.len()
            ));
        }
        let tickets: Vec<Ticket> = listing
            .records
            .iter()
            .filter_map(|record| {
                let ticket = Ticket::from_record(record);
                if ticket.is_none() {
                    logging::warn("skipping ticket record without numeric id");
                }
                ticket
            })
            .collect();
        logging::info(format!("fetched {} ticket(s)", tickets.len()));
        Ok(tickets)
    }

    /// A conversation listing cut short by an error status is a failure: a
    /// partial thread must not pass for a complete one.
    fn fetch_conversations(&self, ticket_id: i64) -> Result<Vec<Conversation>, FreshdeskError> {
        let path = conversations_path(ticket_id);
        let listing = self.fetcher().fetch_all(&path, &[])?;
        if let Some(status) = listing.stopped_on {
            return Err(FreshdeskError::Http { status, path });
        }
        Ok(listing
            .records
            .iter()
            .filter_map(|record| {
                let conversation = Conversation::from_record(record);
                if conversation.is_none() {
                    logging::warn(format!(
                        "skipping conversation without numeric id on ticket {}",
                        ticket_id
                    ));
                }
                conversation
            })
            .collect())
    }

    /// New tickets are written only once their conversations were fetched, so
    /// a ticket whose fetch failed is picked up again by the next run.
    fn sync_tickets(&self, store: &Store, tickets: Vec<Ticket>) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut progress = Progress::new(tickets.len());

        for ticket in tickets {
            progress.advance(ticket.id);
            report.tickets_seen += 1;

            let known = store.has_ticket(ticket.id)?;
            if known && self.policy.assume_conversations_synced_if_ticket_exists {
                logging::debug(format!(
                    "ticket {} already stored, skipping conversations",
                    ticket.id
                ));
                report.tickets_skipped += 1;
                self.metrics.inc_ticket_skipped();
                continue;
            }

            let Some(conversations) = self.try_fetch_conversations(ticket.id, &mut report)? else {
                continue;
            };

            match store.store_ticket(&ticket)? {
                StoreOutcome::Inserted => {
                    report.tickets_inserted += 1;
                    self.metrics.inc_ticket_inserted();
                }
                StoreOutcome::AlreadyPresent => {
                    report.tickets_skipped += 1;
                    self.metrics.inc_ticket_skipped();
                }
            }

            self.store_conversations(store, ticket.id, conversations, &mut report)?;
        }

        Ok(report)
    }

    fn sync_range(&self, store: &Store, low: i64, high: i64) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        if low > high {
            logging::error(format!(
                "invalid range: low ({}) must be less than or equal to high ({})",
                low, high
            ));
            return Ok(report);
        }

        logging::info(format!("range sync of tickets {} - {}", low, high));
        let in_range: Vec<Ticket> = self
            .fetch_tickets(&[])?
            .into_iter()
            .filter(|ticket| (low..=high).contains(&ticket.id))
            .collect();

        let mut progress = Progress::new(in_range.len());
        for ticket in in_range {
            progress.advance(ticket.id);
            report.tickets_seen += 1;
            if let Some(conversations) = self.try_fetch_conversations(ticket.id, &mut report)? {
                self.store_conversations(store, ticket.id, conversations, &mut report)?;
            }
        }

        Ok(report)
    }

    /// `Ok(None)` means the failure was recorded in the report.
    fn try_fetch_conversations(
        &self,
        ticket_id: i64,
        report: &mut SyncReport,
    ) -> Result<Option<Vec<Conversation>>, SyncError> {
        match self.fetch_conversations(ticket_id) {
            Ok(conversations) => Ok(Some(conversations)),
            Err(FreshdeskError::RateLimit(err)) => Err(SyncError::RateLimitExceeded(err)),
            Err(err) => {
                logging::warn(format!(
                    "failed fetching conversations for ticket {}: {}",
                    ticket_id, err
                ));
                report.failed_tickets.push((ticket_id, err.to_string()));
                Ok(None)
            }
        }
    }

    fn store_conversations(
        &self,
        store: &Store,
        ticket_id: i64,
        conversations: Vec<Conversation>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for conversation in &conversations {
            match store.store_conversation(ticket_id, conversation)? {
                StoreOutcome::Inserted => {
                    report.conversations_inserted += 1;
                    self.metrics.inc_conversation_inserted();
                }
                StoreOutcome::AlreadyPresent => {
                    report.conversations_skipped += 1;
                    self.metrics.inc_conversation_skipped();
                }
            }
        }

        report.fetched.push(TicketConversations {
            ticket_id,
            conversations,
        });
        Ok(())
    }
}
