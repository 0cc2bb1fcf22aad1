use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging;

#[derive(Debug, Default)]
pub struct Metrics {
    api_requests: AtomicU64,
    retries: AtomicU64,
    rate_limit_pauses: AtomicU64,
    tickets_inserted: AtomicU64,
    tickets_skipped: AtomicU64,
    conversations_inserted: AtomicU64,
    conversations_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub api_requests: u64,
    pub retries: u64,
    pub rate_limit_pauses: u64,
    pub tickets_inserted: u64,
    pub tickets_skipped: u64,
    pub conversations_inserted: u64,
    pub conversations_skipped: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limit_pause(&self) {
        self.rate_limit_pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ticket_inserted(&self) {
        self.tickets_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ticket_skipped(&self) {
        self.tickets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversation_inserted(&self) {
        self.conversations_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversation_skipped(&self) {
        self.conversations_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_requests: self.api_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limit_pauses: self.rate_limit_pauses.load(Ordering::Relaxed),
            tickets_inserted: self.tickets_inserted.load(Ordering::Relaxed),
            tickets_skipped: self.tickets_skipped.load(Ordering::Relaxed),
            conversations_inserted: self.conversations_inserted.load(Ordering::Relaxed),
            conversations_skipped: self.conversations_skipped.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        logging::info(format!(
            "metrics api_requests={} retries={} rate_limit_pauses={} tickets_inserted={} tickets_skipped={} conversations_inserted={} conversations_skipped={}",
            s.api_requests,
            s.retries,
            s.rate_limit_pauses,
            s.tickets_inserted,
            s.tickets_skipped,
            s.conversations_inserted,
            s.conversations_skipped
        ));
    }
}
