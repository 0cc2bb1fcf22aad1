use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::freshdesk::{FreshdeskClient, FreshdeskError};
use crate::logging;
use crate::rate_limit::RateLimiter;

/// Hard ceiling against an API that never returns an empty page.
pub const DEFAULT_MAX_PAGES: u32 = 300;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub per_page: u32,
    /// Sleep after every request.
    pub request_delay: Duration,
    pub max_pages: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            per_page: 100,
            request_delay: Duration::ZERO,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Records gathered from a paged endpoint, and the status that cut the walk
/// short when a page came back non-success.
#[derive(Debug, Default)]
pub struct Listing {
    pub records: Vec<Value>,
    pub stopped_on: Option<StatusCode>,
}

/// Walks a paged collection endpoint, one request at a time.
#[derive(Debug, Clone, Copy)]
pub struct PaginatedFetcher<'a> {
    client: &'a FreshdeskClient,
    limiter: &'a RateLimiter,
    options: &'a FetchOptions,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(
        client: &'a FreshdeskClient,
        limiter: &'a RateLimiter,
        options: &'a FetchOptions,
    ) -> Self {
        Self {
            client,
            limiter,
            options,
        }
    }

    /// Requests pages 1, 2, 3, ... of `path` and concatenates them in order.
    ///
    /// Stops at the first empty page, at the first non-success status (logged,
    /// pages collected so far are kept and the status is reported in
    /// `stopped_on`), or after `max_pages` requests.
    pub fn fetch_all(
        &self,
        path: &str,
        filter: &[(&str, String)],
    ) -> Result<Listing, FreshdeskError> {
        let mut listing = Listing::default();

        for page in 1..=self.options.max_pages {
            let mut query: Vec<(&str, String)> = filter.to_vec();
            query.push(("page", page.to_string()));
            query.push(("per_page", self.options.per_page.to_string()));

            let response = self.client.get(path, &query)?;
            self.limiter
                .after_response(response.budget, || self.client.probe())?;
            if !self.options.request_delay.is_zero() {
                thread::sleep(self.options.request_delay);
            }

            if !response.status.is_success() {
                logging::warn(format!(
                    "stopping pagination of {} at page {}: HTTP {}: {}",
                    path,
                    page,
                    response.status,
                    truncate(&response.body, 300)
                ));
                listing.stopped_on = Some(response.status);
                break;
            }

            let records: Vec<Value> =
                serde_json::from_str(&response.body).map_err(|source| {
                    FreshdeskError::Decode {
                        source,
                        body: truncate(&response.body, 1000),
                    }
                })?;

            logging::debug(format!(
                "fetched {} page {} with {} record(s)",
                path,
                page,
                records.len()
            ));

            if records.is_empty() {
                break;
            }
            listing.records.extend(records);

            if page == self.options.max_pages {
                logging::warn(format!(
                    "pagination of {} reached the {} page ceiling; results may be incomplete",
                    path, self.options.max_pages
                ));
                break;
            }
        }

        Ok(listing)
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
