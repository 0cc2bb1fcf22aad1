use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::logging;
use crate::metrics::Metrics;
use crate::rate_limit::{BudgetDisplay, RateBudget, RateLimitError};

pub const TICKETS_PATH: &str = "/api/v2/tickets";

pub fn conversations_path(ticket_id: i64) -> String {
    format!("{}/{}/conversations", TICKETS_PATH, ticket_id)
}

#[derive(Debug, thiserror::Error)]
pub enum FreshdeskError {
    #[error("freshdesk request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("freshdesk returned HTTP {status} for {path}")]
    Http { status: StatusCode, path: String },
    #[error("failed to decode freshdesk response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid freshdesk domain '{0}'")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Raw response of one GET, with the quota it reported.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub budget: Option<RateBudget>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FreshdeskClient {
    pub base_url: String,
    api_key: String,
    http: Client,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl FreshdeskClient {
    pub fn with_policy(
        domain: &str,
        api_key: String,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Result<Self, FreshdeskError> {
        let http = Client::builder().timeout(retry.request_timeout).build()?;
        Ok(Self {
            base_url: normalize_base_url(domain)?,
            api_key,
            http,
            retry,
            metrics,
        })
    }

    fn request_with_retry<F>(&self, mut send: F) -> Result<Response, FreshdeskError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        for attempt in 0..=self.retry.max_retries {
            self.metrics.inc_api_request();
            let response = match send() {
                Ok(resp) => resp,
                Err(err) if attempt < self.retry.max_retries => {
                    let wait = self.backoff(attempt);
                    logging::warn(format!(
                        "freshdesk transport error on attempt {}: {}; retrying in {:?}",
                        attempt + 1,
                        err,
                        wait
                    ));
                    self.metrics.inc_retry();
                    thread::sleep(wait);
                    continue;
                }
                Err(err) => {
                    logging::warn(format!(
                        "freshdesk transport error on final attempt {}: {}",
                        attempt + 1,
                        err
                    ));
                    return Err(FreshdeskError::Request(err));
                }
            };

            if !is_retryable(response.status()) || attempt == self.retry.max_retries {
                if !response.status().is_success() {
                    logging::warn(format!(
                        "freshdesk request completed with status {} after {} attempt(s)",
                        response.status(),
                        attempt + 1
                    ));
                }
                return Ok(response);
            }

            let wait = self.retry_after_or_backoff(&response, attempt);
            logging::debug(format!(
                "freshdesk retryable status {} attempt {} waiting {:?}",
                response.status(),
                attempt + 1,
                wait
            ));
            self.metrics.inc_retry();
            thread::sleep(wait);
        }

        unreachable!("retry loop should always return");
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1_u32 << attempt.min(4);
        self.retry
            .base_backoff
            .saturating_mul(factor)
            .min(self.retry.max_backoff)
    }

    fn retry_after_or_backoff(&self, response: &Response, attempt: usize) -> Duration {
        if let Some(header) = response.headers().get("Retry-After") {
            if let Ok(value) = header.to_str() {
                if let Ok(seconds) = value.trim().parse::<u64>() {
                    return Duration::from_secs(seconds).min(self.retry.max_backoff);
                }
            }
        }
        self.backoff(attempt)
    }

    /// GETs `path` with `query`. Non-success statuses are returned, not raised.
    pub fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, FreshdeskError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.request_with_retry(|| {
            self.http
                .get(&url)
                .basic_auth(&self.api_key, Some("X"))
                .query(query)
                .send()
        })?;

        let status = response.status();
        let budget = parse_rate_budget(response.headers());
        let used = response
            .headers()
            .get("X-Ratelimit-Used-Currentrequest")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        logging::debug(format!(
            "freshdesk GET {} status={} budget={} used_current={}",
            path,
            status,
            BudgetDisplay(budget),
            used
        ));
        let body = response.text()?;
        Ok(ApiResponse {
            status,
            budget,
            body,
        })
    }

    /// Cheapest call that still reports the rate budget.
    pub fn probe(&self) -> Result<Option<RateBudget>, FreshdeskError> {
        let response = self.get(
            TICKETS_PATH,
            &[("page", "1".to_string()), ("per_page", "1".to_string())],
        )?;
        Ok(response.budget)
    }
}

pub fn parse_rate_budget(headers: &HeaderMap) -> Option<RateBudget> {
    let read = |name: &str| -> Option<u64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    Some(RateBudget {
        remaining: read("X-Ratelimit-Remaining")?,
        total: read("X-Ratelimit-Total")?,
    })
}

fn normalize_base_url(raw: &str) -> Result<String, FreshdeskError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FreshdeskError::InvalidBaseUrl(raw.to_string()));
    }

    let mut candidate = trimmed.to_string();

    if candidate.starts_with("https//") {
        candidate = format!("https://{}", candidate.trim_start_matches("https//"));
    } else if candidate.starts_with("http//") {
        candidate = format!("http://{}", candidate.trim_start_matches("http//"));
    } else if !candidate.starts_with("https://") && !candidate.starts_with("http://") {
        if candidate.contains('.') || candidate.contains(':') {
            candidate = format!("https://{candidate}");
        } else {
            candidate = format!("https://{candidate}.freshdesk.com");
        }
    }

    let parsed = reqwest::Url::parse(&candidate)
        .map_err(|_| FreshdeskError::InvalidBaseUrl(raw.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(FreshdeskError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
pub(crate) fn test_client(base_url: String) -> FreshdeskClient {
    FreshdeskClient::with_policy(
        &base_url,
        "key".into(),
        RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(Metrics::new()),
    )
    .expect("client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    #[test]
    fn sends_basic_auth_and_reads_budget_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v2/tickets")
                .query_param("page", "1")
                .header("Authorization", "Basic a2V5Olg=");
            then.status(200)
                .header("X-Ratelimit-Remaining", "42")
                .header("X-Ratelimit-Total", "50")
                .json_body_obj(&serde_json::json!([{"id": 1}]));
        });

        let client = test_client(server.base_url());
        let response = client
            .get(TICKETS_PATH, &[("page", "1".to_string())])
            .expect("get");

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.budget,
            Some(RateBudget {
                remaining: 42,
                total: 50
            })
        );
        assert!(response.body.contains("\"id\""));
    }

    #[test]
    fn missing_budget_headers_yield_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v2/tickets");
            then.status(200).header("X-Ratelimit-Total", "50").body("[]");
        });

        let client = test_client(server.base_url());
        assert_eq!(client.probe().expect("probe"), None);
    }

    #[test]
    fn returns_non_success_without_raising() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v2/tickets/9/conversations");
            then.status(404).body("{\"code\":\"not_found\"}");
        });

        let client = test_client(server.base_url());
        let response = client.get(&conversations_path(9), &[]).expect("get");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        mock.assert_hits(1);
    }

    #[test]
    fn retries_on_429_then_succeeds() {
        use tiny_http::{Header, Response, Server, StatusCode as TinyStatus};

        let server = Server::http("127.0.0.1:0").expect("server start");
        let addr = format!("http://{}", server.server_addr());
        std::thread::spawn(move || {
            let mut requests = server.incoming_requests();

            if let Some(req) = requests.next() {
                let response = Response::empty(TinyStatus(429))
                    .with_header(Header::from_bytes("Retry-After", "0").expect("header"));
                let _ = req.respond(response);
            }

            if let Some(req) = requests.next() {
                let response = Response::from_string("[{\"id\": 7}]")
                    .with_status_code(TinyStatus(200))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    )
                    .with_header(Header::from_bytes("X-Ratelimit-Remaining", "10").expect("header"))
                    .with_header(Header::from_bytes("X-Ratelimit-Total", "100").expect("header"));
                let _ = req.respond(response);
            }
        });

        let client = test_client(addr);
        let response = client
            .get(TICKETS_PATH, &[("page", "1".to_string())])
            .expect("eventually succeeds");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.budget.map(|b| b.remaining), Some(10));
        assert_eq!(client.metrics.snapshot().retries, 1);
    }

    #[test]
    fn gives_up_after_bounded_server_errors() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v2/tickets");
            then.status(503);
        });

        let client = test_client(server.base_url());
        let response = client.get(TICKETS_PATH, &[]).expect("returns last response");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        mock.assert_hits(3);
    }

    #[test]
    fn normalizes_domains_and_urls() {
        assert_eq!(
            normalize_base_url("acme").expect("normalize"),
            "https://acme.freshdesk.com"
        );
        assert_eq!(
            normalize_base_url("acme.freshdesk.com/").expect("normalize"),
            "https://acme.freshdesk.com"
        );
        assert_eq!(
            normalize_base_url("https//acme.freshdesk.com").expect("normalize"),
            "https://acme.freshdesk.com"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080/").expect("normalize"),
            "http://127.0.0.1:8080"
        );
        assert!(normalize_base_url("   ").is_err());
    }
}
