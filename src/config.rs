//! Client configuration.
//!
//! `ClientConfig` collects everything the HTTP client and the engines need:
//! endpoint, concurrency, timeout/retry policy, and the set of statuses that
//! should abort a call. Defaults are deliberately polite toward the backend —
//! one user at full tilt can overwhelm it, so the default concurrency is well
//! below the observed optimum.

use std::collections::HashSet;
use std::time::Duration;

use crate::api::CdbStatus;

/// Default endpoint of the position database.
pub const DEFAULT_BASE_URL: &str = "https://www.chessdb.cn/cdb.php";

/// Default number of concurrent requests. Polite rather than optimal.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// Default per-call HTTP timeout (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default retry budget for transient HTTP failures.
pub const DEFAULT_MAX_RETRIES: u32 = 1000;

/// Default delay between retries (20 seconds).
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 20;

/// Endgame tablebase metric selector for query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgtbMetric {
    Dtm,
    Dtz,
}

impl EgtbMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            EgtbMetric::Dtm => "dtm",
            EgtbMetric::Dtz => "dtz",
        }
    }
}

/// Optional parameters accepted by most backend actions.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Include unknown moves in query responses.
    pub show_all: bool,
    /// Enable backend auto-queueing of queried positions.
    pub learn: bool,
    /// Request tablebase data in the given metric.
    pub egtb_metric: Option<EgtbMetric>,
    /// Show only tablebase data.
    pub endgame: bool,
}

impl QueryOptions {
    /// Render the set options as query parameters.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.show_all {
            out.push(("showall", "1".to_string()));
        }
        if self.learn {
            out.push(("learn", "1".to_string()));
        }
        if let Some(metric) = self.egtb_metric {
            out.push(("egtbmetric", metric.as_str().to_string()));
        }
        if self.endgame {
            out.push(("endgame", "1".to_string()));
        }
        out
    }
}

/// Configuration for [`CdbClient`](crate::api::CdbClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend endpoint URL.
    pub base_url: String,
    /// Concurrency used by the engines built on this client.
    pub concurrency: usize,
    /// Caller identification, prepended to the User-Agent.
    pub user: String,
    /// Per-call HTTP timeout.
    pub timeout: Duration,
    /// How many times to retry a transient HTTP failure before giving up.
    pub max_retries: u32,
    /// Fixed delay between retries.
    pub retry_delay: Duration,
    /// Transparently clear the per-IP rate limit and retry once instead of
    /// raising on `LimitExceeded`.
    pub autoclear: bool,
    /// Statuses that abort the call with [`CdbError::Rejected`](crate::errors::CdbError).
    pub raise_on: HashSet<CdbStatus>,
    /// Options attached to every request.
    pub options: QueryOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            user: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            autoclear: false,
            raise_on: HashSet::from([CdbStatus::InvalidBoard, CdbStatus::LimitExceeded]),
            options: QueryOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Set the backend endpoint.
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    /// Set the engine concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the caller identification for the User-Agent.
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget and inter-retry delay.
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Enable or disable automatic rate-limit clearing.
    pub fn with_autoclear(mut self, autoclear: bool) -> Self {
        self.autoclear = autoclear;
        self
    }

    /// Replace the set of statuses that abort a call.
    pub fn with_raise_on(mut self, raise_on: HashSet<CdbStatus>) -> Self {
        self.raise_on = raise_on;
        self
    }

    /// Set the options attached to every request.
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// The full User-Agent string sent with each request.
    pub fn user_agent(&self) -> String {
        if self.user.is_empty() {
            env!("CARGO_PKG_NAME").to_string()
        } else {
            format!("{}/{}", self.user, env!("CARGO_PKG_NAME"))
        }
    }
}
