//! Provider adapters implementing [`ClientWrapper`](crate::client_wrapper::ClientWrapper).
//!
//! [`openai`] carries the full OpenAI-compatible chat-completions transport;
//! [`anthropic`] and [`gemini`] point the same transport at the respective
//! vendor's compatibility endpoint, so swapping providers only requires a
//! different constructor.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with connection pooling.
    ///
    /// One pool for the whole process avoids DNS/TLS churn when several agents
    /// talk to the same provider concurrently.  Settings: up to 100 idle
    /// connections per host, 90 s idle timeout, 60 s TCP keepalive, 30 s
    /// connect timeout.
    static ref HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Clone the process-wide pooled HTTP client.
pub(crate) fn shared_http_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}
