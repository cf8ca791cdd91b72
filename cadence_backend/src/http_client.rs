use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_http_client() -> Result<reqwest::Client> {
    build_http_client_with_timeout(Some(DEFAULT_REQUEST_TIMEOUT))
}

/// System proxy discovery is opt-in via `CADENCE_ENABLE_SYSTEM_PROXY`; if it
/// fails the client is rebuilt with `no_proxy`.
pub fn build_http_client_with_timeout(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("CADENCE_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => {
                tracing::warn!(
                    "HTTP client initialization with system proxy discovery failed ({}); retrying with no_proxy",
                    error
                );
            }
        }
    }

    attempt_build(timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("cadence/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
