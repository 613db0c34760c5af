//! Blocking HTTP plumbing shared by the remote backends.

use std::time::Duration;

use reqwest::blocking::{Client, Response};

use crate::error::{LogBookError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("logbook/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-2xx response into a backend error carrying the body.
pub(crate) fn check(backend: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(LogBookError::Backend {
        backend,
        message: format!("HTTP {status}: {body}"),
    })
}
