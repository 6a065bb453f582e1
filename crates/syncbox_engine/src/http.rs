//! HTTP binding of [`SyncTransport`].
//!
//! The actual HTTP client is abstracted behind a trait so callers can
//! plug in reqwest, hyper, or an in-process loopback for tests. The
//! request deadline belongs to the client implementation; the engine
//! adds no timeout of its own.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use std::future::Future;
use syncbox_protocol::{decode_message_list, ChangeMessage};

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Errors returned here are connect/send failures and are treated as
/// retryable transport errors; protocol-level rejection is expressed
/// through the response status instead.
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST with a bearer credential and a JSON body.
    fn post(
        &self,
        url: &str,
        bearer: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<HttpResponse, String>> + Send;

    /// Sends a GET with a bearer credential.
    fn get(&self, url: &str, bearer: &str)
        -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

/// [`SyncTransport`] over HTTP: `POST /sync` and `GET /sync/changes`.
pub struct HttpSyncTransport<C: HttpClient> {
    base_url: String,
    bearer: String,
    client: C,
}

impl<C: HttpClient> HttpSyncTransport<C> {
    /// Creates a transport against a base URL with a bearer credential.
    pub fn new(base_url: impl Into<String>, bearer: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            bearer: bearer.into(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(response: &HttpResponse) -> SyncResult<()> {
        match response.status {
            status if (200..300).contains(&status) => Ok(()),
            401 | 403 => Err(SyncError::Auth(format!("status {}", response.status))),
            status => Err(SyncError::Server(status)),
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpSyncTransport<C> {
    fn post_change(&self, msg: &ChangeMessage) -> impl Future<Output = SyncResult<()>> + Send {
        let encoded = msg.encode();
        async move {
            let body = encoded?;
            let url = format!("{}/sync", self.base_url);
            let response = self
                .client
                .post(&url, &self.bearer, body)
                .await
                .map_err(SyncError::transport_retryable)?;
            Self::classify(&response)
        }
    }

    fn fetch_changes(&self) -> impl Future<Output = SyncResult<Vec<ChangeMessage>>> + Send {
        async move {
            let url = format!("{}/sync/changes", self.base_url);
            let response = self
                .client
                .get(&url, &self.bearer)
                .await
                .map_err(SyncError::transport_retryable)?;
            Self::classify(&response)?;
            Ok(decode_message_list(&response.body)?)
        }
    }
}
