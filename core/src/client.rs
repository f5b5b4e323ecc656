//! Request pipeline: build, send, evaluate, decode.
//!
//! # Design
//! `Client` holds a shared `Transport` and a default timeout and carries no
//! other state between calls. Each call is split the same way: the `Request`
//! is built into an `HttpRequest`, the transport executes it, and `evaluate`
//! turns the `HttpResponse` into either the raw body or an `ApiError`. The
//! JSON conveniences layer on top of the raw body.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ApiError, ErrorModel, TransportError};
use crate::http::HttpResponse;
use crate::operation::{Operation, OperationHandle};
use crate::request::Request;
use crate::transport::{ReqwestTransport, Transport};

/// Asynchronous HTTP client over a pluggable `Transport`.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    /// Build a client over `reqwest` using the configured user agent and timeout.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::new(Arc::new(transport), config.timeout))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `request` and return the raw body of an acceptable response.
    pub async fn send<E: ErrorModel>(&self, request: Request<E>) -> Result<Vec<u8>, ApiError<E>> {
        let acceptable = request.acceptable_range().clone();
        let http = request.build(self.default_timeout)?;
        debug!(method = %http.method, url = %http.url, "sending request");

        let url = http.url.clone();
        let response = self.transport.execute(http).await.map_err(|e| {
            warn!(url = %url, error = %e, "transport failure");
            ApiError::Transport(e)
        })?;
        evaluate(response, &acceptable)
    }

    /// Send `request` and cast the JSON body to shape `S`.
    ///
    /// A body that is not JSON is an error; JSON that does not fit `S` yields
    /// `Ok(None)`.
    pub async fn fetch_json<S, E>(&self, request: Request<E>) -> Result<Option<S>, ApiError<E>>
    where
        S: DeserializeOwned,
        E: ErrorModel,
    {
        let body = self.send(request).await?;
        cast_json(&body)
    }

    /// Send `request` and decode the body into `D`.
    pub async fn fetch<D, E>(&self, request: Request<E>) -> Result<D, ApiError<E>>
    where
        D: DeserializeOwned,
        E: ErrorModel,
    {
        let body = self.send(request).await?;
        decode(&body)
    }

    /// Wrap a `fetch` call into an operation for a dispatcher queue.
    pub fn fetch_operation<D, E>(
        &self,
        label: impl Into<String>,
        request: Request<E>,
    ) -> (Operation<D, ApiError<E>>, OperationHandle<D, ApiError<E>>)
    where
        D: DeserializeOwned + Send + 'static,
        E: ErrorModel,
    {
        let client = self.clone();
        Operation::with_handle(label, move || async move { client.fetch(request).await })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Turn a transport reply into the raw body or the matching `ApiError`.
pub fn evaluate<E: ErrorModel>(
    response: HttpResponse,
    acceptable: &RangeInclusive<u16>,
) -> Result<Vec<u8>, ApiError<E>> {
    let body = response.body.ok_or(ApiError::NoData)?;
    let status = response.status.ok_or(ApiError::NoResponse)?;

    if acceptable.contains(&status) {
        return Ok(body);
    }

    warn!(status, "unacceptable status code");
    if !E::DECODE {
        return Err(ApiError::UnacceptableStatus(status));
    }
    match serde_json::from_slice::<E>(&body) {
        Ok(model) => {
            let message = model.message();
            Err(ApiError::ErrorModel {
                status,
                model,
                message,
            })
        }
        Err(e) => {
            debug!(status, error = %e, "error body did not match model");
            Err(ApiError::ErrorBodyUndecodable { status })
        }
    }
}

/// Parse `body` as untyped JSON, then cast it to `S`.
pub fn cast_json<S: DeserializeOwned, E>(body: &[u8]) -> Result<Option<S>, ApiError<E>> {
    let value: Value = serde_json::from_slice(body).map_err(ApiError::JsonDecode)?;
    match serde_json::from_value(value) {
        Ok(shape) => Ok(Some(shape)),
        Err(e) => {
            warn!(error = %e, "JSON body does not fit requested shape");
            Ok(None)
        }
    }
}

/// Decode `body` into `D`.
pub fn decode<D: DeserializeOwned, E>(body: &[u8]) -> Result<D, ApiError<E>> {
    serde_json::from_slice(body).map_err(ApiError::JsonDecode)
}
