//! Request description and wire-request construction.
//!
//! # Design
//! `Request<E>` is the caller-facing description of one HTTP call. The type
//! parameter names the error model used to decode non-2xx bodies and
//! defaults to the `NoErrorModel` sentinel. `build` turns the description
//! into a plain `HttpRequest` without touching the network.

use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ErrorModel, NoErrorModel};
use crate::http::{AuthScheme, ContentType, HttpMethod, HttpRequest};

pub const DEFAULT_ACCEPTABLE_STATUS: RangeInclusive<u16> = 200..=299;

/// Description of a single HTTP call.
#[derive(Debug)]
pub struct Request<E = NoErrorModel> {
    method: HttpMethod,
    url: String,
    auth: AuthScheme,
    credential: Option<String>,
    content_type: ContentType,
    params: Option<Result<Value, serde_json::Error>>,
    acceptable: RangeInclusive<u16>,
    timeout: Option<Duration>,
    _model: PhantomData<fn() -> E>,
}

impl Request<NoErrorModel> {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            auth: AuthScheme::None,
            credential: None,
            content_type: ContentType::None,
            params: None,
            acceptable: DEFAULT_ACCEPTABLE_STATUS,
            timeout: None,
            _model: PhantomData,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }
}

impl<E: ErrorModel> Request<E> {
    /// Set the authorization scheme and credential.
    pub fn auth(mut self, scheme: AuthScheme, credential: impl Into<String>) -> Self {
        self.auth = scheme;
        self.credential = Some(credential.into());
        self
    }

    /// Set the scheme alone; no header is sent until a credential is present.
    pub fn auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth = scheme;
        self
    }

    pub fn bearer(self, token: impl Into<String>) -> Self {
        self.auth(AuthScheme::Bearer, token)
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn json(self) -> Self {
        self.content_type(ContentType::Json)
    }

    /// Attach parameters sent as the JSON body.
    ///
    /// Serialization happens here but its failure only surfaces when the
    /// request is built, so the call fails without being sent.
    pub fn params<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        self.params = Some(serde_json::to_value(params));
        self
    }

    pub fn acceptable(mut self, range: RangeInclusive<u16>) -> Self {
        self.acceptable = range;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Decode non-acceptable bodies into `M`.
    pub fn error_model<M: ErrorModel>(self) -> Request<M> {
        Request {
            method: self.method,
            url: self.url,
            auth: self.auth,
            credential: self.credential,
            content_type: self.content_type,
            params: self.params,
            acceptable: self.acceptable,
            timeout: self.timeout,
            _model: PhantomData,
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn acceptable_range(&self) -> &RangeInclusive<u16> {
        &self.acceptable
    }

    /// Build the wire request, falling back to `default_timeout`.
    pub fn build(self, default_timeout: Duration) -> Result<HttpRequest, ApiError<E>> {
        let url = Url::parse(&self.url).map_err(|e| ApiError::UrlMalformed {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = Vec::new();
        if let (Some(prefix), Some(credential)) = (self.auth.prefix(), self.credential.as_deref()) {
            headers.push(("authorization".to_string(), format!("{prefix} {credential}")));
        }
        if let Some(mime) = self.content_type.mime() {
            headers.push(("content-type".to_string(), mime.to_string()));
            headers.push(("accept".to_string(), mime.to_string()));
        }

        let body = match self.params {
            Some(params) => encode_body(params.map_err(ApiError::BodyConstruction)?)?,
            None => None,
        };

        Ok(HttpRequest {
            method: self.method,
            url: url.into(),
            headers,
            body,
            timeout: self.timeout.unwrap_or(default_timeout),
        })
    }
}

/// Null and empty objects produce no body.
fn encode_body<E>(params: Value) -> Result<Option<Vec<u8>>, ApiError<E>> {
    match &params {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::to_vec(&params)
            .map(Some)
            .map_err(ApiError::BodyConstruction),
    }
}
