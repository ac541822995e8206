//! HTTP client plumbing for the two provider-facing calls (key-set fetch and
//! token introspection). Other modules should use stuff from this module
//! instead of directly relying on deps like `reqwest` (think loose coupling).

use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use reqwest::redirect;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use reqwest_retry::RetryTransientMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_tracing::TracingMiddleware;
use thiserror::Error;

use crate::url::ApiUrl;

const USER_AGENT: &str = "authgate";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSIENT_RETRIES: u32 = 3;

/// This is the preferred way to create new http clients: both provider
/// endpoints share one connection pool, and every request carries the same
/// bounded timeouts and transient-retry policy.
pub(crate) fn new_client() -> ClientWithMiddleware {
    let client = reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .redirect(redirect::Policy::none())
        .tls_built_in_native_certs(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("client config should be valid");

    // Retry transient failures with increasing intervals between attempts.
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(TRANSIENT_RETRIES);

    reqwest_middleware::ClientBuilder::new(client)
        .with(TracingMiddleware::default())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// Thin convenience wrapper for an API provided by an http endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    /// API's full URL.
    endpoint: ApiUrl,
    /// Connection manager with built-in pooling.
    client: ClientWithMiddleware,
}

impl Endpoint {
    /// Construct a new HTTP endpoint wrapper.
    /// Http client is not constructed under the hood so that it can be shared.
    pub(crate) fn new(endpoint: ApiUrl, client: ClientWithMiddleware) -> Self {
        Self { endpoint, client }
    }

    /// Return a [builder](RequestBuilder) for a `GET` request to the endpoint.
    pub(crate) fn get(&self) -> RequestBuilder {
        self.client.get(self.endpoint.clone().into_inner())
    }

    /// Return a [builder](RequestBuilder) for a `POST` request to the endpoint.
    pub(crate) fn post(&self) -> RequestBuilder {
        self.client.post(self.endpoint.clone().into_inner())
    }
}

#[derive(Error, Debug)]
pub enum ReadBodyError<E> {
    #[error("content length exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error(transparent)]
    Read(#[from] E),
}

pub(crate) async fn read_body_with_limit<E>(
    mut b: impl Body<Data = Bytes, Error = E> + Unpin,
    limit: usize,
) -> Result<Vec<u8>, ReadBodyError<E>> {
    // check the lower bound of the size hint.
    // in reqwest, this value is influenced by the Content-Length header.
    let lower_bound = match usize::try_from(b.size_hint().lower()) {
        Ok(bound) if bound <= limit => bound,
        _ => return Err(ReadBodyError::BodyTooLarge { limit }),
    };
    let mut bytes = Vec::with_capacity(lower_bound);

    while let Some(frame) = b.frame().await.transpose()? {
        if let Ok(data) = frame.into_data() {
            if bytes.len() + data.len() > limit {
                return Err(ReadBodyError::BodyTooLarge { limit });
            }
            bytes.extend_from_slice(&data);
        }
    }

    Ok(bytes)
}
