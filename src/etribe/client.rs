use crate::cache::FetchError;
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};
use url::Url;

/// Request boundary of the cache: performs one HTTP call and returns the raw
/// JSON body, whatever envelope it uses.
pub trait Transport: Send + Sync + 'static {
  fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> BoxFuture<'static, Result<Value, FetchError>>;

  /// Install or drop the bearer token used for subsequent requests.
  fn set_token(&self, token: Option<String>);

  fn get(&self, path: &str) -> BoxFuture<'static, Result<Value, FetchError>> {
    self.request(Method::GET, path, None)
  }
}

/// ETribe REST API client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.api.timeout())
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base: base_url(&config.api.base_url)?,
      token: Arc::new(RwLock::new(None)),
    })
  }

  fn token(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

/// Parse the base URL, making sure relative paths join below it.
fn base_url(raw: &str) -> Result<Url> {
  let mut raw = raw.trim().to_string();
  if !raw.ends_with('/') {
    raw.push('/');
  }
  Url::parse(&raw).map_err(|e| eyre!("Invalid API url {}: {}", raw, e))
}

/// Classify a transport-level failure.
fn classify(e: &reqwest::Error) -> FetchError {
  if e.is_timeout() {
    return FetchError::Timeout;
  }
  if let Some(status) = e.status() {
    if let Some(err) = FetchError::from_status(status.as_u16()) {
      return err;
    }
  }
  FetchError::Unknown(e.to_string())
}

/// Turn a response body into JSON. Empty and unparsable bodies become
/// `null`, which the normalizer maps to an empty payload.
fn parse_body(path: &str, text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  match serde_json::from_str(text) {
    Ok(value) => value,
    Err(e) => {
      debug!(path, error = %e, "malformed response body");
      Value::Null
    }
  }
}

impl Transport for ApiClient {
  fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> BoxFuture<'static, Result<Value, FetchError>> {
    let url = self.base.join(path.trim_start_matches('/'));
    let http = self.http.clone();
    let token = self.token();
    let path = path.to_string();

    async move {
      let url = url.map_err(|e| FetchError::Unknown(format!("invalid path {}: {}", path, e)))?;
      trace!(%method, %url, "request");

      let mut request = http.request(method, url);
      if let Some(token) = token {
        request = request.bearer_auth(token);
      }
      if let Some(body) = body {
        request = request.json(&body);
      }

      let response = request.send().await.map_err(|e| classify(&e))?;
      let status = response.status();
      if let Some(err) = FetchError::from_status(status.as_u16()) {
        return Err(err);
      }
      if !status.is_success() && status != StatusCode::NOT_MODIFIED {
        return Err(FetchError::Unknown(format!("HTTP {} for {}", status, path)));
      }

      let text = response.text().await.map_err(|e| classify(&e))?;
      Ok(parse_body(&path, &text))
    }
    .boxed()
  }

  fn set_token(&self, token: Option<String>) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
  }
}
