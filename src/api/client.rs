//! Reqwest-backed remote source.
//!
//! Owns transport details only: URL building, auth header, status mapping
//! and JSON decoding into canonical entities.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::Entity;
use crate::config::Config;

use super::error::{FieldErrors, RemoteError, TransportKind};
use super::resources::ListBody;
use super::{ListKey, RemoteSource};

/// HTTP client for the shop API
#[derive(Clone)]
pub struct HttpApi {
  client: Client,
  base: Url,
  token: Option<String>,
}

impl HttpApi {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base(
      &config.api.url,
      Duration::from_secs(config.api.timeout_seconds),
      Config::get_api_token(),
    )
  }

  pub fn with_base(url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid API url {}: {}", url, e))?;

    // Url::join drops the last segment unless the base ends with a slash.
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| RemoteError::InvalidRequest(format!("{}: {}", path, e)))?;

    let mut builder = self
      .client
      .request(method, url)
      .header(ACCEPT, "application/json");
    if let Some(token) = &self.token {
      builder = builder.header(AUTHORIZATION, format!("Token {}", token));
    }
    Ok(builder)
  }

  async fn execute(&self, builder: RequestBuilder, path: &str) -> Result<Vec<u8>, RemoteError> {
    let response = builder.send().await.map_err(map_transport_error)?;
    let status = response.status();
    let body = response.bytes().await.map_err(map_transport_error)?;
    debug!(path, status = status.as_u16(), bytes = body.len(), "remote response");

    if !status.is_success() {
      return Err(map_status_error(status, path, &body));
    }
    Ok(body.to_vec())
  }
}

fn entity_path<T: Entity>(id: i64) -> String {
  format!("{}/{}/", T::resource_path(), id)
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R, RemoteError> {
  serde_json::from_slice(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl<T: Entity> RemoteSource<T> for HttpApi {
  async fn fetch(&self, id: i64) -> Result<T, RemoteError> {
    let path = entity_path::<T>(id);
    let body = self.execute(self.request(Method::GET, &path)?, &path).await?;
    decode::<T::Resource>(&body).map(Into::into)
  }

  async fn create(&self, entity: &T) -> Result<T, RemoteError> {
    let path = format!("{}/", T::resource_path());
    let request = self
      .request(Method::POST, &path)?
      .json(&entity.to_resource());
    let body = self.execute(request, &path).await?;
    decode::<T::Resource>(&body).map(Into::into)
  }

  async fn update(&self, entity: &T) -> Result<T, RemoteError> {
    let path = entity_path::<T>(entity.id());
    let request = self
      .request(Method::PUT, &path)?
      .json(&entity.to_resource());
    let body = self.execute(request, &path).await?;
    decode::<T::Resource>(&body).map(Into::into)
  }

  async fn delete(&self, id: i64) -> Result<(), RemoteError> {
    let path = entity_path::<T>(id);
    self.execute(self.request(Method::DELETE, &path)?, &path).await?;
    Ok(())
  }

  async fn list(&self, key: &ListKey) -> Result<Vec<T>, RemoteError> {
    let path = key.path();
    let body = self.execute(self.request(Method::GET, &path)?, &path).await?;
    let items = decode::<ListBody<T::Resource>>(&body)?.into_items();
    Ok(items.into_iter().map(Into::into).collect())
  }
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> RemoteError {
  let kind = if err.is_timeout() {
    TransportKind::Timeout
  } else if err.is_connect() {
    TransportKind::ConnectionRefused
  } else {
    TransportKind::Other
  };
  RemoteError::Transport {
    kind,
    message: err.to_string(),
  }
}

pub(crate) fn map_status_error(status: StatusCode, path: &str, body: &[u8]) -> RemoteError {
  match status {
    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
      let errors = FieldErrors::from_body(body).unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body).trim().to_string();
        if text.is_empty() {
          FieldErrors::default()
        } else {
          FieldErrors::non_field(text)
        }
      });
      RemoteError::Validation {
        status: status.as_u16(),
        errors,
      }
    }
    StatusCode::NOT_FOUND => RemoteError::NotFound {
      path: path.to_string(),
    },
    _ => RemoteError::Status {
      status: status.as_u16(),
      body: String::from_utf8_lossy(body).into_owned(),
    },
  }
}
