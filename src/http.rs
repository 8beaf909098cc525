//! Thin wrapper over a shared `reqwest::Client`.
//!
//! Requests are awaited one at a time by the adapters. A 404 is reported as
//! [`FetchError::NotFound`] so callers can treat a missing document as a
//! soft skip; every other failure is a [`FetchError::Request`].

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode};
use url::Url;

use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

struct HeadersMapGenerator(HeaderMap);

impl HeadersMapGenerator {
    fn into_inner(self) -> HeaderMap {
        self.0
    }
}

impl TryFrom<HashMap<&'static str, String>> for HeadersMapGenerator {
    type Error = FetchError;

    fn try_from(value: HashMap<&'static str, String>) -> Result<Self, Self::Error> {
        // ---
        let mut header_map = HeaderMap::new();

        for (key, value) in value.into_iter() {
            let value = HeaderValue::from_str(&value)
                .map_err(|err| FetchError::InvalidHeader(format!("{key}: {err} {value}")))?;
            header_map.insert(key, value);
        }
        Ok(Self(header_map))
    }
}

impl HttpClient {
    /// Build a client sending `user_agent` with every request.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        // ---
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(user_agent)
            .map_err(|err| FetchError::InvalidHeader(format!("user agent: {err}")))?;
        headers.insert(USER_AGENT, agent);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|source| FetchError::Request {
                url: String::new(),
                source,
            })?;

        Ok(HttpClient { client })
    }

    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let response = self.send(self.client.get(url.clone()), url).await?;
        response.text().await.map_err(|source| request_error(url, source))
    }

    pub async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        // ---
        let response = self.send(self.client.get(url.clone()), url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| request_error(url, source))?;
        Ok(bytes.to_vec())
    }

    /// POST `body` with extra `headers` and return the response text.
    pub async fn post_text(
        &self,
        url: &Url,
        headers: HashMap<&'static str, String>,
        body: String,
    ) -> Result<String, FetchError> {
        // ---
        let header_map = HeadersMapGenerator::try_from(headers)?.into_inner();
        let request = self.client.post(url.clone()).headers(header_map).body(body);
        let response = self.send(request, url).await?;
        response.text().await.map_err(|source| request_error(url, source))
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<Response, FetchError> {
        // ---
        tracing::debug!("Requesting {}", url);
        let response = request.send().await.map_err(|source| request_error(url, source))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        response
            .error_for_status()
            .map_err(|source| request_error(url, source))
    }
}

fn request_error(url: &Url, source: reqwest::Error) -> FetchError {
    FetchError::Request {
        url: url.to_string(),
        source,
    }
}
