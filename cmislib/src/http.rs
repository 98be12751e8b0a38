use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use reqwest::header;
use std::collections::HashMap;
use tracing::debug;

/// Identifier sent as `User-Agent` with every request.
pub const USER_AGENT: &str = concat!(
    "cmislib/",
    env!("CARGO_PKG_VERSION"),
    " +http://chemistry.apache.org/"
);

/// URL input for a request. Byte inputs are decoded as UTF-8 text before the
/// query string is appended.
pub trait UrlText {
    fn into_url_text(self) -> Result<String>;
}

impl UrlText for String {
    fn into_url_text(self) -> Result<String> {
        Ok(self)
    }
}

impl UrlText for &str {
    fn into_url_text(self) -> Result<String> {
        Ok(self.to_string())
    }
}

impl UrlText for Vec<u8> {
    fn into_url_text(self) -> Result<String> {
        String::from_utf8(self).map_err(|e| Error::InvalidUrl(e.to_string()))
    }
}

impl UrlText for &[u8] {
    fn into_url_text(self) -> Result<String> {
        self.to_vec().into_url_text()
    }
}

impl UrlText for bytes::Bytes {
    fn into_url_text(self) -> Result<String> {
        self.to_vec().into_url_text()
    }
}

/// Per-request options: query parameters appended to the URL in order, and
/// extra headers merged into the outgoing request. Headers never become
/// query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub params: Vec<(String, String)>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Generic service for interacting with an HTTP end point. Builds the target
/// URL from the base URL and query parameters, sets headers such as the
/// user-agent, attaches basic auth, and hands the request to the transport.
/// The response comes back unmodified; no status interpretation, no retries.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    user_agent: String,
}

impl RestClient {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::default()
    }

    /// Wrap an already configured `reqwest::Client`. TLS posture is whatever
    /// the caller built into it.
    pub fn from_reqwest(client: reqwest::Client) -> Self {
        Self {
            client,
            user_agent: USER_AGENT.to_string(),
        }
    }

    pub async fn get(
        &self,
        url: impl UrlText,
        credentials: Option<&Credentials>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        self.dispatch(
            reqwest::Method::GET,
            url.into_url_text()?,
            None,
            None,
            credentials,
            options,
        )
        .await
    }

    pub async fn delete(
        &self,
        url: impl UrlText,
        credentials: Option<&Credentials>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        self.dispatch(
            reqwest::Method::DELETE,
            url.into_url_text()?,
            None,
            None,
            credentials,
            options,
        )
        .await
    }

    /// PUT the payload to the URL. The content-type header is set iff
    /// `content_type` is given.
    pub async fn put(
        &self,
        url: impl UrlText,
        payload: impl Into<reqwest::Body>,
        content_type: Option<&str>,
        credentials: Option<&Credentials>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        self.dispatch(
            reqwest::Method::PUT,
            url.into_url_text()?,
            Some(payload.into()),
            content_type,
            credentials,
            options,
        )
        .await
    }

    /// POST the payload to the URL. The content-type header is set iff
    /// `content_type` is given.
    pub async fn post(
        &self,
        url: impl UrlText,
        payload: impl Into<reqwest::Body>,
        content_type: Option<&str>,
        credentials: Option<&Credentials>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        self.dispatch(
            reqwest::Method::POST,
            url.into_url_text()?,
            Some(payload.into()),
            content_type,
            credentials,
            options,
        )
        .await
    }

    async fn dispatch(
        &self,
        method: reqwest::Method,
        url: String,
        payload: Option<reqwest::Body>,
        content_type: Option<&str>,
        credentials: Option<&Credentials>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        let url = append_params(url, &options.params);
        if !options.headers.is_empty() {
            debug!("headers passed in: {:?}", options.headers);
        }
        debug!("about to do a {} on: {}", method, url);

        let mut headers = header::HeaderMap::new();
        for (name, value) in &options.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidHeader(name.clone()))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|_| Error::InvalidHeader(value.clone()))?;
            headers.insert(name, value);
        }
        // written after the caller's headers: the fixed identifier wins
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&self.user_agent)
                .map_err(|_| Error::InvalidHeader(self.user_agent.clone()))?,
        );
        if let Some(content_type) = content_type {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_str(content_type)
                    .map_err(|_| Error::InvalidHeader(content_type.to_string()))?,
            );
        }

        let mut builder = self.client.request(method, url.as_str()).headers(headers);
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        if let Some(payload) = payload {
            builder = builder.body(payload);
        }
        Ok(builder.send().await?)
    }
}

/// Builds a [`RestClient`].
///
/// TLS certificate verification is disabled by default, matching the servers
/// this crate talks to; pass `danger_accept_invalid_certs(false)` to turn
/// verification back on.
#[derive(Debug)]
pub struct RestClientBuilder {
    accept_invalid_certs: bool,
    user_agent: String,
}

impl Default for RestClientBuilder {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl RestClientBuilder {
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<RestClient> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;
        Ok(RestClient {
            client,
            user_agent: self.user_agent,
        })
    }
}

fn append_params(url: String, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url;
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_params() {
        let url = append_params(
            "http://host/svc".to_string(),
            &[("maxItems".to_string(), "5".to_string())],
        );
        assert_eq!(url, "http://host/svc?maxItems=5");

        let url = append_params(url, &[("skipCount".to_string(), "10".to_string())]);
        assert_eq!(url, "http://host/svc?maxItems=5&skipCount=10");

        let url = append_params("http://host/svc".to_string(), &[]);
        assert_eq!(url, "http://host/svc");
    }

    #[test]
    fn test_append_params_encoding() {
        let url = append_params(
            "http://host/svc".to_string(),
            &[
                ("q".to_string(), "a b&c".to_string()),
                ("名".to_string(), "值".to_string()),
            ],
        );
        assert_eq!(url, "http://host/svc?q=a+b%26c&%E5%90%8D=%E5%80%BC");
    }

    #[test]
    fn test_url_text() {
        assert_eq!("http://host/".into_url_text().unwrap(), "http://host/");
        assert_eq!(
            b"http://host/".to_vec().into_url_text().unwrap(),
            "http://host/"
        );
        assert_eq!(
            bytes::Bytes::from_static(b"http://host/a")
                .into_url_text()
                .unwrap(),
            "http://host/a"
        );
        assert!(matches!(
            vec![0x68u8, 0xff, 0xfe].into_url_text(),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_options_deserialize() {
        let options: RequestOptions = serde_json::from_str(
            r#"{"params": [["maxItems", "5"], ["skipCount", "0"]], "headers": {"X-Custom": "1"}}"#,
        )
        .unwrap();
        assert_eq!(
            options.params,
            vec![
                ("maxItems".to_string(), "5".to_string()),
                ("skipCount".to_string(), "0".to_string())
            ]
        );
        assert_eq!(options.headers.get("X-Custom"), Some(&"1".to_string()));

        let url = append_params("http://host/svc".to_string(), &options.params);
        assert_eq!(url, "http://host/svc?maxItems=5&skipCount=0");
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("cmislib/"));
        assert!(USER_AGENT.ends_with(" +http://chemistry.apache.org/"));
    }

    #[test]
    fn test_builder() {
        assert!(RestClient::new().is_ok());
        assert!(RestClient::builder()
            .danger_accept_invalid_certs(false)
            .user_agent("test-agent/0.1")
            .build()
            .is_ok());
    }
}
