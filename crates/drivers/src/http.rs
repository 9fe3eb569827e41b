use std::time::Duration;

use exchange_core::{ExchangeConfig, ExchangeError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace};

const USER_AGENT: &str = "exchange-drivers/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin reqwest wrapper shared by every driver. It knows nothing about
/// signing; drivers attach their own headers and bodies.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    exchange: String,
    base_url: String,
    verbose: bool,
}

impl RestClient {
    /// Direct connection, no proxy.
    pub fn new(exchange: impl Into<String>, base_url: impl Into<String>, verbose: bool) -> Result<Self> {
        Self::build(exchange.into(), base_url.into(), verbose, Vec::new())
    }

    /// Client for one configured exchange: its `verbose` flag and its
    /// `http_proxy`/`https_proxy` settings apply.
    pub fn for_exchange(
        config: &ExchangeConfig,
        exchange: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let exchange = exchange.into();
        let mut proxies = Vec::new();
        if let Some(url) = non_blank(&config.http_proxy) {
            proxies.push(reqwest::Proxy::http(url).map_err(|err| invalid_proxy(&exchange, url, err))?);
            info!(exchange = %exchange, proxy = %url, "routing http requests through proxy");
        }
        if let Some(url) = non_blank(&config.https_proxy) {
            proxies.push(reqwest::Proxy::https(url).map_err(|err| invalid_proxy(&exchange, url, err))?);
            info!(exchange = %exchange, proxy = %url, "routing https requests through proxy");
        }
        Self::build(exchange, base_url.into(), config.verbose, proxies)
    }

    fn build(exchange: String, base_url: String, verbose: bool, proxies: Vec<reqwest::Proxy>) -> Result<Self> {
        let builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        let http = proxies
            .into_iter()
            .fold(builder, |builder, proxy| builder.proxy(proxy))
            .build()
            .map_err(transport)?;

        Ok(Self {
            http,
            exchange,
            base_url: base_url.trim_end_matches('/').to_string(),
            verbose,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builder for `base_url + path_and_query`.
    pub fn request(&self, method: Method, path_and_query: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path_and_query);
        if self.verbose {
            debug!(exchange = %self.exchange, %method, %url, "sending request");
        } else {
            trace!(exchange = %self.exchange, %method, %url, "sending request");
        }
        self.http.request(method, url)
    }

    /// Unauthenticated GET.
    pub async fn get<T>(&self, path_and_query: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.execute(self.request(Method::GET, path_and_query)).await
    }

    /// Sends `builder` and decodes a successful body. 429 and 418 become
    /// [`ExchangeError::RateLimited`]; any other non-2xx status keeps its body.
    pub async fn execute<T>(&self, builder: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if self.verbose {
            debug!(exchange = %self.exchange, %status, body = %body, "received response");
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited);
        }
        if !status.is_success() {
            return Err(ExchangeError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(ExchangeError::EmptyResponse(self.exchange.clone()));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Header names must be lower-case literals.
pub fn headers<'a>(pairs: impl IntoIterator<Item = (&'static str, &'a str)>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value)
            .map_err(|err| ExchangeError::Signature(format!("invalid {name} header: {err}")))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn invalid_proxy(exchange: &str, url: &str, err: reqwest::Error) -> ExchangeError {
    ExchangeError::Config(format!("{exchange}: invalid proxy '{url}': {err}"))
}

fn transport(err: reqwest::Error) -> ExchangeError {
    ExchangeError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RestClient {
        RestClient::new("Test", server.uri(), true).unwrap()
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get::<Value>("/limited")
            .await
            .unwrap_err();
        assert_eq!(err, ExchangeError::RateLimited);
    }

    #[tokio::test]
    async fn other_statuses_keep_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get::<Value>("/broken")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExchangeError::HttpStatus {
                status: 500,
                body: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_deserialize_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get::<Value>("/garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Deserialize(_)));
    }

    #[tokio::test]
    async fn configured_http_proxy_carries_requests() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pong": true})))
            .expect(1)
            .mount(&proxy)
            .await;

        let mut config = ExchangeConfig::new("Test");
        config.http_proxy = Some(proxy.uri());
        config.https_proxy = Some("   ".into());
        let client = RestClient::for_exchange(&config, "Test", "http://exchange.invalid").unwrap();

        let body: Value = client.get("/ping").await.unwrap();
        assert_eq!(body["pong"], true);
    }

    #[test]
    fn malformed_proxy_is_a_config_error() {
        let mut config = ExchangeConfig::new("Test");
        config.https_proxy = Some("http://[::1".into());
        let err = RestClient::for_exchange(&config, "Test", "https://exchange.invalid").unwrap_err();
        assert!(matches!(err, ExchangeError::Config(message) if message.contains("invalid proxy")));
    }

    #[test]
    fn builds_header_map_and_rejects_control_chars() {
        let map = headers([("api-key", "abc")]).unwrap();
        assert_eq!(map.get("API-Key").unwrap(), "abc");
        assert!(headers([("api-key", "bad\nvalue")]).is_err());
    }
}
