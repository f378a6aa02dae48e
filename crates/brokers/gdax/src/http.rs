use async_trait::async_trait;
use blockhead_core::*;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GdaxConfig;
use crate::credential::Credential;
use crate::protocol::*;

const AGENT: &str = concat!("blockhead/", env!("CARGO_PKG_VERSION"));

/// REST client for the GDAX / Coinbase Pro API.
///
/// Public endpoints work without a credential; account and order endpoints
/// return [`ExchangeError::Auth`] when none is configured.
#[derive(Debug, Clone)]
pub struct GdaxClient {
    base_url: String,
    credential: Option<Credential>,
    http: reqwest::Client,
}

impl GdaxClient {
    pub fn new(
        base_url: &str,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            http,
        })
    }

    /// Authenticated client from a loaded config file.
    pub fn from_config(config: &GdaxConfig) -> Result<Self, ExchangeError> {
        let credential = Credential::new(
            &config.keys.key,
            &config.keys.secret,
            &config.keys.passphrase,
        )?;
        Self::new(
            &config.uris.api,
            Some(credential),
            Duration::from_secs(config.client.timeout_secs),
        )
    }

    /// Client for public market data only.
    pub fn public(base_url: &str, timeout: Duration) -> Result<Self, ExchangeError> {
        Self::new(base_url, None, timeout)
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    fn headers(&self, method: &Method, path: &str, body: &str, signed: bool) -> Result<HeaderMap, ExchangeError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !signed {
            return Ok(headers);
        }

        let cred = self
            .credential
            .as_ref()
            .ok_or_else(|| ExchangeError::Auth("No API credential configured".to_string()))?;

        let timestamp = Utc::now().timestamp().to_string();
        let signature = cred.sign(&timestamp, method.as_str(), path, body);

        let header = |v: &str| {
            HeaderValue::from_str(v).map_err(|e| ExchangeError::Auth(format!("Invalid header value: {}", e)))
        };
        headers.insert("CB-ACCESS-KEY", header(&cred.api_key)?);
        headers.insert("CB-ACCESS-SIGN", header(&signature)?);
        headers.insert("CB-ACCESS-TIMESTAMP", header(&timestamp)?);
        headers.insert("CB-ACCESS-PASSPHRASE", header(&cred.passphrase)?);
        Ok(headers)
    }

    /// Send a request and decode the JSON response. `path` includes the query string.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let body = body.unwrap_or_default();
        let headers = self.headers(&method, path, &body, signed)?;
        let url = format!("{}{}", self.base_url, path);

        debug!(%method, %url, "GDAX request");

        let mut builder = self.http.request(method, &url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout
            } else {
                ExchangeError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout
            } else {
                ExchangeError::Connection(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("{} (body: {})", e, truncate(&text, 200))))
    }
}

fn status_error(status: StatusCode, body: &str) -> ExchangeError {
    let message = serde_json::from_str::<WireError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| truncate(body, 200).to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(%message, "Rate limited by GDAX");
        ExchangeError::RateLimited(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ExchangeError::Auth(message)
    } else if status == StatusCode::NOT_FOUND {
        ExchangeError::NotFound(message)
    } else {
        ExchangeError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl Exchange for GdaxClient {
    async fn products(&self) -> Result<Vec<Product>, ExchangeError> {
        self.request(Method::GET, "/products", None, false).await
    }

    async fn ticker(&self, product_id: &str) -> Result<Ticker, ExchangeError> {
        let path = format!("/products/{}/ticker", product_id);
        self.request(Method::GET, &path, None, false).await
    }

    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        self.request(Method::GET, "/accounts", None, true).await
    }

    async fn open_orders(&self, product_id: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let path = format!("/orders?status=open&product_id={}", product_id);
        self.request(Method::GET, &path, None, true).await
    }

    async fn order_book_l3(&self, product_id: &str) -> Result<BookSnapshot, ExchangeError> {
        let path = format!("/products/{}/book?level=3", product_id);
        let book: WireBook = self.request(Method::GET, &path, None, false).await?;
        Ok(book.into())
    }

    async fn candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let path = format!(
            "/products/{}/candles?start={}&end={}&granularity={}",
            product_id,
            iso(start),
            iso(end),
            granularity
        );
        let rows: Vec<WireCandle> = self.request(Method::GET, &path, None, false).await?;
        Ok(rows.into_iter().filter_map(WireCandle::into_candle).collect())
    }

    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let body = serde_json::to_string(&WireLimitOrder::from(req))
            .map_err(|e| ExchangeError::Decode(format!("Serialization error: {}", e)))?;
        let placed: PlacedOrder = self.request(Method::POST, "/orders", Some(body), true).await?;
        if placed.status.as_deref() == Some("rejected") {
            return Err(ExchangeError::Rejected(format!("order {} rejected", placed.id)));
        }
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<String, ExchangeError> {
        let path = format!("/orders/{}", order_id);
        self.request(Method::DELETE, &path, None, true).await
    }

    async fn cancel_all(&self, product_id: &str) -> Result<Vec<String>, ExchangeError> {
        let path = format!("/orders?product_id={}", product_id);
        self.request(Method::DELETE, &path, None, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "dGVzdF9zZWNyZXRfYmFzZTY0";

    fn signed(server: &MockServer) -> GdaxClient {
        let cred = Credential::new("key", SECRET, "pass").unwrap();
        GdaxClient::new(&server.uri(), Some(cred), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, r#"{"message":"Rate limit exceeded"}"#);
        assert!(err.is_rate_limit());

        match status_error(StatusCode::BAD_REQUEST, r#"{"message":"Invalid price"}"#) {
            ExchangeError::Http { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid price");
            }
            other => panic!("Expected http error, got {:?}", other),
        }

        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "not json"),
            ExchangeError::Auth(m) if m == "not json"
        ));
    }

    #[test]
    fn test_iso_timestamps_have_no_fraction() {
        let ts = DateTime::<Utc>::from_timestamp(1_515_000_000, 500_000_000).unwrap();
        assert_eq!(iso(ts), "2018-01-03T17:20:00Z");
    }

    #[tokio::test]
    async fn test_private_endpoint_requires_credential() {
        let client = GdaxClient::public("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(matches!(client.accounts().await, Err(ExchangeError::Auth(_))));
    }

    #[tokio::test]
    async fn test_candles_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/ETH-USD/candles"))
            .and(query_param("start", "2018-01-03T00:00:00Z"))
            .and(query_param("end", "2018-01-03T05:00:00Z"))
            .and(query_param("granularity", "60"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [1514937660, 249.5, 251, 250, 250.5, 12.25],
                [1514937600, 248, 250, 249, 250, 3]
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = GdaxClient::public(&server.uri(), Duration::from_secs(5)).unwrap();
        let start = DateTime::<Utc>::from_timestamp(1_514_937_600, 0).unwrap();
        let candles = client
            .candles("ETH-USD", start, start + chrono::Duration::hours(5), 60)
            .await
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, start + chrono::Duration::minutes(1));
        assert_eq!(
            (candles[0].low, candles[0].high, candles[0].open, candles[0].close, candles[0].volume),
            (dec!(249.5), dec!(251), dec!(250), dec!(250.5), dec!(12.25))
        );
    }

    #[tokio::test]
    async fn test_private_requests_are_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .and(query_param("status", "open"))
            .and(query_param("product_id", "ETH-USD"))
            .and(header("CB-ACCESS-KEY", "key"))
            .and(header("CB-ACCESS-PASSPHRASE", "pass"))
            .and(header_exists("CB-ACCESS-SIGN"))
            .and(header_exists("CB-ACCESS-TIMESTAMP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "o1",
                "product_id": "ETH-USD",
                "side": "buy",
                "price": "250.00",
                "size": "0.5",
                "status": "open"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = signed(&server);
        let orders = client.open_orders("ETH-USD").await.unwrap();
        assert_eq!((orders[0].id.as_str(), orders[0].price), ("o1", dec!(250)));

        // the signature covers the path with its query string
        let requests = server.received_requests().await.unwrap();
        let value = |name: &str| requests[0].headers.get(name).unwrap().to_str().unwrap().to_string();
        let expected = client.credential().unwrap().sign(
            &value("CB-ACCESS-TIMESTAMP"),
            "GET",
            "/orders?status=open&product_id=ETH-USD",
            "",
        );
        assert_eq!(value("CB-ACCESS-SIGN"), expected);
    }

    #[tokio::test]
    async fn test_place_and_cancel_orders() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_partial_json(json!({
                "type": "limit",
                "product_id": "ETH-USD",
                "side": "sell",
                "price": "101.5",
                "size": "0.25",
                "time_in_force": "GTT",
                "cancel_after": "day",
                "post_only": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "o2",
                "product_id": "ETH-USD",
                "side": "sell",
                "price": "101.5",
                "size": "0.25",
                "status": "pending"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/orders/o2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("o2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = signed(&server);
        let req = LimitOrderRequest::passive(Uuid::new_v4(), "ETH-USD", Side::Sell, dec!(101.50), dec!(0.25));
        let placed = client.place_limit_order(&req).await.unwrap();
        assert_eq!(placed.status.as_deref(), Some("pending"));
        assert_eq!(client.cancel_order(&placed.id).await.unwrap(), "o2");
    }

    #[tokio::test]
    async fn test_rejected_order_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "o3",
                "product_id": "ETH-USD",
                "side": "buy",
                "size": "1",
                "status": "rejected"
            })))
            .mount(&server)
            .await;

        let req = LimitOrderRequest::passive(Uuid::new_v4(), "ETH-USD", Side::Buy, dec!(250), dec!(1));
        assert!(matches!(
            signed(&server).place_limit_order(&req).await,
            Err(ExchangeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_error_statuses_over_http() {
        let server = MockServer::start().await;
        for (status, product) in [(429u16, "RATE-USD"), (404, "GONE-USD"), (503, "DOWN-USD"), (200, "JUNK-USD")] {
            let body = if status == 200 {
                ResponseTemplate::new(200).set_body_string("not json")
            } else {
                ResponseTemplate::new(status).set_body_json(json!({ "message": format!("status {}", status) }))
            };
            Mock::given(method("GET"))
                .and(path(format!("/products/{}/ticker", product)))
                .respond_with(body)
                .mount(&server)
                .await;
        }

        let client = GdaxClient::public(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.ticker("RATE-USD").await,
            Err(ExchangeError::RateLimited(m)) if m == "status 429"
        ));
        assert!(matches!(client.ticker("GONE-USD").await, Err(ExchangeError::NotFound(_))));
        assert!(matches!(
            client.ticker("DOWN-USD").await,
            Err(ExchangeError::Http { status: 503, .. })
        ));
        assert!(matches!(client.ticker("JUNK-USD").await, Err(ExchangeError::Decode(_))));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = GdaxClient::public(&server.uri(), Duration::from_millis(100)).unwrap();
        assert!(matches!(client.products().await, Err(ExchangeError::Timeout)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
