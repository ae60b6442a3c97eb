use crate::error::AppError;
use crate::sniper::transport::{LiveFeed, MarketTransport};
use crate::sniper::types::{
    parse_fetch_payload, parse_live_feed_payload, FeedFrame, ListingRecord, ListingToken,
    TradeApiConfig,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, COOKIE, ORIGIN, REFERER};
use reqwest::Client;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, COOKIE as WS_COOKIE, ORIGIN as WS_ORIGIN, USER_AGENT as WS_USER_AGENT,
};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const TRADE_SITE_ORIGIN: &str = "https://www.pathofexile.com";
const TRADE_LIVE_BASE_URL: &str = "wss://www.pathofexile.com/api/trade2/live";
const TRADE_API_BASE_URL: &str = "https://www.pathofexile.com/api/trade2";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const REQUESTED_WITH: &str = "X-Requested-With";

pub type TradeWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn live_endpoint(realm: &str, league: &str, query_id: &str) -> String {
    format!("{TRADE_LIVE_BASE_URL}/{realm}/{league}/{query_id}")
}

fn fetch_endpoint(realm: &str, query_id: &str, tokens: &[ListingToken]) -> String {
    format!(
        "{TRADE_API_BASE_URL}/fetch/{}?query={query_id}&realm={realm}",
        tokens.join(",")
    )
}

fn whisper_endpoint() -> String {
    format!("{TRADE_API_BASE_URL}/whisper")
}

fn search_referer(realm: &str, league: &str, query_id: Option<&str>) -> String {
    let mut referer = format!("{TRADE_SITE_ORIGIN}/trade2/search/{realm}/{league}");
    if let Some(query_id) = query_id {
        referer.push('/');
        referer.push_str(query_id);
    }
    referer
}

/// A refused upgrade carries an HTTP status; credential rejections escalate like REST ones.
fn handshake_error(error: WsError) -> AppError {
    match error {
        WsError::Http(response) => match response.status().as_u16() {
            status @ (401 | 403) => AppError::AuthorizationExpired { status },
            status => AppError::FeedUnavailable(format!("upgrade refused with status {status}")),
        },
        other => other.into(),
    }
}

pub async fn connect_live_stream(
    config: &TradeApiConfig,
    query_id: &str,
) -> Result<TradeWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let mut request = live_endpoint(&config.realm, &config.league, query_id).into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(WS_COOKIE, HeaderValue::from_str(&config.cookie_header())?);
    headers.insert(WS_ORIGIN, HeaderValue::from_static(TRADE_SITE_ORIGIN));
    headers.insert(WS_USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

    let (stream, _) = connect_async_with_config(request, Some(ws_config), true)
        .await
        .map_err(handshake_error)?;
    Ok(stream)
}

struct TradeWsFeed {
    stream: TradeWsStream,
    closed: bool,
}

#[async_trait]
impl LiveFeed for TradeWsFeed {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, AppError>> {
        let message = match self.stream.next().await? {
            Ok(message) => message,
            Err(error) => return Some(Err(error.into())),
        };

        let frame = match message {
            Message::Text(text_payload) => {
                let mut owned_payload = text_payload.into_bytes();
                parse_live_feed_payload(owned_payload.as_mut_slice())
            }
            Message::Binary(mut binary_payload) => {
                parse_live_feed_payload(binary_payload.as_mut_slice())
            }
            Message::Close(close_frame) => FeedFrame::Closed {
                code: close_frame.as_ref().map(|frame| u16::from(frame.code)),
                reason: close_frame
                    .map(|frame| frame.reason.to_string())
                    .unwrap_or_default(),
            },
            _ => FeedFrame::Ignored,
        };
        Some(Ok(frame))
    }

    async fn heartbeat(&mut self) -> Result<(), AppError> {
        self.stream.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.stream.close(None).await {
            tracing::debug!("live feed close failed: {error}");
        }
    }
}

#[derive(Debug, Serialize)]
struct WhisperRequestWire<'a> {
    token: &'a str,
}

/// Trade-site implementation of [`MarketTransport`], authenticated by session cookie.
pub struct TradeApiTransport {
    config: TradeApiConfig,
    cookie: String,
    client: Client,
}

impl TradeApiTransport {
    pub fn new(config: TradeApiConfig) -> Result<Self, AppError> {
        let client = Client::builder().user_agent(BROWSER_USER_AGENT).build()?;
        let cookie = config.cookie_header();
        Ok(Self {
            config,
            cookie,
            client,
        })
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::from_status(status.as_u16(), body))
}

#[async_trait]
impl MarketTransport for TradeApiTransport {
    async fn open_feed(&self, query_id: &str) -> Result<Box<dyn LiveFeed>, AppError> {
        let stream = connect_live_stream(&self.config, query_id).await?;
        Ok(Box::new(TradeWsFeed {
            stream,
            closed: false,
        }))
    }

    async fn fetch_listings(
        &self,
        query_id: &str,
        tokens: &[ListingToken],
    ) -> Result<Vec<ListingRecord>, AppError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = fetch_endpoint(&self.config.realm, query_id, tokens);
        let response = self
            .client
            .get(endpoint)
            .header(ACCEPT, "application/json")
            .header(COOKIE, self.cookie.as_str())
            .header(ORIGIN, TRADE_SITE_ORIGIN)
            .header(
                REFERER,
                search_referer(&self.config.realm, &self.config.league, Some(query_id)),
            )
            .header(REQUESTED_WITH, "XMLHttpRequest")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let mut payload = response.bytes().await?.to_vec();
        parse_fetch_payload(payload.as_mut_slice())
    }

    async fn claim(&self, claim_token: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(whisper_endpoint())
            .header(ACCEPT, "*/*")
            .header(COOKIE, self.cookie.as_str())
            .header(ORIGIN, TRADE_SITE_ORIGIN)
            .header(
                REFERER,
                search_referer(&self.config.realm, &self.config.league, None),
            )
            .header(REQUESTED_WITH, "XMLHttpRequest")
            .json(&WhisperRequestWire { token: claim_token })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_endpoint_targets_realm_league_and_query() {
        let endpoint = live_endpoint("poe2", "Standard", "abc123");
        assert_eq!(
            endpoint,
            "wss://www.pathofexile.com/api/trade2/live/poe2/Standard/abc123"
        );
    }

    #[test]
    fn fetch_endpoint_joins_tokens_and_scopes_query() {
        let tokens = vec!["a1".to_string(), "b2".to_string()];
        let endpoint = fetch_endpoint("poe2", "abc123", &tokens);
        assert!(endpoint.contains("/fetch/a1,b2?"));
        assert!(endpoint.contains("query=abc123"));
        assert!(endpoint.ends_with("realm=poe2"));
    }

    #[test]
    fn whisper_endpoint_is_correct() {
        assert!(whisper_endpoint().ends_with("/api/trade2/whisper"));
    }

    #[test]
    fn referer_includes_query_when_present() {
        let with_query = search_referer("poe2", "Standard", Some("abc"));
        assert!(with_query.ends_with("/trade2/search/poe2/Standard/abc"));
        let without_query = search_referer("poe2", "Standard", None);
        assert!(without_query.ends_with("/trade2/search/poe2/Standard"));
    }

    #[test]
    fn refused_upgrade_maps_to_feed_or_authorization_error() {
        use tokio_tungstenite::tungstenite::http::Response;

        let refused = |status: u16| {
            WsError::Http(
                Response::builder()
                    .status(status)
                    .body(None)
                    .expect("response should build"),
            )
        };

        assert!(matches!(
            handshake_error(refused(503)),
            AppError::FeedUnavailable(reason) if reason.contains("503")
        ));
        assert!(handshake_error(refused(401)).is_authorization());
        assert!(matches!(
            handshake_error(WsError::ConnectionClosed),
            AppError::WebSocket(_)
        ));
    }

    #[test]
    fn builds_transport_from_config() {
        let transport = TradeApiTransport::new(TradeApiConfig {
            poesessid: "session".to_string(),
            cf_clearance: None,
            league: "Standard".to_string(),
            realm: "poe2".to_string(),
        })
        .expect("client should build");
        assert_eq!(transport.cookie, "POESESSID=session");
    }
}
