//! ICE server list for clients, with TURN credentials from an upstream API
//!
//! The list is cached for a TTL. Concurrent callers during a refresh share a
//! single upstream request. Any upstream failure degrades to the public STUN
//! server instead of surfacing an error.

use crate::error::IceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use roulette_protocol::{IceServer, IceUrls, PUBLIC_STUN_URL};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default lifetime of a fetched list.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of the fallback list after an upstream failure.
pub const DEFAULT_FALLBACK_TTL: Duration = Duration::from_secs(60);

/// Default base url of the Twilio REST API.
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Upstream that issues ICE servers
#[async_trait]
pub trait IceServerSource: Send + Sync {
    /// Fetch a fresh list of servers.
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError>;
}

/// Twilio Network Traversal Service client
pub struct TwilioSource {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    ice_servers: Option<Vec<UpstreamServer>>,
}

#[derive(Deserialize)]
struct UpstreamServer {
    urls: Option<IceUrls>,
    url: Option<String>,
    username: Option<String>,
    credential: Option<String>,
}

impl TwilioSource {
    /// Create a client for the given account.
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, IceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        })
    }

    fn tokens_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Tokens.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[async_trait]
impl IceServerSource for TwilioSource {
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError> {
        let url = self.tokens_url();
        debug!(%url, "requesting ICE servers");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IceError::Status(status));
        }

        let body = response.text().await?;
        parse_token_response(&body)
    }
}

/// Turn an upstream token document into the list handed to clients: the
/// public STUN server first, then every upstream server that is not a
/// duplicate of it.
fn parse_token_response(body: &str) -> Result<Vec<IceServer>, IceError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| IceError::Malformed(e.to_string()))?;
    let upstream = response
        .ice_servers
        .ok_or_else(|| IceError::Malformed("missing ice_servers".to_string()))?;

    let mut servers = vec![IceServer::public_stun()];
    for server in upstream {
        let Some(urls) = server.urls.or(server.url.map(IceUrls::One)) else {
            continue;
        };
        if urls == IceUrls::One(PUBLIC_STUN_URL.to_string()) {
            continue;
        }
        servers.push(IceServer {
            urls,
            username: server.username,
            credential: server.credential,
        });
    }
    Ok(servers)
}

struct Cached {
    servers: Arc<Vec<IceServer>>,
    expires_at: Instant,
}

/// Cached, single-flight view of an [`IceServerSource`]
pub struct IceServerProvider {
    source: Option<Arc<dyn IceServerSource>>,
    cache: RwLock<Option<Cached>>,
    refresh: tokio::sync::Mutex<()>,
    ttl: Duration,
    fallback_ttl: Duration,
}

impl IceServerProvider {
    /// Provider backed by `source`.
    pub fn new(source: Arc<dyn IceServerSource>, ttl: Duration, fallback_ttl: Duration) -> Self {
        Self {
            source: Some(source),
            cache: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            ttl,
            fallback_ttl,
        }
    }

    /// Provider with no upstream; always serves the fallback.
    pub fn stun_only() -> Self {
        Self {
            source: None,
            cache: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            ttl: DEFAULT_CACHE_TTL,
            fallback_ttl: DEFAULT_FALLBACK_TTL,
        }
    }

    /// The list served when the upstream is unavailable.
    pub fn fallback() -> Vec<IceServer> {
        vec![IceServer::public_stun()]
    }

    /// Current ICE servers. Never fails.
    pub async fn ice_servers(&self) -> Arc<Vec<IceServer>> {
        if let Some(servers) = self.fresh() {
            debug!("serving ICE servers from cache");
            return servers;
        }

        let Some(source) = &self.source else {
            return Arc::new(Self::fallback());
        };

        let _refresh = self.refresh.lock().await;
        if let Some(servers) = self.fresh() {
            debug!("ICE servers refreshed by another caller");
            return servers;
        }

        let (servers, ttl) = match source.fetch().await {
            Ok(servers) => {
                info!(count = servers.len(), "fetched ICE servers");
                (Arc::new(servers), self.ttl)
            }
            Err(e) => {
                warn!(error = %e, "ICE server fetch failed, serving STUN only");
                (Arc::new(Self::fallback()), self.fallback_ttl)
            }
        };

        *self.cache.write() = Some(Cached {
            servers: Arc::clone(&servers),
            expires_at: Instant::now() + ttl,
        });
        servers
    }

    fn fresh(&self) -> Option<Arc<Vec<IceServer>>> {
        let cache = self.cache.read();
        cache
            .as_ref()
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| Arc::clone(&cached.servers))
    }
}
