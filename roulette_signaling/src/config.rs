//! Command line and environment configuration

use crate::ice::{
    DEFAULT_CACHE_TTL, DEFAULT_FALLBACK_TTL, IceServerProvider, TWILIO_API_BASE, TwilioSource,
};
use crate::state::EngineOptions;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Random-pairing WebRTC signaling server
///
/// Matches anonymous WebSocket clients in pairs and relays their
/// offer/answer/ICE messages until one of them leaves.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Interface to listen on
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Upper bound on in-flight send tasks
    #[arg(long, default_value_t = crate::dispatcher::DEFAULT_MAX_PENDING_TASKS, env = "MAX_PENDING_TASKS")]
    pub max_pending_tasks: usize,

    /// Seconds to wait for in-flight sends on shutdown
    #[arg(long, default_value_t = 5, env = "DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: u64,

    /// Put a session back in the waiting queue when its partner leaves
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "REQUEUE_PARTNER")]
    pub requeue_partner: bool,

    /// Twilio account SID; TURN is disabled without it
    #[arg(long, env = "TWILIO_ACCOUNT_SID")]
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token
    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    pub twilio_auth_token: Option<String>,

    /// Base url of the Twilio REST API
    #[arg(long, default_value = TWILIO_API_BASE, env = "TWILIO_API_BASE")]
    pub twilio_api_base: String,

    /// Seconds a fetched ICE server list stays valid
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs(), env = "ICE_CACHE_TTL_SECS")]
    pub ice_cache_ttl_secs: u64,

    /// Seconds the STUN-only fallback stays valid after a failed fetch
    #[arg(long, default_value_t = DEFAULT_FALLBACK_TTL.as_secs(), env = "ICE_FALLBACK_TTL_SECS")]
    pub ice_fallback_ttl_secs: u64,
}

impl Config {
    /// Address to bind.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    /// Engine tuning derived from the flags.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            requeue_partner: self.requeue_partner,
            max_pending_tasks: self.max_pending_tasks,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }

    /// ICE provider for the configured upstream.
    pub fn ice_provider(&self) -> anyhow::Result<IceServerProvider> {
        match (&self.twilio_account_sid, &self.twilio_auth_token) {
            (Some(sid), Some(token)) => {
                info!("TURN credentials enabled");
                let source = TwilioSource::new(&self.twilio_api_base, sid, token)?;
                Ok(IceServerProvider::new(
                    Arc::new(source),
                    Duration::from_secs(self.ice_cache_ttl_secs),
                    Duration::from_secs(self.ice_fallback_ttl_secs),
                ))
            }
            (None, None) => {
                info!("no Twilio credentials, serving STUN only");
                Ok(IceServerProvider::stun_only())
            }
            _ => {
                warn!("incomplete Twilio credentials, serving STUN only");
                Ok(IceServerProvider::stun_only())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["roulette-signaling"]).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.requeue_partner);
        assert_eq!(config.drain_timeout_secs, 5);
        assert_eq!(config.ice_cache_ttl_secs, 3600);
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "roulette-signaling",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--requeue-partner",
            "false",
            "--drain-timeout-secs",
            "1",
        ])
        .unwrap();

        let options = config.engine_options();
        assert!(!options.requeue_partner);
        assert_eq!(options.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn bad_host_is_an_error() {
        let config =
            Config::try_parse_from(["roulette-signaling", "--host", "not an ip"]).unwrap();
        assert!(config.bind_addr().is_err());
    }
}
