//! Process configuration, read from the environment (after `.env`).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;
use url::Url;

use crate::broadcaster::BroadcastConfig;
use crate::conflict::DEFAULT_BLOCKS_API_URL;

pub const DEFAULT_RELAYS: [&str; 6] = [
    "https://relay.flashbots.net",
    "https://builder0x69.io",
    "https://rpc.beaverbuild.org",
    "https://rsync-builder.xyz",
    "https://rpc.titanbuilder.xyz",
    "https://api.edennetwork.io/v1/bundle",
];

pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:42161";

#[derive(Debug)]
pub struct BundlerConfig {
    pub rpc_url: Option<Url>,
    /// Identity used to sign relay requests. Carries no funds.
    pub auth_private_key: Option<SecretString>,
    /// Account that signs unsigned legs submitted through the admin API.
    pub wallet_private_key: Option<SecretString>,
    pub relay_urls: Vec<Url>,
    pub blocks_api_url: Url,
    pub inclusion_timeout: Duration,
    pub relay_request_timeout: Duration,
    pub max_submit_attempts: u32,
    pub retry_block_advance: u64,
    pub block_poll_interval: Duration,
    pub admin_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

impl BundlerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_url = get("RPC_URL")
            .map(|v| Url::parse(&v).context("RPC_URL is not a valid URL"))
            .transpose()?;

        let relay_urls = match get("RELAY_URLS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Url::parse(s).with_context(|| format!("invalid relay URL {s:?}")))
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_RELAYS
                .iter()
                .map(|s| Url::parse(s).with_context(|| format!("invalid relay URL {s:?}")))
                .collect::<Result<Vec<_>>>()?,
        };

        let blocks_api_url = Url::parse(&get("BLOCKS_API_URL").unwrap_or_else(|| DEFAULT_BLOCKS_API_URL.to_string()))
            .context("BLOCKS_API_URL is not a valid URL")?;

        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v.trim().parse().with_context(|| format!("{key} must be an integer, got {v:?}")),
                None => Ok(default),
            }
        };

        let broadcast = BroadcastConfig::default();
        let max_submit_attempts = u32::try_from(parse_u64("MAX_SUBMIT_ATTEMPTS", broadcast.max_attempts.into())?)
            .context("MAX_SUBMIT_ATTEMPTS is out of range")?;

        let admin_addr = get("ADMIN_ADDR")
            .unwrap_or_else(|| DEFAULT_ADMIN_ADDR.to_string())
            .parse()
            .context("ADMIN_ADDR must be host:port")?;

        Ok(Self {
            rpc_url,
            auth_private_key: get("AUTH_PRIVATE_KEY").map(SecretString::from),
            wallet_private_key: get("WALLET_PRIVATE_KEY").map(SecretString::from),
            relay_urls,
            blocks_api_url,
            inclusion_timeout: Duration::from_secs(parse_u64("INCLUSION_TIMEOUT_SECS", 300)?),
            relay_request_timeout: Duration::from_secs(parse_u64("RELAY_REQUEST_TIMEOUT_SECS", 10)?),
            max_submit_attempts,
            retry_block_advance: parse_u64("RETRY_BLOCK_ADVANCE", broadcast.retry_block_advance)?,
            block_poll_interval: Duration::from_millis(parse_u64("BLOCK_POLL_INTERVAL_MS", 1000)?),
            admin_addr,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn require_rpc_url(&self) -> Result<Url> {
        self.rpc_url.clone().context("RPC_URL is required")
    }

    /// Relay identity. A throwaway key is generated when none is configured,
    /// which means relay reputation does not carry over between runs.
    pub fn auth_signer(&self) -> Result<PrivateKeySigner> {
        match &self.auth_private_key {
            Some(key) => parse_key(key).context("AUTH_PRIVATE_KEY is not a valid private key"),
            None => {
                let signer = PrivateKeySigner::random();
                warn!(
                    "⚠️ AUTH_PRIVATE_KEY not set, using random relay identity {}",
                    signer.address()
                );
                Ok(signer)
            }
        }
    }

    pub fn wallet_signer(&self) -> Result<Option<PrivateKeySigner>> {
        self.wallet_private_key
            .as_ref()
            .map(|key| parse_key(key).context("WALLET_PRIVATE_KEY is not a valid private key"))
            .transpose()
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            max_attempts: self.max_submit_attempts,
            retry_block_advance: self.retry_block_advance,
        }
    }
}

fn parse_key(key: &SecretString) -> Result<PrivateKeySigner> {
    Ok(key.expose_secret().trim().parse::<PrivateKeySigner>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<BundlerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BundlerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.rpc_url.is_none());
        assert_eq!(cfg.relay_urls.len(), DEFAULT_RELAYS.len());
        assert_eq!(cfg.blocks_api_url.as_str(), DEFAULT_BLOCKS_API_URL);
        assert_eq!(cfg.inclusion_timeout, Duration::from_secs(300));
        assert_eq!(cfg.relay_request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.broadcast_config(), BroadcastConfig::default());
        assert_eq!(cfg.block_poll_interval, Duration::from_millis(1000));
        assert_eq!(cfg.admin_addr, DEFAULT_ADMIN_ADDR.parse().unwrap());
        assert!(cfg.log_dir.is_none());
        assert!(cfg.wallet_signer().unwrap().is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("RPC_URL", "http://localhost:8545"),
            ("RELAY_URLS", "https://a.example, https://b.example/rpc"),
            ("MAX_SUBMIT_ATTEMPTS", "2"),
            ("RETRY_BLOCK_ADVANCE", "1"),
            ("INCLUSION_TIMEOUT_SECS", "0"),
            ("ADMIN_ADDR", "0.0.0.0:9000"),
        ])
        .unwrap();
        assert_eq!(cfg.require_rpc_url().unwrap().as_str(), "http://localhost:8545/");
        assert_eq!(cfg.relay_urls.len(), 2);
        assert_eq!(cfg.relay_urls[1].as_str(), "https://b.example/rpc");
        assert_eq!(cfg.broadcast_config().max_attempts, 2);
        assert_eq!(cfg.broadcast_config().retry_block_advance, 1);
        assert!(cfg.inclusion_timeout.is_zero());
        assert_eq!(cfg.admin_addr.port(), 9000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[("MAX_SUBMIT_ATTEMPTS", "many")]).is_err());
        assert!(config(&[("RELAY_URLS", "not a url")]).is_err());
        assert!(config(&[("ADMIN_ADDR", "localhost")]).is_err());
    }

    #[test]
    fn test_keys() {
        let key = "0x0101010101010101010101010101010101010101010101010101010101010101";
        let cfg = config(&[("AUTH_PRIVATE_KEY", key), ("WALLET_PRIVATE_KEY", key)]).unwrap();
        let auth = cfg.auth_signer().unwrap();
        assert_eq!(Some(auth.address()), cfg.wallet_signer().unwrap().map(|s| s.address()));

        // random identity when unset
        let cfg = config(&[]).unwrap();
        assert_ne!(cfg.auth_signer().unwrap().address(), auth.address());

        let cfg = config(&[("AUTH_PRIVATE_KEY", "0x1234")]).unwrap();
        assert!(cfg.auth_signer().is_err());
    }
}
