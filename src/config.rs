//! # Config — TOML Service Configuration
//!
//! Deployment-specific settings live in a TOML file (default
//! `onchain-quest.toml`, override with `--config` or `ONCHAIN_QUEST_CONFIG`).
//! Every field has a default, so a missing file starts the service with a
//! local-development configuration. Secrets are never stored in the file: the
//! gateway token is read from the environment variable named by
//! `gateway.token_env`.
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [admin]
//! addresses = ["0x1111111111111111111111111111111111111111"]
//!
//! [quests]
//! reserved_subnames = ["admin", "didier"]
//! subname_parent = "onchainquest.eth"
//! payout_wei = "1000000000000000"
//!
//! [gateway]
//! url = "http://127.0.0.1:8787"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::profile::Address;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub quests: QuestConfig,
    pub tickets: TicketConfig,
    pub gateway: GatewayConfig,
}

/// The `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
    pub leaderboard_limit: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3000,
            static_dir: None,
            request_timeout_secs: 30,
            body_limit_bytes: 256 * 1024,
            leaderboard_limit: 100,
        }
    }
}

/// The `[admin]` section: wallet allowlist and the message admins sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub addresses: Vec<String>,
    pub message: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            addresses: Vec::new(),
            message: "Onchain Quest admin access".to_string(),
        }
    }
}

impl AdminConfig {
    /// Normalised allowlist. Call after [`AppConfig::validate`].
    pub fn allowlist(&self) -> HashSet<Address> {
        self.addresses
            .iter()
            .filter_map(|a| Address::parse(a).ok())
            .collect()
    }
}

/// The `[quests]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestConfig {
    /// Reject a lock-gated task while its prerequisite is incomplete.
    pub enforce_locks: bool,
    /// Message attendees sign to claim a subname.
    pub claim_message: String,
    pub reserved_subnames: Vec<String>,
    /// ENS parent name new subnames are registered under.
    pub subname_parent: String,
    /// Native-token payout for `claim-tokens`, in wei.
    pub payout_wei: String,
}

impl Default for QuestConfig {
    fn default() -> Self {
        QuestConfig {
            enforce_locks: true,
            claim_message: "Claim my Onchain Quest subname".to_string(),
            reserved_subnames: ["admin", "root", "www", "onchainquest", "didier"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            subname_parent: "onchainquest.eth".to_string(),
            payout_wei: "1000000000000000".to_string(),
        }
    }
}

/// The `[tickets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Request an on-chain attestation after each association.
    pub attest: bool,
    pub max_batch: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        TicketConfig {
            attest: true,
            max_batch: 100,
        }
    }
}

/// The `[gateway]` section: chain gateway sidecar holding the signer keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    /// Environment variable holding the gateway bearer token.
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            url: "http://127.0.0.1:8787".to_string(),
            token_env: "GATEWAY_TOKEN".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = AppConfig::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout_secs == 0 {
            bail!("server.request_timeout_secs must be > 0");
        }
        if self.server.leaderboard_limit <= 0 {
            bail!("server.leaderboard_limit must be > 0");
        }
        for a in &self.admin.addresses {
            if Address::parse(a).is_err() {
                bail!("admin.addresses: invalid address {a:?}");
            }
        }
        if self.admin.message.trim().is_empty() {
            bail!("admin.message must not be empty");
        }
        if self.quests.claim_message.trim().is_empty() {
            bail!("quests.claim_message must not be empty");
        }
        if self.quests.subname_parent.trim().is_empty() {
            bail!("quests.subname_parent must not be empty");
        }
        if self.quests.payout_wei.is_empty()
            || !self.quests.payout_wei.chars().all(|c| c.is_ascii_digit())
        {
            bail!("quests.payout_wei must be a decimal integer");
        }
        if self.tickets.max_batch == 0 || self.tickets.max_batch > 100 {
            bail!("tickets.max_batch must be in 1..=100");
        }
        if self.gateway.url.trim().is_empty() {
            bail!("gateway.url must not be empty");
        }
        url::Url::parse(&self.gateway.url)
            .with_context(|| format!("gateway.url is not a valid URL: {}", self.gateway.url))?;
        if self.gateway.timeout_secs == 0 {
            bail!("gateway.timeout_secs must be > 0");
        }
        Ok(())
    }

    /// Lowercased reserved subname labels.
    pub fn reserved_subnames(&self) -> HashSet<String> {
        self.quests
            .reserved_subnames
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
