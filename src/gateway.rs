//! # External Proof Checks and Chain Writes
//!
//! The quest evaluator and ticket registry never talk to a chain or an indexer
//! directly. They depend on two capabilities:
//!
//! - [`ProofVerifier`]: read-only checks (POAP ownership, swap history,
//!   basename lookup, wallet signature verification).
//! - [`ChainWriter`]: writes that spend gas from a server-held signer (token
//!   payout, subname registration, ticket attestation).
//!
//! [`HttpGateway`] implements both against a gateway sidecar that owns the
//! signer keys, so key material never enters this process. Every call is bounded
//! by `gateway.timeout_secs`; a timeout or non-2xx response is an `Err`, which
//! callers report as an external failure, never as "verification failed".
//!
//! ## Gateway endpoints
//!
//! | Path | Request | Response |
//! |------|---------|----------|
//! | `POST /poap/ownership` | `{address, poapId}` | `{owned}` |
//! | `POST /swaps/verify` | `{address, condition}` | `{verified}` |
//! | `POST /basenames/lookup` | `{address, condition?}` | `{name?, avatar?}` |
//! | `POST /signatures/verify` | `{address, message, signature}` | `{valid}` |
//! | `POST /payouts` | `{to, amountWei}` | `{txLink}` |
//! | `POST /subnames` | `{owner, label, parent}` | `{txLink}` |
//! | `POST /attestations/tickets` | `{attendee, eventId, ticketCode}` | `{txLink}` |

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::profile::Address;

/// A basename resolved for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basename {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Result of a confirmed on-chain write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_link: String,
}

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Does `address` hold the POAP with id `poap_id`?
    async fn verify_poap(&self, address: &Address, poap_id: &str) -> Result<bool>;

    /// Has `address` performed the swap described by `condition`?
    async fn verify_swap(&self, address: &Address, condition: &str) -> Result<bool>;

    /// Primary basename of `address`, optionally restricted to a parent in `condition`.
    async fn lookup_basename(
        &self,
        address: &Address,
        condition: Option<&str>,
    ) -> Result<Option<Basename>>;

    /// Does `signature` over `message` recover to `address`?
    async fn verify_signature(
        &self,
        address: &Address,
        message: &str,
        signature: &str,
    ) -> Result<bool>;
}

#[async_trait]
pub trait ChainWriter: Send + Sync {
    async fn send_payout(&self, to: &Address, amount_wei: &str) -> Result<TxReceipt>;

    async fn register_subname(&self, owner: &Address, label: &str, parent: &str)
        -> Result<TxReceipt>;

    async fn attest_ticket(
        &self,
        attendee: &Address,
        event_id: i64,
        ticket_code: &str,
    ) -> Result<TxReceipt>;
}

/// HTTP client for the chain gateway sidecar.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base: url::Url,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base =
            url::Url::parse(base).with_context(|| format!("invalid gateway url {base}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build gateway client")?;
        Ok(HttpGateway {
            client,
            base,
            token,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::new(
            &config.url,
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.base.join(path)?;
        debug!(%url, "gateway request");
        let mut req = self.client.post(url.clone()).json(body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let response = req
            .send()
            .await
            .with_context(|| format!("gateway request to {path} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("gateway {path} returned {status}: {text}"));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("gateway {path} returned malformed JSON"))
    }
}

#[derive(Deserialize)]
struct OwnedResponse {
    owned: bool,
}

#[derive(Deserialize)]
struct VerifiedResponse {
    verified: bool,
}

#[derive(Deserialize)]
struct ValidResponse {
    valid: bool,
}

#[derive(Deserialize)]
struct BasenameResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[async_trait]
impl ProofVerifier for HttpGateway {
    async fn verify_poap(&self, address: &Address, poap_id: &str) -> Result<bool> {
        let r: OwnedResponse = self
            .post(
                "poap/ownership",
                &serde_json::json!({ "address": address, "poapId": poap_id }),
            )
            .await?;
        Ok(r.owned)
    }

    async fn verify_swap(&self, address: &Address, condition: &str) -> Result<bool> {
        let r: VerifiedResponse = self
            .post(
                "swaps/verify",
                &serde_json::json!({ "address": address, "condition": condition }),
            )
            .await?;
        Ok(r.verified)
    }

    async fn lookup_basename(
        &self,
        address: &Address,
        condition: Option<&str>,
    ) -> Result<Option<Basename>> {
        let r: BasenameResponse = self
            .post(
                "basenames/lookup",
                &serde_json::json!({ "address": address, "condition": condition }),
            )
            .await?;
        Ok(r
            .name
            .filter(|n| !n.is_empty())
            .map(|name| Basename {
                name,
                avatar: r.avatar,
            }))
    }

    async fn verify_signature(
        &self,
        address: &Address,
        message: &str,
        signature: &str,
    ) -> Result<bool> {
        let r: ValidResponse = self
            .post(
                "signatures/verify",
                &serde_json::json!({
                    "address": address,
                    "message": message,
                    "signature": signature,
                }),
            )
            .await?;
        Ok(r.valid)
    }
}

#[async_trait]
impl ChainWriter for HttpGateway {
    async fn send_payout(&self, to: &Address, amount_wei: &str) -> Result<TxReceipt> {
        self.post(
            "payouts",
            &serde_json::json!({ "to": to, "amountWei": amount_wei }),
        )
        .await
    }

    async fn register_subname(
        &self,
        owner: &Address,
        label: &str,
        parent: &str,
    ) -> Result<TxReceipt> {
        self.post(
            "subnames",
            &serde_json::json!({ "owner": owner, "label": label, "parent": parent }),
        )
        .await
    }

    async fn attest_ticket(
        &self,
        attendee: &Address,
        event_id: i64,
        ticket_code: &str,
    ) -> Result<TxReceipt> {
        self.post(
            "attestations/tickets",
            &serde_json::json!({
                "attendee": attendee,
                "eventId": event_id,
                "ticketCode": ticket_code,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let g = HttpGateway::new("http://gw.local/api", None, Duration::from_secs(1)).unwrap();
        assert_eq!(g.base.join("payouts").unwrap().as_str(), "http://gw.local/api/payouts");
    }

    #[test]
    fn root_base_url_joins_cleanly() {
        let g = HttpGateway::new("http://gw.local", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            g.base.join("poap/ownership").unwrap().as_str(),
            "http://gw.local/poap/ownership"
        );
    }

    #[test]
    fn invalid_url_is_an_error() {
        assert!(HttpGateway::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_an_error() {
        // Port 9 (discard) on localhost is closed in CI sandboxes.
        let g = HttpGateway::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let addr = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        assert!(g.verify_poap(&addr, "1").await.is_err());
    }

    #[test]
    fn receipt_uses_camel_case() {
        let r: TxReceipt =
            serde_json::from_str(r#"{"txLink": "https://basescan.org/tx/0x1"}"#).unwrap();
        assert_eq!(r.tx_link, "https://basescan.org/tx/0x1");
    }
}
