//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use onchain_quest::api::{build_router, AppState};
use onchain_quest::catalog::EventImport;
use onchain_quest::config::AppConfig;
use onchain_quest::db::Database;
use onchain_quest::gateway::{Basename, ChainWriter, ProofVerifier, TxReceipt};
use onchain_quest::profile::Address;
use onchain_quest::store::MemoryStore;
use tokio::sync::{Barrier, OnceCell};

pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const ADMIN: &str = "0x1111111111111111111111111111111111111111";

/// Scriptable stand-in for the chain gateway sidecar.
#[derive(Default)]
pub struct FakeGateway {
    pub poap: AtomicBool,
    pub swap: AtomicBool,
    pub basename: AtomicBool,
    pub signature_ok: AtomicBool,
    pub chain_down: AtomicBool,
    pub attest_down: AtomicBool,
    pub payouts: AtomicUsize,
    pub subnames: AtomicUsize,
    pub attestations: AtomicUsize,
    /// When set, signature checks wait here so concurrent claims line up.
    pub signature_gate: OnceLock<Barrier>,
}

impl FakeGateway {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    /// Hold signature checks until `parties` claims have reached them.
    pub fn gate_signatures(&self, parties: usize) {
        let _ = self.signature_gate.set(Barrier::new(parties));
    }
}

#[async_trait]
impl ProofVerifier for FakeGateway {
    async fn verify_poap(&self, _: &Address, _: &str) -> anyhow::Result<bool> {
        Ok(self.poap.load(Ordering::SeqCst))
    }

    async fn verify_swap(&self, _: &Address, _: &str) -> anyhow::Result<bool> {
        Ok(self.swap.load(Ordering::SeqCst))
    }

    async fn lookup_basename(
        &self,
        _: &Address,
        _: Option<&str>,
    ) -> anyhow::Result<Option<Basename>> {
        if !self.basename.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Basename {
            name: "alice.base.eth".into(),
            avatar: None,
        }))
    }

    async fn verify_signature(&self, _: &Address, _: &str, _: &str) -> anyhow::Result<bool> {
        if let Some(gate) = self.signature_gate.get() {
            gate.wait().await;
        }
        Ok(self.signature_ok.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChainWriter for FakeGateway {
    async fn send_payout(&self, _: &Address, _: &str) -> anyhow::Result<TxReceipt> {
        // Chain writes take time; let a concurrent request run meanwhile.
        tokio::task::yield_now().await;
        if self.chain_down.load(Ordering::SeqCst) {
            anyhow::bail!("insufficient funds");
        }
        let n = self.payouts.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_link: format!("https://basescan.org/tx/0xpay{n}"),
        })
    }

    async fn register_subname(
        &self,
        _: &Address,
        _: &str,
        _: &str,
    ) -> anyhow::Result<TxReceipt> {
        tokio::task::yield_now().await;
        if self.chain_down.load(Ordering::SeqCst) {
            anyhow::bail!("execution reverted");
        }
        self.subnames.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_link: "https://basescan.org/tx/0xsub".into(),
        })
    }

    async fn attest_ticket(&self, _: &Address, _: i64, _: &str) -> anyhow::Result<TxReceipt> {
        if self.attest_down.load(Ordering::SeqCst) {
            anyhow::bail!("attestation service unavailable");
        }
        self.attestations.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_link: "https://basescan.org/tx/0xatt".into(),
        })
    }
}

/// The event every integration test plays through.
pub fn sample_event() -> EventImport {
    EventImport::from_json(
        &serde_json::json!({
            "id": 1,
            "name": "Istanbul Onchain Quest",
            "data_en": {"tasks": [
                {"id": 0, "name": "Connect wallet", "points": 5, "action": "connect-wallet"},
                {"id": 1, "name": "Set up profile", "points": 10, "action": "setup-profile"},
                {"id": 2, "name": "Claim POAP", "points": 20, "action": "claim-poap", "condition": "171234"},
                {"id": 3, "name": "Visit booth", "points": 5, "action": "click-link", "condition": "https://example.org", "lock": 2},
                {"id": 4, "name": "Claim tokens", "points": 15, "action": "claim-tokens", "condition": "171234"},
                {"id": 5, "name": "Claim subname", "points": 25, "action": "claim-subname", "requiresTaskId": 2}
            ]}
        })
        .to_string(),
    )
    .unwrap()
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.admin.addresses = vec![ADMIN.to_string()];
    config
}

/// Router over an in-memory store seeded with [`sample_event`].
pub fn build_memory_app() -> (axum::Router, Arc<FakeGateway>) {
    let store = MemoryStore::new();
    store.add_event(&sample_event());
    let gateway = Arc::new(FakeGateway::default());
    let state = AppState::new(
        Arc::new(store),
        gateway.clone(),
        gateway.clone(),
        test_config(),
    );
    (build_router(state, None), gateway)
}

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: OnceCell<()> = OnceCell::const_new();

/// Ensure the test database schema is set up (runs migrations once per test binary).
pub async fn ensure_schema() {
    SCHEMA_INIT
        .get_or_init(|| async {
            let db = Database::connect(&test_db_url()).await.unwrap();
            db.migrate().await.unwrap();
        })
        .await;
}

/// Connect to the test database, truncate it, and seed [`sample_event`].
pub async fn setup_test_db() -> Database {
    ensure_schema().await;
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    sqlx::raw_sql("TRUNCATE TABLE tickets, users, events RESTART IDENTITY CASCADE")
        .execute(db.pool())
        .await
        .unwrap();
    db.upsert_event(&sample_event()).await.unwrap();
    db
}
