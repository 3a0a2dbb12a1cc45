//! Ephemeral store for pending OAuth flows (PKCE verifier + state)
//!
//! Entries are keyed by the opaque state token and live for a fixed TTL.
//! `consume` is the only read path and removes the entry in the same lock
//! acquisition, so a state value can complete at most one callback. Expiry
//! is enforced at consume time; the background sweep only bounds memory.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::common::generate_correlation_id;

/// What the callback should do once the code is exchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    Login,
    /// Attach the provider to an already-authenticated account
    Link { user_id: String },
}

#[derive(Debug, Clone)]
pub struct PendingFlow {
    pub code_verifier: String,
    pub provider: String,
    pub action: FlowAction,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingFlow {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Returned to the initiator. The verifier stays in the store until
/// `consume` hands it to the token exchange.
#[derive(Debug, Clone)]
pub struct FlowStart {
    pub state: String,
    pub code_challenge: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct PkceStore {
    flows: Arc<RwLock<HashMap<String, PendingFlow>>>,
    ttl: chrono::Duration,
    sweep_interval: Duration,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl PkceStore {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            sweep_interval,
            sweeper: StdMutex::new(None),
        }
    }

    /// Start the periodic expiry sweep. Calling twice is a no-op.
    pub fn init(&self) {
        let Ok(mut guard) = self.sweeper.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        let flows = self.flows.clone();
        let period = self.sweep_interval;
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = sweep(&flows, Utc::now()).await;
                if removed > 0 {
                    debug!(removed = removed, "Swept expired OAuth flows");
                }
            }
        }));
        info!(interval_secs = period.as_secs(), "OAuth flow sweeper started");
    }

    /// Stop the sweep task. Pending flows are dropped with the store.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
                info!("OAuth flow sweeper stopped");
            }
        }
    }

    /// Record a new pending flow and return its state token and PKCE pair
    pub async fn begin(&self, provider: &str, link_user_id: Option<&str>) -> FlowStart {
        let code_verifier = random_token();
        let code_challenge = code_challenge(&code_verifier);
        // independently drawn, never derived from the verifier
        let state = random_token();
        let correlation_id = generate_correlation_id();

        let now = Utc::now();
        let flow = PendingFlow {
            code_verifier,
            provider: provider.to_string(),
            action: match link_user_id {
                Some(user_id) => FlowAction::Link {
                    user_id: user_id.to_string(),
                },
                None => FlowAction::Login,
            },
            correlation_id: correlation_id.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.flows.write().await.insert(state.clone(), flow);

        FlowStart {
            state,
            code_challenge,
            correlation_id,
        }
    }

    /// Atomically take the flow for `state`. Expired flows are dropped and reported as missing.
    pub async fn consume(&self, state: &str) -> Option<PendingFlow> {
        let flow = self.flows.write().await.remove(state)?;
        let now = Utc::now();
        if flow.is_expired(now) {
            debug!(
                correlation_id = %flow.correlation_id,
                age_secs = (now - flow.created_at).num_seconds(),
                "Rejected expired OAuth flow"
            );
            return None;
        }
        Some(flow)
    }
}

#[cfg(test)]
impl PkceStore {
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.flows, Utc::now()).await
    }
}

impl Drop for PkceStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep(flows: &RwLock<HashMap<String, PendingFlow>>, now: DateTime<Utc>) -> usize {
    let mut flows = flows.write().await;
    let before = flows.len();
    flows.retain(|_, flow| !flow.is_expired(now));
    before - flows.len()
}

/// 256 bits from the OS RNG, base64url without padding (43 chars)
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge: base64url(SHA-256(verifier))
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
