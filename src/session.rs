//! Session key store: ephemeral signing credentials per wallet
//!
//! A session key is a throwaway secp256k1 keypair that may sign on behalf of
//! a user's wallet until it expires. The store holds at most one session per
//! wallet; creating a new one replaces the old. Expiry is enforced lazily on
//! read, with `cleanup_expired_sessions` available as an explicit sweep.

use crate::config::SessionConfig;
use crate::error::{AgentBusError, Result};
use crate::evm;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k256::ecdsa::SigningKey;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Permission granting every capability
pub const UNIVERSAL_PERMISSION: &str = "*";

/// Permission required to sign transactions with a session key
pub const SIGN_TRANSACTION: &str = "sign_transaction";

/// One ephemeral signing credential
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyData {
    /// Wallet this session acts for (lowercased)
    pub wallet_address: String,

    /// EVM address of the ephemeral key
    pub address: String,

    /// 0x-hex private key, never serialized
    #[serde(skip_serializing)]
    private_key: String,

    /// Granted capability tags
    pub permissions: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Soft-revocation flag
    pub is_active: bool,
}

impl SessionKeyData {
    /// The 0x-hex private key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Decode the private key into a signing key
    pub fn signing_key(&self) -> Result<SigningKey> {
        evm::signing_key_from_hex(&self.private_key)
    }

    /// Whether the session grants `permission`
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == UNIVERSAL_PERMISSION || p == permission)
    }

    /// Whether the session is usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now <= self.expires_at
    }
}

impl std::fmt::Debug for SessionKeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyData")
            .field("wallet_address", &self.wallet_address)
            .field("address", &self.address)
            .field("private_key", &"[REDACTED]")
            .field("permissions", &self.permissions)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Registry of session keys keyed by wallet address
///
/// Constructed explicitly and shared via `Arc`; there is no global instance.
pub struct SessionKeyStore {
    sessions: RwLock<HashMap<String, SessionKeyData>>,
    config: SessionConfig,
}

impl Default for SessionKeyStore {
    fn default() -> Self {
        Self::with_config(SessionConfig::default())
    }
}

impl SessionKeyStore {
    /// Create an empty store with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Generate a session key valid for the configured default duration
    pub fn create_default_session_key(
        &self,
        wallet: &str,
        permissions: Vec<String>,
    ) -> Result<SessionKeyData> {
        self.create_session_key(wallet, permissions, self.config.default_duration_hours)
    }

    /// Generate a fresh session key valid for `duration_hours`
    ///
    /// Replaces any existing session for the wallet.
    pub fn create_session_key(
        &self,
        wallet: &str,
        permissions: Vec<String>,
        duration_hours: u32,
    ) -> Result<SessionKeyData> {
        let expires_at = Utc::now() + ChronoDuration::hours(i64::from(duration_hours));
        self.insert_with_expiry(wallet, permissions, expires_at)
    }

    /// Generate a fresh session key with an explicit expiry
    pub fn insert_with_expiry(
        &self,
        wallet: &str,
        permissions: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionKeyData> {
        let wallet = normalize_wallet(wallet);
        if wallet.is_empty() {
            return Err(AgentBusError::Config(
                "Session key requires a wallet address".to_string(),
            ));
        }

        let signing_key = evm::generate_signing_key();
        let session = SessionKeyData {
            wallet_address: wallet.clone(),
            address: evm::address_of(&signing_key),
            private_key: evm::signing_key_to_hex(&signing_key),
            permissions,
            created_at: Utc::now(),
            expires_at,
            is_active: true,
        };

        let replaced = self.write().insert(wallet.clone(), session.clone());

        tracing::info!(
            wallet = %wallet,
            session_address = %session.address,
            expires_at = %session.expires_at,
            replaced = replaced.is_some(),
            "Session key created"
        );
        Ok(session)
    }

    /// Get the wallet's session if it is active and unexpired
    ///
    /// An expired entry is deactivated as a side effect of the read.
    pub fn get_session_key(&self, wallet: &str) -> Option<SessionKeyData> {
        let wallet = normalize_wallet(wallet);
        let now = Utc::now();

        {
            let sessions = self.read();
            match sessions.get(&wallet) {
                None => return None,
                Some(session) if session.is_valid_at(now) => return Some(session.clone()),
                Some(session) if !session.is_active => return None,
                Some(_) => {}
            }
        }

        let mut sessions = self.write();
        let session = sessions.get_mut(&wallet)?;
        if session.is_valid_at(now) {
            // Replaced between the two locks
            return Some(session.clone());
        }
        if session.is_active {
            session.is_active = false;
            tracing::info!(wallet = %wallet, session_address = %session.address, "Session key expired");
        }
        None
    }

    /// Deactivate the wallet's session; returns whether one existed
    pub fn revoke_session_key(&self, wallet: &str) -> bool {
        let wallet = normalize_wallet(wallet);
        match self.write().get_mut(&wallet) {
            Some(session) => {
                session.is_active = false;
                tracing::info!(wallet = %wallet, "Session key revoked");
                true
            }
            None => false,
        }
    }

    /// Delete every entry whose expiry has passed; returns how many
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| now <= s.expires_at);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "Expired sessions swept");
        }
        removed
    }

    /// Raw entry for a wallet, without expiry side effects
    pub fn entry(&self, wallet: &str) -> Option<SessionKeyData> {
        self.read().get(&normalize_wallet(wallet)).cloned()
    }

    /// Number of active, unexpired sessions
    pub fn active_sessions(&self) -> usize {
        let now = Utc::now();
        self.read().values().filter(|s| s.is_valid_at(now)).count()
    }

    /// Start the sweep at the configured interval
    pub fn start_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sweep_interval();
        self.spawn_sweeper(interval)
    }

    /// Run `cleanup_expired_sessions` every `interval` until the task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.cleanup_expired_sessions();
            }
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionKeyData>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionKeyData>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize_wallet(wallet: &str) -> String {
    wallet.trim().to_ascii_lowercase()
}
