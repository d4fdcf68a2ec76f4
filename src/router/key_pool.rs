//! API Key Pool Management
//!
//! Holds every configured credential and admits requests against each
//! credential's per-minute request and token budgets.
//!
//! Selection is first-fit in insertion order: earlier credentials absorb load
//! until their budget is spent, then later ones take over. `acquire` hands
//! out a [`CredentialLease`] that reserves one request slot, so concurrent
//! callers can never be granted more requests than the budget allows.

use crate::config::{ApiKeyConfig, Provider};
use crate::error::{Result, RoxyError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Length of the counting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Longest hold-off a credential can be put on
pub const MAX_HOLD_OFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Usage counters for one credential, guarded by the credential's mutex
#[derive(Debug)]
struct UsageWindow {
    /// Requests charged in the current window
    usage_count: u32,

    /// Leases granted but not yet released
    in_flight: u32,

    /// Tokens charged in the current window
    tokens_used: u64,

    /// When the current window began
    window_start: Instant,

    /// Hold-off after an upstream rate limit
    cooldown_until: Option<Instant>,

    /// Wall-clock time of the last release
    last_used: Option<DateTime<Utc>>,

    /// Requests charged over the lifetime of the process
    total_requests: u64,
}

impl UsageWindow {
    fn new(now: Instant) -> Self {
        Self {
            usage_count: 0,
            in_flight: 0,
            tokens_used: 0,
            window_start: now,
            cooldown_until: None,
            last_used: None,
            total_requests: 0,
        }
    }

    /// Start a fresh window if the current one has elapsed
    fn roll(&mut self, now: Instant, window: Duration) {
        if now.saturating_duration_since(self.window_start) >= window {
            self.usage_count = 0;
            self.tokens_used = 0;
            self.window_start = now;
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// A single API key with its budgets and usage tracking
#[derive(Debug)]
pub struct Credential {
    provider: Provider,
    secret: String,
    max_rpm: u32,
    max_tpm: u64,
    cooldown: Duration,
    usage: Mutex<UsageWindow>,
}

impl Credential {
    /// Create a credential from its configuration
    pub fn new(config: &ApiKeyConfig) -> Self {
        Self {
            provider: config.provider,
            secret: config.secret().to_string(),
            max_rpm: config.max_rpm,
            max_tpm: config.max_tpm,
            cooldown: config.cooldown(),
            usage: Mutex::new(UsageWindow::new(Instant::now())),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Get the key value
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Key prefix safe to show in listings and logs
    pub fn masked(&self) -> String {
        let prefix: String = self.secret.chars().take(4).collect();
        format!("{}...", prefix)
    }

    pub fn max_rpm(&self) -> u32 {
        self.max_rpm
    }

    /// Configured hold-off after an upstream rate limit
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Try to reserve one request slot in the current window
    fn try_reserve(&self, now: Instant, window: Duration) -> Option<Instant> {
        let mut usage = self.usage.lock();
        usage.roll(now, window);

        if usage.cooling_down(now) {
            return None;
        }
        if usage.usage_count + usage.in_flight >= self.max_rpm {
            return None;
        }
        if self.max_tpm > 0 && usage.tokens_used >= self.max_tpm {
            return None;
        }

        usage.in_flight += 1;
        Some(usage.window_start)
    }

    /// Convert a reservation into charged usage
    fn settle(&self, granted_in: Instant, consumed_tokens: u64, window: Duration) {
        let now = Instant::now();
        let mut usage = self.usage.lock();
        usage.in_flight = usage.in_flight.saturating_sub(1);
        usage.roll(now, window);

        // a reservation from an expired window is never charged to a later one
        if usage.window_start == granted_in {
            usage.usage_count += 1;
            usage.tokens_used = usage.tokens_used.saturating_add(consumed_tokens);
        }
        usage.total_requests += 1;
        usage.last_used = Some(Utc::now());
    }

    fn hold_off(&self, duration: Duration) {
        let now = Instant::now();
        let duration = duration.min(MAX_HOLD_OFF);
        let Some(until) = now.checked_add(duration) else {
            return;
        };
        let mut usage = self.usage.lock();
        if usage.cooldown_until.map_or(true, |current| current < until) {
            usage.cooldown_until = Some(until);
        }
    }

    /// Point-in-time view of this credential
    pub fn snapshot(&self, window: Duration) -> CredentialSnapshot {
        let now = Instant::now();
        let mut usage = self.usage.lock();
        usage.roll(now, window);

        CredentialSnapshot {
            provider: self.provider,
            masked_key: self.masked(),
            usage_count: usage.usage_count,
            in_flight: usage.in_flight,
            max_rpm: self.max_rpm,
            tokens_used: usage.tokens_used,
            max_tpm: self.max_tpm,
            total_requests: usage.total_requests,
            last_used: usage.last_used,
            cooldown_remaining: usage
                .cooldown_until
                .and_then(|until| until.checked_duration_since(now))
                .filter(|d| !d.is_zero()),
        }
    }
}

/// A granted reservation on a credential.
///
/// Release it with [`CredentialLease::release`] once the upstream call is
/// done; dropping an unreleased lease charges it with zero tokens.
#[derive(Debug)]
pub struct CredentialLease {
    credential: Arc<Credential>,
    granted_in: Instant,
    window: Duration,
    settled: bool,
}

impl CredentialLease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn provider(&self) -> Provider {
        self.credential.provider
    }

    pub fn secret(&self) -> &str {
        self.credential.secret()
    }

    /// Put the credential on hold so `acquire` skips it for `duration`
    pub fn cool_down(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!(
            provider = %self.credential.provider,
            key = %self.credential.masked(),
            secs = duration.as_secs_f64(),
            "credential cooling down"
        );
        self.credential.hold_off(duration);
    }

    /// Report the request as issued, charging one request and `consumed_tokens`
    pub fn release(mut self, consumed_tokens: u64) {
        self.settle(consumed_tokens);
    }

    fn settle(&mut self, consumed_tokens: u64) {
        if !self.settled {
            self.settled = true;
            self.credential
                .settle(self.granted_in, consumed_tokens, self.window);
        }
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.settle(0);
    }
}

/// Pool of API keys across all providers
#[derive(Debug)]
pub struct CredentialPool {
    credentials: RwLock<Vec<Arc<Credential>>>,
    window: Duration,
}

impl CredentialPool {
    /// Create a pool with the standard one-minute window
    pub fn new(configs: &[ApiKeyConfig]) -> Self {
        Self::with_window(configs, DEFAULT_WINDOW)
    }

    /// Create a pool with a custom counting window
    pub fn with_window(configs: &[ApiKeyConfig], window: Duration) -> Self {
        Self {
            credentials: RwLock::new(configs.iter().map(|c| Arc::new(Credential::new(c))).collect()),
            window,
        }
    }

    /// Length of the counting window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the number of credentials in the pool
    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }

    /// Grant the first credential for `provider` with remaining budget
    pub fn acquire(&self, provider: Provider) -> Result<CredentialLease> {
        let now = Instant::now();
        let credentials = self.credentials.read();

        for credential in credentials.iter().filter(|c| c.provider == provider) {
            if let Some(granted_in) = credential.try_reserve(now, self.window) {
                return Ok(CredentialLease {
                    credential: Arc::clone(credential),
                    granted_in,
                    window: self.window,
                    settled: false,
                });
            }
        }

        debug!(%provider, "no credential with remaining budget");
        Err(RoxyError::NoCredentialAvailable(provider))
    }

    /// Append a credential
    pub fn add(&self, config: &ApiKeyConfig) {
        let credential = Arc::new(Credential::new(config));
        info!(
            provider = %credential.provider,
            key = %credential.masked(),
            max_rpm = credential.max_rpm,
            "credential added"
        );
        self.credentials.write().push(credential);
    }

    /// Point-in-time view of every credential, in insertion order
    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        self.credentials
            .read()
            .iter()
            .map(|c| c.snapshot(self.window))
            .collect()
    }

    /// Get statistics for one provider
    pub fn stats(&self, provider: Provider) -> KeyPoolStats {
        let mut stats = KeyPoolStats {
            provider,
            ..Default::default()
        };
        for snap in self.snapshot().into_iter().filter(|s| s.provider == provider) {
            stats.total_keys += 1;
            if snap.cooldown_remaining.is_some() {
                stats.cooling_down_keys += 1;
            } else if snap.usage_count + snap.in_flight < snap.max_rpm
                && (snap.max_tpm == 0 || snap.tokens_used < snap.max_tpm)
            {
                stats.available_keys += 1;
            }
            stats.window_requests += u64::from(snap.usage_count);
            stats.total_requests += snap.total_requests;
        }
        stats
    }
}

/// Point-in-time view of a credential
#[derive(Debug, Clone)]
pub struct CredentialSnapshot {
    pub provider: Provider,
    pub masked_key: String,
    pub usage_count: u32,
    pub in_flight: u32,
    pub max_rpm: u32,
    pub tokens_used: u64,
    pub max_tpm: u64,
    pub total_requests: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub cooldown_remaining: Option<Duration>,
}

/// Statistics about the credentials of one provider
#[derive(Debug, Clone)]
pub struct KeyPoolStats {
    pub provider: Provider,
    pub total_keys: usize,
    pub available_keys: usize,
    pub cooling_down_keys: usize,
    pub window_requests: u64,
    pub total_requests: u64,
}

impl Default for KeyPoolStats {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            total_keys: 0,
            available_keys: 0,
            cooling_down_keys: 0,
            window_requests: 0,
            total_requests: 0,
        }
    }
}
