use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::HttpRequest;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Millisecond wall clock, swappable in tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(AtomicI64::new(start_ms))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One limiter: `max_requests` per `window`, optionally followed by a
/// `block_duration` lock-out once exceeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimitRule {
    pub window: Duration,
    pub max_requests: u32,
    pub block_duration: Option<Duration>,
    pub key_prefix: String,
}

impl LimitRule {
    pub fn new(key_prefix: &str, window: Duration, max_requests: u32, block_duration: Option<Duration>) -> Self {
        Self { window, max_requests, block_duration, key_prefix: key_prefix.to_string() }
    }

    /// Applies `RL_<PREFIX>_MAX`, `RL_<PREFIX>_WINDOW` and `RL_<PREFIX>_BLOCK`
    /// (seconds, `0` disables the block) on top of `self`.
    fn with_env_overrides(mut self) -> Self {
        fn env_u64(name: &str) -> Option<u64> { std::env::var(name).ok().and_then(|v| v.parse().ok()) }
        let base = format!("RL_{}", self.key_prefix.to_uppercase().replace('-', "_"));
        if let Some(max) = env_u64(&format!("{base}_MAX")) {
            self.max_requests = max as u32;
        }
        if let Some(secs) = env_u64(&format!("{base}_WINDOW")) {
            self.window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64(&format!("{base}_BLOCK")) {
            self.block_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }
        self
    }
}

#[derive(Debug, Clone)]
struct RateLimitRecord {
    count: u32,
    reset_at: i64,
    blocked: bool,
    block_expires: Option<i64>,
}

impl RateLimitRecord {
    fn open(now: i64, rule: &LimitRule) -> Self {
        Self { count: 1, reset_at: now + rule.window.as_millis() as i64, blocked: false, block_expires: None }
    }

    fn is_stale(&self, now: i64) -> bool {
        self.reset_at < now && self.block_expires.map_or(true, |b| b < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub success: bool,
    pub remaining: u32,
    /// Epoch millis at which the window (or block) ends.
    pub reset_at: i64,
    pub blocked: bool,
    /// Whole seconds until retrying makes sense; set on failures only.
    pub retry_after: Option<u64>,
}

fn ceil_secs(ms: i64) -> u64 {
    (ms.max(0) as u64).div_ceil(1000)
}

/// Fixed-window counter with an optional lock-out, held in process memory.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, RateLimitRecord>>,
    clock: Arc<dyn Clock>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self::with_clock(enabled, Arc::new(SystemClock))
    }

    pub fn with_clock(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self { store: Arc::new(DashMap::new()), clock, enabled }
    }

    /// Counts one request for `identifier` under `rule`. The whole
    /// read-modify-write runs under the entry's shard lock.
    pub fn check(&self, identifier: &str, rule: &LimitRule) -> RateLimitOutcome {
        let now = self.clock.now_ms();
        if !self.enabled {
            return RateLimitOutcome {
                success: true,
                remaining: rule.max_requests,
                reset_at: now + rule.window.as_millis() as i64,
                blocked: false,
                retry_after: None,
            };
        }
        let key = format!("{}:{}", rule.key_prefix, identifier);
        match self.store.entry(key) {
            Entry::Vacant(slot) => {
                let rec = slot.insert(RateLimitRecord::open(now, rule));
                RateLimitOutcome {
                    success: true,
                    remaining: rule.max_requests.saturating_sub(1),
                    reset_at: rec.reset_at,
                    blocked: false,
                    retry_after: None,
                }
            }
            Entry::Occupied(mut slot) => {
                let rec = slot.get_mut();
                if let Some(until) = rec.block_expires.filter(|until| rec.blocked && *until > now) {
                    return RateLimitOutcome {
                        success: false,
                        remaining: 0,
                        reset_at: until,
                        blocked: true,
                        retry_after: Some(ceil_secs(until - now)),
                    };
                }
                if rec.reset_at < now {
                    *rec = RateLimitRecord::open(now, rule);
                    return RateLimitOutcome {
                        success: true,
                        remaining: rule.max_requests.saturating_sub(1),
                        reset_at: rec.reset_at,
                        blocked: false,
                        retry_after: None,
                    };
                }
                rec.count += 1;
                if rec.count > rule.max_requests {
                    if let Some(block) = rule.block_duration {
                        rec.blocked = true;
                        rec.block_expires = Some(now + block.as_millis() as i64);
                    }
                    return RateLimitOutcome {
                        success: false,
                        remaining: 0,
                        reset_at: rec.reset_at,
                        blocked: rec.blocked,
                        retry_after: Some(ceil_secs(rec.reset_at - now)),
                    };
                }
                RateLimitOutcome {
                    success: true,
                    remaining: rule.max_requests - rec.count,
                    reset_at: rec.reset_at,
                    blocked: false,
                    retry_after: None,
                }
            }
        }
    }

    /// Drops records whose window and block have both run out.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.store.len();
        self.store.retain(|_, rec| !rec.is_stale(now));
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Runs [`sweep`](Self::sweep) every `period` until the runtime stops.
    pub async fn run_sweeper(self, period: Duration) {
        let mut tick = tokio::time::interval(period);
        tick.tick().await; // first tick fires immediately
        loop {
            tick.tick().await;
            let removed = self.sweep();
            if removed > 0 {
                debug!(removed, remaining = self.len(), "rate limit sweep");
            }
        }
    }
}

/// Per-action rules, overridable from the environment.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub api: LimitRule,
    pub auth: LimitRule,
    pub signup: LimitRule,
    pub verify: LimitRule,
    pub order_create: LimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        const MIN: Duration = Duration::from_secs(60);
        Self {
            api: LimitRule::new("api", MIN, 100, None),
            auth: LimitRule::new("auth", MIN, 5, Some(30 * MIN)),
            signup: LimitRule::new("signup", MIN, 3, Some(60 * MIN)),
            verify: LimitRule::new("verify", MIN, 5, Some(30 * MIN)),
            order_create: LimitRule::new("order-create", MIN, 20, None),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api: d.api.with_env_overrides(),
            auth: d.auth.with_env_overrides(),
            signup: d.signup.with_env_overrides(),
            verify: d.verify.with_env_overrides(),
            order_create: d.order_create.with_env_overrides(),
        }
    }
}

/// Handler-facing facade: one method per limited action.
#[derive(Clone)]
pub struct RateLimits {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
    /// Key clients by proxy headers instead of the socket peer.
    pub trust_proxy: bool,
}

impl RateLimits {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg, trust_proxy: false }
    }

    pub fn trusting_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// `RATE_LIMIT_ENABLED` (default on), `TRUST_PROXY` (default off) plus
    /// per-rule overrides.
    pub fn from_env() -> Self {
        let flag = |name: &str, default: bool| {
            std::env::var(name)
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(default)
        };
        Self::new(InMemoryRateLimiter::new(flag("RATE_LIMIT_ENABLED", true)), RateLimitConfig::from_env())
            .trusting_proxy(flag("TRUST_PROXY", false))
    }

    pub fn client_ip(&self, req: &HttpRequest) -> String {
        client_ip(req, self.trust_proxy)
    }

    fn check(&self, ip: &str, rule: &LimitRule) -> RateLimitOutcome {
        let outcome = self.limiter.check(ip, rule);
        if !outcome.success {
            metrics::counter!(
                "orderlink_rate_limited_total",
                "limiter" => rule.key_prefix.clone(),
                "blocked" => if outcome.blocked { "true" } else { "false" }
            )
            .increment(1);
        }
        outcome
    }

    pub fn api(&self, ip: &str) -> RateLimitOutcome { self.check(ip, &self.cfg.api) }
    pub fn login(&self, ip: &str) -> RateLimitOutcome { self.check(ip, &self.cfg.auth) }
    pub fn signup(&self, ip: &str) -> RateLimitOutcome { self.check(ip, &self.cfg.signup) }
    pub fn verify(&self, ip: &str) -> RateLimitOutcome { self.check(ip, &self.cfg.verify) }
    pub fn order_create(&self, ip: &str) -> RateLimitOutcome { self.check(ip, &self.cfg.order_create) }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new(InMemoryRateLimiter::new(true), RateLimitConfig::default())
    }
}

/// Client identifier for limiting. Proxy headers are only read behind a
/// trusted proxy; otherwise any client could pick its own key.
pub fn client_ip(req: &HttpRequest, trust_proxy: bool) -> String {
    let peer = || req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    if !trust_proxy {
        return peer();
    }
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    if let Some(fwd) = header("x-forwarded-for") {
        if let Some(first) = fwd.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    header("x-real-ip").or_else(|| header("cf-connecting-ip")).unwrap_or_else(peer)
}
