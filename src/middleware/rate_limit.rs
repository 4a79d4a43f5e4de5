//! Rate limiting with hard lockout
//!
//! Counters live in the shared store under `rl:{prefix}:attempts:{id}` with
//! a window TTL; crossing the lockout threshold sets
//! `rl:{prefix}:lockout:{id}`. If any shared-store operation errors, the
//! same algorithm runs against an in-process store so limits keep holding
//! per process during an outage. Successful authentication clears both.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use redis::aio::ConnectionManager;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};

use crate::middleware::client_ip::extract_ip;

pub const MSG_TOO_MANY: &str = "Too many requests";
pub const MSG_LOCKED: &str = "Temporarily locked due to too many attempts";

/// How a rejected request is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitMode {
    /// Emit 429 with a JSON body
    Abort,
    /// Mark the request context and run the handler (GUI routes render the
    /// error inline)
    Context,
}

/// One rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub key_prefix: &'static str,
    pub window: Duration,
    pub max_attempts: u32,
    /// 0 disables the hard lockout
    pub lockout_threshold: u32,
    pub lockout_duration: Duration,
    pub mode: LimitMode,
}

/// Pre-built rules for the authentication endpoints
pub mod presets {
    use super::*;

    pub fn login() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "login",
            window: Duration::from_secs(60),
            max_attempts: 5,
            lockout_threshold: 10,
            lockout_duration: Duration::from_secs(15 * 60),
            mode: LimitMode::Abort,
        }
    }

    pub fn register() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "register",
            window: Duration::from_secs(60),
            max_attempts: 3,
            lockout_threshold: 0,
            lockout_duration: Duration::ZERO,
            mode: LimitMode::Abort,
        }
    }

    pub fn refresh() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "refresh",
            window: Duration::from_secs(60),
            max_attempts: 10,
            lockout_threshold: 0,
            lockout_duration: Duration::ZERO,
            mode: LimitMode::Abort,
        }
    }

    pub fn forgot_password() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "forgot_pw",
            window: Duration::from_secs(60),
            max_attempts: 3,
            lockout_threshold: 0,
            lockout_duration: Duration::ZERO,
            mode: LimitMode::Abort,
        }
    }

    pub fn reset_password() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "reset_pw",
            window: Duration::from_secs(60),
            max_attempts: 5,
            lockout_threshold: 0,
            lockout_duration: Duration::ZERO,
            mode: LimitMode::Abort,
        }
    }

    pub fn two_fa_verify() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "2fa",
            window: Duration::from_secs(60),
            max_attempts: 5,
            lockout_threshold: 10,
            lockout_duration: Duration::from_secs(15 * 60),
            mode: LimitMode::Abort,
        }
    }

    pub fn gui_login() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "gui_login",
            window: Duration::from_secs(60),
            max_attempts: 5,
            lockout_threshold: 10,
            lockout_duration: Duration::from_secs(15 * 60),
            mode: LimitMode::Context,
        }
    }
}

/// Outcome of a limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Limited {
        message: &'static str,
        retry_after_secs: u64,
    },
}

/// Marker inserted into the request context in `Context` mode
#[derive(Debug, Clone)]
pub struct RateLimitExceeded(pub &'static str);

fn attempts_key(prefix: &str, id: &str) -> String {
    format!("rl:{}:attempts:{}", prefix, id)
}

fn lockout_key(prefix: &str, id: &str) -> String {
    format!("rl:{}:lockout:{}", prefix, id)
}

// ============================================================
// In-process fallback store
// ============================================================

#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
    lockout_expires: Option<Instant>,
}

/// Concurrent map of buckets, one mutex per entry. Used whenever the shared
/// store errors, with identical semantics.
#[derive(Clone, Default)]
pub struct InProcessStore {
    buckets: Arc<RwLock<HashMap<String, Arc<Mutex<Bucket>>>>>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return bucket.clone();
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    count: 0,
                    window_start: Instant::now(),
                    lockout_expires: None,
                }))
            })
            .clone()
    }

    async fn check(&self, rule: &RateLimitRule, id: &str) -> LimitDecision {
        let key = attempts_key(rule.key_prefix, id);
        let bucket = self.bucket(&key).await;
        let mut bucket = bucket.lock().await;
        let now = Instant::now();

        if rule.lockout_threshold > 0 {
            if let Some(expires) = bucket.lockout_expires {
                if expires > now {
                    return LimitDecision::Limited {
                        message: MSG_LOCKED,
                        retry_after_secs: (expires - now).as_secs().max(1),
                    };
                }
                bucket.lockout_expires = None;
            }
        }

        if now.duration_since(bucket.window_start) >= rule.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        bucket.count += 1;

        if rule.lockout_threshold > 0 && bucket.count >= rule.lockout_threshold {
            bucket.lockout_expires = Some(now + rule.lockout_duration);
        }

        if bucket.count > rule.max_attempts {
            let window_remaining = rule.window - now.duration_since(bucket.window_start);
            return LimitDecision::Limited {
                message: MSG_TOO_MANY,
                retry_after_secs: window_remaining.as_secs().max(1),
            };
        }

        LimitDecision::Allowed
    }

    async fn clear(&self, prefix: &str, id: &str) {
        let key = attempts_key(prefix, id);
        self.buckets.write().await.remove(&key);
    }

    /// Drop entries whose window expired more than five minutes ago and
    /// whose lockout is clear.
    async fn evict(&self, max_window: Duration) {
        let now = Instant::now();
        let grace = Duration::from_secs(300);
        let mut buckets = self.buckets.write().await;
        let mut stale = Vec::new();
        for (key, bucket) in buckets.iter() {
            if let Ok(bucket) = bucket.try_lock() {
                let window_stale =
                    now.duration_since(bucket.window_start) > max_window + grace;
                let lockout_clear = bucket
                    .lockout_expires
                    .map(|e| e <= now)
                    .unwrap_or(true);
                if window_stale && lockout_clear {
                    stale.push(key.clone());
                }
            }
        }
        for key in stale {
            buckets.remove(&key);
        }
    }

    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }
}

// ============================================================
// Rate limiter
// ============================================================

#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    fallback: InProcessStore,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>, enabled: bool) -> Self {
        Self {
            redis,
            fallback: InProcessStore::new(),
            enabled,
        }
    }

    /// A limiter that never rejects (for tests and disabled configs)
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    /// In-process-only limiter; every check takes the fallback path
    pub fn in_process() -> Self {
        Self::new(None, true)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fallback_store(&self) -> InProcessStore {
        self.fallback.clone()
    }

    /// Run the limit algorithm for one logical key
    pub async fn check(&self, rule: &RateLimitRule, id: &str) -> LimitDecision {
        if !self.enabled {
            return LimitDecision::Allowed;
        }

        if let Some(redis) = &self.redis {
            match self.check_shared(redis.clone(), rule, id).await {
                Ok(decision) => {
                    if let LimitDecision::Limited { .. } = decision {
                        metrics::counter!("authgate_rate_limit_rejections_total",
                            "prefix" => rule.key_prefix)
                        .increment(1);
                    }
                    return decision;
                }
                Err(e) => {
                    tracing::warn!(error = %e, prefix = rule.key_prefix,
                        "Shared store unavailable, using in-process rate limits");
                    metrics::counter!("authgate_rate_limit_fallbacks_total").increment(1);
                }
            }
        }

        let decision = self.fallback.check(rule, id).await;
        if let LimitDecision::Limited { .. } = decision {
            metrics::counter!("authgate_rate_limit_rejections_total",
                "prefix" => rule.key_prefix)
            .increment(1);
        }
        decision
    }

    async fn check_shared(
        &self,
        mut conn: ConnectionManager,
        rule: &RateLimitRule,
        id: &str,
    ) -> Result<LimitDecision, redis::RedisError> {
        let attempts = attempts_key(rule.key_prefix, id);
        let lockout = lockout_key(rule.key_prefix, id);

        if rule.lockout_threshold > 0 {
            let locked: bool = redis::cmd("EXISTS")
                .arg(&lockout)
                .query_async(&mut conn)
                .await?;
            if locked {
                let ttl: i64 = redis::cmd("TTL").arg(&lockout).query_async(&mut conn).await?;
                return Ok(LimitDecision::Limited {
                    message: MSG_LOCKED,
                    retry_after_secs: ttl.max(1) as u64,
                });
            }
        }

        let count: u32 = redis::cmd("INCR")
            .arg(&attempts)
            .query_async(&mut conn)
            .await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&attempts)
                .arg(rule.window.as_secs())
                .query_async(&mut conn)
                .await?;
        }

        if rule.lockout_threshold > 0 && count >= rule.lockout_threshold {
            let _: () = redis::cmd("SET")
                .arg(&lockout)
                .arg("1")
                .arg("EX")
                .arg(rule.lockout_duration.as_secs())
                .query_async(&mut conn)
                .await?;
        }

        if count > rule.max_attempts {
            let ttl: i64 = redis::cmd("TTL")
                .arg(&attempts)
                .query_async(&mut conn)
                .await?;
            return Ok(LimitDecision::Limited {
                message: MSG_TOO_MANY,
                retry_after_secs: ttl.max(1) as u64,
            });
        }

        Ok(LimitDecision::Allowed)
    }

    /// Invoked on successful authentication: forget the caller's attempts
    /// in both stores. Best-effort on the shared side.
    pub async fn clear(&self, prefix: &str, id: &str) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(), redis::RedisError> = redis::cmd("DEL")
                .arg(attempts_key(prefix, id))
                .arg(lockout_key(prefix, id))
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, "Failed to clear shared rate limit state");
            }
        }
        self.fallback.clear(prefix, id).await;
    }
}

/// Background eviction of stale in-process buckets; one task per process.
pub async fn run_evictor(store: InProcessStore, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    // The longest preset window bounds how long a bucket stays relevant
    let max_window = Duration::from_secs(60);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.evict(max_window).await;
            }
            _ = shutdown.changed() => {
                tracing::debug!("Rate limit evictor shutting down");
                break;
            }
        }
    }
}

// ============================================================
// Middleware
// ============================================================

#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: RateLimiter,
    pub rule: RateLimitRule,
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let id = extract_ip(request.headers());

    match state.limiter.check(&state.rule, &id).await {
        LimitDecision::Allowed => next.run(request).await,
        LimitDecision::Limited {
            message,
            retry_after_secs,
        } => match state.rule.mode {
            LimitMode::Abort => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": message })),
                )
                    .into_response();
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert("Retry-After", value);
                }
                response
            }
            LimitMode::Context => {
                request.extensions_mut().insert(RateLimitExceeded(message));
                next.run(request).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Extension, Router};
    use tower::ServiceExt;

    fn small_rule() -> RateLimitRule {
        RateLimitRule {
            key_prefix: "test",
            window: Duration::from_secs(60),
            max_attempts: 3,
            lockout_threshold: 6,
            lockout_duration: Duration::from_secs(900),
            mode: LimitMode::Abort,
        }
    }

    #[tokio::test]
    async fn test_disabled_always_allows() {
        let limiter = RateLimiter::disabled();
        for _ in 0..100 {
            assert_eq!(
                limiter.check(&small_rule(), "1.2.3.4").await,
                LimitDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn test_in_process_window_limit() {
        let limiter = RateLimiter::in_process();
        let rule = small_rule();

        for _ in 0..3 {
            assert_eq!(limiter.check(&rule, "ip-1").await, LimitDecision::Allowed);
        }
        match limiter.check(&rule, "ip-1").await {
            LimitDecision::Limited { message, .. } => assert_eq!(message, MSG_TOO_MANY),
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_process_keys_are_independent() {
        let limiter = RateLimiter::in_process();
        let rule = small_rule();

        for _ in 0..3 {
            limiter.check(&rule, "ip-1").await;
        }
        // A different caller is unaffected
        assert_eq!(limiter.check(&rule, "ip-2").await, LimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_in_process_lockout() {
        let limiter = RateLimiter::in_process();
        let rule = small_rule();

        // Requests 1-3 admitted, 4-5 limited, 6 trips the lockout
        for i in 1..=6u32 {
            let decision = limiter.check(&rule, "ip-1").await;
            if i <= 3 {
                assert_eq!(decision, LimitDecision::Allowed, "request {}", i);
            } else {
                assert!(matches!(decision, LimitDecision::Limited { message, .. }
                    if message == MSG_TOO_MANY));
            }
        }

        // Request 7 hits the lockout gate
        match limiter.check(&rule, "ip-1").await {
            LimitDecision::Limited { message, .. } => assert_eq!(message, MSG_LOCKED),
            other => panic!("expected lockout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_resets_counter() {
        let limiter = RateLimiter::in_process();
        let rule = small_rule();

        for _ in 0..3 {
            limiter.check(&rule, "ip-1").await;
        }
        limiter.clear("test", "ip-1").await;
        assert_eq!(limiter.check(&rule, "ip-1").await, LimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_window_rollover() {
        let limiter = RateLimiter::in_process();
        let rule = RateLimitRule {
            window: Duration::from_millis(100),
            ..small_rule()
        };

        for _ in 0..3 {
            limiter.check(&rule, "ip-1").await;
        }
        assert!(matches!(
            limiter.check(&rule, "ip-1").await,
            LimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(limiter.check(&rule, "ip-1").await, LimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_evictor_drops_stale_buckets() {
        let store = InProcessStore::new();
        let rule = RateLimitRule {
            window: Duration::from_millis(10),
            lockout_threshold: 0,
            ..small_rule()
        };

        store.check(&rule, "ip-1").await;
        assert_eq!(store.len().await, 1);

        // Not yet past the grace period
        store.evict(Duration::from_secs(300)).await;
        assert_eq!(store.len().await, 1);

        // Simulated max_window of zero and grace elapsed is impractical to
        // wait out; instead verify a fresh bucket is retained
        store.evict(Duration::ZERO).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_presets_match_policy() {
        let login = presets::login();
        assert_eq!(login.max_attempts, 5);
        assert_eq!(login.window, Duration::from_secs(60));
        assert_eq!(login.lockout_threshold, 10);
        assert_eq!(login.lockout_duration, Duration::from_secs(900));

        assert_eq!(presets::register().max_attempts, 3);
        assert_eq!(presets::refresh().max_attempts, 10);
        assert_eq!(presets::forgot_password().max_attempts, 3);
        assert_eq!(presets::reset_password().max_attempts, 5);

        let two_fa = presets::two_fa_verify();
        assert_eq!(two_fa.max_attempts, 5);
        assert_eq!(two_fa.lockout_threshold, 10);

        assert_eq!(presets::gui_login().mode, LimitMode::Context);
    }

    #[tokio::test]
    async fn test_abort_mode_returns_429() {
        let state = RateLimitLayerState {
            limiter: RateLimiter::in_process(),
            rule: RateLimitRule {
                max_attempts: 1,
                lockout_threshold: 0,
                ..small_rule()
            },
        };

        let app = Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                state,
                rate_limit_middleware,
            ));

        let request = || {
            Request::builder()
                .uri("/login")
                .method("POST")
                .header("x-real-ip", "9.9.9.9")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("Retry-After"));
    }

    #[tokio::test]
    async fn test_context_mode_marks_and_continues() {
        async fn handler(marker: Option<Extension<RateLimitExceeded>>) -> &'static str {
            if marker.is_some() {
                "limited"
            } else {
                "ok"
            }
        }

        let state = RateLimitLayerState {
            limiter: RateLimiter::in_process(),
            rule: RateLimitRule {
                max_attempts: 1,
                lockout_threshold: 0,
                mode: LimitMode::Context,
                ..small_rule()
            },
        };

        let app = Router::new()
            .route("/gui/login", post(handler))
            .layer(axum::middleware::from_fn_with_state(
                state,
                rate_limit_middleware,
            ));

        let request = || {
            Request::builder()
                .uri("/gui/login")
                .method("POST")
                .header("x-real-ip", "8.8.8.8")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body = axum::body::to_bytes(first.into_body(), 1024).await.unwrap();
        assert_eq!(body, "ok".as_bytes());

        let second = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let body = axum::body::to_bytes(second.into_body(), 1024).await.unwrap();
        assert_eq!(body, "limited".as_bytes());
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(attempts_key("login", "1.2.3.4"), "rl:login:attempts:1.2.3.4");
        assert_eq!(lockout_key("login", "1.2.3.4"), "rl:login:lockout:1.2.3.4");
    }
}
