use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Per-IP sliding window counters for one tier.
type IpWindows = DashMap<IpAddr, Vec<Instant>>;

/// Limits for a single tier of endpoints.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// In-memory per-IP rate limiter. Tiers are registered once at startup and
/// shared across all middleware instances via `Arc`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<DashMap<&'static str, (TierConfig, IpWindows)>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    pub fn add_tier(&self, name: &'static str, config: TierConfig) {
        self.tiers.insert(name, (config, DashMap::new()));
    }

    /// `Ok(())` when the request fits in the window, otherwise the number of
    /// seconds until the oldest timestamp falls out of it.
    pub fn check(&self, tier: &'static str, ip: IpAddr) -> Result<(), u64> {
        let entry = self.tiers.get(tier).expect("unknown rate limit tier");
        let (config, windows) = entry.value();
        let now = Instant::now();

        let mut timestamps = windows.entry(ip).or_default();
        timestamps.retain(|t| now.duration_since(*t) < config.window);

        if timestamps.len() >= config.max_requests as usize {
            let oldest = timestamps[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drop IPs whose every timestamp is older than twice the tier window.
    /// Run periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for entry in self.tiers.iter() {
            let (config, windows) = entry.value();
            let cutoff = config.window * 2;
            windows.retain(|_, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }

    /// State handle for the middleware of one tier.
    pub fn tier(&self, name: &'static str) -> RateLimitTier {
        RateLimitTier {
            limiter: self.clone(),
            name,
        }
    }
}

/// A (limiter, tier name) pair used as middleware state.
#[derive(Clone)]
pub struct RateLimitTier {
    limiter: RateLimiter,
    name: &'static str,
}

/// Middleware enforcing the tier's limit on every request.
pub async fn rate_limit(
    State(tier): State<RateLimitTier>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&req);
    tier.limiter
        .check(tier.name, ip)
        .map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

// ── Tests ──
