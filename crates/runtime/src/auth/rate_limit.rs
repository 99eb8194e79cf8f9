//! Per-IP sliding-window rate limiting (§4.9), grounded on the teacher's
//! `governor`-based per-IP limiter but extended to surface `RateLimit-*`
//! response headers instead of a bare 429.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovernorLimiter};

type Limiter = GovernorLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// One token-bucket limiter per remote address, created lazily. `per_min`
/// configures the quota (`DRMCP_RATE_LIMIT_PER_MIN`).
pub struct RateLimiter {
    per_min: u32,
    clock: DefaultClock,
    limiters: DashMap<IpAddr, Arc<Limiter>>,
}

impl RateLimiter {
    pub fn new(per_min: u32) -> Self {
        Self {
            per_min: per_min.max(1),
            clock: DefaultClock::default(),
            limiters: DashMap::new(),
        }
    }

    fn limiter_for(&self, ip: IpAddr) -> Arc<Limiter> {
        self.limiters
            .entry(ip)
            .or_insert_with(|| {
                let quota = Quota::per_minute(NonZeroU32::new(self.per_min).unwrap());
                Arc::new(GovernorLimiter::direct(quota))
            })
            .clone()
    }

    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        let limiter = self.limiter_for(ip);
        match limiter.check() {
            Ok(_) => RateLimitDecision {
                allowed: true,
                limit: self.per_min,
                remaining: self.per_min.saturating_sub(1),
                reset_secs: 60,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                RateLimitDecision {
                    allowed: false,
                    limit: self.per_min,
                    remaining: 0,
                    reset_secs: wait.as_secs().max(1),
                }
            }
        }
    }
}

/// Extracts the client address the same way the teacher's middleware does:
/// rightmost `X-Forwarded-For` entry, then `X-Real-IP`, then a loopback
/// fallback for direct connections.
pub fn extract_client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, peer: Option<IpAddr>) -> IpAddr {
    if let Some(header) = forwarded_for {
        if let Some(last) = header.split(',').next_back() {
            if let Ok(ip) = last.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    if let Some(header) = real_ip {
        if let Ok(ip) = header.parse::<IpAddr>() {
            return ip;
        }
    }
    peer.unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_quota() {
        let limiter = RateLimiter::new(2);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip).allowed);
        assert!(limiter.check(ip).allowed);
    }

    #[test]
    fn rejects_once_quota_exhausted() {
        let limiter = RateLimiter::new(1);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(ip).allowed);
        let decision = limiter.check(ip);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn distinct_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(1);
        let a: IpAddr = "10.0.0.3".parse().unwrap();
        let b: IpAddr = "10.0.0.4".parse().unwrap();
        assert!(limiter.check(a).allowed);
        assert!(limiter.check(b).allowed);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for_rightmost() {
        let ip = extract_client_ip(Some("203.0.113.1, 10.0.0.5"), None, None);
        assert_eq!(ip.to_string(), "10.0.0.5");
    }

    #[test]
    fn extract_client_ip_falls_back_to_peer() {
        let peer: IpAddr = "192.168.1.1".parse().unwrap();
        let ip = extract_client_ip(None, None, Some(peer));
        assert_eq!(ip, peer);
    }
}
