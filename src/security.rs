use crate::errors::AppError;
use http::{header::AUTHORIZATION, HeaderMap};
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::{num::NonZeroU32, sync::Arc};

/// Token from `Authorization: token <t>` / `Bearer <t>`, falling back to `?token=`.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| {
            auth.strip_prefix("token ")
                .or_else(|| auth.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
        });
    from_header.or_else(|| query_token.map(|t| t.to_string()))
}

pub fn require_token(presented: Option<&str>, expected: &str) -> Result<(), AppError> {
    match presented {
        Some(t) if !t.is_empty() && t == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// Same-origin requests carry no `Origin`; only cross-origin ones are checked.
pub fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Result<(), AppError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(origin) = headers.get("Origin") else {
        return Ok(());
    };
    let origin = origin.to_str().map_err(|_| AppError::OriginDenied)?;
    if allowed.iter().any(|o| o == origin) {
        Ok(())
    } else {
        Err(AppError::OriginDenied)
    }
}

type Direct = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type Keyed = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimiters {
    global: Arc<Direct>,
    per_token: Arc<Keyed>,
}

fn quota(rps: u32, burst: u32) -> Quota {
    let rps = NonZeroU32::new(rps).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(burst).unwrap_or(rps);
    Quota::per_second(rps).allow_burst(burst)
}

impl RateLimiters {
    pub fn new(global_rps: u32, global_burst: u32, token_rps: u32, token_burst: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(quota(global_rps, global_burst))),
            per_token: Arc::new(RateLimiter::keyed(quota(token_rps, token_burst))),
        }
    }

    pub fn check(&self, token: Option<&str>) -> Result<(), AppError> {
        if let Some(t) = token {
            self.per_token.check_key(&t.to_string()).map_err(|_| AppError::RateLimited)?;
        }
        self.global.check().map_err(|_| AppError::RateLimited)?;
        Ok(())
    }
}
