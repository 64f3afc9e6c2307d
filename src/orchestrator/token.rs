//! API token issuance.
//!
//! Minting and validating tokens belongs to an external auth service; the
//! orchestrator only gates issuance behind the fail-closed token limiter.
//! [`OpaqueTokenIssuer`] hands out random bearer strings for deployments
//! without one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

pub trait TokenIssuer: Send + Sync {
    fn issue(&self, identity: &str) -> IssuedToken;
}

pub struct OpaqueTokenIssuer {
    ttl: Duration,
}

impl OpaqueTokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl TokenIssuer for OpaqueTokenIssuer {
    fn issue(&self, identity: &str) -> IssuedToken {
        let mut rng = rand::rng();
        let token = format!("{:032x}{:032x}", rng.random::<u128>(), rng.random::<u128>());
        log::info!("Issued token to {identity}");
        IssuedToken {
            token,
            token_type: "Bearer",
            expires_in: self.ttl.as_secs(),
            issued_at: Utc::now(),
        }
    }
}
