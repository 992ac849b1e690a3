//! Single gate in front of every protected operation.
//!
//! Steps run in order and short-circuit: token presence, credential lookup,
//! enabled check, rate limit. Only a request that passes the first three
//! steps reaches the rate limiter, so rejected credentials never consume
//! budget.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::credentials::{mask_token, CredentialSource};
use crate::rate_limit::RateLimiter;
use crate::Credential;

/// Caller-facing admission failure. Never retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("API key is required")]
    MissingCredential,

    #[error("invalid API key")]
    InvalidCredential,

    #[error("API key is disabled")]
    DisabledCredential,

    #[error("rate limit exceeded; retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
}

impl AdmissionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential | Self::InvalidCredential | Self::DisabledCredential => {
                "UNAUTHORIZED"
            }
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
        }
    }

    pub const fn status(&self) -> u16 {
        match self {
            Self::MissingCredential | Self::InvalidCredential | Self::DisabledCredential => 401,
            Self::RateLimited { .. } => 429,
        }
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Composes credential validation and rate limiting.
#[derive(Clone)]
pub struct AdmissionController {
    credentials: Arc<dyn CredentialSource>,
    limiter: Arc<dyn RateLimiter>,
}

impl AdmissionController {
    pub fn new(credentials: Arc<dyn CredentialSource>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            credentials,
            limiter,
        }
    }

    pub async fn admit(&self, token: Option<&str>) -> Result<Credential, AdmissionError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AdmissionError::MissingCredential)?;
        let masked = mask_token(token);

        let credential = match self.credentials.find(token).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!(credential = %masked, "unknown credential");
                return Err(AdmissionError::InvalidCredential);
            }
            Err(error) => {
                warn!(credential = %masked, %error, "credential lookup failed");
                return Err(AdmissionError::InvalidCredential);
            }
        };

        if !credential.enabled {
            debug!(credential = %masked, "disabled credential");
            return Err(AdmissionError::DisabledCredential);
        }

        self.limiter
            .check_and_increment(&credential.id)
            .await
            .map_err(|rejected| {
                debug!(credential = %masked, "rate limited");
                AdmissionError::RateLimited {
                    retry_after: rejected.retry_after,
                }
            })?;

        debug!(credential = %masked, "request admitted");
        Ok(credential)
    }
}
