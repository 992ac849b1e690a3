//! Credential lookup and out-of-band provisioning.
//!
//! A credential's id is its bearer token, stored as a JSON document under
//! `APIKEY#<token>`. Tokens never reach log output unmasked.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::store::{KeyValueStore, StoreEntry, StoreError};
use crate::{Credential, ValidationError};

const TOKEN_LEN: usize = 43;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Resolves a bearer token to its credential.
pub trait CredentialSource: Send + Sync {
    fn find<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, StoreError>> + Send + 'a>>;
}

/// Shortens a token for logs: the first seven characters followed by `***`.
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 7 {
        return String::from("key_***");
    }
    let prefix: String = token.chars().take(7).collect();
    format!("{prefix}***")
}

/// Store-backed credential directory.
#[derive(Clone)]
pub struct CredentialDirectory {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialDirectory {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates and stores a new enabled credential with a random URL-safe
    /// token.
    pub async fn provision(&self, label: &str) -> Result<Credential, CoreError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::EmptyCredentialLabel.into());
        }

        let credential = Credential {
            id: generate_token(),
            label: label.to_owned(),
            created_at: self.clock.now(),
            enabled: true,
        };
        self.save(&credential).await?;

        info!(credential = %mask_token(&credential.id), label, "provisioned credential");
        Ok(credential)
    }

    /// Soft-revokes a credential. Returns `None` when the id is unknown.
    pub async fn disable(&self, id: &str) -> Result<Option<Credential>, CoreError> {
        let Some(mut credential) = self.lookup(id).await? else {
            return Ok(None);
        };

        if credential.enabled {
            credential.enabled = false;
            self.save(&credential).await?;
            info!(credential = %mask_token(id), "disabled credential");
        }
        Ok(Some(credential))
    }

    async fn lookup(&self, token: &str) -> Result<Option<Credential>, CoreError> {
        let Some(entry) = self.store.get(&Credential::store_key(token)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&entry.body)?))
    }

    async fn save(&self, credential: &Credential) -> Result<(), CoreError> {
        let body = serde_json::to_string(credential)?;
        self.store
            .put(StoreEntry::new(Credential::store_key(&credential.id), body))
            .await?;
        Ok(())
    }
}

impl CredentialSource for CredentialDirectory {
    fn find<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            match self.lookup(token).await {
                Ok(found) => Ok(found),
                Err(CoreError::Store(error)) => Err(error),
                Err(error) => {
                    warn!(credential = %mask_token(token), %error, "unreadable credential record");
                    Ok(None)
                }
            }
        })
    }
}

fn generate_token() -> String {
    (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[fastrand::usize(..TOKEN_ALPHABET.len())]))
        .collect()
}
