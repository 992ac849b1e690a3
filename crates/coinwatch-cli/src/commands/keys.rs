use coinwatch_core::{Credential, CredentialDirectory};
use serde::Serialize;

use crate::cli::{CreateKeyArgs, DisableKeyArgs};
use crate::error::CliError;

use super::Services;

/// Credential as printed by key management commands. The id doubles as the
/// bearer token, so it is printed once at creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub id: String,
    pub label: String,
    pub enabled: bool,
    pub created_at: String,
}

impl From<Credential> for KeyView {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            label: credential.label,
            enabled: credential.enabled,
            created_at: credential.created_at.format_rfc3339(),
        }
    }
}

fn directory(services: &Services) -> CredentialDirectory {
    CredentialDirectory::new(services.store.clone(), services.clock.clone())
}

pub async fn create(args: &CreateKeyArgs, services: &Services) -> Result<KeyView, CliError> {
    let credential = directory(services).provision(&args.label).await?;
    Ok(KeyView::from(credential))
}

pub async fn disable(args: &DisableKeyArgs, services: &Services) -> Result<KeyView, CliError> {
    directory(services)
        .disable(args.id.trim())
        .await?
        .map(KeyView::from)
        .ok_or_else(|| CliError::Command(String::from("unknown credential id")))
}
