//! API key management
//!
//! Keys are generated once, shown once, and stored only as a SHA-256 hash
//! with prefix/suffix display hints. Lifecycle is create-then-revoke.

use crate::crypto::generate_api_key;
use crate::domain::{ApiKey, ApiKeyType, CreateApiKeyInput, StringUuid};
use crate::error::{AppError, Result};
use crate::repository::api_key::NewApiKeyRecord;
use crate::repository::ApiKeyRepository;
use serde::Serialize;
use std::sync::Arc;

/// Creation result: the only moment the plaintext key is visible
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub plaintext: String,
}

pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeyRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(&self, input: &CreateApiKeyInput) -> Result<CreatedApiKey> {
        // Invariant: key_type = app ⇔ app_id is set
        match (input.key_type, input.app_id) {
            (ApiKeyType::App, None) => {
                return Err(AppError::BadRequest(
                    "App keys require an app_id".to_string(),
                ))
            }
            (ApiKeyType::Admin, Some(_)) => {
                return Err(AppError::BadRequest(
                    "Admin keys cannot be bound to an application".to_string(),
                ))
            }
            _ => {}
        }

        let type_prefix = match input.key_type {
            ApiKeyType::Admin => "agk_adm",
            ApiKeyType::App => "agk_app",
        };
        let (plaintext, hash, prefix, suffix) = generate_api_key(type_prefix);

        let key = self
            .repo
            .create(&NewApiKeyRecord {
                key_type: input.key_type.as_str().to_string(),
                name: input.name.clone(),
                description: input.description.clone(),
                key_hash: hash,
                key_prefix: prefix,
                key_suffix: suffix,
                app_id: input.app_id,
                expires_at: input.expires_at,
            })
            .await?;

        Ok(CreatedApiKey { key, plaintext })
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ApiKey>> {
        self.repo.list(offset, limit).await
    }

    pub async fn list_by_app(&self, app_id: StringUuid) -> Result<Vec<ApiKey>> {
        self.repo.list_by_app(app_id).await
    }

    pub async fn revoke(&self, id: StringUuid) -> Result<()> {
        self.repo.revoke(id).await
    }
}
