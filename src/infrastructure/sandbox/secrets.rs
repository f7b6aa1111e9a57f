use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::FailureInjector;
use crate::core::traits::{NewSecret, SecretItem, SecretKind, SecretStore, SSH_PUBLIC_KEY_SECRET_KEY};
use crate::domain::entities::{ClusterId, OrganizationId};
use crate::error::{AppError, Result};

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Key material the store issues for `Ssh` and `ClusterCa` secrets
fn generated_values(kind: SecretKind) -> BTreeMap<String, String> {
    match kind {
        SecretKind::Ssh => BTreeMap::from([
            (
                SSH_PUBLIC_KEY_SECRET_KEY.to_string(),
                format!("ssh-ed25519 AAAA{} vmkube", random_string(43)),
            ),
            ("private_key_data".to_string(), random_string(64)),
        ]),
        SecretKind::ClusterCa => BTreeMap::from([
            ("ca_cert".to_string(), random_string(64)),
            ("ca_key".to_string(), random_string(64)),
        ]),
        _ => BTreeMap::new(),
    }
}

#[derive(Default)]
pub struct SandboxSecretStore {
    secrets: RwLock<HashMap<OrganizationId, Vec<SecretItem>>>,
    tokens: RwLock<Vec<(ClusterId, String)>>,
    failures: FailureInjector,
}

impl SandboxSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &FailureInjector {
        &self.failures
    }

    /// Store a secret with caller-provided values, returning its id
    pub async fn insert(&self, organization_id: OrganizationId, name: &str, kind: SecretKind, values: BTreeMap<String, String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.secrets
            .write()
            .await
            .entry(organization_id)
            .or_default()
            .push(SecretItem {
                id: id.clone(),
                name: name.to_string(),
                kind,
                values,
                tags: Vec::new(),
            });
        id
    }

    pub async fn names(&self, organization_id: OrganizationId) -> Vec<String> {
        let secrets = self.secrets.read().await;
        let mut names: Vec<String> = secrets
            .get(&organization_id)
            .map(|items| items.iter().map(|item| item.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub async fn issued_tokens(&self, cluster_id: ClusterId) -> usize {
        self.tokens
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id == cluster_id)
            .count()
    }

    async fn injected(&self, operation: &str, target: &str) -> Result<()> {
        if self.failures.should_fail(operation, target).await {
            return Err(AppError::SecretError(format!("{} failed for {}", operation, target)));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for SandboxSecretStore {
    async fn get(&self, organization_id: OrganizationId, secret_id: &str) -> Result<SecretItem> {
        self.injected("get", secret_id).await?;
        self.secrets
            .read()
            .await
            .get(&organization_id)
            .and_then(|items| items.iter().find(|item| item.id == secret_id))
            .cloned()
            .ok_or_else(|| AppError::not_found("secret", secret_id))
    }

    async fn get_by_name(&self, organization_id: OrganizationId, name: &str) -> Result<SecretItem> {
        self.injected("get_by_name", name).await?;
        self.secrets
            .read()
            .await
            .get(&organization_id)
            .and_then(|items| items.iter().find(|item| item.name == name))
            .cloned()
            .ok_or_else(|| AppError::not_found("secret", name))
    }

    async fn create(&self, organization_id: OrganizationId, secret: NewSecret) -> Result<String> {
        self.injected("create", &secret.name).await?;
        let values = if secret.values.is_empty() {
            generated_values(secret.kind)
        } else {
            secret.values
        };

        let mut secrets = self.secrets.write().await;
        let items = secrets.entry(organization_id).or_default();
        if let Some(existing) = items.iter_mut().find(|item| item.name == secret.name) {
            existing.kind = secret.kind;
            existing.values = values;
            existing.tags = secret.tags;
            return Ok(existing.id.clone());
        }

        let id = Uuid::new_v4().to_string();
        debug!(secret = %secret.name, secret_id = %id, "Sandbox secret created");
        items.push(SecretItem {
            id: id.clone(),
            name: secret.name,
            kind: secret.kind,
            values,
            tags: secret.tags,
        });
        Ok(id)
    }

    async fn delete(&self, organization_id: OrganizationId, secret_id: &str) -> Result<()> {
        self.injected("delete", secret_id).await?;
        let mut secrets = self.secrets.write().await;
        let items = secrets
            .get_mut(&organization_id)
            .ok_or_else(|| AppError::not_found("secret", secret_id))?;
        let before = items.len();
        items.retain(|item| item.id != secret_id);
        if items.len() == before {
            return Err(AppError::not_found("secret", secret_id));
        }
        Ok(())
    }

    async fn list_by_tag(&self, organization_id: OrganizationId, tag: &str) -> Result<Vec<SecretItem>> {
        self.injected("list_by_tag", tag).await?;
        Ok(self
            .secrets
            .read()
            .await
            .get(&organization_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.tags.iter().any(|t| t == tag))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn issue_join_token(&self, _organization_id: OrganizationId, cluster_id: ClusterId) -> Result<String> {
        self.injected("issue_join_token", &cluster_id.to_string()).await?;
        let token = format!("{}.{}", random_string(6), random_string(16));
        self.tokens.write().await.push((cluster_id, token.clone()));
        Ok(token)
    }
}
