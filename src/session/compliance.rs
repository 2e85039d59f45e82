//! Consent gate deciding which participants may be recorded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::capture::ParticipantId;
use crate::config::ConsentConfig;

/// Queried for every participant on each reload; the pipeline keeps no
/// consent state of its own.
#[async_trait]
pub trait ComplianceGate: Send + Sync {
    async fn is_eligible(&self, participant: &ParticipantId) -> bool;

    /// Refreshes whatever backs the gate. Called before each re-evaluation.
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// Records everyone.
pub struct AllowAll;

#[async_trait]
impl ComplianceGate for AllowAll {
    async fn is_eligible(&self, _participant: &ParticipantId) -> bool {
        true
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AllowListFile {
    allowed: Vec<String>,
}

/// Allow-list gate. With enforcement off every participant is eligible;
/// with it on only listed ids are.
pub struct ConsentList {
    enforce: bool,
    path: Option<PathBuf>,
    allowed: RwLock<HashSet<ParticipantId>>,
}

impl ConsentList {
    pub fn new(enforce: bool, allowed: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            enforce,
            path: None,
            allowed: RwLock::new(allowed.into_iter().collect()),
        }
    }

    pub fn from_config(config: &ConsentConfig) -> Result<Self> {
        let mut list = Self::new(config.enforce, Vec::new());
        if let Some(path) = &config.allowlist_path {
            list.path = Some(path.clone());
            list.load()?;
        } else if config.enforce {
            warn!("Consent enforcement is on but no allow-list is configured; nobody will be recorded");
        }
        Ok(list)
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    /// Allow-list file backing this gate, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Listed participants, sorted.
    pub fn allowed(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn allow(&self, participant: ParticipantId) {
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(participant);
    }

    pub fn revoke(&self, participant: &ParticipantId) -> bool {
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(participant)
    }

    pub fn len(&self) -> usize {
        self.allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let ids = read_allow_list(path)?;
        info!("Loaded {} consenting participants from {:?}", ids.len(), path);
        *self.allowed.write().unwrap_or_else(PoisonError::into_inner) = ids;
        Ok(())
    }
}

fn read_allow_list(path: &Path) -> Result<HashSet<ParticipantId>> {
    if !path.exists() {
        warn!("Consent allow-list {:?} does not exist, treating it as empty", path);
        return Ok(HashSet::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read consent allow-list {:?}", path))?;
    let file: AllowListFile =
        toml::from_str(&content).context("Failed to parse consent allow-list")?;

    Ok(file.allowed.into_iter().map(ParticipantId::new).collect())
}

#[async_trait]
impl ComplianceGate for ConsentList {
    async fn is_eligible(&self, participant: &ParticipantId) -> bool {
        if !self.enforce {
            return true;
        }
        let eligible = self
            .allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(participant);
        if !eligible {
            debug!("{} has not consented to recording", participant);
        }
        eligible
    }

    async fn reload(&self) -> Result<()> {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unenforced_list_allows_everyone() {
        let gate = ConsentList::new(false, Vec::new());
        assert!(gate.is_eligible(&ParticipantId::new("anyone")).await);
    }

    #[tokio::test]
    async fn test_enforced_list_allows_only_listed() {
        let gate = ConsentList::new(true, vec![ParticipantId::new("alice")]);
        assert!(gate.is_eligible(&ParticipantId::new("alice")).await);
        assert!(!gate.is_eligible(&ParticipantId::new("bob")).await);

        gate.allow(ParticipantId::new("bob"));
        assert!(gate.is_eligible(&ParticipantId::new("bob")).await);
        assert!(gate.revoke(&ParticipantId::new("alice")));
        assert!(!gate.is_eligible(&ParticipantId::new("alice")).await);
    }

    #[tokio::test]
    async fn test_reload_picks_up_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consent.toml");
        std::fs::write(&path, "allowed = [\"alice@steam\"]\n").unwrap();

        let gate = ConsentList::from_config(&ConsentConfig {
            enforce: true,
            allowlist_path: Some(path.clone()),
        })
        .unwrap();
        assert_eq!(gate.len(), 1);
        assert!(gate.is_eligible(&ParticipantId::new("alice@steam")).await);

        std::fs::write(&path, "allowed = [\"bob@steam\"]\n").unwrap();
        gate.reload().await.unwrap();
        assert!(!gate.is_eligible(&ParticipantId::new("alice@steam")).await);
        assert!(gate.is_eligible(&ParticipantId::new("bob@steam")).await);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let gate = ConsentList::from_config(&ConsentConfig {
            enforce: true,
            allowlist_path: Some(dir.path().join("missing.toml")),
        })
        .unwrap();
        assert!(gate.is_empty());
        assert!(!gate.is_eligible(&ParticipantId::new("alice")).await);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consent.toml");
        std::fs::write(&path, "allowed = 42").unwrap();

        let result = ConsentList::from_config(&ConsentConfig {
            enforce: true,
            allowlist_path: Some(path),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_allow_all() {
        assert!(AllowAll.is_eligible(&ParticipantId::new("x")).await);
        assert!(AllowAll.reload().await.is_ok());
    }
}
