//! Vault layout, creation and discovery.
//!
//! ```text
//! <vault>/
//! └── .compass/
//!     ├── compass.db      document store
//!     ├── profile.toml    vault profile and config overrides
//!     └── commands/       saved prompts
//! ```
//!
//! A vault is created only by [`Vault::init`] and never deleted by this crate.

use crate::config::CompassConfig;
use crate::error::{Error, Result};
use crate::storage::sqlite_store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const COMPASS_DIR: &str = ".compass";
pub const DATABASE_FILE: &str = "compass.db";
pub const PROFILE_FILE: &str = "profile.toml";
pub const COMMANDS_DIR: &str = "commands";

const DAILY_COMMAND: &str = "# Daily Review\n\n\
    Review my tasks and notes from today. \
    Highlight any decisions I made and suggest follow-ups.\n";

/// Contents of a freshly written `profile.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultProfile {
    pub vault: VaultInfo,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInfo {
    pub name: String,
    /// `YYYY-MM-DD`
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub default_llm: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    /// Describe the vault at `root` without touching the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: std::path::absolute(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compass_dir(&self) -> PathBuf {
        self.root.join(COMPASS_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.compass_dir().join(DATABASE_FILE)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.compass_dir().join(PROFILE_FILE)
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.compass_dir().join(COMMANDS_DIR)
    }

    /// Whether `init` has run here: the vault directory and profile are present.
    pub fn exists(&self) -> bool {
        self.compass_dir().exists() && self.profile_path().exists()
    }

    /// Whether every expected piece of the layout is present and of the right kind.
    pub fn is_valid(&self) -> bool {
        self.compass_dir().is_dir() && self.profile_path().is_file() && self.commands_dir().is_dir()
    }

    /// Create a vault at `root`. Fails if one already exists there.
    pub async fn init(root: impl AsRef<Path>) -> Result<Self> {
        let vault = Self::new(root)?;
        if vault.exists() {
            return Err(Error::VaultAlreadyInitialized(vault.root.clone()));
        }

        tokio::fs::create_dir_all(vault.commands_dir()).await?;
        SqliteStore::ensure_database(&vault.root).await?;

        let profile = VaultProfile {
            vault: VaultInfo {
                name: vault
                    .root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                created: chrono::Local::now().format("%Y-%m-%d").to_string(),
            },
            preferences: Preferences {
                default_llm: "openai".to_string(),
            },
        };
        tokio::fs::write(vault.profile_path(), toml::to_string(&profile)?).await?;
        tokio::fs::write(vault.commands_dir().join("daily.md"), DAILY_COMMAND).await?;

        info!("Initialized vault at {}", vault.root.display());
        Ok(vault)
    }

    /// The existing vault at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let vault = Self::new(root)?;
        if !vault.exists() {
            return Err(Error::VaultNotFound(vault.root));
        }
        Ok(vault)
    }

    /// The nearest vault at or above `start`.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref();
        match find_vault(start) {
            Some(root) => Self::open(root),
            None => Err(Error::VaultNotFound(start.to_path_buf())),
        }
    }

    /// The raw `profile.toml`, empty when missing.
    pub fn profile(&self) -> Result<toml::Table> {
        let path = self.profile_path();
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        Ok(std::fs::read_to_string(path)?.parse()?)
    }

    /// Defaults overlaid by this vault's `profile.toml`.
    pub fn config(&self) -> Result<CompassConfig> {
        self.config_with(None)
    }

    /// Defaults, then `profile.toml`, then `overrides` when given.
    pub fn config_with(&self, overrides: Option<&Path>) -> Result<CompassConfig> {
        let profile = self.profile_path();
        CompassConfig::load_layers(std::iter::once(profile.as_path()).chain(overrides))
    }

    /// Open this vault's document store, migrating it if needed.
    pub async fn store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.root).await
    }
}

/// Search `start` and its ancestors for an initialized vault.
pub fn find_vault(start: &Path) -> Option<PathBuf> {
    let start = std::fs::canonicalize(start)
        .or_else(|_| std::path::absolute(start))
        .ok()?;
    start
        .ancestors()
        .find(|dir| Vault { root: dir.to_path_buf() }.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_creates_layout() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("notes");

        let vault = Vault::init(&root).await?;
        assert!(vault.exists());
        assert!(vault.is_valid());
        assert!(vault.database_path().is_file());

        let daily = std::fs::read_to_string(vault.commands_dir().join("daily.md"))?;
        assert!(daily.starts_with("# Daily Review\n\nReview my tasks"));

        let profile = vault.profile()?;
        assert_eq!(profile["vault"]["name"].as_str(), Some("notes"));
        assert_eq!(profile["vault"]["created"].as_str().map(str::len), Some(10));
        assert_eq!(profile["preferences"]["default_llm"].as_str(), Some("openai"));

        let config = vault.config()?;
        assert_eq!(config.rag().chunk_size, 512);
        assert_eq!(
            config.get("vault.name").and_then(toml::Value::as_str),
            Some("notes")
        );

        let store = vault.store().await?;
        assert_eq!(store.stats().await?.documents, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_override_file_keeps_profile_settings() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let vault = Vault::init(dir.path()).await?;
        let mut profile = std::fs::read_to_string(vault.profile_path())?;
        profile.push_str("\n[embedding]\nprovider = \"hash\"\ndimension = 16\n");
        std::fs::write(vault.profile_path(), profile)?;

        let overrides = dir.path().join("override.toml");
        std::fs::write(&overrides, "[rag]\ntop_k = 2\n")?;

        let config = vault.config_with(Some(&overrides))?;
        assert_eq!(config.rag().top_k, 2);
        assert_eq!(config.embedding().provider, compass_embed::ProviderKind::Hash);
        assert_eq!(config.embedding().dimension, Some(16));
        assert_eq!(
            config.get("vault.name").and_then(toml::Value::as_str),
            vault.root().file_name().and_then(|n| n.to_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_init_twice_fails() -> anyhow::Result<()> {
        let dir = tempdir()?;
        Vault::init(dir.path()).await?;
        let err = Vault::init(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::VaultAlreadyInitialized(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_open_and_find() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert!(matches!(
            Vault::open(dir.path()),
            Err(Error::VaultNotFound(_))
        ));

        Vault::init(dir.path()).await?;
        let nested = dir.path().join("projects/alpha");
        std::fs::create_dir_all(&nested)?;

        let found = find_vault(&nested).unwrap();
        assert_eq!(found, std::fs::canonicalize(dir.path())?);
        assert_eq!(Vault::discover(&nested)?.root(), found.as_path());
        assert!(Vault::open(dir.path()).is_ok());
        Ok(())
    }

    #[test]
    fn test_find_vault_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        // No ancestor of a fresh temp dir is expected to be a vault
        assert!(matches!(
            Vault::discover(dir.path()),
            Err(Error::VaultNotFound(_))
        ));
        Ok(())
    }
}
