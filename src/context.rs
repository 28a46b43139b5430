use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::feed::{FetchError, HttpFetcher};
use crate::storage::{Database, User};

/// Everything a command needs: loaded config, where it lives, and the store.
pub struct AppContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub db: Database,
}

impl AppContext {
    /// Load the config (from `config_path` or the default location) and open
    /// the database it points to.
    pub async fn init(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(p) => p,
            None => Config::default_path()?,
        };
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let db_path = config.database_path(&config_path);
        ensure_parent_dir(&db_path)?;
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
        let db = Database::open(db_path_str)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        tracing::debug!(
            config = %config_path.display(),
            db = %db_path.display(),
            "Initialized context"
        );
        Ok(Self::from_parts(config, config_path, db))
    }

    pub fn from_parts(config: Config, config_path: PathBuf, db: Database) -> Self {
        Self {
            config,
            config_path,
            db,
        }
    }

    /// The logged-in user. Commands that act on behalf of a user call this
    /// first and fail with a hint when nobody is logged in.
    pub async fn current_user(&self) -> Result<User> {
        let name = self
            .config
            .current_user_name
            .as_deref()
            .context("No user is logged in; run `gator register <name>` or `gator login <name>`")?;
        self.db
            .get_user_by_name(name)
            .await?
            .with_context(|| format!("Current user '{name}' does not exist; run `gator login`"))
    }

    /// Switch the current user and persist it to the config file.
    pub fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.config
            .set_user(name, &self.config_path)
            .with_context(|| format!("Failed to save config to {}", self.config_path.display()))
    }

    pub fn http_fetcher(&self) -> Result<HttpFetcher, FetchError> {
        HttpFetcher::with_user_agent(&self.config.user_agent, self.config.request_timeout())
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to set directory permissions to 0700"
                );
            }
        }
    }
    Ok(())
}
