//! Guild data store contract and a JSON-file implementation.
//!
//! Each guild's [`GuildContext`] sits behind its own async mutex. Holding the
//! lock is what makes a reconciliation pass the only writer for that guild;
//! guilds never share a lock.

use crate::config::GuildSettings;
use crate::error::{ReconcileError, Result};
use crate::model::{GuildContext, Snowflake};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared handle to one guild's cached state.
pub type SharedGuild = Arc<Mutex<GuildContext>>;

/// Data store operations the engine consumes.
#[async_trait]
pub trait GuildStore: Send + Sync {
    /// Ids of every guild the engine should reconcile.
    async fn tracked_guilds(&self) -> Result<Vec<Snowflake>>;

    /// The cached context of a tracked guild.
    async fn guild(&self, guild_id: Snowflake) -> Result<SharedGuild>;

    /// Resolved settings for a guild. Must not be called while holding the
    /// guild's lock.
    async fn settings(&self, guild_id: Snowflake) -> Result<GuildSettings>;

    /// Persist a guild after a pass. Must not be called while holding the
    /// guild's lock.
    async fn flush(&self, guild_id: Snowflake) -> Result<()>;
}

/// In-memory store, optionally persisted as one `<guild id>.json` per guild.
#[derive(Debug, Default)]
pub struct GuildDataStore {
    root: Option<PathBuf>,
    guilds: RwLock<HashMap<Snowflake, SharedGuild>>,
}

impl GuildDataStore {
    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every guild file under `root`, creating the directory if needed.
    ///
    /// Unreadable files are skipped with a warning so one corrupt guild does
    /// not take the others down.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut guilds = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match load_guild(&path) {
                Ok(guild) => {
                    guilds.insert(guild.id, Arc::new(Mutex::new(guild)));
                }
                Err(e) => warn!(path = %path.display(), "skipping guild file: {e}"),
            }
        }
        debug!(count = guilds.len(), root = %root.display(), "loaded guild data");

        Ok(Self {
            root: Some(root),
            guilds: RwLock::new(guilds),
        })
    }

    /// Start tracking a guild, replacing any existing context.
    pub fn insert(&self, guild: GuildContext) -> Result<SharedGuild> {
        let id = guild.id;
        let shared = Arc::new(Mutex::new(guild));
        self.write_map()?.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    /// Stop tracking a guild. Its file, if any, is left on disk.
    pub fn remove(&self, guild_id: Snowflake) -> Result<bool> {
        Ok(self.write_map()?.remove(&guild_id).is_some())
    }

    fn write_map(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Snowflake, SharedGuild>>> {
        self.guilds
            .write()
            .map_err(|_| ReconcileError::Store("guild map lock poisoned".to_owned()))
    }

    fn lookup(&self, guild_id: Snowflake) -> Result<SharedGuild> {
        let guilds = self
            .guilds
            .read()
            .map_err(|_| ReconcileError::Store("guild map lock poisoned".to_owned()))?;
        guilds
            .get(&guild_id)
            .cloned()
            .ok_or_else(|| ReconcileError::Store(format!("guild {guild_id} is not tracked")))
    }

    fn guild_path(root: &Path, guild_id: Snowflake) -> PathBuf {
        root.join(format!("{guild_id}.json"))
    }
}

fn load_guild(path: &Path) -> Result<GuildContext> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ReconcileError::Store(format!("cannot parse {}: {e}", path.display())))
}

#[async_trait]
impl GuildStore for GuildDataStore {
    async fn tracked_guilds(&self) -> Result<Vec<Snowflake>> {
        let guilds = self
            .guilds
            .read()
            .map_err(|_| ReconcileError::Store("guild map lock poisoned".to_owned()))?;
        let mut ids: Vec<Snowflake> = guilds.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn guild(&self, guild_id: Snowflake) -> Result<SharedGuild> {
        self.lookup(guild_id)
    }

    async fn settings(&self, guild_id: Snowflake) -> Result<GuildSettings> {
        let guild = self.lookup(guild_id)?;
        let settings = guild.lock().await.settings.clone();
        Ok(settings)
    }

    async fn flush(&self, guild_id: Snowflake) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let guild = self.lookup(guild_id)?;
        let json = {
            let context = guild.lock().await;
            serde_json::to_vec_pretty(&*context)
                .map_err(|e| ReconcileError::Store(format!("cannot serialize guild: {e}")))?
        };

        let path = Self::guild_path(root, guild_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
