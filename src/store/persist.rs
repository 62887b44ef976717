use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::error::{PromptError, Result};
use crate::store::library::{GenerationSettings, Library, Prompt};

const SECRET_PREFIX: &str = "secret:";

/// Persistence port for the library.
///
/// `save` writes a whole library snapshot; callers invoke it after each
/// transition they want kept.
pub trait LibraryStore: Send + Sync {
    /// Load the stored library, or an empty one with `defaults` if nothing
    /// has been saved yet.
    fn load(&self, defaults: GenerationSettings) -> Result<Library>;

    fn save(&self, library: &Library) -> Result<()>;

    /// Fetch a stored (already sealed) secret.
    fn load_secret(&self, name: &str) -> Result<Option<String>>;

    fn save_secret(&self, name: &str, value: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(db::open(path)?))
    }

    /// Wrap an already-migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PromptError::Config("library store lock poisoned".into()))
    }
}

/// Raw prompt row before id/date/tag decoding.
struct PromptRow {
    id: String,
    content: String,
    description: String,
    category: String,
    tags: String,
    created_at: String,
    parent_id: Option<String>,
}

impl PromptRow {
    fn decode(self) -> Result<Prompt> {
        Ok(Prompt {
            id: parse_id(&self.id)?,
            content: self.content,
            description: self.description,
            category: self.category,
            tags: serde_json::from_str(&self.tags)?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| PromptError::Config(format!("corrupt created_at {:?}: {e}", self.created_at)))?
                .with_timezone(&Utc),
            parent_id: self.parent_id.as_deref().map(parse_id).transpose()?,
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| PromptError::Config(format!("corrupt prompt id {raw:?}: {e}")))
}

fn settings_from_map(map: &HashMap<String, String>, defaults: GenerationSettings) -> GenerationSettings {
    let flag = |key: &str, fallback: bool| map.get(key).map(|v| v == "1").unwrap_or(fallback);
    GenerationSettings {
        nsfw: flag("nsfw", defaults.nsfw),
        same_location: flag("same_location", defaults.same_location),
        num_variations: map
            .get("num_variations")
            .and_then(|v| v.parse().ok())
            .filter(|n| (1..=10).contains(n))
            .unwrap_or(defaults.num_variations),
    }
}

impl LibraryStore for SqliteStore {
    fn load(&self, defaults: GenerationSettings) -> Result<Library> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, content, description, category, tags, created_at, parent_id
             FROM prompts ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PromptRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    description: row.get(2)?,
                    category: row.get(3)?,
                    tags: row.get(4)?,
                    created_at: row.get(5)?,
                    parent_id: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let prompts = rows
            .into_iter()
            .map(PromptRow::decode)
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT prompt_id FROM favorites ORDER BY position")?;
        let favorites = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT key, value FROM settings WHERE key NOT LIKE 'secret:%'")?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        debug!(prompts = prompts.len(), favorites = favorites.len(), "library loaded");
        Ok(Library::from_parts(prompts, favorites, settings_from_map(&map, defaults)))
    }

    fn save(&self, library: &Library) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM favorites", [])?;
        tx.execute("DELETE FROM prompts", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO prompts (id, position, content, description, category, tags, created_at, parent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, p) in library.prompts().iter().enumerate() {
                insert.execute(params![
                    p.id.to_string(),
                    position as i64,
                    p.content,
                    p.description,
                    p.category,
                    serde_json::to_string(&p.tags)?,
                    p.created_at.to_rfc3339(),
                    p.parent_id.map(|id| id.to_string()),
                ])?;
            }

            let mut insert = tx.prepare("INSERT INTO favorites (prompt_id, position) VALUES (?1, ?2)")?;
            for (position, id) in library.favorite_ids().iter().enumerate() {
                insert.execute(params![id.to_string(), position as i64])?;
            }

            let settings = library.settings();
            let mut upsert = tx.prepare(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            )?;
            upsert.execute(params!["nsfw", if settings.nsfw { "1" } else { "0" }])?;
            upsert.execute(params!["same_location", if settings.same_location { "1" } else { "0" }])?;
            upsert.execute(params!["num_variations", settings.num_variations.to_string()])?;
        }

        tx.commit()?;
        debug!(prompts = library.prompts().len(), "library saved");
        Ok(())
    }

    fn load_secret(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [format!("{SECRET_PREFIX}{name}")],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save_secret(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![format!("{SECRET_PREFIX}{name}"), value],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Store that keeps everything in process memory.  Used by tests and
/// anywhere persistence is not wanted.
#[derive(Default)]
pub struct MemoryStore {
    library: Mutex<Option<Library>>,
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LibraryStore for MemoryStore {
    fn load(&self, defaults: GenerationSettings) -> Result<Library> {
        let saved = self
            .library
            .lock()
            .map_err(|_| PromptError::Config("library store lock poisoned".into()))?;
        Ok(saved.clone().unwrap_or_else(|| Library::new(defaults)))
    }

    fn save(&self, library: &Library) -> Result<()> {
        *self
            .library
            .lock()
            .map_err(|_| PromptError::Config("library store lock poisoned".into()))? = Some(library.clone());
        Ok(())
    }

    fn load_secret(&self, name: &str) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|_| PromptError::Config("secret store lock poisoned".into()))?;
        Ok(secrets.get(name).cloned())
    }

    fn save_secret(&self, name: &str, value: &str) -> Result<()> {
        self.secrets
            .lock()
            .map_err(|_| PromptError::Config("secret store lock poisoned".into()))?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::store::library::tests::prompt;

    fn sqlite() -> SqliteStore {
        SqliteStore::from_connection(test_db())
    }

    fn sample_library() -> Library {
        let a = prompt("a");
        let mut b = prompt("b");
        b.parent_id = Some(a.id);
        b.tags = vec!["ünïcödé".into(), "with \"quote\"".into()];
        Library::default()
            .with_prompts(vec![a, b.clone()])
            .toggle_favorite(b.id)
            .unwrap()
            .with_settings(GenerationSettings {
                nsfw: true,
                same_location: true,
                num_variations: 4,
            })
            .unwrap()
    }

    #[test]
    fn test_empty_store_uses_defaults() {
        let defaults = GenerationSettings {
            num_variations: 6,
            ..Default::default()
        };
        let lib = sqlite().load(defaults).unwrap();
        assert!(lib.prompts().is_empty());
        assert_eq!(lib.settings(), defaults);
    }

    #[test]
    fn test_sqlite_save_and_load() {
        let store = sqlite();
        let lib = sample_library();
        store.save(&lib).unwrap();

        let loaded = store.load(GenerationSettings::default()).unwrap();
        assert_eq!(loaded.prompts().len(), 2);
        assert_eq!(loaded.prompts()[0].content, "a");
        assert_eq!(loaded.prompts()[1].parent_id, Some(lib.prompts()[0].id));
        assert_eq!(loaded.prompts()[1].tags, lib.prompts()[1].tags);
        assert_eq!(loaded.favorite_ids(), lib.favorite_ids());
        assert_eq!(loaded.settings(), lib.settings());
        assert_eq!(
            loaded.prompts()[0].created_at.timestamp_micros(),
            lib.prompts()[0].created_at.timestamp_micros()
        );
    }

    #[test]
    fn test_sqlite_save_replaces_previous_contents() {
        let store = sqlite();
        let lib = sample_library();
        store.save(&lib).unwrap();

        let first = lib.prompts()[0].id;
        let (smaller, _) = lib.without_prompt(first).unwrap();
        store.save(&smaller).unwrap();

        let loaded = store.load(GenerationSettings::default()).unwrap();
        assert_eq!(loaded.prompts().len(), 1);
        assert!(loaded.get(first).is_none());
    }

    #[test]
    fn test_sqlite_secrets() {
        let store = sqlite();
        assert_eq!(store.load_secret("api_key").unwrap(), None);
        store.save_secret("api_key", "ENC$one").unwrap();
        store.save_secret("api_key", "ENC$two").unwrap();
        assert_eq!(store.load_secret("api_key").unwrap().as_deref(), Some("ENC$two"));

        // secrets do not leak into settings
        let lib = store.load(GenerationSettings::default()).unwrap();
        assert_eq!(lib.settings(), GenerationSettings::default());
    }

    #[test]
    fn test_sqlite_file_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.db");
        let lib = sample_library();
        SqliteStore::open(&path).unwrap().save(&lib).unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        let loaded = reopened.load(GenerationSettings::default()).unwrap();
        assert_eq!(loaded.prompts().len(), 2);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let lib = sample_library();
        store.save(&lib).unwrap();
        assert_eq!(store.load(GenerationSettings::default()).unwrap(), lib);
        store.save_secret("k", "v").unwrap();
        assert_eq!(store.load_secret("k").unwrap().as_deref(), Some("v"));
    }
}
