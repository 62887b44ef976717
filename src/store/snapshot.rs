use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{PromptError, Result};
use crate::store::library::{Library, Prompt};

/// Backup file contents: prompts and favorites, without settings or
/// secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub favorites: Vec<Uuid>,
    #[serde(default)]
    pub export_date: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn of(library: &Library) -> Self {
        Self {
            prompts: library.prompts().to_vec(),
            favorites: library.favorite_ids().to_vec(),
            export_date: Some(Utc::now()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PromptError::InvalidInput(format!("invalid backup file: {e}")))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), prompts = self.prompts.len(), "backup written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Replace the library's prompts and favorites with this snapshot's.
    pub fn apply(self, library: Library) -> Library {
        library.replaced_by(self.prompts, self.favorites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::library::GenerationSettings;
    use crate::store::library::tests::prompt;

    #[test]
    fn test_export_uses_camel_case() {
        let mut p = prompt("a");
        p.parent_id = Some(Uuid::new_v4());
        let lib = Library::default().with_prompt(p);
        let json = Snapshot::of(&lib).to_json().unwrap();
        assert!(json.contains("\"exportDate\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"parentId\""));
        assert!(!json.contains("created_at"));
    }

    #[test]
    fn test_imports_browser_backup() {
        let json = r#"{
          "prompts": [
            {
              "id": "0b6c2b5e-8a4d-4f7e-9a51-2f3c8d1e6a70",
              "content": "A misty harbor at dawn",
              "description": "quiet mood",
              "category": "photography",
              "tags": ["harbor", "mist"],
              "createdAt": "2024-03-01T09:15:00.000Z"
            }
          ],
          "favorites": ["0b6c2b5e-8a4d-4f7e-9a51-2f3c8d1e6a70"],
          "exportDate": "2024-03-02T10:00:00.000Z"
        }"#;
        let snap = Snapshot::from_json(json).unwrap();
        assert_eq!(snap.prompts.len(), 1);
        assert_eq!(snap.prompts[0].parent_id, None);

        let settings = GenerationSettings {
            num_variations: 3,
            ..Default::default()
        };
        let lib = snap.apply(Library::new(settings).with_prompt(prompt("old")));
        assert_eq!(lib.prompts().len(), 1);
        assert_eq!(lib.prompts()[0].content, "A misty harbor at dawn");
        assert_eq!(lib.favorites().len(), 1);
        assert_eq!(lib.settings(), settings);
    }

    #[test]
    fn test_invalid_backup_rejected() {
        let err = Snapshot::from_json("{\"prompts\": 5}").unwrap_err();
        assert!(err.to_string().contains("invalid backup file"));
        assert!(Snapshot::from_json("not json").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let lib = Library::default().with_prompt(prompt("a"));
        Snapshot::of(&lib).write_to(&path).unwrap();
        let back = Snapshot::read_from(&path).unwrap().apply(Library::default());
        assert_eq!(back.prompts(), lib.prompts());
    }
}
