use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PromptError, Result};
use crate::variation::Variation;

/// A saved prompt card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: Uuid,
    /// The prompt text itself.
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// The prompt this one was generated from, for `vary`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

impl Prompt {
    pub fn from_variation(variation: Variation, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: variation.prompt,
            description: variation.description,
            category: variation.category,
            tags: variation.tags,
            created_at: Utc::now(),
            parent_id,
        }
    }
}

/// User-adjustable generation switches, persisted with the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub nsfw: bool,
    pub same_location: bool,
    /// 1–10.
    pub num_variations: u8,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            nsfw: false,
            same_location: false,
            num_variations: 10,
        }
    }
}

impl GenerationSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.num_variations) {
            return Err(PromptError::InvalidInput(format!(
                "variation count must be between 1 and 10, got {}",
                self.num_variations
            )));
        }
        Ok(())
    }
}

/// The prompt library: cards, favorites and settings.
///
/// Transitions consume the library and return the next one; nothing here
/// touches storage.  Callers persist the result explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Library {
    prompts: Vec<Prompt>,
    favorites: Vec<Uuid>,
    settings: GenerationSettings,
}

impl Library {
    pub fn new(settings: GenerationSettings) -> Self {
        Self {
            prompts: Vec::new(),
            favorites: Vec::new(),
            settings,
        }
    }

    /// Rebuild from stored parts.  Favorites that point at no prompt and
    /// repeated favorites are dropped.
    pub fn from_parts(prompts: Vec<Prompt>, favorites: Vec<Uuid>, settings: GenerationSettings) -> Self {
        let mut kept: Vec<Uuid> = Vec::with_capacity(favorites.len());
        for id in favorites {
            if !kept.contains(&id) && prompts.iter().any(|p| p.id == id) {
                kept.push(id);
            }
        }
        Self {
            prompts,
            favorites: kept,
            settings,
        }
    }

    // -- transitions -------------------------------------------------------

    pub fn with_prompts(mut self, prompts: Vec<Prompt>) -> Self {
        self.prompts.extend(prompts);
        self
    }

    pub fn with_prompt(self, prompt: Prompt) -> Self {
        self.with_prompts(vec![prompt])
    }

    pub fn toggle_favorite(mut self, id: Uuid) -> Result<Self> {
        if self.get(id).is_none() {
            return Err(PromptError::NotFound(format!("prompt {id}")));
        }
        if let Some(pos) = self.favorites.iter().position(|f| *f == id) {
            self.favorites.remove(pos);
        } else {
            self.favorites.push(id);
        }
        Ok(self)
    }

    /// Remove a prompt (and its favorite mark).  Children keep their
    /// `parent_id`.
    pub fn without_prompt(mut self, id: Uuid) -> Result<(Self, Prompt)> {
        let pos = self
            .prompts
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PromptError::NotFound(format!("prompt {id}")))?;
        let removed = self.prompts.remove(pos);
        self.favorites.retain(|f| *f != id);
        Ok((self, removed))
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Result<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    /// Swap in imported prompts and favorites, keeping settings.
    pub fn replaced_by(self, prompts: Vec<Prompt>, favorites: Vec<Uuid>) -> Self {
        Self::from_parts(prompts, favorites, self.settings)
    }

    // -- queries -----------------------------------------------------------

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn favorite_ids(&self) -> &[Uuid] {
        &self.favorites
    }

    /// Favorited prompts in the order they were favorited.
    pub fn favorites(&self) -> Vec<&Prompt> {
        self.favorites.iter().filter_map(|id| self.get(*id)).collect()
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
    }

    pub fn get(&self, id: Uuid) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn is_favorite(&self, id: Uuid) -> bool {
        self.favorites.contains(&id)
    }

    /// Resolve a full id or a unique prefix of one (as shown by `list`).
    pub fn find_by_prefix(&self, prefix: &str) -> Result<&Prompt> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(PromptError::InvalidInput("empty id".into()));
        }

        let mut matches = self
            .prompts
            .iter()
            .filter(|p| p.id.to_string().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(prompt), None) => Ok(prompt),
            (None, _) => Err(PromptError::NotFound(format!("no prompt with id {prefix}"))),
            (Some(_), Some(_)) => Err(PromptError::InvalidInput(format!(
                "id prefix {prefix} is ambiguous"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn prompt(content: &str) -> Prompt {
        Prompt::from_variation(
            Variation {
                prompt: content.into(),
                description: format!("about {content}"),
                category: "photography".into(),
                tags: vec!["a".into(), "b".into()],
            },
            None,
        )
    }

    #[test]
    fn test_from_variation_copies_fields() {
        let parent = Uuid::new_v4();
        let p = Prompt::from_variation(
            Variation {
                prompt: "A cat".into(),
                description: "cute".into(),
                category: "photo".into(),
                tags: vec!["cute".into()],
            },
            Some(parent),
        );
        assert_eq!(p.content, "A cat");
        assert_eq!(p.category, "photo");
        assert_eq!(p.parent_id, Some(parent));
    }

    #[test]
    fn test_with_prompts_appends_in_order() {
        let (a, b) = (prompt("a"), prompt("b"));
        let lib = Library::default().with_prompt(a.clone()).with_prompts(vec![b.clone()]);
        assert_eq!(lib.prompts(), &[a, b]);
    }

    #[test]
    fn test_toggle_favorite_twice() {
        let a = prompt("a");
        let lib = Library::default().with_prompt(a.clone());
        let lib = lib.toggle_favorite(a.id).unwrap();
        assert!(lib.is_favorite(a.id));
        assert_eq!(lib.favorites().len(), 1);
        let lib = lib.toggle_favorite(a.id).unwrap();
        assert!(!lib.is_favorite(a.id));
    }

    #[test]
    fn test_toggle_unknown_is_not_found() {
        let err = Library::default().toggle_favorite(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PromptError::NotFound(_)));
    }

    #[test]
    fn test_remove_drops_favorite() {
        let (a, b) = (prompt("a"), prompt("b"));
        let lib = Library::default()
            .with_prompts(vec![a.clone(), b.clone()])
            .toggle_favorite(a.id)
            .unwrap();
        let (lib, removed) = lib.without_prompt(a.id).unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(lib.prompts(), &[b]);
        assert!(lib.favorite_ids().is_empty());
        assert!(lib.without_prompt(a.id).is_err());
    }

    #[test]
    fn test_transitions_leave_original_untouched() {
        let a = prompt("a");
        let before = Library::default().with_prompt(a.clone());
        let after = before.clone().toggle_favorite(a.id).unwrap();
        assert!(!before.is_favorite(a.id));
        assert!(after.is_favorite(a.id));
    }

    #[test]
    fn test_settings_validation() {
        let lib = Library::default();
        let bad = GenerationSettings {
            num_variations: 0,
            ..Default::default()
        };
        assert!(lib.clone().with_settings(bad).is_err());
        let good = GenerationSettings {
            nsfw: true,
            same_location: false,
            num_variations: 3,
        };
        assert_eq!(lib.with_settings(good).unwrap().settings(), good);
    }

    #[test]
    fn test_from_parts_drops_dangling_favorites() {
        let a = prompt("a");
        let lib = Library::from_parts(
            vec![a.clone()],
            vec![Uuid::new_v4(), a.id, a.id],
            GenerationSettings::default(),
        );
        assert_eq!(lib.favorite_ids(), &[a.id]);
    }

    #[test]
    fn test_find_by_prefix() {
        let a = prompt("a");
        let lib = Library::default().with_prompt(a.clone());
        let full = a.id.to_string();
        assert_eq!(lib.find_by_prefix(&full).unwrap().id, a.id);
        assert_eq!(lib.find_by_prefix(&full[..8].to_uppercase()).unwrap().id, a.id);
        assert!(matches!(
            lib.find_by_prefix("zzzz"),
            Err(PromptError::NotFound(_))
        ));
        assert!(lib.find_by_prefix("").is_err());
    }

    #[test]
    fn test_find_by_prefix_ambiguous() {
        let mut a = prompt("a");
        let mut b = prompt("b");
        a.id = Uuid::parse_str("aaaaaaaa-0000-4000-8000-000000000001").unwrap();
        b.id = Uuid::parse_str("aaaaaaaa-0000-4000-8000-000000000002").unwrap();
        let lib = Library::default().with_prompts(vec![a, b]);
        assert!(matches!(
            lib.find_by_prefix("aaaa"),
            Err(PromptError::InvalidInput(_))
        ));
        assert!(lib.find_by_prefix("aaaaaaaa-0000-4000-8000-000000000002").is_ok());
    }
}
