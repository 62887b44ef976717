use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::SecretCipher;
use crate::error::{PromptError, Result};
use crate::generate::Generator;
use crate::llm::{CompletionSource, OpenAiEngine, SystemPromptOptions};
use crate::security::{EnhanceLimiter, LimiterStatus};
use crate::store::{GenerationSettings, Library, LibraryStore, Prompt, Snapshot};

const API_KEY_SECRET: &str = "api_key";

/// Where the active API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Env,
    Stored,
    Config,
}

/// Per-call tweaks on top of the saved generation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub nsfw: Option<bool>,
    pub same_location: Option<bool>,
    pub count: Option<u8>,
}

/// Result of a generation as seen by the user: the saved cards plus the
/// failure that ended the stream early, if any.
#[derive(Debug)]
pub struct GenerationReport {
    pub prompts: Vec<Prompt>,
    pub error: Option<PromptError>,
}

/// Application state: the library, its store, and the generation stack.
///
/// Every transition is applied to the in-memory library and then saved
/// through the store before it becomes current.
pub struct App {
    config: Config,
    store: Box<dyn LibraryStore>,
    cipher: SecretCipher,
    library: Library,
    limiter: Arc<EnhanceLimiter>,
    generator: Option<Arc<Generator>>,
}

impl App {
    pub fn new(config: Config, store: Box<dyn LibraryStore>, cipher: SecretCipher) -> Result<Self> {
        let defaults = GenerationSettings {
            nsfw: config.generation.nsfw,
            same_location: config.generation.same_location,
            num_variations: config.generation.default_count,
        };
        let library = store.load(defaults)?;
        info!(prompts = library.prompts().len(), "library ready");

        Ok(Self {
            config,
            store,
            cipher,
            library,
            limiter: Arc::new(EnhanceLimiter::new()),
            generator: None,
        })
    }

    /// Use a specific completion source instead of the configured API.
    pub fn with_source(mut self, source: Arc<dyn CompletionSource>) -> Self {
        self.generator = Some(Arc::new(Generator::new(source, self.limiter.clone())));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn limiter_status(&self) -> LimiterStatus {
        self.limiter.status()
    }

    fn commit(&mut self, next: Library) -> Result<()> {
        self.store.save(&next)?;
        self.library = next;
        Ok(())
    }

    // -- API key -----------------------------------------------------------

    /// Resolve the API key: `OPENAI_API_KEY`, then the stored key, then the
    /// config file.  A stored key that fails to decrypt is skipped.
    pub fn api_key(&self) -> Result<Option<(String, KeySource)>> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(Some((key, KeySource::Env)));
            }
        }

        if let Some(sealed) = self.store.load_secret(API_KEY_SECRET)? {
            match self.cipher.decrypt(&sealed) {
                Ok(key) if !key.is_empty() => return Ok(Some((key, KeySource::Stored))),
                Ok(_) => {}
                Err(e) => warn!("stored API key could not be decrypted: {e}"),
            }
        }

        if !self.config.llm.api_key.trim().is_empty() {
            return Ok(Some((self.config.llm.api_key.clone(), KeySource::Config)));
        }
        Ok(None)
    }

    pub fn set_api_key(&mut self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(PromptError::InvalidInput("API key is empty".into()));
        }
        let sealed = self.cipher.encrypt(key)?;
        self.store.save_secret(API_KEY_SECRET, &sealed)?;
        // rebuild the client with the new key on next use
        self.generator = None;
        info!("API key stored");
        Ok(())
    }

    fn generator(&mut self) -> Result<Arc<Generator>> {
        if let Some(generator) = &self.generator {
            return Ok(generator.clone());
        }
        let key = self.api_key()?.map(|(key, _)| key).unwrap_or_default();
        let engine = OpenAiEngine::new(&self.config, key)?;
        let generator = Arc::new(Generator::new(Arc::new(engine), self.limiter.clone()));
        self.generator = Some(generator.clone());
        Ok(generator)
    }

    // -- generation --------------------------------------------------------

    pub fn options(&self, overrides: Overrides, enhance: bool) -> SystemPromptOptions {
        let settings = self.library.settings();
        SystemPromptOptions {
            nsfw: overrides.nsfw.unwrap_or(settings.nsfw),
            same_location: overrides.same_location.unwrap_or(settings.same_location),
            count: overrides.count.unwrap_or(settings.num_variations),
            enhance,
        }
    }

    /// Generate variations of `base_prompt` and add them to the library.
    ///
    /// `on_prompt` sees each card as soon as its record completes.  Cards
    /// produced before a mid-stream failure are still saved.
    pub async fn generate<F>(
        &mut self,
        base_prompt: &str,
        options: SystemPromptOptions,
        parent_id: Option<Uuid>,
        mut on_prompt: F,
    ) -> Result<GenerationReport>
    where
        F: FnMut(&Prompt),
    {
        if !(1..=10).contains(&options.count) {
            return Err(PromptError::InvalidInput(format!(
                "variation count must be between 1 and 10, got {}",
                options.count
            )));
        }

        let generator = self.generator()?;
        let mut created = Vec::new();
        let outcome = generator
            .run(base_prompt, &options, |variation| {
                let prompt = Prompt::from_variation(variation.clone(), parent_id);
                on_prompt(&prompt);
                created.push(prompt);
            })
            .await?;

        if !created.is_empty() {
            let next = self.library.clone().with_prompts(created.clone());
            self.commit(next)?;
        }

        Ok(GenerationReport {
            prompts: created,
            error: outcome.error,
        })
    }

    /// Generate new variations from an existing card.
    pub async fn vary<F>(&mut self, id: &str, on_prompt: F) -> Result<GenerationReport>
    where
        F: FnMut(&Prompt),
    {
        let parent = self.library.find_by_prefix(id)?.clone();
        let options = self.options(Overrides::default(), false);
        self.generate(&parent.content, options, Some(parent.id), on_prompt)
            .await
    }

    // -- library edits -----------------------------------------------------

    pub fn find(&self, id: &str) -> Result<&Prompt> {
        self.library.find_by_prefix(id)
    }

    /// Toggle the favorite mark; returns the card and whether it is now a
    /// favorite.
    pub fn toggle_favorite(&mut self, id: &str) -> Result<(Prompt, bool)> {
        let prompt = self.library.find_by_prefix(id)?.clone();
        let next = self.library.clone().toggle_favorite(prompt.id)?;
        let now_favorite = next.is_favorite(prompt.id);
        self.commit(next)?;
        Ok((prompt, now_favorite))
    }

    pub fn remove(&mut self, id: &str) -> Result<Prompt> {
        let id = self.library.find_by_prefix(id)?.id;
        let (next, removed) = self.library.clone().without_prompt(id)?;
        self.commit(next)?;
        Ok(removed)
    }

    pub fn update_settings(&mut self, overrides: Overrides) -> Result<GenerationSettings> {
        let current = self.library.settings();
        let settings = GenerationSettings {
            nsfw: overrides.nsfw.unwrap_or(current.nsfw),
            same_location: overrides.same_location.unwrap_or(current.same_location),
            num_variations: overrides.count.unwrap_or(current.num_variations),
        };
        let next = self.library.clone().with_settings(settings)?;
        self.commit(next)?;
        Ok(settings)
    }

    pub fn export(&self, path: &Path) -> Result<usize> {
        let snapshot = Snapshot::of(&self.library);
        snapshot.write_to(path)?;
        Ok(snapshot.prompts.len())
    }

    /// Replace prompts and favorites with a backup file's contents.
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let snapshot = Snapshot::read_from(path)?;
        let next = snapshot.apply(self.library.clone());
        let count = next.prompts().len();
        self.commit(next)?;
        info!(path = %path.display(), prompts = count, "backup imported");
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::generate::tests::{ScriptedSource, TWO};
    use crate::store::{MemoryStore, SqliteStore};

    pub(crate) fn test_app(fragments: &[&str]) -> App {
        App::new(
            Config::default(),
            Box::new(MemoryStore::new()),
            SecretCipher::from_passphrase("test"),
        )
        .unwrap()
        .with_source(Arc::new(ScriptedSource::new(fragments)))
    }

    #[tokio::test]
    async fn test_generate_saves_cards() {
        let mut app = test_app(&[TWO]);
        let mut streamed = Vec::new();
        let options = app.options(Overrides::default(), false);
        let report = app
            .generate("pets", options, None, |p| streamed.push(p.content.clone()))
            .await
            .unwrap();

        assert!(report.error.is_none());
        assert_eq!(streamed, vec!["A cat", "A dog"]);
        assert_eq!(app.library().prompts().len(), 2);
        assert_eq!(app.library().prompts()[0].tags, vec!["cute", "cat"]);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_earlier_cards() {
        let mut app = test_app(&[]).with_source(Arc::new(ScriptedSource::with_results(vec![
            Ok("<variation1>\nprompt: survivor\n</variation1>".into()),
            Err("boom".into()),
        ])));
        let options = app.options(Overrides::default(), false);
        let report = app.generate("x", options, None, |_| {}).await.unwrap();
        assert_eq!(report.prompts.len(), 1);
        assert!(report.error.is_some());
        assert_eq!(app.library().prompts()[0].content, "survivor");
    }

    #[tokio::test]
    async fn test_vary_sets_parent() {
        let mut app = test_app(&[TWO]);
        let options = app.options(Overrides::default(), false);
        app.generate("pets", options, None, |_| {}).await.unwrap();
        let parent = app.library().prompts()[0].clone();

        let report = app.vary(&parent.id.to_string()[..8], |_| {}).await.unwrap();
        assert_eq!(report.prompts.len(), 2);
        assert!(report.prompts.iter().all(|p| p.parent_id == Some(parent.id)));
        assert_eq!(app.library().prompts().len(), 4);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_count() {
        let mut app = test_app(&[TWO]);
        let options = app.options(
            Overrides {
                count: Some(11),
                ..Default::default()
            },
            false,
        );
        let err = app.generate("x", options, None, |_| {}).await.unwrap_err();
        assert!(matches!(err, PromptError::InvalidInput(_)));
    }

    #[test]
    fn test_options_apply_overrides() {
        let app = test_app(&[]);
        let opts = app.options(
            Overrides {
                nsfw: Some(true),
                same_location: None,
                count: Some(3),
            },
            true,
        );
        assert!(opts.nsfw);
        assert!(!opts.same_location);
        assert_eq!(opts.count, 3);
        assert!(opts.enhance);
    }

    #[tokio::test]
    async fn test_favorite_remove_and_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        let make = || {
            App::new(
                Config::default(),
                Box::new(SqliteStore::open(&db_path).unwrap()),
                SecretCipher::from_passphrase("test"),
            )
            .unwrap()
            .with_source(Arc::new(ScriptedSource::new(&[TWO])))
        };

        let mut app = make();
        let options = app.options(Overrides::default(), false);
        app.generate("pets", options, None, |_| {}).await.unwrap();
        let cat = app.library().prompts()[0].id.to_string();
        let dog = app.library().prompts()[1].id.to_string();

        let (_, fav) = app.toggle_favorite(&cat).unwrap();
        assert!(fav);
        app.remove(&dog).unwrap();
        app.update_settings(Overrides {
            count: Some(5),
            ..Default::default()
        })
        .unwrap();
        drop(app);

        let reopened = make();
        assert_eq!(reopened.library().prompts().len(), 1);
        assert_eq!(reopened.library().favorites().len(), 1);
        assert_eq!(reopened.library().settings().num_variations, 5);
    }

    #[test]
    fn test_stored_api_key_is_sealed() {
        let mut app = test_app(&[]);
        app.set_api_key("  sk-stored  ").unwrap();
        let sealed = app.store.load_secret(API_KEY_SECRET).unwrap().unwrap();
        assert!(sealed.starts_with("ENC$"));
        assert!(!sealed.contains("sk-stored"));
        assert!(app.set_api_key(" ").is_err());
    }

    #[test]
    fn test_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");

        let mut source = test_app(&[]);
        source
            .commit(Library::default().with_prompt(crate::store::library::tests::prompt("kept")))
            .unwrap();
        assert_eq!(source.export(&path).unwrap(), 1);

        let mut target = test_app(&[]);
        assert_eq!(target.import(&path).unwrap(), 1);
        assert_eq!(target.library().prompts()[0].content, "kept");

        std::fs::write(&path, "garbage").unwrap();
        assert!(target.import(&path).is_err());
        assert_eq!(target.library().prompts().len(), 1);
    }
}
