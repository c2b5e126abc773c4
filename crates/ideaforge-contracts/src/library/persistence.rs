use anyhow::Context;
use serde_json::Value;

use super::inspiration::InspirationSettings;
use super::saved::{saved_models_from_value, SavedModel};
use super::store::LocalStore;
use crate::views::DataUrl;

pub const SAVED_MODELS_KEY: &str = "saved3DModels";
pub const INSPIRATION_KEYWORDS_KEY: &str = "inspirationKeywords";
pub const EXCLUDED_KEYWORDS_KEY: &str = "excludedKeywords";
pub const INSPIRATION_IMAGE_KEY: &str = "inspirationImage";

/// Everything mirrored into durable storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
    pub saved_models: Vec<SavedModel>,
    pub inspiration: InspirationSettings,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedLibrary {
    pub library: Library,
    /// One entry per key that was present but unreadable.
    pub warnings: Vec<String>,
}

/// Load the library, falling back to defaults for absent or corrupt keys.
/// Never fails: corruption is reported through `warnings`.
pub fn load_library(store: &mut LocalStore) -> LoadedLibrary {
    let mut warnings: Vec<String> = Vec::new();

    let saved_models = match store.get_item(SAVED_MODELS_KEY) {
        None => Vec::new(),
        Some(raw) => match serde_json::from_str::<Value>(&raw)
            .ok()
            .as_ref()
            .and_then(saved_models_from_value)
        {
            Some(models) => models,
            None => {
                push_unique_warning(
                    &mut warnings,
                    format!("{SAVED_MODELS_KEY}: unreadable saved models, starting empty"),
                );
                Vec::new()
            }
        },
    };

    let keywords = read_keyword_list(store, INSPIRATION_KEYWORDS_KEY, &mut warnings);
    let excluded = read_keyword_list(store, EXCLUDED_KEYWORDS_KEY, &mut warnings);

    let image = match store.get_item(INSPIRATION_IMAGE_KEY) {
        None => None,
        Some(raw) => match DataUrl::parse(raw) {
            Ok(image) => Some(image),
            Err(err) => {
                push_unique_warning(&mut warnings, format!("{INSPIRATION_IMAGE_KEY}: {err}"));
                None
            }
        },
    };

    let mut inspiration = match keywords {
        Some(keywords) => {
            InspirationSettings::new(keywords, excluded.unwrap_or_default(), None)
        }
        None => {
            let mut defaults = InspirationSettings::default();
            for keyword in excluded.unwrap_or_default() {
                defaults.add_excluded(&keyword);
            }
            defaults
        }
    };
    inspiration.set_image(image);

    if let Some(warning) = store.load_warning() {
        warnings.insert(0, warning.to_string());
    }

    LoadedLibrary {
        library: Library {
            saved_models,
            inspiration,
        },
        warnings,
    }
}

pub fn save_saved_models(store: &mut LocalStore, models: &[SavedModel]) -> anyhow::Result<()> {
    let encoded = serde_json::to_string(models).context("encode saved models")?;
    store
        .set_item(SAVED_MODELS_KEY, &encoded)
        .with_context(|| format!("write {SAVED_MODELS_KEY}"))
}

pub fn save_inspiration(
    store: &mut LocalStore,
    inspiration: &InspirationSettings,
) -> anyhow::Result<()> {
    store.set_item(
        INSPIRATION_KEYWORDS_KEY,
        &serde_json::to_string(inspiration.keywords())?,
    )?;
    store.set_item(
        EXCLUDED_KEYWORDS_KEY,
        &serde_json::to_string(inspiration.excluded())?,
    )?;
    let written = match inspiration.image() {
        Some(image) => store.set_item(INSPIRATION_IMAGE_KEY, image.as_str()),
        None => store.remove_item(INSPIRATION_IMAGE_KEY),
    };
    written.with_context(|| format!("write {INSPIRATION_IMAGE_KEY}"))
}

pub fn save_library(store: &mut LocalStore, library: &Library) -> anyhow::Result<()> {
    save_saved_models(store, &library.saved_models)?;
    save_inspiration(store, &library.inspiration)
}

/// `None` when the key is absent or unreadable.
fn read_keyword_list(
    store: &mut LocalStore,
    key: &str,
    warnings: &mut Vec<String>,
) -> Option<Vec<String>> {
    let raw = store.get_item(key)?;
    let parsed = serde_json::from_str::<Value>(&raw)
        .ok()
        .and_then(|value| keyword_list_from_value(&value));
    if parsed.is_none() {
        push_unique_warning(warnings, format!("{key}: unreadable keyword list, using defaults"));
    }
    parsed
}

/// A JSON array of strings; any non-string entry rejects the list.
pub fn keyword_list_from_value(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if !warnings.iter().any(|existing| existing == &message) {
        warnings.push(message);
    }
}
