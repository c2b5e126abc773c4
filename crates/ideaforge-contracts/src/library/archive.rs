use serde::Serialize;
use serde_json::{Map, Value};

use super::inspiration::InspirationSettings;
use super::persistence::{
    keyword_list_from_value, Library, EXCLUDED_KEYWORDS_KEY, INSPIRATION_IMAGE_KEY,
    INSPIRATION_KEYWORDS_KEY, SAVED_MODELS_KEY,
};
use super::saved::{saved_models_from_value, SavedModel};
use crate::views::DataUrl;

pub const DEFAULT_ARCHIVE_FILE_NAME: &str = "ideaforge-data.json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("import failed: file is not valid JSON ({0})")]
    InvalidJson(String),
    #[error("import failed: expected a JSON object at the top level")]
    NotAnObject,
    #[error("import failed: no saved models or inspiration settings found in file")]
    Unrecognized,
}

/// The export document. Field names match the durable storage keys.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDocument<'a> {
    #[serde(rename = "saved3DModels")]
    pub saved_models: &'a [SavedModel],
    pub inspiration_keywords: &'a [String],
    pub excluded_keywords: &'a [String],
    pub inspiration_image: Option<&'a DataUrl>,
}

impl<'a> ArchiveDocument<'a> {
    pub fn from_library(library: &'a Library) -> Self {
        Self {
            saved_models: &library.saved_models,
            inspiration_keywords: library.inspiration.keywords(),
            excluded_keywords: library.inspiration.excluded(),
            inspiration_image: library.inspiration.image(),
        }
    }
}

pub fn export_archive(library: &Library) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&ArchiveDocument::from_library(
        library,
    ))?)
}

/// A validated import awaiting confirmation. Nothing changes until the caller
/// applies `library`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImport {
    pub library: Library,
    /// Fields that were absent or unreadable and fell back to defaults.
    pub defaulted: Vec<&'static str>,
}

pub fn parse_archive(raw: &str) -> Result<PendingImport, ImportError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ImportError::InvalidJson(err.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(ImportError::NotAnObject);
    };
    archive_from_object(object)
}

fn archive_from_object(object: &Map<String, Value>) -> Result<PendingImport, ImportError> {
    let known = [
        SAVED_MODELS_KEY,
        INSPIRATION_KEYWORDS_KEY,
        EXCLUDED_KEYWORDS_KEY,
        INSPIRATION_IMAGE_KEY,
    ];
    if !known.iter().any(|key| object.contains_key(*key)) {
        return Err(ImportError::Unrecognized);
    }

    let mut defaulted: Vec<&'static str> = Vec::new();

    let saved_models = object
        .get(SAVED_MODELS_KEY)
        .and_then(saved_models_from_value);
    if saved_models.is_none() {
        defaulted.push(SAVED_MODELS_KEY);
    }

    let keywords = object
        .get(INSPIRATION_KEYWORDS_KEY)
        .and_then(keyword_list_from_value);
    if keywords.is_none() {
        defaulted.push(INSPIRATION_KEYWORDS_KEY);
    }

    let excluded = object
        .get(EXCLUDED_KEYWORDS_KEY)
        .and_then(keyword_list_from_value);
    if excluded.is_none() {
        defaulted.push(EXCLUDED_KEYWORDS_KEY);
    }

    let image = object
        .get(INSPIRATION_IMAGE_KEY)
        .and_then(Value::as_str)
        .and_then(|raw| DataUrl::parse(raw).ok());
    if image.is_none() && !matches!(object.get(INSPIRATION_IMAGE_KEY), Some(Value::Null)) {
        defaulted.push(INSPIRATION_IMAGE_KEY);
    }

    let inspiration = match keywords {
        Some(keywords) => InspirationSettings::new(keywords, excluded.unwrap_or_default(), image),
        None => {
            let mut defaults = InspirationSettings::default();
            for keyword in excluded.unwrap_or_default() {
                defaults.add_excluded(&keyword);
            }
            defaults.set_image(image);
            defaults
        }
    };

    Ok(PendingImport {
        library: Library {
            saved_models: saved_models.unwrap_or_default(),
            inspiration,
        },
        defaulted,
    })
}
