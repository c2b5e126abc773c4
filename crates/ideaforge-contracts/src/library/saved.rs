use serde::{Deserialize, Serialize};

use crate::views::{DataUrl, ViewSet};

/// A model being assembled in the current session, keyed by its front view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedModel {
    pub idea: String,
    pub images: ViewSet,
    pub is_saved: bool,
}

impl GeneratedModel {
    pub fn new(idea: impl Into<String>, front: DataUrl, is_saved: bool) -> Self {
        Self {
            idea: idea.into(),
            images: ViewSet::with_front(front),
            is_saved,
        }
    }

    pub fn key(&self) -> Option<&DataUrl> {
        self.images.front.as_ref()
    }
}

/// A curated model persisted across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedModel {
    /// Front-view data URL of the model it was saved from.
    pub id: String,
    pub idea: String,
    pub front_view_prompt: String,
    pub images: ViewSet,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
}

impl SavedModel {
    pub fn from_generated(
        model: &GeneratedModel,
        front_view_prompt: impl Into<String>,
        timestamp: i64,
    ) -> Option<Self> {
        let id = model.key()?.as_str().to_string();
        Some(Self {
            id,
            idea: model.idea.clone(),
            front_view_prompt: front_view_prompt.into(),
            images: model.images.clone(),
            timestamp,
        })
    }
}

/// Parse a saved-model list leniently: entries that do not match the schema
/// are skipped instead of failing the whole list.
pub fn saved_models_from_value(value: &serde_json::Value) -> Option<Vec<SavedModel>> {
    let rows = value.as_array()?;
    Some(
        rows.iter()
            .filter_map(|row| serde_json::from_value::<SavedModel>(row.clone()).ok())
            .collect(),
    )
}
