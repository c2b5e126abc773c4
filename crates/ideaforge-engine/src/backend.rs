use std::collections::BTreeMap;
use std::sync::Arc;

use ideaforge_contracts::views::DataUrl;
use serde_json::Value;

use crate::error::GenerationError;

/// Which pipeline step a request belongs to. Backends may use it for logging
/// or, offline, to shape a plausible answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ideas,
    FrontViews,
    OtherView,
    SceneDescription,
    RealisticView,
    Keywords,
    Listing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ideas => "ideas",
            Stage::FrontViews => "front_views",
            Stage::OtherView => "other_view",
            Stage::SceneDescription => "scene_description",
            Stage::RealisticView => "realistic_view",
            Stage::Keywords => "keywords",
            Stage::Listing => "listing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image(DataUrl),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// Structured output matching a JSON schema.
    Json(Value),
    /// Inline image output (text may accompany it).
    Image,
}

/// One content-generation call: an ordered list of parts sent to one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub stage: Stage,
    pub model: String,
    pub parts: Vec<Part>,
    pub format: ResponseFormat,
}

impl ContentRequest {
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &DataUrl> {
        self.parts.iter().filter_map(|part| match part {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentResponse {
    /// Concatenated text parts, if any.
    pub text: Option<String>,
    pub images: Vec<DataUrl>,
}

/// A dedicated multi-image generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagesRequest {
    pub model: String,
    pub prompt: String,
    pub count: u32,
    pub aspect_ratio: String,
    pub mime_type: String,
}

pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate_content(&self, request: &ContentRequest)
        -> Result<ContentResponse, GenerationError>;
    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<DataUrl>, GenerationError>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerationBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}
