use indexmap::IndexMap;

/// What a model can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text out, optionally with structured JSON output.
    Text,
    /// Accepts inline images as input.
    Vision,
    /// Produces an image from a prompt plus reference images.
    ImageEdit,
    /// Produces several images from a prompt alone.
    ImageGeneration,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Vision => "vision",
            Capability::ImageEdit => "image_edit",
            Capability::ImageGeneration => "image_generation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
    /// Images returned per request for generation models.
    pub batch_size: Option<u32>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability, provider: Option<&str>) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .filter(|model| provider.map_or(true, |provider| model.provider == provider))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[Capability], batch: Option<u32>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
                batch_size: batch,
            },
        );
    };

    insert(
        "gemini-2.5-flash",
        "gemini",
        &[Capability::Text, Capability::Vision],
        None,
    );
    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &[Capability::ImageEdit, Capability::Vision],
        None,
    );
    insert(
        "imagen-4.0-generate-001",
        "gemini",
        &[Capability::ImageGeneration],
        Some(4),
    );
    insert(
        "dryrun-text-1",
        "dryrun",
        &[Capability::Text, Capability::Vision],
        None,
    );
    insert(
        "dryrun-image-1",
        "dryrun",
        &[
            Capability::ImageEdit,
            Capability::ImageGeneration,
            Capability::Vision,
        ],
        Some(4),
    );

    map
}
