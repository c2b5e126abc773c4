use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolve `requested` for `capability` on `provider`, falling back to the
    /// provider's first capable model with a reason when it does not fit.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
        provider: &str,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            match self.registry.ensure(requested_value, capability) {
                Some(model) if model.provider == provider => {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(_) => (
                    Some(format!(
                        "Requested model '{requested_value}' is not served by backend '{provider}'."
                    )),
                    Some(requested_value.to_string()),
                ),
                None => (
                    Some(format!(
                        "Requested model '{requested_value}' unavailable for capability '{}'.",
                        capability.as_str()
                    )),
                    Some(requested_value.to_string()),
                ),
            }
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability, Some(provider));
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{}' on backend '{provider}'.",
                capability.as_str()
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ModelSelector;
    use crate::models::Capability;

    #[test]
    fn known_model_is_selected_without_fallback() -> Result<(), String> {
        let selector = ModelSelector::default();
        let selection = selector.select(Some("gemini-2.5-flash"), Capability::Text, "gemini")?;
        assert_eq!(selection.model.name, "gemini-2.5-flash");
        assert!(selection.fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn model_without_capability_falls_back_with_reason() -> Result<(), String> {
        let selector = ModelSelector::default();
        let selection = selector.select(
            Some("gemini-2.5-flash"),
            Capability::ImageGeneration,
            "gemini",
        )?;
        assert_eq!(selection.model.name, "imagen-4.0-generate-001");
        assert!(selection
            .fallback_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("image_generation")));
        Ok(())
    }

    #[test]
    fn model_from_other_backend_falls_back_to_active_backend() -> Result<(), String> {
        let selector = ModelSelector::default();
        let selection = selector.select(
            Some("gemini-2.5-flash-image-preview"),
            Capability::ImageEdit,
            "dryrun",
        )?;
        assert_eq!(selection.model.name, "dryrun-image-1");
        assert_eq!(
            selection.requested.as_deref(),
            Some("gemini-2.5-flash-image-preview")
        );
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let selector = ModelSelector::default();
        assert!(selector.select(None, Capability::Text, "nope").is_err());
    }
}
