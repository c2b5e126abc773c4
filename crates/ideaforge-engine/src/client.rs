use std::sync::Arc;

use ideaforge_contracts::library::inspiration::normalize_keywords;
use ideaforge_contracts::views::{DataUrl, ModelView, ViewSet};
use serde_json::Value;

use crate::backend::{
    ContentRequest, ContentResponse, GenerationBackend, ImagesRequest, Part, ResponseFormat, Stage,
};
use crate::error::GenerationError;
use crate::prompts::{
    front_view_prompt, ideas_prompt, keywords_from_ideas_prompt, keywords_from_image_prompt,
    listing_prompt, other_view_prompt, realistic_prompt, scene_prompt, string_array_schema,
    ColorMode, IdeaRequest, IDEA_BATCH_SIZE, VARIATION_COUNT,
};
use crate::retry::{RetryNotice, RetryPolicy};

/// Model names used for each kind of call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub text: String,
    pub image_edit: String,
    pub image_generation: String,
}

/// Called before each retry with the stage being retried.
pub type RetryObserver = Arc<dyn Fn(Stage, &RetryNotice) + Send + Sync>;

/// Title, description and tags for a model-sharing listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingContent {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Typed, validated access to every generation stage. Each call goes through
/// the retry policy and rejects malformed answers with `InvalidResponse`.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    models: ModelChoice,
    retry: RetryPolicy,
    retry_observer: Option<RetryObserver>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, models: ModelChoice, retry: RetryPolicy) -> Self {
        Self {
            backend,
            models,
            retry,
            retry_observer: None,
        }
    }

    pub fn with_retry_observer(mut self, observer: RetryObserver) -> Self {
        self.retry_observer = Some(observer);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn models(&self) -> &ModelChoice {
        &self.models
    }

    fn content(
        &self,
        stage: Stage,
        model: &str,
        parts: Vec<Part>,
        format: ResponseFormat,
    ) -> Result<ContentResponse, GenerationError> {
        let request = ContentRequest {
            stage,
            model: model.to_string(),
            parts,
            format,
        };
        self.retry.run(
            || self.backend.generate_content(&request),
            |notice| self.notify_retry(stage, notice),
        )
    }

    fn notify_retry(&self, stage: Stage, notice: &RetryNotice) {
        if let Some(observer) = &self.retry_observer {
            observer(stage, notice);
        }
    }

    fn text_json(
        &self,
        stage: Stage,
        parts: Vec<Part>,
        item_description: &str,
    ) -> Result<Value, GenerationError> {
        let response = self.content(
            stage,
            &self.models.text,
            parts,
            ResponseFormat::Json(string_array_schema(item_description)),
        )?;
        let text = response
            .text
            .ok_or_else(|| GenerationError::invalid_response("expected JSON text, got none"))?;
        serde_json::from_str(strip_code_fence(&text))
            .map_err(|err| GenerationError::invalid_response(format!("unparsable JSON: {err}")))
    }

    /// Exactly four distinct ideas, none already in `request.existing_ideas`.
    pub fn generate_ideas(&self, request: &IdeaRequest) -> Result<Vec<String>, GenerationError> {
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(Part::Image(image.clone()));
        }
        parts.push(Part::Text(ideas_prompt(request)));
        let value = self.text_json(
            Stage::Ideas,
            parts,
            "A single non-functional, decorative 3D model idea.",
        )?;
        let ideas = string_list(&value)?
            .into_iter()
            .map(|idea| idea.trim().to_string())
            .collect::<Vec<_>>();
        if ideas.len() != IDEA_BATCH_SIZE {
            return Err(GenerationError::invalid_response(format!(
                "expected {IDEA_BATCH_SIZE} ideas, got {}",
                ideas.len()
            )));
        }
        for (idx, idea) in ideas.iter().enumerate() {
            if idea.is_empty() {
                return Err(GenerationError::invalid_response("empty idea"));
            }
            if ideas[..idx].contains(idea) {
                return Err(GenerationError::invalid_response(format!(
                    "duplicate idea in batch: {idea}"
                )));
            }
            if request.existing_ideas.contains(idea) {
                return Err(GenerationError::invalid_response(format!(
                    "idea repeated from this session: {idea}"
                )));
            }
        }
        Ok(ideas)
    }

    pub fn generate_front_view_variations(
        &self,
        idea: &str,
    ) -> Result<Vec<DataUrl>, GenerationError> {
        let request = ImagesRequest {
            model: self.models.image_generation.clone(),
            prompt: front_view_prompt(idea),
            count: VARIATION_COUNT as u32,
            aspect_ratio: "1:1".to_string(),
            mime_type: "image/png".to_string(),
        };
        let mut images = self.retry.run(
            || self.backend.generate_images(&request),
            |notice| self.notify_retry(Stage::FrontViews, notice),
        )?;
        if images.len() < VARIATION_COUNT {
            return Err(GenerationError::invalid_response(format!(
                "expected {VARIATION_COUNT} front view variations, got {}",
                images.len()
            )));
        }
        images.truncate(VARIATION_COUNT);
        Ok(images)
    }

    /// Left, right, then back, each an edit of `front`. `on_view` fires as each
    /// view lands; the first failure stops the sequence.
    pub fn generate_other_views<F>(
        &self,
        front: &DataUrl,
        mut on_view: F,
    ) -> Result<ViewSet, GenerationError>
    where
        F: FnMut(ModelView, &DataUrl),
    {
        let mut views = ViewSet::with_front(front.clone());
        for view in ModelView::DERIVED {
            let response = self.content(
                Stage::OtherView,
                &self.models.image_edit,
                vec![
                    Part::Image(front.clone()),
                    Part::Text(other_view_prompt(view)),
                ],
                ResponseFormat::Image,
            )?;
            let image = first_image(response, &format!("the {view} view"))?;
            on_view(view, &image);
            views.set(view, image);
        }
        Ok(views)
    }

    pub fn generate_scene_description(
        &self,
        images: &[DataUrl],
        color_mode: ColorMode,
    ) -> Result<String, GenerationError> {
        if images.is_empty() {
            return Err(GenerationError::InvalidInput(
                "no images uploaded to describe a scene".to_string(),
            ));
        }
        let mut parts: Vec<Part> = images.iter().cloned().map(Part::Image).collect();
        parts.push(Part::Text(scene_prompt(color_mode)));
        let response = self.content(
            Stage::SceneDescription,
            &self.models.text,
            parts,
            ResponseFormat::Text,
        )?;
        response
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GenerationError::invalid_response("empty scene description"))
    }

    pub fn generate_realistic_view(
        &self,
        image: &DataUrl,
        scene_description: &str,
        view_label: &str,
        show_layer_lines: bool,
    ) -> Result<DataUrl, GenerationError> {
        let response = self.content(
            Stage::RealisticView,
            &self.models.image_edit,
            vec![
                Part::Image(image.clone()),
                Part::Text(realistic_prompt(scene_description, show_layer_lines)),
            ],
            ResponseFormat::Image,
        )?;
        first_image(response, &format!("the realistic {view_label} view"))
    }

    pub fn extract_keywords_from_image(
        &self,
        image: &DataUrl,
    ) -> Result<Vec<String>, GenerationError> {
        let value = self.text_json(
            Stage::Keywords,
            vec![
                Part::Image(image.clone()),
                Part::Text(keywords_from_image_prompt().to_string()),
            ],
            "A single word extracted from the image.",
        )?;
        Ok(normalize_keywords(string_list(&value)?))
    }

    pub fn extract_keywords_from_ideas(
        &self,
        ideas: &[String],
    ) -> Result<Vec<String>, GenerationError> {
        if ideas.is_empty() {
            return Err(GenerationError::InvalidInput(
                "no ideas to extract keywords from".to_string(),
            ));
        }
        let value = self.text_json(
            Stage::Keywords,
            vec![Part::Text(keywords_from_ideas_prompt(ideas))],
            "A short lowercase theme keyword.",
        )?;
        Ok(normalize_keywords(string_list(&value)?))
    }

    /// Listing text for the first of `images`.
    pub fn generate_listing_content(
        &self,
        images: &[DataUrl],
    ) -> Result<ListingContent, GenerationError> {
        let Some(first) = images.first() else {
            return Err(GenerationError::InvalidInput(
                "no images provided to generate listing content".to_string(),
            ));
        };
        let response = self.content(
            Stage::Listing,
            &self.models.text,
            vec![
                Part::Image(first.clone()),
                Part::Text(listing_prompt().to_string()),
            ],
            ResponseFormat::Text,
        )?;
        let text = response
            .text
            .ok_or_else(|| GenerationError::invalid_response("empty listing response"))?;
        parse_listing(&text)
    }
}

fn first_image(response: ContentResponse, what: &str) -> Result<DataUrl, GenerationError> {
    response
        .images
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::invalid_response(format!("no image returned for {what}")))
}

fn string_list(value: &Value) -> Result<Vec<String>, GenerationError> {
    let Some(rows) = value.as_array() else {
        return Err(GenerationError::invalid_response(
            "expected a JSON array of strings",
        ));
    };
    if rows.is_empty() {
        return Err(GenerationError::invalid_response("empty JSON array"));
    }
    rows.iter()
        .map(|row| {
            row.as_str().map(str::to_string).ok_or_else(|| {
                GenerationError::invalid_response("expected a JSON array of strings")
            })
        })
        .collect()
}

/// Body of the first fenced block (```json ... ```), or the text itself.
fn strip_code_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text.trim();
    };
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// The outermost `{ ... }` span, for answers wrapped in prose.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Tolerates code fences and surrounding prose; requires a non-empty title
/// and description and a list of tags.
pub fn parse_listing(text: &str) -> Result<ListingContent, GenerationError> {
    let candidate = strip_code_fence(text);
    let value: Value = serde_json::from_str(candidate)
        .ok()
        .or_else(|| embedded_object(candidate).and_then(|raw| serde_json::from_str(raw).ok()))
        .ok_or_else(|| GenerationError::invalid_response("listing is not a JSON object"))?;

    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::invalid_response(format!("listing is missing '{name}'")))
    };
    let title = field("title")?;
    let description = field("description")?;
    let Some(tags) = value.get("tags").and_then(Value::as_array) else {
        return Err(GenerationError::invalid_response(
            "listing 'tags' is not a list",
        ));
    };
    let tags = normalize_keywords(tags.iter().filter_map(Value::as_str));
    Ok(ListingContent {
        title,
        description,
        tags,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use ideaforge_contracts::views::DataUrl;

    use super::{GenerationClient, ModelChoice};
    use crate::backend::{
        ContentRequest, ContentResponse, GenerationBackend, ImagesRequest, ResponseFormat, Stage,
    };
    use crate::error::GenerationError;
    use crate::retry::RetryPolicy;

    /// Replays queued answers and records what was asked.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub content: Mutex<VecDeque<Result<ContentResponse, GenerationError>>>,
        pub images: Mutex<VecDeque<Result<Vec<DataUrl>, GenerationError>>>,
        pub content_calls: Mutex<Vec<(Stage, String, bool)>>,
        pub image_calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn push_text(&self, text: &str) {
            self.push_content(Ok(ContentResponse {
                text: Some(text.to_string()),
                images: Vec::new(),
            }));
        }

        pub(crate) fn push_image(&self, image: DataUrl) {
            self.push_content(Ok(ContentResponse {
                text: None,
                images: vec![image],
            }));
        }

        pub(crate) fn push_content(&self, response: Result<ContentResponse, GenerationError>) {
            if let Ok(mut queue) = self.content.lock() {
                queue.push_back(response);
            }
        }

        pub(crate) fn push_images(&self, response: Result<Vec<DataUrl>, GenerationError>) {
            if let Ok(mut queue) = self.images.lock() {
                queue.push_back(response);
            }
        }

        pub(crate) fn content_stages(&self) -> Vec<Stage> {
            self.content_calls
                .lock()
                .map(|calls| calls.iter().map(|(stage, _, _)| *stage).collect())
                .unwrap_or_default()
        }

        pub(crate) fn image_call_count(&self) -> usize {
            self.image_calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }
    }

    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate_content(
            &self,
            request: &ContentRequest,
        ) -> Result<ContentResponse, GenerationError> {
            if let Ok(mut calls) = self.content_calls.lock() {
                calls.push((
                    request.stage,
                    request.prompt_text(),
                    matches!(request.format, ResponseFormat::Image),
                ));
            }
            self.content
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| Err(GenerationError::Request("script exhausted".to_string())))
        }

        fn generate_images(
            &self,
            request: &ImagesRequest,
        ) -> Result<Vec<DataUrl>, GenerationError> {
            if let Ok(mut calls) = self.image_calls.lock() {
                calls.push(request.prompt.clone());
            }
            self.images
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| Err(GenerationError::Request("script exhausted".to_string())))
        }
    }

    pub(crate) fn image(tag: &str) -> DataUrl {
        DataUrl::from_bytes("image/png", tag.as_bytes())
    }

    pub(crate) fn models() -> ModelChoice {
        ModelChoice {
            text: "text-model".to_string(),
            image_edit: "edit-model".to_string(),
            image_generation: "imagen-model".to_string(),
        }
    }

    pub(crate) fn scripted_client() -> (Arc<ScriptedBackend>, GenerationClient) {
        let backend = Arc::new(ScriptedBackend::default());
        let client = GenerationClient::new(
            backend.clone(),
            models(),
            RetryPolicy::new(3, std::time::Duration::ZERO),
        );
        (backend, client)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ideaforge_contracts::views::ModelView;

    use super::testing::{image, scripted_client};
    use super::{parse_listing, strip_code_fence};
    use crate::backend::Stage;
    use crate::error::GenerationError;
    use crate::prompts::{ColorMode, IdeaRequest};
    use crate::retry::RetryNotice;

    #[test]
    fn ideas_must_be_four_unique_strings() -> anyhow::Result<()> {
        let (backend, client) = scripted_client();
        backend.push_text(r#"["a", "b", "c", "d"]"#);
        backend.push_text(r#"["a", "b", "c"]"#);
        backend.push_text(r#"["a", "b", "c", "a"]"#);
        backend.push_text(r#"{"ideas": []}"#);

        let request = IdeaRequest::default();
        assert_eq!(client.generate_ideas(&request)?, vec!["a", "b", "c", "d"]);
        for _ in 0..3 {
            assert!(matches!(
                client.generate_ideas(&request),
                Err(GenerationError::InvalidResponse(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn ideas_never_repeat_session_history() {
        let (backend, client) = scripted_client();
        backend.push_text(r#"["a ghost lamp", "b", "c", "d"]"#);
        let request = IdeaRequest {
            existing_ideas: vec!["a ghost lamp".to_string()],
            ..IdeaRequest::default()
        };
        assert!(matches!(
            client.generate_ideas(&request),
            Err(GenerationError::InvalidResponse(message)) if message.contains("a ghost lamp")
        ));
    }

    #[test]
    fn ideas_retry_overload_then_succeed() -> anyhow::Result<()> {
        let (backend, client) = scripted_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = client.with_retry_observer(Arc::new(move |stage: Stage, notice: &RetryNotice| {
            if let Ok(mut rows) = sink.lock() {
                rows.push((stage, notice.retry));
            }
        }));
        backend.push_content(Err(GenerationError::Overloaded("503".to_string())));
        backend.push_text(r#"["a", "b", "c", "d"]"#);
        assert_eq!(client.generate_ideas(&IdeaRequest::default())?.len(), 4);
        assert_eq!(
            seen.lock().map(|rows| rows.clone()).unwrap_or_default(),
            vec![(Stage::Ideas, 1)]
        );
        Ok(())
    }

    #[test]
    fn variations_require_four_images() -> anyhow::Result<()> {
        let (backend, client) = scripted_client();
        backend.push_images(Ok((0..5).map(|idx| image(&idx.to_string())).collect()));
        backend.push_images(Ok(vec![image("only")]));
        assert_eq!(client.generate_front_view_variations("moon")?.len(), 4);
        assert!(matches!(
            client.generate_front_view_variations("moon"),
            Err(GenerationError::InvalidResponse(_))
        ));
        Ok(())
    }

    #[test]
    fn persistent_overload_becomes_service_unavailable() {
        let (backend, client) = scripted_client();
        for _ in 0..10 {
            backend.push_images(Err(GenerationError::Overloaded("503".to_string())));
        }
        assert!(matches!(
            client.generate_front_view_variations("moon"),
            Err(GenerationError::ServiceUnavailable { attempts: 4, .. })
        ));
        assert_eq!(backend.image_call_count(), 4);
    }

    #[test]
    fn other_views_arrive_left_right_back() -> anyhow::Result<()> {
        let (backend, client) = scripted_client();
        backend.push_image(image("left"));
        backend.push_image(image("right"));
        backend.push_image(image("back"));
        let front = image("front");
        let mut order = Vec::new();
        let views = client.generate_other_views(&front, |view, _| order.push(view))?;
        assert_eq!(order, vec![ModelView::Left, ModelView::Right, ModelView::Back]);
        assert!(views.is_complete());
        assert_eq!(views.back, Some(image("back")));
        Ok(())
    }

    #[test]
    fn other_views_stop_at_first_failure() {
        let (backend, client) = scripted_client();
        backend.push_image(image("left"));
        backend.push_text("sorry, no image");
        let mut order = Vec::new();
        let result = client.generate_other_views(&image("front"), |view, _| order.push(view));
        assert!(matches!(result, Err(GenerationError::InvalidResponse(_))));
        assert_eq!(order, vec![ModelView::Left]);
        assert_eq!(backend.content_stages().len(), 2);
    }

    #[test]
    fn scene_requires_images() {
        let (_, client) = scripted_client();
        assert!(matches!(
            client.generate_scene_description(&[], ColorMode::Single),
            Err(GenerationError::InvalidInput(_))
        ));
    }

    #[test]
    fn keywords_are_normalized() -> anyhow::Result<()> {
        let (backend, client) = scripted_client();
        backend.push_text(r#"["Dragon", " moon ", "dragon", ""]"#);
        assert_eq!(
            client.extract_keywords_from_image(&image("cloud"))?,
            vec!["dragon", "moon"]
        );
        Ok(())
    }

    #[test]
    fn listing_tolerates_fences_and_prose() -> anyhow::Result<()> {
        let fenced = "Sure!\n```json\n{\"title\": \"Spire\", \"description\": \"Tall.\", \"tags\": [\"Coral\"]}\n```\nEnjoy";
        let listing = parse_listing(fenced)?;
        assert_eq!(listing.title, "Spire");
        assert_eq!(listing.tags, vec!["coral"]);

        let prose = "Here it is: {\"title\": \"Orb\", \"description\": \"Round.\", \"tags\": []} hope it helps";
        assert_eq!(parse_listing(prose)?.title, "Orb");
        Ok(())
    }

    #[test]
    fn listing_requires_fields() {
        assert!(parse_listing(r#"{"title": "x", "description": "y"}"#).is_err());
        assert!(parse_listing(r#"{"title": "x", "description": "y", "tags": "a,b"}"#).is_err());
        assert!(parse_listing(r#"{"description": "y", "tags": []}"#).is_err());
        assert!(parse_listing("no json here").is_err());
    }

    #[test]
    fn listing_needs_an_image() {
        let (_, client) = scripted_client();
        assert!(matches!(
            client.generate_listing_content(&[]),
            Err(GenerationError::InvalidInput(_))
        ));
    }

    #[test]
    fn strip_code_fence_passthrough() {
        assert_eq!(strip_code_fence("  [1]  "), "[1]");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
    }
}
