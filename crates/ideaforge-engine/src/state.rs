use ideaforge_contracts::events::{payload, EventPayload, SessionEvent};
use ideaforge_contracts::library::{
    GeneratedModel, ImportError, Library, PendingImport, SavedModel,
};
use ideaforge_contracts::views::{DataUrl, ModelView};
use indexmap::IndexMap;
use serde_json::json;

use crate::error::GenerationError;
use crate::prompts::{front_view_prompt, ColorMode, IdeaRequest};
use crate::visualizer::{AfterScene, RenderJob, SceneKey, VisualizerAction, VisualizerState};

/// Front-view candidates for one idea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variations {
    Pending,
    Ready(Vec<DataUrl>),
}

/// One user intent or one generation result fed back by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RequestIdeas {
        focus: Vec<String>,
    },
    IdeasGenerated(Result<Vec<String>, GenerationError>),
    VisualizeIdea {
        idea: String,
        force: bool,
    },
    VariationsGenerated {
        idea: String,
        result: Result<Vec<DataUrl>, GenerationError>,
    },
    GenerateViews {
        idea: String,
        front: DataUrl,
    },
    ViewReady {
        front: DataUrl,
        view: ModelView,
        image: DataUrl,
    },
    ViewsFinished {
        front: DataUrl,
        result: Result<(), GenerationError>,
    },
    SaveModel {
        front: DataUrl,
        timestamp: i64,
    },
    DeleteSavedModel {
        id: String,
    },
    AddKeywords(Vec<String>),
    RemoveKeywords(Vec<String>),
    AddExcluded(Vec<String>),
    RemoveExcluded(Vec<String>),
    SetInspirationImage(Option<DataUrl>),
    ExtractKeywordsFromImage,
    ExtractKeywordsFromIdeas,
    KeywordsExtracted(Result<Vec<String>, GenerationError>),
    ImportParsed(Result<PendingImport, ImportError>),
    ConfirmImport,
    CancelImport,
    Visualizer(VisualizerAction),
    Fail(String),
    DismissError,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    GenerateIdeas(IdeaRequest),
    GenerateVariations {
        idea: String,
    },
    GenerateOtherViews {
        front: DataUrl,
    },
    ExtractKeywordsFromImage {
        image: DataUrl,
    },
    ExtractKeywordsFromIdeas {
        ideas: Vec<String>,
    },
    DescribeScene {
        key: SceneKey,
        images: Vec<DataUrl>,
        color_mode: ColorMode,
        then: AfterScene,
    },
    RenderSlots {
        scene: String,
        layer_lines: bool,
        jobs: Vec<RenderJob>,
    },
    GenerateListing {
        images: Vec<DataUrl>,
    },
    PersistSavedModels,
    PersistInspiration,
    Record {
        event: SessionEvent,
        payload: EventPayload,
    },
}

impl Effect {
    pub fn record(event: SessionEvent, payload: EventPayload) -> Self {
        Effect::Record { event, payload }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Effect::record(SessionEvent::Error, payload(json!({ "message": message.into() })))
    }
}

/// The whole in-memory session. `apply` is the single transition entry point.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    ideas: Vec<String>,
    session_ideas: Vec<String>,
    ideas_pending: bool,
    variations: IndexMap<String, Variations>,
    generated: IndexMap<DataUrl, GeneratedModel>,
    views_in_flight: Vec<DataUrl>,
    library: Library,
    pending_import: Option<PendingImport>,
    keywords_pending: bool,
    visualizer: VisualizerState,
    error: Option<String>,
}

impl SessionState {
    pub fn new(library: Library) -> Self {
        Self {
            library,
            ..Self::default()
        }
    }

    pub fn ideas(&self) -> &[String] {
        &self.ideas
    }

    /// Every idea suggested since the session started.
    pub fn session_ideas(&self) -> &[String] {
        &self.session_ideas
    }

    pub fn ideas_pending(&self) -> bool {
        self.ideas_pending
    }

    pub fn variations(&self) -> &IndexMap<String, Variations> {
        &self.variations
    }

    pub fn generated(&self) -> &IndexMap<DataUrl, GeneratedModel> {
        &self.generated
    }

    pub fn views_pending(&self, front: &DataUrl) -> bool {
        self.views_in_flight.contains(front)
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn pending_import(&self) -> Option<&PendingImport> {
        self.pending_import.as_ref()
    }

    pub fn keywords_pending(&self) -> bool {
        self.keywords_pending
    }

    pub fn visualizer(&self) -> &VisualizerState {
        &self.visualizer
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn apply(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::RequestIdeas { focus } => self.request_ideas(focus),
            Action::IdeasGenerated(result) => self.ideas_generated(result),
            Action::VisualizeIdea { idea, force } => self.visualize_idea(idea, force),
            Action::VariationsGenerated { idea, result } => self.variations_generated(idea, result),
            Action::GenerateViews { idea, front } => self.generate_views(idea, front),
            Action::ViewReady { front, view, image } => {
                let Some(model) = self.generated.get_mut(&front) else {
                    return Vec::new();
                };
                model.images.set(view, image);
                vec![Effect::record(
                    SessionEvent::ViewReady,
                    payload(json!({ "idea": model.idea, "view": view.as_str() })),
                )]
            }
            Action::ViewsFinished { front, result } => self.views_finished(front, result),
            Action::SaveModel { front, timestamp } => self.save_model(&front, timestamp),
            Action::DeleteSavedModel { id } => {
                let before = self.library.saved_models.len();
                self.library.saved_models.retain(|model| model.id != id);
                if before == self.library.saved_models.len() {
                    return Vec::new();
                }
                if let Ok(key) = DataUrl::parse(id.as_str()) {
                    if let Some(model) = self.generated.get_mut(&key) {
                        model.is_saved = false;
                    }
                }
                vec![
                    Effect::PersistSavedModels,
                    Effect::record(
                        SessionEvent::ModelDeleted,
                        payload(json!({ "remaining": before - 1 })),
                    ),
                ]
            }
            Action::AddKeywords(keywords) => {
                self.library.inspiration.add_keywords(keywords);
                vec![Effect::PersistInspiration]
            }
            Action::RemoveKeywords(keywords) => {
                for keyword in &keywords {
                    self.library.inspiration.remove_keyword(keyword);
                }
                vec![Effect::PersistInspiration]
            }
            Action::AddExcluded(keywords) => {
                for keyword in &keywords {
                    self.library.inspiration.add_excluded(keyword);
                }
                vec![Effect::PersistInspiration]
            }
            Action::RemoveExcluded(keywords) => {
                for keyword in &keywords {
                    self.library.inspiration.remove_excluded(keyword);
                }
                vec![Effect::PersistInspiration]
            }
            Action::SetInspirationImage(image) => {
                self.library.inspiration.set_image(image);
                vec![Effect::PersistInspiration]
            }
            Action::ExtractKeywordsFromImage => {
                if self.keywords_pending {
                    return Vec::new();
                }
                let Some(image) = self.library.inspiration.image().cloned() else {
                    return self.fail("Set an inspiration image before extracting keywords.");
                };
                self.keywords_pending = true;
                self.error = None;
                vec![Effect::ExtractKeywordsFromImage { image }]
            }
            Action::ExtractKeywordsFromIdeas => {
                if self.keywords_pending {
                    return Vec::new();
                }
                if self.ideas.is_empty() {
                    return self.fail("Generate ideas before extracting keywords from them.");
                }
                self.keywords_pending = true;
                self.error = None;
                vec![Effect::ExtractKeywordsFromIdeas {
                    ideas: self.ideas.clone(),
                }]
            }
            Action::KeywordsExtracted(result) => {
                self.keywords_pending = false;
                match result {
                    Ok(keywords) => {
                        let added = self.library.inspiration.add_keywords(keywords);
                        vec![
                            Effect::PersistInspiration,
                            Effect::record(
                                SessionEvent::KeywordsExtracted,
                                payload(json!({ "added": added })),
                            ),
                        ]
                    }
                    Err(err) => self.fail(format!("Failed to extract keywords: {err}")),
                }
            }
            Action::ImportParsed(result) => match result {
                Ok(pending) => {
                    self.pending_import = Some(pending);
                    Vec::new()
                }
                Err(err) => {
                    self.pending_import = None;
                    self.fail(err.to_string())
                }
            },
            Action::ConfirmImport => {
                let Some(pending) = self.pending_import.take() else {
                    return Vec::new();
                };
                self.library = pending.library;
                for (key, model) in &mut self.generated {
                    model.is_saved = self
                        .library
                        .saved_models
                        .iter()
                        .any(|saved| saved.id == key.as_str());
                }
                vec![
                    Effect::PersistSavedModels,
                    Effect::PersistInspiration,
                    Effect::record(
                        SessionEvent::ArchiveImported,
                        payload(json!({
                            "saved_models": self.library.saved_models.len(),
                            "defaulted": pending.defaulted,
                        })),
                    ),
                ]
            }
            Action::CancelImport => {
                self.pending_import = None;
                Vec::new()
            }
            Action::Visualizer(action) => self.visualizer.apply(action, &mut self.error),
            Action::Fail(message) => self.fail(message),
            Action::DismissError => {
                self.error = None;
                Vec::new()
            }
        }
    }

    fn fail(&mut self, message: impl Into<String>) -> Vec<Effect> {
        let message = message.into();
        self.error = Some(message.clone());
        vec![Effect::error(message)]
    }

    fn request_ideas(&mut self, focus: Vec<String>) -> Vec<Effect> {
        if self.ideas_pending {
            return Vec::new();
        }
        self.ideas.clear();
        self.variations.clear();
        self.generated.clear();
        self.views_in_flight.clear();
        self.keywords_pending = false;
        self.error = None;
        self.ideas_pending = true;

        let inspiration = &self.library.inspiration;
        vec![Effect::GenerateIdeas(IdeaRequest {
            existing_ideas: self.session_ideas.clone(),
            keywords: inspiration.keywords().to_vec(),
            excluded: inspiration.excluded().to_vec(),
            focus,
            image: inspiration.image().cloned(),
        })]
    }

    fn ideas_generated(&mut self, result: Result<Vec<String>, GenerationError>) -> Vec<Effect> {
        self.ideas_pending = false;
        match result {
            Ok(ideas) => {
                for idea in &ideas {
                    if !self.session_ideas.contains(idea) {
                        self.session_ideas.push(idea.clone());
                    }
                }
                self.ideas = ideas;
                vec![Effect::record(
                    SessionEvent::IdeasGenerated,
                    payload(json!({
                        "ideas": self.ideas,
                        "session_total": self.session_ideas.len(),
                    })),
                )]
            }
            Err(err) => self.fail(format!("Failed to generate ideas: {err}")),
        }
    }

    fn visualize_idea(&mut self, idea: String, force: bool) -> Vec<Effect> {
        match self.variations.get(&idea) {
            Some(Variations::Pending) => return Vec::new(),
            Some(Variations::Ready(_)) if !force => return Vec::new(),
            _ => {}
        }
        self.error = None;
        self.variations.insert(idea.clone(), Variations::Pending);
        vec![Effect::GenerateVariations { idea }]
    }

    fn variations_generated(
        &mut self,
        idea: String,
        result: Result<Vec<DataUrl>, GenerationError>,
    ) -> Vec<Effect> {
        if !matches!(self.variations.get(&idea), Some(Variations::Pending)) {
            return Vec::new();
        }
        match result {
            Ok(images) => {
                let count = images.len();
                self.variations.insert(idea.clone(), Variations::Ready(images));
                vec![Effect::record(
                    SessionEvent::VariationsReady,
                    payload(json!({ "idea": idea, "count": count })),
                )]
            }
            Err(err) => {
                self.variations.shift_remove(&idea);
                self.fail(format!("Failed to visualize \"{idea}\": {err}"))
            }
        }
    }

    fn generate_views(&mut self, idea: String, front: DataUrl) -> Vec<Effect> {
        if self.views_in_flight.contains(&front) {
            return Vec::new();
        }
        if let Some(existing) = self.generated.get(&front) {
            if existing.images.back.is_some() {
                return Vec::new();
            }
        }
        self.error = None;
        let is_saved = self
            .library
            .saved_models
            .iter()
            .any(|saved| saved.id == front.as_str());
        self.generated
            .entry(front.clone())
            .or_insert_with(|| GeneratedModel::new(idea, front.clone(), is_saved));
        self.views_in_flight.push(front.clone());
        vec![Effect::GenerateOtherViews { front }]
    }

    fn views_finished(
        &mut self,
        front: DataUrl,
        result: Result<(), GenerationError>,
    ) -> Vec<Effect> {
        self.views_in_flight.retain(|pending| pending != &front);
        let Err(err) = result else {
            return Vec::new();
        };
        let (idea, delivered) = match self.generated.get(&front) {
            Some(model) => (model.idea.clone(), model.images.derived_count()),
            None => (String::new(), 0),
        };
        // A model with no derived view yet is rolled back; delivered views stay.
        if delivered == 0 {
            self.generated.shift_remove(&front);
        }
        let mut effects = vec![Effect::record(
            SessionEvent::ViewsFailed,
            payload(json!({
                "idea": idea,
                "delivered": delivered,
                "error": err.to_string(),
            })),
        )];
        effects.extend(self.fail(format!("Failed to generate the other views: {err}")));
        effects
    }

    fn save_model(&mut self, front: &DataUrl, timestamp: i64) -> Vec<Effect> {
        let Some(model) = self.generated.get_mut(front) else {
            return Vec::new();
        };
        if model.is_saved {
            return Vec::new();
        }
        let Some(saved) =
            SavedModel::from_generated(model, front_view_prompt(&model.idea), timestamp)
        else {
            return Vec::new();
        };
        model.is_saved = true;
        let idea = model.idea.clone();
        self.library.saved_models.push(saved);
        vec![
            Effect::PersistSavedModels,
            Effect::record(
                SessionEvent::ModelSaved,
                payload(json!({ "idea": idea, "timestamp": timestamp })),
            ),
        ]
    }
}
