use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use ideaforge_contracts::events::{payload, EventLog, EventPayload, SessionEvent};
use ideaforge_contracts::library::{
    export_archive, load_library, parse_archive, save_inspiration, save_saved_models, LocalStore,
};
use ideaforge_contracts::views::DataUrl;
use serde_json::json;

use crate::backend::Stage;
use crate::client::GenerationClient;
use crate::error::GenerationError;
use crate::files::{download_views, read_image_as_data_url, upload_file_name, write_image};
use crate::retry::RetryNotice;
use crate::state::{Action, Effect, SessionState};
use crate::visualizer::{RenderJob, VisualizerAction};

/// Sees every recorded event as it happens, e.g. to print progress.
pub type EventObserver = Box<dyn FnMut(SessionEvent, &EventPayload)>;

/// Owns the session state and performs the effects it asks for: generation
/// calls on the caller's thread, store writes, and the event log.
pub struct Studio {
    state: SessionState,
    client: GenerationClient,
    store: LocalStore,
    events: EventLog,
    observer: Option<EventObserver>,
    warnings: Vec<String>,
}

impl Studio {
    pub fn open(
        client: GenerationClient,
        store_path: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        let events = EventLog::new(events_path, session_id);
        let mut store = LocalStore::new(store_path);
        let loaded = load_library(&mut store);

        let retry_events = events.clone();
        let client = client.with_retry_observer(Arc::new(move |stage: Stage, notice: &RetryNotice| {
            retry_events.emit_or_note(
                SessionEvent::GenerationRetry,
                payload(json!({
                    "stage": stage.as_str(),
                    "retry": notice.retry,
                    "retries": notice.retries,
                    "delay_ms": notice.delay.as_millis() as u64,
                    "reason": notice.reason,
                })),
            );
        }));

        events.emit(
            SessionEvent::SessionStarted,
            payload(json!({
                "store": store.path().to_string_lossy().to_string(),
                "backend": client.backend_name(),
                "text_model": client.models().text,
                "image_edit_model": client.models().image_edit,
                "image_model": client.models().image_generation,
                "saved_models": loaded.library.saved_models.len(),
            })),
        )?;
        for warning in &loaded.warnings {
            events.emit(
                SessionEvent::StorageRecovered,
                payload(json!({ "warning": warning })),
            )?;
        }

        Ok(Self {
            state: SessionState::new(loaded.library),
            client,
            store,
            events,
            observer: None,
            warnings: loaded.warnings,
        })
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    /// Storage that was unreadable at startup and fell back to defaults, then
    /// any retry events the log could not take.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// Apply `action` and run every effect it leads to until the state
    /// settles. Generation failures end up in `state().error()`; only store
    /// and event-log IO errors are returned.
    pub fn dispatch(&mut self, action: Action) -> Result<()> {
        let outcome = self.run_until_settled(action);
        for dropped in self.events.take_dropped() {
            if !self.warnings.contains(&dropped) {
                self.warnings.push(dropped);
            }
        }
        outcome
    }

    fn run_until_settled(&mut self, action: Action) -> Result<()> {
        let mut queue: VecDeque<Effect> = self.state.apply(action).into();
        while let Some(effect) = queue.pop_front() {
            queue.extend(self.run_effect(effect)?);
        }
        Ok(())
    }

    fn run_effect(&mut self, effect: Effect) -> Result<Vec<Effect>> {
        let action = match effect {
            Effect::GenerateIdeas(request) => {
                Action::IdeasGenerated(self.client.generate_ideas(&request))
            }
            Effect::GenerateVariations { idea } => {
                let result = self.client.generate_front_view_variations(&idea);
                Action::VariationsGenerated { idea, result }
            }
            Effect::GenerateOtherViews { front } => return self.generate_other_views(front),
            Effect::ExtractKeywordsFromImage { image } => {
                Action::KeywordsExtracted(self.client.extract_keywords_from_image(&image))
            }
            Effect::ExtractKeywordsFromIdeas { ideas } => {
                Action::KeywordsExtracted(self.client.extract_keywords_from_ideas(&ideas))
            }
            Effect::DescribeScene {
                key,
                images,
                color_mode,
                then,
            } => Action::Visualizer(VisualizerAction::SceneDescribed {
                key,
                then,
                result: self.client.generate_scene_description(&images, color_mode),
            }),
            Effect::RenderSlots {
                scene,
                layer_lines,
                jobs,
            } => {
                let mut effects = Vec::new();
                for (slot, result) in render_slots(&self.client, &scene, layer_lines, &jobs) {
                    effects.extend(
                        self.state
                            .apply(Action::Visualizer(VisualizerAction::SlotRendered {
                                slot,
                                result,
                            })),
                    );
                }
                return Ok(effects);
            }
            Effect::GenerateListing { images } => Action::Visualizer(
                VisualizerAction::ListingGenerated(self.client.generate_listing_content(&images)),
            ),
            Effect::PersistSavedModels => {
                save_saved_models(&mut self.store, &self.state.library().saved_models)
                    .context("failed persisting saved models")?;
                return Ok(Vec::new());
            }
            Effect::PersistInspiration => {
                save_inspiration(&mut self.store, &self.state.library().inspiration)
                    .context("failed persisting inspiration settings")?;
                return Ok(Vec::new());
            }
            Effect::Record { event, payload } => {
                record(&self.events, &mut self.observer, event, payload)?;
                return Ok(Vec::new());
            }
        };
        Ok(self.state.apply(action))
    }

    /// Views are applied as they land so observers see partial progress. The
    /// run is always closed with `ViewsFinished`, even when the log failed.
    fn generate_other_views(&mut self, front: DataUrl) -> Result<Vec<Effect>> {
        let Self {
            state,
            client,
            events,
            observer,
            ..
        } = self;
        let mut pending = Vec::new();
        let mut log_error = None;
        let result = client
            .generate_other_views(&front, |view, image| {
                for effect in state.apply(Action::ViewReady {
                    front: front.clone(),
                    view,
                    image: image.clone(),
                }) {
                    match effect {
                        Effect::Record { event, payload } => {
                            if let Err(err) = record(events, observer, event, payload) {
                                if log_error.is_none() {
                                    log_error = Some(err);
                                }
                            }
                        }
                        other => pending.push(other),
                    }
                }
            })
            .map(|_| ());
        pending.extend(state.apply(Action::ViewsFinished { front, result }));
        match log_error {
            Some(err) => Err(err),
            None => Ok(pending),
        }
    }

    /// Saves a generated model with the current time as its timestamp.
    pub fn save_model(&mut self, front: &DataUrl) -> Result<()> {
        self.dispatch(Action::SaveModel {
            front: front.clone(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    pub fn export_to(&mut self, path: &Path) -> Result<PathBuf> {
        let document = export_archive(self.state.library())?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        fs::write(path, document).with_context(|| format!("failed writing {}", path.display()))?;
        self.dispatch_record(
            SessionEvent::ArchiveExported,
            payload(json!({
                "path": path.to_string_lossy().to_string(),
                "saved_models": self.state.library().saved_models.len(),
            })),
        )?;
        Ok(path.to_path_buf())
    }

    /// Reads and validates an archive. The library is only replaced once
    /// `Action::ConfirmImport` is dispatched.
    pub fn load_import(&mut self, path: &Path) -> Result<()> {
        match fs::read_to_string(path) {
            Ok(raw) => self.dispatch(Action::ImportParsed(parse_archive(&raw))),
            Err(err) => self.dispatch(Action::Fail(format!(
                "import failed: cannot read {} ({err})",
                path.display()
            ))),
        }
    }

    /// `None` clears the inspiration image.
    pub fn set_inspiration_image(&mut self, path: Option<&Path>) -> Result<()> {
        let Some(path) = path else {
            return self.dispatch(Action::SetInspirationImage(None));
        };
        match read_image_as_data_url(path) {
            Ok(image) => self.dispatch(Action::SetInspirationImage(Some(image))),
            Err(err) => self.dispatch(Action::Fail(format!("{err:#}"))),
        }
    }

    /// Reads every file in parallel; the visualizer changes only when all of
    /// them were read.
    pub fn upload_images(&mut self, paths: &[PathBuf]) -> Result<()> {
        let results: Vec<Result<DataUrl>> = thread::scope(|scope| {
            let handles: Vec<_> = paths
                .iter()
                .map(|path| scope.spawn(move || read_image_as_data_url(path)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("image reader panicked")))
                })
                .collect()
        });
        match results.into_iter().collect::<Result<Vec<_>>>() {
            Ok(images) => self.dispatch(Action::Visualizer(VisualizerAction::UploadBatch(images))),
            Err(err) => self.dispatch(Action::Fail(format!("upload failed: {err:#}"))),
        }
    }

    pub fn download_model(&self, front: &DataUrl, dir: &Path) -> Result<Vec<PathBuf>> {
        let Some(model) = self.state.generated().get(front) else {
            bail!("no generated model for that front view");
        };
        download_views(dir, &model.idea, &model.images)
    }

    pub fn download_saved(&self, id: &str, dir: &Path) -> Result<Vec<PathBuf>> {
        let Some(saved) = self
            .state
            .library()
            .saved_models
            .iter()
            .find(|saved| saved.id == id)
        else {
            bail!("no saved model with that id");
        };
        download_views(dir, &saved.idea, &saved.images)
    }

    /// `position` is 0-based.
    pub fn download_upload(&self, position: usize, dir: &Path) -> Result<PathBuf> {
        let Some(image) = self
            .state
            .visualizer()
            .slots()
            .get(position)
            .and_then(|slot| slot.upload.as_ref())
        else {
            bail!("slot {} has no uploaded image", position + 1);
        };
        write_image(dir, &upload_file_name(position, image), image)
    }

    /// Writes every uploaded image, skipping empty slots.
    pub fn download_uploads(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (position, slot) in self.state.visualizer().slots().iter().enumerate() {
            let Some(image) = &slot.upload else {
                continue;
            };
            written.push(write_image(dir, &upload_file_name(position, image), image)?);
        }
        Ok(written)
    }

    fn dispatch_record(&mut self, event: SessionEvent, payload: EventPayload) -> Result<()> {
        record(&self.events, &mut self.observer, event, payload)
    }
}

fn record(
    events: &EventLog,
    observer: &mut Option<EventObserver>,
    event: SessionEvent,
    payload: EventPayload,
) -> Result<()> {
    if let Some(observer) = observer {
        observer(event, &payload);
    }
    events.emit(event, payload)?;
    Ok(())
}

fn render_slots(
    client: &GenerationClient,
    scene: &str,
    layer_lines: bool,
    jobs: &[RenderJob],
) -> Vec<(u64, Result<DataUrl, GenerationError>)> {
    thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter()
            .map(|job| {
                let handle = scope.spawn(move || {
                    client.generate_realistic_view(&job.image, scene, &job.label, layer_lines)
                });
                (job.slot, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(slot, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(GenerationError::Request("render worker panicked".to_string()))
                });
                (slot, result)
            })
            .collect()
    })
}
