use ideaforge_contracts::events::{payload, SessionEvent};
use ideaforge_contracts::views::DataUrl;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::client::ListingContent;
use crate::error::GenerationError;
use crate::prompts::ColorMode;
use crate::state::Effect;

/// One uploaded slicer image and its photorealistic render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizerSlot {
    pub id: u64,
    pub upload: Option<DataUrl>,
    pub render: Option<DataUrl>,
}

/// Identity of the uploaded image set plus the colour mode a scene
/// description was written for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneKey(String);

impl SceneKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What to render once a scene description arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScene {
    RenderPending,
    RenderSlot(u64),
    RenderAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub slot: u64,
    pub image: DataUrl,
    /// `angle <n>`, 1-based slot position.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualizerAction {
    AddSlot,
    RemoveSlot(u64),
    SetUpload { slot: u64, image: DataUrl },
    ClearUpload(u64),
    /// Empty slots are dropped; each image gets a new slot at the end.
    UploadBatch(Vec<DataUrl>),
    ClearSlots,
    SetColorMode(ColorMode),
    SetLayerLines(bool),
    /// Render slots that have an upload and no render yet.
    Generate,
    /// Re-render one slot with a freshly described scene.
    Rerender(u64),
    /// Drop every render and redo them all with a fresh scene.
    RegenerateAll,
    SceneDescribed {
        key: SceneKey,
        then: AfterScene,
        result: Result<String, GenerationError>,
    },
    SlotRendered {
        slot: u64,
        result: Result<DataUrl, GenerationError>,
    },
    GenerateListing,
    ListingGenerated(Result<ListingContent, GenerationError>),
}

#[derive(Debug, Clone)]
pub struct VisualizerState {
    slots: Vec<VisualizerSlot>,
    next_id: u64,
    pub color_mode: ColorMode,
    pub layer_lines: bool,
    scene: Option<(SceneKey, String)>,
    describing: bool,
    rendering: Vec<u64>,
    pub listing: Option<ListingContent>,
    pub listing_pending: bool,
}

impl Default for VisualizerState {
    fn default() -> Self {
        let mut state = Self {
            slots: Vec::new(),
            next_id: 1,
            color_mode: ColorMode::Single,
            layer_lines: true,
            scene: None,
            describing: false,
            rendering: Vec::new(),
            listing: None,
            listing_pending: false,
        };
        state.push_slot(None);
        state
    }
}

impl VisualizerState {
    pub fn slots(&self) -> &[VisualizerSlot] {
        &self.slots
    }

    pub fn slot_id_at(&self, position: usize) -> Option<u64> {
        self.slots.get(position).map(|slot| slot.id)
    }

    pub fn is_busy(&self) -> bool {
        self.describing || !self.rendering.is_empty()
    }

    pub fn uploads(&self) -> Vec<DataUrl> {
        self.slots
            .iter()
            .filter_map(|slot| slot.upload.clone())
            .collect()
    }

    /// `None` when nothing is uploaded.
    pub fn scene_key(&self) -> Option<SceneKey> {
        let mut hasher = Sha256::new();
        let mut any = false;
        for upload in self.slots.iter().filter_map(|slot| slot.upload.as_ref()) {
            hasher.update(upload.as_str().as_bytes());
            hasher.update([0u8]);
            any = true;
        }
        if !any {
            return None;
        }
        hasher.update(self.color_mode.as_str().as_bytes());
        Some(SceneKey(hex::encode(hasher.finalize())))
    }

    /// The cached scene description, if it still matches the uploads and
    /// colour mode.
    pub fn scene_description(&self) -> Option<&str> {
        let current = self.scene_key()?;
        match &self.scene {
            Some((key, description)) if *key == current => Some(description.as_str()),
            _ => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.upload.is_some() && slot.render.is_none())
            .count()
    }

    fn push_slot(&mut self, upload: Option<DataUrl>) {
        self.slots.push(VisualizerSlot {
            id: self.next_id,
            upload,
            render: None,
        });
        self.next_id += 1;
    }

    fn ensure_slot(&mut self) {
        if self.slots.is_empty() {
            self.push_slot(None);
        }
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut VisualizerSlot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    fn job_for(&self, position: usize, slot: &VisualizerSlot) -> Option<RenderJob> {
        Some(RenderJob {
            slot: slot.id,
            image: slot.upload.clone()?,
            label: format!("angle {}", position + 1),
        })
    }

    fn jobs(&self, then: AfterScene) -> Vec<RenderJob> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| match then {
                AfterScene::RenderPending => slot.render.is_none(),
                AfterScene::RenderSlot(id) => slot.id == id,
                AfterScene::RenderAll => true,
            })
            .filter_map(|(position, slot)| self.job_for(position, slot))
            .collect()
    }

    fn render_effect(&mut self, scene: String, jobs: Vec<RenderJob>) -> Vec<Effect> {
        if jobs.is_empty() {
            return Vec::new();
        }
        self.rendering = jobs.iter().map(|job| job.slot).collect();
        vec![Effect::RenderSlots {
            scene,
            layer_lines: self.layer_lines,
            jobs,
        }]
    }

    fn describe_effect(&mut self, then: AfterScene) -> Vec<Effect> {
        let Some(key) = self.scene_key() else {
            return Vec::new();
        };
        self.describing = true;
        vec![Effect::DescribeScene {
            key,
            images: self.uploads(),
            color_mode: self.color_mode,
            then,
        }]
    }

    /// Apply one visualizer action. Failures land in `error`.
    pub fn apply(&mut self, action: VisualizerAction, error: &mut Option<String>) -> Vec<Effect> {
        match action {
            VisualizerAction::AddSlot => {
                self.push_slot(None);
                Vec::new()
            }
            VisualizerAction::RemoveSlot(id) => {
                self.slots.retain(|slot| slot.id != id);
                self.rendering.retain(|slot| *slot != id);
                self.ensure_slot();
                Vec::new()
            }
            VisualizerAction::SetUpload { slot, image } => {
                if let Some(target) = self.slot_mut(slot) {
                    target.upload = Some(image);
                    target.render = None;
                }
                Vec::new()
            }
            VisualizerAction::ClearUpload(id) => {
                if let Some(target) = self.slot_mut(id) {
                    target.upload = None;
                    target.render = None;
                }
                Vec::new()
            }
            VisualizerAction::UploadBatch(images) => {
                if images.is_empty() {
                    return Vec::new();
                }
                self.slots.retain(|slot| slot.upload.is_some());
                for image in images {
                    self.push_slot(Some(image));
                }
                Vec::new()
            }
            VisualizerAction::ClearSlots => {
                self.slots.clear();
                self.rendering.clear();
                self.listing = None;
                self.ensure_slot();
                Vec::new()
            }
            VisualizerAction::SetColorMode(mode) => {
                self.color_mode = mode;
                Vec::new()
            }
            VisualizerAction::SetLayerLines(on) => {
                self.layer_lines = on;
                Vec::new()
            }
            VisualizerAction::Generate => {
                if self.is_busy() || self.pending_count() == 0 {
                    return Vec::new();
                }
                *error = None;
                match self.scene_description().map(str::to_string) {
                    Some(scene) => {
                        let jobs = self.jobs(AfterScene::RenderPending);
                        self.render_effect(scene, jobs)
                    }
                    None => self.describe_effect(AfterScene::RenderPending),
                }
            }
            VisualizerAction::Rerender(id) => {
                let has_upload = self
                    .slots
                    .iter()
                    .any(|slot| slot.id == id && slot.upload.is_some());
                if self.is_busy() || !has_upload {
                    return Vec::new();
                }
                *error = None;
                self.describe_effect(AfterScene::RenderSlot(id))
            }
            VisualizerAction::RegenerateAll => {
                if self.is_busy() || self.uploads().is_empty() {
                    return Vec::new();
                }
                *error = None;
                for slot in &mut self.slots {
                    if slot.upload.is_some() {
                        slot.render = None;
                    }
                }
                self.describe_effect(AfterScene::RenderAll)
            }
            VisualizerAction::SceneDescribed { key, then, result } => {
                self.describing = false;
                match result {
                    Ok(description) => {
                        self.scene = Some((key, description.clone()));
                        let mut effects = vec![Effect::record(
                            SessionEvent::SceneDescribed,
                            payload(json!({
                                "color_mode": self.color_mode.as_str(),
                                "images": self.uploads().len(),
                            })),
                        )];
                        let jobs = self.jobs(then);
                        effects.extend(self.render_effect(description, jobs));
                        effects
                    }
                    Err(err) => {
                        let message = format!("Failed to generate a scene description: {err}");
                        *error = Some(message.clone());
                        vec![Effect::error(message)]
                    }
                }
            }
            VisualizerAction::SlotRendered { slot, result } => {
                self.rendering.retain(|pending| *pending != slot);
                let position = self.slots.iter().position(|row| row.id == slot);
                match (result, position) {
                    (Ok(image), Some(position)) => {
                        let target = &mut self.slots[position];
                        if target.upload.is_none() {
                            return Vec::new();
                        }
                        target.render = Some(image);
                        vec![Effect::record(
                            SessionEvent::RealisticRendered,
                            payload(json!({ "label": format!("angle {}", position + 1) })),
                        )]
                    }
                    (Ok(_), None) => Vec::new(),
                    (Err(err), position) => {
                        let label = position
                            .map(|position| format!("angle {}", position + 1))
                            .unwrap_or_else(|| "removed".to_string());
                        let message =
                            format!("Failed to generate the realistic {label} view: {err}");
                        *error = Some(message.clone());
                        vec![Effect::error(message)]
                    }
                }
            }
            VisualizerAction::GenerateListing => {
                if self.listing_pending {
                    return Vec::new();
                }
                let images = self.uploads();
                if images.is_empty() {
                    let message =
                        "Upload at least one image to generate listing content.".to_string();
                    *error = Some(message.clone());
                    return vec![Effect::error(message)];
                }
                *error = None;
                self.listing_pending = true;
                vec![Effect::GenerateListing { images }]
            }
            VisualizerAction::ListingGenerated(result) => {
                self.listing_pending = false;
                match result {
                    Ok(listing) => {
                        let effect = Effect::record(
                            SessionEvent::ListingGenerated,
                            payload(json!({
                                "title": listing.title,
                                "tags": listing.tags,
                            })),
                        );
                        self.listing = Some(listing);
                        vec![effect]
                    }
                    Err(err) => {
                        let message = format!(
                            "Failed to generate title, description, and tags: {err}"
                        );
                        *error = Some(message.clone());
                        vec![Effect::error(message)]
                    }
                }
            }
        }
    }
}
