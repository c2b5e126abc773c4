use std::io::Cursor;

use ideaforge_contracts::views::DataUrl;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::backend::{
    ContentRequest, ContentResponse, GenerationBackend, ImagesRequest, ResponseFormat, Stage,
};
use crate::error::GenerationError;

const DRYRUN_IMAGE_SIZE: u32 = 64;

const SUBJECTS: &[&str] = &[
    "spiral", "nautilus", "comet", "lantern moth", "coral spire", "mobius knot", "glacier",
    "owl totem", "sunflower", "tessellated orb", "jellyfish", "clockwork fern",
];
const STYLES: &[&str] = &[
    "faceted", "melting", "low poly", "twisted", "woven", "crystalline", "stacked", "hollow",
];

/// Offline backend: deterministic solid-colour images and canned text derived
/// from a hash of the request. No network access.
#[derive(Debug, Clone, Default)]
pub struct DryrunBackend;

impl DryrunBackend {
    pub fn new() -> Self {
        Self
    }
}

impl GenerationBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_content(
        &self,
        request: &ContentRequest,
    ) -> Result<ContentResponse, GenerationError> {
        let mut hasher = Sha256::new();
        hasher.update(request.model.as_bytes());
        hasher.update(request.prompt_text().as_bytes());
        for image in request.images() {
            hasher.update(image.as_str().as_bytes());
        }
        let digest: Vec<u8> = hasher.finalize().to_vec();

        match &request.format {
            ResponseFormat::Image => Ok(ContentResponse {
                text: None,
                images: vec![solid_png(&digest)?],
            }),
            ResponseFormat::Json(_) => Ok(ContentResponse {
                text: Some(dryrun_json(request.stage, &digest).to_string()),
                images: Vec::new(),
            }),
            ResponseFormat::Text => Ok(ContentResponse {
                text: Some(dryrun_text(request.stage, &digest)),
                images: Vec::new(),
            }),
        }
    }

    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<DataUrl>, GenerationError> {
        (0..request.count.max(1))
            .map(|idx| {
                let mut hasher = Sha256::new();
                hasher.update(request.prompt.as_bytes());
                hasher.update(idx.to_be_bytes());
                solid_png(&hasher.finalize())
            })
            .collect()
    }
}

fn solid_png(digest: &[u8]) -> Result<DataUrl, GenerationError> {
    let color = Rgb([digest[0], digest[1], digest[2]]);
    let mut image = RgbImage::new(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE);
    for pixel in image.pixels_mut() {
        *pixel = color;
    }
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|err| GenerationError::Request(format!("dryrun png encode failed: {err}")))?;
    Ok(DataUrl::from_bytes("image/png", bytes.get_ref()))
}

fn short_id(digest: &[u8], idx: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest);
    hasher.update(idx.to_be_bytes());
    hex::encode(&hasher.finalize()[..3])
}

fn dryrun_json(stage: Stage, digest: &[u8]) -> Value {
    let rows: Vec<Value> = (0..4)
        .map(|idx| {
            let style = STYLES[digest[idx * 2] as usize % STYLES.len()];
            let subject = SUBJECTS[digest[idx * 2 + 1] as usize % SUBJECTS.len()];
            let text = match stage {
                Stage::Keywords => subject.to_string(),
                _ => format!("{style} {subject} sculpture #{}", short_id(digest, idx)),
            };
            Value::String(text)
        })
        .collect();
    Value::Array(rows)
}

fn dryrun_text(stage: Stage, digest: &[u8]) -> String {
    let subject = SUBJECTS[digest[0] as usize % SUBJECTS.len()];
    match stage {
        Stage::Listing => {
            let listing = json!({
                "title": format!("Dryrun {subject}"),
                "description": format!(
                    "An offline placeholder listing for a {subject}. Perfect for testing the pipeline."
                ),
                "tags": ["dryrun", "sculpture", subject],
            });
            format!("```json\n{listing}\n```")
        }
        _ => format!(
            "A 3D-printed matte PLA {subject} rests on a pale oak desk under soft window light."
        ),
    }
}
