use std::time::Duration;

use ideaforge_contracts::views::DataUrl;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::backend::{
    ContentRequest, ContentResponse, GenerationBackend, ImagesRequest, Part, ResponseFormat,
};
use crate::error::GenerationError;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` plus Imagen `predict`, over blocking HTTP.
pub struct GeminiBackend {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(api_base: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_GEMINI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key,
            timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{method}", self.api_base, model_path)
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GenerationError::MissingApiKey)
    }

    fn post(&self, endpoint: &str, payload: &Value) -> Result<Value, GenerationError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| GenerationError::Request(format!("Gemini request failed: {err}")))?;
        response_json_or_error(response)
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_content(
        &self,
        request: &ContentRequest,
    ) -> Result<ContentResponse, GenerationError> {
        let endpoint = self.endpoint(&request.model, "generateContent");
        let payload = content_payload(request);
        let response = self.post(&endpoint, &payload)?;
        parse_content_response(&response)
    }

    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<DataUrl>, GenerationError> {
        let endpoint = self.endpoint(&request.model, "predict");
        let payload = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": request.count.max(1),
                "aspectRatio": request.aspect_ratio,
                "outputOptions": { "mimeType": request.mime_type },
            },
        });
        let response = self.post(&endpoint, &payload)?;
        parse_predictions(&response, &request.mime_type)
    }
}

fn content_payload(request: &ContentRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": image.base64_payload(),
                }
            }),
        })
        .collect();

    let mut generation_config = Map::new();
    match &request.format {
        ResponseFormat::Text => {}
        ResponseFormat::Json(schema) => {
            generation_config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            generation_config.insert("responseSchema".to_string(), schema.clone());
        }
        ResponseFormat::Image => {
            generation_config.insert("responseModalities".to_string(), json!(["IMAGE", "TEXT"]));
        }
    }

    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": parts }]),
    );
    if !generation_config.is_empty() {
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }
    Value::Object(payload)
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| GenerationError::Request(format!("Gemini response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(classify_failure(status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|err| GenerationError::invalid_response(format!("body is not JSON: {err}")))
}

/// 503 or a body whose `error.status` is `UNAVAILABLE` marks a transient
/// overload; every other failure is final.
pub(crate) fn classify_failure(code: u16, body: &str) -> GenerationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|value| value.get("error"));
    let status = error
        .and_then(|row| row.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = error
        .and_then(|row| row.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), 512));
    let detail = format!("{code} {message}");
    if code == 503 || status == "UNAVAILABLE" {
        GenerationError::Overloaded(detail)
    } else {
        GenerationError::Request(detail)
    }
}

pub(crate) fn parse_content_response(payload: &Value) -> Result<ContentResponse, GenerationError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if candidates.is_empty() {
        let reason = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates returned");
        return Err(GenerationError::invalid_response(reason.to_string()));
    }

    let mut texts: Vec<String> = Vec::new();
    let mut images: Vec<DataUrl> = Vec::new();
    let parts = candidates[0]
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            texts.push(text.to_string());
            continue;
        }
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        images.push(
            DataUrl::from_base64(mime_type, data)
                .map_err(|err| GenerationError::invalid_response(err.to_string()))?,
        );
    }

    Ok(ContentResponse {
        text: if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        },
        images,
    })
}

pub(crate) fn parse_predictions(
    payload: &Value,
    default_mime: &str,
) -> Result<Vec<DataUrl>, GenerationError> {
    let predictions = payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for prediction in predictions {
        let Some(data) = prediction
            .get("bytesBase64Encoded")
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
        else {
            continue;
        };
        let mime_type = prediction
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or(default_mime);
        out.push(
            DataUrl::from_base64(mime_type, data)
                .map_err(|err| GenerationError::invalid_response(err.to_string()))?,
        );
    }
    Ok(out)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
