use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// The four fixed camera angles, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelView {
    Front,
    Left,
    Right,
    Back,
}

impl ModelView {
    pub const ALL: [ModelView; 4] = [
        ModelView::Front,
        ModelView::Left,
        ModelView::Right,
        ModelView::Back,
    ];

    /// Views derived from the front image, in the order they must be requested.
    pub const DERIVED: [ModelView; 3] = [ModelView::Left, ModelView::Right, ModelView::Back];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelView::Front => "front",
            ModelView::Left => "left",
            ModelView::Right => "right",
            ModelView::Back => "back",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "front" => Some(ModelView::Front),
            "left" => Some(ModelView::Left),
            "right" => Some(ModelView::Right),
            "back" => Some(ModelView::Back),
            _ => None,
        }
    }
}

impl fmt::Display for ModelView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUrlError {
    #[error("invalid data URL: missing `data:` prefix")]
    MissingScheme,
    #[error("invalid data URL: missing `,` separator")]
    MissingPayload,
    #[error("invalid data URL: empty payload")]
    EmptyPayload,
    #[error("invalid data URL: only base64 payloads are supported")]
    NotBase64,
    #[error("invalid data URL: payload is not valid base64")]
    BadBase64,
}

/// A self-describing inline image: `data:<mime>;base64,<payload>`.
///
/// The full string doubles as the natural key of a generated model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataUrl(String);

impl DataUrl {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DataUrlError> {
        let raw = raw.into();
        let Some(rest) = raw.strip_prefix("data:") else {
            return Err(DataUrlError::MissingScheme);
        };
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(DataUrlError::MissingPayload);
        };
        if !header.ends_with(";base64") {
            return Err(DataUrlError::NotBase64);
        }
        if payload.trim().is_empty() {
            return Err(DataUrlError::EmptyPayload);
        }
        Ok(Self(raw))
    }

    pub fn from_base64(mime_type: &str, payload: &str) -> Result<Self, DataUrlError> {
        let mime = mime_type.trim();
        let mime = if mime.is_empty() { "image/png" } else { mime };
        Self::parse(format!("data:{mime};base64,{}", payload.trim()))
    }

    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        let mime = mime_type.trim();
        let mime = if mime.is_empty() { "image/png" } else { mime };
        Self(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// MIME type from the header; `image/jpeg` when the header carries none.
    pub fn mime_type(&self) -> &str {
        self.header()
            .trim_end_matches(";base64")
            .split(';')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("image/jpeg")
    }

    pub fn base64_payload(&self) -> &str {
        self.0
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn decode(&self) -> Result<Vec<u8>, DataUrlError> {
        BASE64
            .decode(self.base64_payload().trim().as_bytes())
            .map_err(|_| DataUrlError::BadBase64)
    }

    /// File extension for downloads, taken from the MIME subtype.
    pub fn extension(&self) -> &str {
        self.header()
            .split(';')
            .next()
            .and_then(|mime| mime.split_once('/'))
            .map(|(_, subtype)| subtype.trim())
            .filter(|subtype| !subtype.is_empty())
            .unwrap_or("png")
    }

    fn header(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .map(|(header, _)| header)
            .unwrap_or_default()
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DataUrl> for String {
    fn from(value: DataUrl) -> Self {
        value.0
    }
}

impl TryFrom<String> for DataUrl {
    type Error = DataUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// One optional image per view. Serialized as `{front, left, right, back}`
/// with `null` for views not generated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSet {
    #[serde(default)]
    pub front: Option<DataUrl>,
    #[serde(default)]
    pub left: Option<DataUrl>,
    #[serde(default)]
    pub right: Option<DataUrl>,
    #[serde(default)]
    pub back: Option<DataUrl>,
}

impl ViewSet {
    pub fn with_front(front: DataUrl) -> Self {
        Self {
            front: Some(front),
            ..Self::default()
        }
    }

    pub fn get(&self, view: ModelView) -> Option<&DataUrl> {
        match view {
            ModelView::Front => self.front.as_ref(),
            ModelView::Left => self.left.as_ref(),
            ModelView::Right => self.right.as_ref(),
            ModelView::Back => self.back.as_ref(),
        }
    }

    pub fn set(&mut self, view: ModelView, image: DataUrl) {
        let slot = match view {
            ModelView::Front => &mut self.front,
            ModelView::Left => &mut self.left,
            ModelView::Right => &mut self.right,
            ModelView::Back => &mut self.back,
        };
        *slot = Some(image);
    }

    pub fn is_complete(&self) -> bool {
        ModelView::ALL.iter().all(|view| self.get(*view).is_some())
    }

    /// Number of derived views (left/right/back) already present.
    pub fn derived_count(&self) -> usize {
        ModelView::DERIVED
            .iter()
            .filter(|view| self.get(**view).is_some())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelView, &DataUrl)> {
        ModelView::ALL
            .into_iter()
            .filter_map(|view| self.get(view).map(|image| (view, image)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DataUrl, DataUrlError, ModelView, ViewSet};

    #[test]
    fn data_url_parts_and_extension() -> anyhow::Result<()> {
        let url = DataUrl::parse("data:image/webp;base64,AAAA")?;
        assert_eq!(url.mime_type(), "image/webp");
        assert_eq!(url.base64_payload(), "AAAA");
        assert_eq!(url.extension(), "webp");
        assert_eq!(url.decode()?, vec![0, 0, 0]);
        Ok(())
    }

    #[test]
    fn data_url_without_mime_defaults() -> anyhow::Result<()> {
        let url = DataUrl::parse("data:;base64,AAAA")?;
        assert_eq!(url.mime_type(), "image/jpeg");
        assert_eq!(url.extension(), "png");
        Ok(())
    }

    #[test]
    fn data_url_rejects_malformed_input() {
        assert_eq!(
            DataUrl::parse("image/png;base64,AAAA"),
            Err(DataUrlError::MissingScheme)
        );
        assert_eq!(
            DataUrl::parse("data:image/png;base64"),
            Err(DataUrlError::MissingPayload)
        );
        assert_eq!(
            DataUrl::parse("data:image/png;base64,"),
            Err(DataUrlError::EmptyPayload)
        );
        assert_eq!(
            DataUrl::parse("data:text/plain,hello"),
            Err(DataUrlError::NotBase64)
        );
    }

    #[test]
    fn from_bytes_encodes_payload() -> anyhow::Result<()> {
        let url = DataUrl::from_bytes("image/png", b"png-bytes");
        assert!(url.as_str().starts_with("data:image/png;base64,"));
        assert_eq!(url.decode()?, b"png-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn view_set_serializes_null_views() -> anyhow::Result<()> {
        let front = DataUrl::parse("data:image/png;base64,AAAA")?;
        let views = ViewSet::with_front(front);
        let value = serde_json::to_value(&views)?;
        assert_eq!(
            value,
            json!({
                "front": "data:image/png;base64,AAAA",
                "left": null,
                "right": null,
                "back": null,
            })
        );
        assert!(!views.is_complete());
        assert_eq!(views.derived_count(), 0);
        Ok(())
    }

    #[test]
    fn view_set_set_and_iter_follow_view_order() -> anyhow::Result<()> {
        let mut views = ViewSet::default();
        views.set(ModelView::Back, DataUrl::parse("data:image/png;base64,BBBB")?);
        views.set(ModelView::Front, DataUrl::parse("data:image/png;base64,FFFF")?);
        let order: Vec<ModelView> = views.iter().map(|(view, _)| view).collect();
        assert_eq!(order, vec![ModelView::Front, ModelView::Back]);
        Ok(())
    }

    #[test]
    fn model_view_parse_is_case_insensitive() {
        assert_eq!(ModelView::parse(" LEFT "), Some(ModelView::Left));
        assert_eq!(ModelView::parse("top"), None);
    }
}
