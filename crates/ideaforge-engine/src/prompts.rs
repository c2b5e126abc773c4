//! Prompt text for every generation stage. Everything here is pure: the same
//! inputs always produce the same prompt.

use ideaforge_contracts::views::{DataUrl, ModelView};
use serde_json::{json, Value};

/// Number of ideas requested per batch.
pub const IDEA_BATCH_SIZE: usize = 4;
/// Number of front-view variations requested per idea.
pub const VARIATION_COUNT: usize = 4;

const FORBIDDEN_FUNCTIONAL_ITEMS: &[&str] = &[
    "phone stands",
    "headphone holders",
    "pen pots",
    "bowls",
    "vases that can hold water",
    "boxes",
    "containers",
    "keychains",
    "hooks",
    "brackets",
    "any kind of tool or utility item",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Single,
    Multi,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorMode::Single => "single",
            ColorMode::Multi => "multi",
        }
    }
}

/// Inputs of one idea batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdeaRequest {
    /// Every idea already suggested in this session.
    pub existing_ideas: Vec<String>,
    pub keywords: Vec<String>,
    pub excluded: Vec<String>,
    /// When non-empty, all ideas must be built around these.
    pub focus: Vec<String>,
    pub image: Option<DataUrl>,
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub fn ideas_prompt(request: &IdeaRequest) -> String {
    let mut prompt = format!(
        "Generate a list of {IDEA_BATCH_SIZE} concise, creative ideas for 3D models.

**Primary Goal:** The ideas must be for objects that are PURELY decorative, artistic, and have NO practical function. They are sculptures or abstract art pieces.

**--- STRICT RULE: NO FUNCTIONAL ITEMS ---**
- **ABSOLUTELY NO** items designed to hold, store, organize, or support anything.
- **DO NOT** generate ideas for: {forbidden}.
- If inspiration keywords name functional items (e.g. 'organizer', 'holder'), you **MUST** reinterpret the keyword as a non-functional, abstract sculpture inspired by the concept.
- **Example Transformation:** for the keyword 'pen holder', do not create a holder for pens; suggest \"A sculpture of a cascade of melting pens\" instead.

**Printability:** The models must be suitable for FDM/FDD 3D printing (no floating or thin parts, minimal supports).

**Crucial Instructions:**
1. **Thematic Diversity:** The {IDEA_BATCH_SIZE} ideas must be thematically diverse, mixing categories such as characters, abstract art, nature and technology. Never return {IDEA_BATCH_SIZE} ideas from one category.
2. **Avoid Repetition:** Do not repeat any of these ideas already suggested in this session:
    {existing}
",
        forbidden = FORBIDDEN_FUNCTIONAL_ITEMS.join(", "),
        existing = json_list(&request.existing_ideas),
    );

    if !request.focus.is_empty() {
        prompt.push_str(&format!(
            "\n**--- FOCUSED INSPIRATION ---**\nAll {IDEA_BATCH_SIZE} ideas MUST be directly and heavily inspired by these keywords: {}. Keep thematic diversity *within* this focus.\n",
            json_list(&request.focus)
        ));
    }

    if !request.excluded.is_empty() {
        prompt.push_str(&format!(
            "\n**--- EXCLUDED THEMES ---**\nNone of the ideas may involve any of these keywords: {}.\n",
            json_list(&request.excluded)
        ));
    }

    let mut sources: Vec<String> = Vec::new();
    if request.image.is_some() {
        sources.push(
            "Primarily draw inspiration from the attached word cloud image of popular search terms."
                .to_string(),
        );
    }
    if !request.keywords.is_empty() {
        sources.push(format!(
            "Also consider these inspirational keywords: {}",
            json_list(&request.keywords)
        ));
    }
    if !sources.is_empty() {
        prompt.push_str(&format!(
            "\n**Inspiration Sources (General Context):**\n- {}\n",
            sources.join("\n- ")
        ));
    }

    prompt.push_str(&format!(
        "\nRespond with ONLY a JSON array of {IDEA_BATCH_SIZE} unique strings."
    ));
    prompt
}

/// Also stored with saved models as provenance.
pub fn front_view_prompt(idea: &str) -> String {
    format!(
        "**Subject:** A 3D model of a \"{idea}\".
**Purpose:** The model is a non-functional, decorative art piece.
**Style:** Photorealistic render, clay model style.
**Color:** Single, solid, matte grey color.
**Background:** Solid, pure white, seamless background.
**Composition:** Centered, front view of the object.
**Lighting:** Professional studio lighting.
**Constraints for 3D Printing:** The design must be simple enough for FDM/FDD 3D printing: no floating parts, no extremely thin or delicate structures, minimal support structures.
**Crucial instruction:** The image must ONLY contain the 3D model object described. Do NOT include any humans, people, animals, text, or other objects."
    )
}

pub fn other_view_prompt(view: ModelView) -> String {
    let instruction = match view {
        ModelView::Left => "Generate the model's left side view.".to_string(),
        ModelView::Right => "Generate the model's right side view.".to_string(),
        ModelView::Back => "Generate the model's back view.".to_string(),
        ModelView::Front => "Generate the model's front view.".to_string(),
    };
    format!(
        "This is the front view of a single-color, non-functional, decorative 3D model on a solid white background. {instruction} Keep exactly the same single-color, clay-render style and the solid white background. The model must stay suitable for FDM/FDD printing: no floating parts, no thin delicate parts, designed for minimal support. The output image must ONLY contain the 3D model object and nothing else."
    )
}

pub fn scene_prompt(color_mode: ColorMode) -> String {
    let color = match color_mode {
        ColorMode::Single => "The object must be a single, solid color.",
        ColorMode::Multi => {
            "The object can have multiple distinct colors, as if printed with a multi-material unit."
        }
    };
    format!(
        "Based on these views of a 3D model from a slicer, describe one cohesive, photorealistic, high-quality scene where this object, as a physical 3D-printed item, could be placed.

Describe in one concise paragraph:
- The object's material and finish (e.g. matte PLA plastic, glossy resin).
- Coloration: {color}
- The surface it rests on (e.g. rustic wooden desk, polished marble countertop).
- The background elements (e.g. a blurred bookshelf, a minimalist wall with a plant).
- The lighting (e.g. soft morning light from a window, dramatic studio lighting).

Example: \"A 3D-printed matte-black PLA dragon sculpture sits on a rustic wooden desk next to a small succulent, lit by soft morning light from a window on the left.\"

Respond with ONLY the descriptive paragraph."
    )
}

pub fn realistic_prompt(scene_description: &str, show_layer_lines: bool) -> String {
    let layer_lines = if show_layer_lines {
        "\n5. **Printing Detail:** The object shows very subtle, fine horizontal layer lines, characteristic of FDM 3D printing."
    } else {
        ""
    };
    format!(
        "**Scene:** {scene_description}
---
**Task:** Transform the provided slicer image of a 3D model into a photorealistic image.
**Instructions:**
1. **Re-render Object:** Re-create the object from the slicer image with its exact shape and perspective, as a real physical object made of the material described in the scene.
2. **Place in Scene:** Place the re-rendered object into the described scene.
3. **Realism:** Lighting, shadows and textures must match the scene description.
4. **Output:** The image must ONLY contain the object within the described scene. No text, UI elements or other artifacts.{layer_lines}"
    )
}

pub fn keywords_from_image_prompt() -> &'static str {
    "Analyze the provided word cloud image. Extract all visible words and return them as a single JSON array of lowercase strings. Exclude any numbers or symbols. Respond with only the JSON array."
}

pub fn keywords_from_ideas_prompt(ideas: &[String]) -> String {
    format!(
        "Extract the key themes from these 3D model ideas as short keywords (one or two words each): {}. Return a single JSON array of unique lowercase strings and nothing else.",
        json_list(ideas)
    )
}

pub fn listing_prompt() -> &'static str {
    "Based on this image of a 3D model, write a concise title, a short engaging description, and a list of tags for a 3D model sharing platform like MakerWorld.

**Instructions:**
1. **Title:** short, catchy and descriptive.
2. **Description:** 2-3 sentences. The first says what the model is and its style; the second suggests who it is for (e.g. \"Perfect for collectors or as a desk ornament.\"). Keep the tone enthusiastic.
3. **Tags:** 5-10 relevant lowercase tags, single words or short phrases (e.g. \"sculpture\", \"fantasy\", \"lowpoly\").

**Example Response Format:**
{
  \"title\": \"Stylized Coral Spire\",
  \"description\": \"A flowing coral spire with layered organic ridges. Perfect for reef lovers or as a calm desk ornament.\",
  \"tags\": [\"coral\", \"sculpture\", \"ocean\", \"organic\", \"decor\"]
}

Respond with ONLY a JSON object containing 'title', 'description', and 'tags' keys."
}

/// Schema for a structured JSON array of strings.
pub fn string_array_schema(item_description: &str) -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "STRING",
            "description": item_description,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{
        front_view_prompt, ideas_prompt, other_view_prompt, realistic_prompt, scene_prompt,
        ColorMode, IdeaRequest,
    };
    use ideaforge_contracts::views::ModelView;

    #[test]
    fn front_view_prompt_is_deterministic() {
        assert_eq!(front_view_prompt("a ghost lamp"), front_view_prompt("a ghost lamp"));
        assert!(front_view_prompt("a ghost lamp").contains("\"a ghost lamp\""));
    }

    #[test]
    fn ideas_prompt_lists_history_and_optional_sections() {
        let request = IdeaRequest {
            existing_ideas: vec!["a ghost lamp".to_string()],
            keywords: vec!["moon".to_string()],
            excluded: vec!["sword".to_string()],
            focus: vec!["tide".to_string()],
            image: None,
        };
        let prompt = ideas_prompt(&request);
        assert!(prompt.contains(r#"["a ghost lamp"]"#));
        assert!(prompt.contains("FOCUSED INSPIRATION"));
        assert!(prompt.contains(r#"["tide"]"#));
        assert!(prompt.contains(r#"["sword"]"#));
        assert!(prompt.contains(r#"["moon"]"#));
        assert!(!prompt.contains("word cloud"));
        assert!(prompt.ends_with("JSON array of 4 unique strings."));
    }

    #[test]
    fn ideas_prompt_omits_empty_sections() {
        let prompt = ideas_prompt(&IdeaRequest::default());
        assert!(!prompt.contains("FOCUSED INSPIRATION"));
        assert!(!prompt.contains("EXCLUDED THEMES"));
        assert!(!prompt.contains("Inspiration Sources"));
        assert!(prompt.contains("[]"));
    }

    #[test]
    fn other_view_prompt_names_the_view() {
        assert!(other_view_prompt(ModelView::Back).contains("back view"));
        assert!(other_view_prompt(ModelView::Left).contains("left side view"));
        assert!(other_view_prompt(ModelView::Right).contains("minimal support"));
    }

    #[test]
    fn scene_and_render_prompts_follow_flags() {
        assert!(scene_prompt(ColorMode::Single).contains("single, solid color"));
        assert!(scene_prompt(ColorMode::Multi).contains("multi-material"));
        assert!(realistic_prompt("a desk", true).contains("layer lines"));
        assert!(!realistic_prompt("a desk", false).contains("layer lines"));
        assert!(realistic_prompt("a desk", false).starts_with("**Scene:** a desk"));
    }
}
