use crate::views::DataUrl;

/// Keywords seeded into a fresh install.
pub const DEFAULT_INSPIRATION_KEYWORDS: &[&str] = &[
    "dragon",
    "skull",
    "geometric",
    "low poly",
    "mushroom",
    "spiral",
    "fantasy",
    "octopus",
    "castle",
    "astronaut",
    "crystal",
    "wave",
    "moon",
    "fox",
    "labyrinth",
    "origami",
];

/// Keywords biasing idea generation.
///
/// `keywords` and `excluded` never share an element: adding to one side
/// removes the keyword from the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspirationSettings {
    keywords: Vec<String>,
    excluded: Vec<String>,
    image: Option<DataUrl>,
}

impl Default for InspirationSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_INSPIRATION_KEYWORDS
                .iter()
                .map(|keyword| (*keyword).to_string()),
            Vec::<String>::new(),
            None,
        )
    }
}

impl InspirationSettings {
    /// Builds settings from raw lists. When a keyword appears in both lists the
    /// exclusion wins.
    pub fn new<I, E>(keywords: I, excluded: E, image: Option<DataUrl>) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let excluded = normalize_keywords(excluded);
        let keywords = normalize_keywords(keywords)
            .into_iter()
            .filter(|keyword| !excluded.contains(keyword))
            .collect();
        Self {
            keywords,
            excluded,
            image,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), Vec::<String>::new(), None)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn image(&self) -> Option<&DataUrl> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Option<DataUrl>) {
        self.image = image;
    }

    /// Returns the keywords that were newly added.
    pub fn add_keywords<I>(&mut self, keywords: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut added = Vec::new();
        for keyword in normalize_keywords(keywords) {
            self.excluded.retain(|existing| existing != &keyword);
            if !self.keywords.contains(&keyword) {
                self.keywords.push(keyword.clone());
                added.push(keyword);
            }
        }
        added
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let Some(keyword) = normalize_keyword(keyword) else {
            return false;
        };
        let before = self.keywords.len();
        self.keywords.retain(|existing| existing != &keyword);
        before != self.keywords.len()
    }

    pub fn add_excluded(&mut self, keyword: &str) -> bool {
        let Some(keyword) = normalize_keyword(keyword) else {
            return false;
        };
        self.keywords.retain(|existing| existing != &keyword);
        if self.excluded.contains(&keyword) {
            return false;
        }
        self.excluded.push(keyword);
        true
    }

    pub fn remove_excluded(&mut self, keyword: &str) -> bool {
        let Some(keyword) = normalize_keyword(keyword) else {
            return false;
        };
        let before = self.excluded.len();
        self.excluded.retain(|existing| existing != &keyword);
        before != self.excluded.len()
    }

    pub fn is_disjoint(&self) -> bool {
        self.keywords
            .iter()
            .all(|keyword| !self.excluded.contains(keyword))
    }
}

pub fn normalize_keyword(raw: &str) -> Option<String> {
    let keyword = raw.trim().to_lowercase();
    if keyword.is_empty() {
        None
    } else {
        Some(keyword)
    }
}

/// Trim + lowercase, drop empties, dedupe preserving first occurrence.
pub fn normalize_keywords<I>(raw: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in raw {
        if let Some(keyword) = normalize_keyword(item.as_ref()) {
            if !out.contains(&keyword) {
                out.push(keyword);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{normalize_keywords, InspirationSettings, DEFAULT_INSPIRATION_KEYWORDS};

    #[test]
    fn default_settings_use_builtin_keywords() {
        let settings = InspirationSettings::default();
        assert_eq!(settings.keywords().len(), DEFAULT_INSPIRATION_KEYWORDS.len());
        assert!(settings.excluded().is_empty());
        assert!(settings.image().is_none());
    }

    #[test]
    fn excluding_a_keyword_removes_it_from_inspiration() {
        let mut settings = InspirationSettings::new(["dragon", "moon"], Vec::<String>::new(), None);
        assert!(settings.add_excluded("Dragon"));
        assert_eq!(settings.keywords(), ["moon".to_string()]);
        assert_eq!(settings.excluded(), ["dragon".to_string()]);
        assert!(settings.is_disjoint());
    }

    #[test]
    fn adding_a_keyword_removes_it_from_exclusions() {
        let mut settings = InspirationSettings::new(["moon"], ["dragon"], None);
        let added = settings.add_keywords(["dragon", "moon", "  "]);
        assert_eq!(added, vec!["dragon".to_string()]);
        assert!(settings.excluded().is_empty());
        assert!(settings.is_disjoint());
    }

    #[test]
    fn constructor_resolves_overlap_in_favor_of_exclusion() {
        let settings = InspirationSettings::new(["fox", "owl"], ["owl"], None);
        assert_eq!(settings.keywords(), ["fox".to_string()]);
        assert!(settings.is_disjoint());
    }

    #[test]
    fn disjointness_holds_over_mixed_operation_sequences() {
        let words = ["a", "b", "c", "d"];
        let mut settings = InspirationSettings::empty();
        for step in 0..64usize {
            let word = words[(step * 7 + step / 3) % words.len()];
            match step % 4 {
                0 => {
                    settings.add_keywords([word]);
                }
                1 => {
                    settings.add_excluded(word);
                }
                2 => {
                    settings.remove_keyword(word);
                }
                _ => {
                    settings.remove_excluded(word);
                }
            }
            assert!(settings.is_disjoint(), "overlap after step {step}");
        }
    }

    #[test]
    fn normalize_keywords_dedupes_and_lowercases() {
        assert_eq!(
            normalize_keywords([" Moon", "moon", "", "Fox "]),
            vec!["moon".to_string(), "fox".to_string()]
        );
    }
}
