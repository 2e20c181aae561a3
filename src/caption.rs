//! Boundary to the caption parser that turns a free-text post caption into
//! structured metadata.

use serde::{Deserialize, Serialize};

/// Structured fields extracted from a post caption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionMetadata {
    pub title: String,
    pub release_date: String,
    pub country_of_origin: Vec<String>,
    pub flags_of_origin: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub cast: Vec<String>,
    pub languages: Vec<String>,
    pub flags_of_language: Vec<String>,
    pub subtitles: Vec<String>,
    #[serde(rename = "flags_of_subs")]
    pub flags_of_subtitles: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub synopsis: String,
    pub curiosities: String,
}

/// Caption parser trait.
///
/// Called once per post construction; must be a pure function of the caption text.
pub trait CaptionParser: Send + Sync {
    fn parse(&self, caption: &str) -> CaptionMetadata;
}

/// Fallback parser: the first non-empty line is the title and `#hashtags`
/// anywhere in the caption become tags. Everything else is left empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCaptionParser;

impl CaptionParser for PlainCaptionParser {
    fn parse(&self, caption: &str) -> CaptionMetadata {
        let title = caption
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();

        let tags = caption
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('#'))
            .map(|tag| tag.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        CaptionMetadata {
            title,
            tags,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_parser_title_and_tags() {
        let parsed = PlainCaptionParser.parse("\n  Metropolis  \n#Drama #SciFi, silent film");
        assert_eq!(parsed.title, "Metropolis");
        assert_eq!(parsed.tags, vec!["Drama", "SciFi"]);
        assert!(parsed.directors.is_empty());
    }

    #[test]
    fn test_plain_parser_empty_caption() {
        assert_eq!(PlainCaptionParser.parse(""), CaptionMetadata::default());
    }

    #[test]
    fn test_metadata_json_field_names() {
        let json = serde_json::to_value(CaptionMetadata::default()).unwrap();
        assert!(json.get("flags_of_subs").is_some());
        assert!(json.get("release_date").is_some());
    }
}
