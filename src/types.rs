use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-title metadata as stored in the metadata file and served by `/api/metaInfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComicMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub episodes: BTreeMap<String, EpisodeMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub score: f32,
}

pub type MetaInfo = BTreeMap<String, ComicMeta>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsBody {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBody {
    pub score: f32,
}

/// Where a metadata write lands: the title itself or one of its episodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaScope {
    Title(String),
    Episode { title: String, episode: String },
}

impl MetaScope {
    pub fn new(title: &str, episode: Option<&str>) -> Self {
        match episode {
            Some(ep) => MetaScope::Episode { title: title.to_string(), episode: ep.to_string() },
            None => MetaScope::Title(title.to_string()),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            MetaScope::Title(t) => t,
            MetaScope::Episode { title, .. } => title,
        }
    }

    pub fn episode(&self) -> Option<&str> {
        match self {
            MetaScope::Title(_) => None,
            MetaScope::Episode { episode, .. } => Some(episode),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRead {
    #[serde(rename = "comicName")]
    pub title: String,
    pub episode: String,
}

/// Scores are 0-5 in half steps.
pub fn valid_score(score: f32) -> bool {
    score.is_finite() && (0.0..=5.0).contains(&score) && (score * 2.0).fract() == 0.0
}

/// Trims, drops empties and removes duplicates while keeping first occurrence order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

impl ComicMeta {
    pub fn tags_in(&self, episode: Option<&str>) -> Vec<String> {
        match episode {
            Some(ep) => self.episodes.get(ep).map(|e| e.tags.clone()).unwrap_or_default(),
            None => self.tags.clone(),
        }
    }

    pub fn score_in(&self, episode: Option<&str>) -> f32 {
        match episode {
            Some(ep) => self.episodes.get(ep).map(|e| e.score).unwrap_or(0.0),
            None => self.score,
        }
    }
}

pub fn set_tags(meta: &mut MetaInfo, scope: &MetaScope, tags: Vec<String>) {
    let entry = meta.entry(scope.title().to_string()).or_default();
    match scope.episode() {
        Some(ep) => entry.episodes.entry(ep.to_string()).or_default().tags = tags,
        None => entry.tags = tags,
    }
}

pub fn set_score(meta: &mut MetaInfo, scope: &MetaScope, score: f32) {
    let entry = meta.entry(scope.title().to_string()).or_default();
    match scope.episode() {
        Some(ep) => entry.episodes.entry(ep.to_string()).or_default().score = score,
        None => entry.score = score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_half_steps_in_range() {
        assert!(valid_score(0.0));
        assert!(valid_score(3.5));
        assert!(valid_score(5.0));
        assert!(!valid_score(5.5));
        assert!(!valid_score(-0.5));
        assert!(!valid_score(2.25));
        assert!(!valid_score(f32::NAN));
    }

    #[test]
    fn tags_keep_first_occurrence() {
        let tags = normalize_tags([" 热血 ", "搞笑", "", "热血", "  "]);
        assert_eq!(tags, vec!["热血".to_string(), "搞笑".to_string()]);
    }

    #[test]
    fn episode_scope_writes_nested_entry() {
        let mut meta = MetaInfo::new();
        let scope = MetaScope::new("海贼王", Some("第1话"));
        set_tags(&mut meta, &scope, vec!["神作".into()]);
        set_score(&mut meta, &scope, 4.5);
        let entry = &meta["海贼王"];
        assert!(entry.tags.is_empty());
        assert_eq!(entry.tags_in(Some("第1话")), vec!["神作".to_string()]);
        assert_eq!(entry.score_in(Some("第1话")), 4.5);
    }

    #[test]
    fn meta_without_episodes_omits_the_key() {
        let json = serde_json::to_value(ComicMeta::default()).unwrap();
        assert!(json.get("episodes").is_none());
        let parsed: ComicMeta = serde_json::from_str(r#"{"tags":["a"]}"#).unwrap();
        assert_eq!(parsed.score, 0.0);
        assert_eq!(parsed.cover, "");
    }
}
