use std::collections::HashMap;

use crate::types::MetaInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCategory {
    Story,
    Character,
    Art,
    Genre,
    Rating,
    Custom,
}

const PRESETS: [(TagCategory, &[&str]); 5] = [
    (TagCategory::Story, &["剧情", "故事", "设定", "世界观", "精彩", "烂尾", "高潮", "反转"]),
    (TagCategory::Character, &["角色", "主角", "配角", "帅", "美", "性格", "成长"]),
    (TagCategory::Art, &["画风", "精美", "作画", "原创", "分镜", "色彩"]),
    (TagCategory::Genre, &["动作", "冒险", "悬疑", "后宫", "纯爱", "日常", "搞笑", "校园", "恋爱", "科幻"]),
    (TagCategory::Rating, &["神作", "好看", "一般", "难看"]),
];

pub fn category_of(tag: &str) -> TagCategory {
    PRESETS
        .iter()
        .find(|(_, tags)| tags.contains(&tag))
        .map(|(cat, _)| *cat)
        .unwrap_or(TagCategory::Custom)
}

pub fn frequencies(meta: &MetaInfo) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for comic in meta.values() {
        let episode_tags = comic.episodes.values().flat_map(|e| e.tags.iter());
        for tag in comic.tags.iter().chain(episode_tags) {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().map(|(t, n)| (t.to_string(), n)).collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Known tags containing `query` (case-insensitive), most used first.
/// Preset tags are always candidates even if nobody used them yet.
pub fn suggest(meta: &MetaInfo, query: &str, limit: usize) -> Vec<String> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    let mut ranked = frequencies(meta);
    for (_, presets) in PRESETS.iter() {
        for tag in presets.iter() {
            if !ranked.iter().any(|(t, _)| t == tag) {
                ranked.push((tag.to_string(), 0));
            }
        }
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .filter(|(tag, _)| tag.to_lowercase().contains(&query))
        .map(|(tag, _)| tag)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{set_tags, MetaScope};

    fn sample() -> MetaInfo {
        let mut meta = MetaInfo::new();
        set_tags(&mut meta, &MetaScope::new("A", None), vec!["搞笑".into(), "Isekai".into()]);
        set_tags(&mut meta, &MetaScope::new("B", None), vec!["搞笑".into()]);
        set_tags(&mut meta, &MetaScope::new("B", Some("1")), vec!["搞笑".into(), "神作".into()]);
        meta
    }

    #[test]
    fn counts_title_and_episode_tags() {
        let freq = frequencies(&sample());
        assert_eq!(freq[0], ("搞笑".to_string(), 3));
        assert!(freq.contains(&("神作".to_string(), 1)));
    }

    #[test]
    fn suggestions_rank_by_use_then_presets() {
        let meta = sample();
        assert_eq!(suggest(&meta, "isek", 5), vec!["Isekai"]);
        assert_eq!(suggest(&meta, "搞", 5), vec!["搞笑"]);
        let story = suggest(&meta, "作", 10);
        assert_eq!(story[0], "神作");
        assert!(story.contains(&"作画".to_string()));
        assert!(suggest(&meta, "  ", 5).is_empty());
    }

    #[test]
    fn categories_fall_back_to_custom() {
        assert_eq!(category_of("悬疑"), TagCategory::Genre);
        assert_eq!(category_of("神作"), TagCategory::Rating);
        assert_eq!(category_of("Isekai"), TagCategory::Custom);
    }
}
