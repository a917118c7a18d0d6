use colored::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::reader::category::Bucket;
use crate::reader::Settings;
use crate::types::{ComicMeta, MetaInfo};

/// `RUST_LOG` wins; otherwise `--debug` picks the level.
pub fn init_logging(debug: bool) {
    let default = if debug { "manhua=debug,tower_http=debug" } else { "manhua=info,tower_http=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn print_output<T: Serialize + std::fmt::Debug>(value: &T, json: bool) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(_) => println!("{:?}", value),
        }
    } else {
        println!("{:?}", value);
    }
}

pub fn print_groups(groups: &[(Bucket, Vec<String>)], meta: &MetaInfo) {
    let total: usize = groups.iter().map(|(_, t)| t.len()).sum();
    println!("{} {}", "共".bold(), total);
    for (bucket, titles) in groups {
        println!("{}", format!("[{}]", bucket).cyan().bold());
        for title in titles {
            match meta.get(title) {
                Some(entry) if entry.score > 0.0 || !entry.tags.is_empty() => {
                    println!("  {}  {}", title, summary(entry, None).dimmed());
                }
                _ => println!("  {}", title),
            }
        }
    }
}

pub fn print_list(header: &str, items: &[String]) {
    println!("{} {}", "共".bold(), items.len());

    let index_header = "#";
    let index_width = std::cmp::max(index_header.len(), format!("{}", items.len()).len());
    println!("{:<iw$}  {}", index_header.bold(), header.bold(), iw = index_width);
    println!("{:<iw$}  {}", "-".repeat(index_width), "-".repeat(10), iw = index_width);
    for (idx, item) in items.iter().enumerate() {
        println!("{:<iw$}  {}", idx + 1, item, iw = index_width);
    }
}

fn summary(entry: &ComicMeta, episode: Option<&str>) -> String {
    let mut parts = Vec::new();
    let score = entry.score_in(episode);
    if score > 0.0 {
        parts.push(format!("★{}", score));
    }
    let tags = entry.tags_in(episode);
    if !tags.is_empty() {
        parts.push(tags.join(", "));
    }
    parts.join(" | ")
}

pub fn print_meta(title: &str, entry: &ComicMeta) {
    println!("名称： {}", title.bold());
    if !entry.cover.is_empty() {
        println!("封面： {}", entry.cover);
    }
    println!("评分： {}", entry.score);
    if !entry.tags.is_empty() {
        println!("标签： {}", entry.tags.join(", "));
    }
    if !entry.episodes.is_empty() {
        println!("分集：");
        for name in entry.episodes.keys() {
            println!("  {}  {}", name, summary(entry, Some(name.as_str())).dimmed());
        }
    }
}

pub fn print_settings(settings: &Settings, path: &std::path::Path) {
    let on_off = |b: bool| if b { "开".green() } else { "关".normal() };
    println!("配置文件： {}", path.display());
    println!("滚动速度： {}", settings.scroll_speed);
    println!("自动下一集： {}", on_off(settings.auto_next));
    println!("自动播放： {}", on_off(settings.auto_play));
    println!("亮度： {}%", settings.brightness);
    if let Some(last) = &settings.last_read {
        println!("上次阅读： {} - {}", last.title, last.episode);
    }
}
