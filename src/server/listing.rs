use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use urlencoding::encode;

use crate::reader::category;

/// URL prefix under which the comic root is served as static files.
pub const STATIC_PREFIX: &str = "/static/manhua";

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "jfif"];

static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Sort key of an episode or image name: its first digit run, 0 when there is none.
pub fn order_key(name: &str) -> u64 {
    FIRST_NUMBER
        .find(name)
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn sort_numeric(names: &mut [String]) {
    names.sort_by(|a, b| order_key(a).cmp(&order_key(b)).then_with(|| a.cmp(b)));
}

/// Rejects anything that is not a single plain path segment.
pub fn check_segment(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." {
        bail!("非法名称: {:?}", name);
    }
    if name.contains(['/', '\\', '\0']) {
        bail!("非法名称: {:?}", name);
    }
    Ok(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    Image,
}

async fn read_names(dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("读取目录失败: {}", dir.display()))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        // follow symlinks so linked series still show up
        let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
            continue;
        };
        let keep = match kind {
            EntryKind::Dir => meta.is_dir(),
            EntryKind::Image => meta.is_file() && is_image(&name),
        };
        if keep {
            names.push(name);
        }
    }
    Ok(names)
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

pub async fn list_titles(root: &Path) -> Result<Vec<String>> {
    let mut titles = read_names(root, EntryKind::Dir).await?;
    category::sort_titles(&mut titles);
    Ok(titles)
}

pub async fn list_episodes(root: &Path, title: &str) -> Result<Vec<String>> {
    let dir = title_dir(root, title)?;
    let mut episodes = read_names(&dir, EntryKind::Dir).await?;
    sort_numeric(&mut episodes);
    Ok(episodes)
}

pub async fn list_images(root: &Path, title: &str, episode: &str) -> Result<Vec<String>> {
    let dir = title_dir(root, title)?.join(check_segment(episode)?);
    let mut files = read_names(&dir, EntryKind::Image).await?;
    sort_numeric(&mut files);
    Ok(files
        .iter()
        .map(|f| format!("{}/{}/{}/{}", STATIC_PREFIX, encode(title), encode(episode), encode(f)))
        .collect())
}

fn title_dir(root: &Path, title: &str) -> Result<PathBuf> {
    Ok(root.join(check_segment(title)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn numeric_sort_uses_first_digit_run() {
        let mut names: Vec<String> = ["3.jpg", "1.jpg", "10.jpg", "2.jpg"].iter().map(|s| s.to_string()).collect();
        sort_numeric(&mut names);
        assert_eq!(names, vec!["1.jpg", "2.jpg", "3.jpg", "10.jpg"]);
    }

    #[test]
    fn names_without_digits_sort_first() {
        let mut names: Vec<String> = ["第2话", "番外", "第10话", "序章"].iter().map(|s| s.to_string()).collect();
        sort_numeric(&mut names);
        assert_eq!(names, vec!["序章", "番外", "第2话", "第10话"]);
        assert_eq!(order_key("99999999999999999999999"), u64::MAX);
    }

    #[test]
    fn segments_cannot_escape_the_root() {
        assert!(check_segment("..").is_err());
        assert!(check_segment("").is_err());
        assert!(check_segment("a/b").is_err());
        assert!(check_segment("a\\b").is_err());
        assert!(check_segment("第1话").is_ok());
    }

    #[tokio::test]
    async fn lists_directories_and_images() {
        let root = tempfile::tempdir().unwrap();
        let ep = root.path().join("海贼王").join("第10话");
        fs::create_dir_all(&ep).unwrap();
        fs::create_dir_all(root.path().join("海贼王").join("第2话")).unwrap();
        fs::create_dir_all(root.path().join("Apple")).unwrap();
        fs::create_dir_all(root.path().join(".cache")).unwrap();
        touch(&root.path().join("notes.txt"));
        for name in ["10.jpg", "2.png", "1.JPG", "readme.txt", ".DS_Store"] {
            touch(&ep.join(name));
        }

        let titles = list_titles(root.path()).await.unwrap();
        assert_eq!(titles, vec!["Apple", "海贼王"]);

        let episodes = list_episodes(root.path(), "海贼王").await.unwrap();
        assert_eq!(episodes, vec!["第2话", "第10话"]);

        let images = list_images(root.path(), "海贼王", "第10话").await.unwrap();
        let prefix = format!("{}/{}/{}", STATIC_PREFIX, encode("海贼王"), encode("第10话"));
        assert_eq!(
            images,
            vec![
                format!("{prefix}/1.JPG"),
                format!("{prefix}/2.png"),
                format!("{prefix}/10.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_title_is_an_io_not_found() {
        let root = tempfile::tempdir().unwrap();
        let err = list_episodes(root.path(), "nope").await.unwrap_err();
        let io = err.chain().find_map(|e| e.downcast_ref::<std::io::Error>()).unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
