use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{ComicMeta, MetaInfo};

/// JSON file holding the per-title metadata, read and written wholesale.
///
/// Every update is a read-modify-write under one lock, and the new file is
/// swapped in with a rename so readers never see a half-written document.
pub struct MetaStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MetaStore { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty store; so is a corrupt one, which is logged.
    pub async fn load(&self) -> Result<MetaInfo> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MetaInfo::new()),
            Err(e) => return Err(e).with_context(|| format!("读取元数据失败: {}", self.path.display())),
        };
        if text.trim().is_empty() {
            return Ok(MetaInfo::new());
        }
        match serde_json::from_str(&text) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                warn!("metadata file {} is not valid JSON ({}), starting empty", self.path.display(), e);
                Ok(MetaInfo::new())
            }
        }
    }

    pub async fn update<F>(&self, apply: F) -> Result<MetaInfo>
    where
        F: FnOnce(&mut MetaInfo) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut meta = self.load().await?;
        apply(&mut meta);
        self.save(&meta).await?;
        Ok(meta)
    }

    /// Adds a default entry for every title that has none. Returns how many were added.
    pub async fn seed(&self, titles: &[String]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut meta = self.load().await?;
        let mut added = 0;
        for title in titles {
            if !meta.contains_key(title) {
                meta.insert(title.clone(), ComicMeta::default());
                added += 1;
            }
        }
        if added > 0 || !self.path.exists() {
            self.save(&meta).await?;
        }
        Ok(added)
    }

    async fn save(&self, meta: &MetaInfo) -> Result<()> {
        let body = serde_json::to_vec_pretty(meta).context("序列化元数据失败")?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .context("元数据写入任务异常退出")??;
        debug!("metadata saved to {}", self.path.display());
        Ok(())
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("创建目录失败: {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).context("创建临时文件失败")?;
    tmp.write_all(body).context("写入临时文件失败")?;
    tmp.persist(path).with_context(|| format!("保存元数据失败: {}", path.display()))?;
    Ok(())
}
