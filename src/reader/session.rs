use anyhow::Result;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::category::{self, Bucket};
use super::loader::{ImageLoader, Rendered, Surface, Ticket};
use super::prompt::{timed_confirm, ConfirmHandle, TimedConfirm};
use super::scroll::{ScrollController, Tick, Viewport};
use super::settings::{Settings, SettingsFile};
use crate::client::ComicClient;
use crate::types::{self, LastRead, MetaInfo, MetaScope};

pub const NEXT_EPISODE_TIMEOUT: Duration = Duration::from_secs(3);
pub const RESUME_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(async_fn_in_trait)]
pub trait ComicApi {
    async fn comics(&self) -> Result<Vec<String>>;
    async fn episodes(&self, title: &str) -> Result<Vec<String>>;
    async fn images(&self, title: &str, episode: &str) -> Result<Vec<String>>;
    async fn meta_info(&self) -> Result<MetaInfo>;
    async fn update_tags(&self, scope: &MetaScope, tags: &[String]) -> Result<()>;
    async fn update_score(&self, scope: &MetaScope, score: f32) -> Result<()>;
}

impl ComicApi for ComicClient {
    async fn comics(&self) -> Result<Vec<String>> {
        ComicClient::comics(self).await
    }
    async fn episodes(&self, title: &str) -> Result<Vec<String>> {
        ComicClient::episodes(self, title).await
    }
    async fn images(&self, title: &str, episode: &str) -> Result<Vec<String>> {
        ComicClient::images(self, title, episode).await
    }
    async fn meta_info(&self) -> Result<MetaInfo> {
        ComicClient::meta_info(self).await
    }
    async fn update_tags(&self, scope: &MetaScope, tags: &[String]) -> Result<()> {
        ComicClient::update_tags(self, scope, tags).await
    }
    async fn update_score(&self, scope: &MetaScope, score: f32) -> Result<()> {
        ComicClient::update_score(self, scope, score).await
    }
}

/// All titles grouped by bucket, plus their metadata. A metadata failure only
/// costs the annotations.
pub async fn library<A: ComicApi>(api: &A) -> Result<(Vec<(Bucket, Vec<String>)>, MetaInfo)> {
    let titles = api.comics().await?;
    let meta = match api.meta_info().await {
        Ok(meta) => meta,
        Err(e) => {
            warn!("fetching metadata failed: {:#}", e);
            MetaInfo::new()
        }
    };
    Ok((category::group(titles), meta))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NoImages,
    EpisodeNotFound,
    FirstEpisode,
    LastEpisode,
    ResumeMissing(LastRead),
    FetchFailed(String),
    SaveFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NoImages => write!(f, "没有找到图片"),
            Notice::EpisodeNotFound => write!(f, "未找到该集"),
            Notice::FirstEpisode => write!(f, "已经是第一集了"),
            Notice::LastEpisode => write!(f, "已经是最后一集了"),
            Notice::ResumeMissing(last) => write!(f, "找不到上次阅读的 {} - {}", last.title, last.episode),
            Notice::FetchFailed(msg) => write!(f, "加载失败: {}", msg),
            Notice::SaveFailed(msg) => write!(f, "保存失败: {}", msg),
        }
    }
}

impl Notice {
    pub fn duration(&self) -> Duration {
        match self {
            Notice::FetchFailed(_) | Notice::SaveFailed(_) => Duration::from_secs(3),
            _ => Duration::from_secs(2),
        }
    }
}

pub trait ReaderUi {
    fn notify(&mut self, notice: &Notice);
    fn show_header(&mut self, title: &str, episode: &str);
    fn show_episodes(&mut self, title: &str, episodes: &[String], current: Option<usize>);
    /// Present a pending question. Answer through `handle`, or keep or drop it
    /// to let the deadline decide.
    fn ask(&mut self, question: &TimedConfirm, handle: ConfirmHandle);
}

/// Position in the library. Owned by [`Reader`] and changed only by it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub title: Option<String>,
    pub episodes: Vec<String>,
    pub index: Option<usize>,
}

impl Session {
    pub fn current_episode(&self) -> Option<&str> {
        self.index.and_then(|i| self.episodes.get(i)).map(String::as_str)
    }

    pub fn position_of(&self, episode: &str) -> Option<usize> {
        self.episodes.iter().position(|e| e == episode)
    }
}

pub struct Reader<A, U, P> {
    api: A,
    ui: U,
    page: P,
    session: Session,
    loader: ImageLoader,
    scroll: ScrollController,
    settings: Settings,
    settings_file: Option<SettingsFile>,
    meta: MetaInfo,
}

impl<A, U, P> Reader<A, U, P>
where
    A: ComicApi,
    U: ReaderUi,
    P: Surface + Viewport,
{
    pub fn new(api: A, ui: U, page: P, loader: ImageLoader, settings: Settings) -> Self {
        let scroll = ScrollController::new(settings.scroll_speed, settings.auto_next);
        Reader {
            api,
            ui,
            page,
            session: Session::default(),
            loader,
            scroll,
            settings,
            settings_file: None,
            meta: MetaInfo::new(),
        }
    }

    pub fn with_settings_file(mut self, file: SettingsFile) -> Self {
        self.settings_file = Some(file);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    pub fn scroll(&self) -> &ScrollController {
        &self.scroll
    }

    #[cfg(test)]
    pub fn page(&self) -> &P {
        &self.page
    }

    #[cfg(test)]
    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    fn persist_settings(&self) {
        if let Some(file) = &self.settings_file {
            if let Err(e) = file.save(&self.settings) {
                warn!("{:#}", e);
            }
        }
    }

    pub fn set_scroll_speed(&mut self, speed: u32) {
        self.settings.set_scroll_speed(speed);
        self.scroll.set_speed(self.settings.scroll_speed);
        self.persist_settings();
    }

    pub fn set_auto_next(&mut self, on: bool) {
        self.settings.auto_next = on;
        self.scroll.set_auto_next(on);
        self.persist_settings();
    }

    pub fn set_autoplay(&mut self, on: bool) {
        self.settings.auto_play = on;
        self.persist_settings();
    }

    pub async fn load_comics(&mut self) -> Vec<(Bucket, Vec<String>)> {
        match library(&self.api).await {
            Ok((groups, meta)) => {
                self.meta = meta;
                groups
            }
            Err(e) => {
                warn!("fetching comics failed: {:#}", e);
                self.ui.notify(&Notice::FetchFailed(format!("{:#}", e)));
                Vec::new()
            }
        }
    }

    pub async fn load_episodes(&mut self, title: &str) -> bool {
        match self.api.episodes(title).await {
            Ok(episodes) => {
                debug!("{} has {} episodes", title, episodes.len());
                let reading = if self.session.title.as_deref() == Some(title) {
                    self.session.current_episode().map(str::to_owned)
                } else {
                    None
                };
                self.session.title = Some(title.to_string());
                self.session.episodes = episodes;
                // the list may have been reordered since it was last fetched
                self.session.index = reading.and_then(|name| self.session.position_of(&name));
                self.ui.show_episodes(title, &self.session.episodes, self.session.index);
                true
            }
            Err(e) => {
                warn!("fetching episodes of {} failed: {:#}", title, e);
                self.ui.notify(&Notice::FetchFailed(format!("{:#}", e)));
                false
            }
        }
    }

    pub async fn load_images(&mut self, title: &str, episode: &str) -> bool {
        if episode.is_empty() {
            self.ui.notify(&Notice::EpisodeNotFound);
            return false;
        }
        self.scroll.stop();
        self.settings.last_read = Some(LastRead { title: title.to_string(), episode: episode.to_string() });
        self.persist_settings();

        let urls = match self.api.images(title, episode).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("fetching images of {} / {} failed: {:#}", title, episode, e);
                self.ui.notify(&Notice::FetchFailed(format!("{:#}", e)));
                return false;
            }
        };
        self.ui.show_header(title, episode);
        let Rendered { attached, requested } = self.loader.render(&urls, &mut self.page);
        info!("{} - {}: {} images, {} requested up front", title, episode, attached, requested);
        if attached == 0 {
            self.ui.notify(&Notice::NoImages);
            return true;
        }
        if self.settings.auto_play {
            self.scroll.start(&self.page);
        }
        true
    }

    async fn open_index(&mut self, index: usize) -> bool {
        let Some(title) = self.session.title.clone() else {
            self.ui.notify(&Notice::EpisodeNotFound);
            return false;
        };
        let episode = self.session.episodes.get(index).cloned().unwrap_or_default();
        let loaded = self.load_images(&title, &episode).await;
        if loaded {
            self.session.index = Some(index);
        }
        loaded
    }

    pub async fn open_episode(&mut self, episode: &str) -> bool {
        match self.session.position_of(episode) {
            Some(index) => self.open_index(index).await,
            None => {
                self.ui.notify(&Notice::EpisodeNotFound);
                false
            }
        }
    }

    async fn confirm(&mut self, title: &str, message: String, timeout: Duration, default: bool) -> bool {
        let (question, handle) = timed_confirm(title, message, timeout, default);
        self.ui.ask(&question, handle);
        question.wait().await
    }

    pub async fn advance_episode(&mut self, need_confirm: bool) -> bool {
        self.scroll.stop();
        let next = self.session.index.map_or(0, |i| i + 1);
        let Some(episode) = self.session.episodes.get(next).cloned() else {
            self.ui.notify(&Notice::LastEpisode);
            return false;
        };
        if need_confirm {
            let go = self
                .confirm("下一集", format!("即将进入 {}", episode), NEXT_EPISODE_TIMEOUT, true)
                .await;
            if !go {
                debug!("advance to {} declined", episode);
                return false;
            }
        }
        self.open_index(next).await
    }

    pub async fn retreat_episode(&mut self) -> bool {
        self.scroll.stop();
        match self.session.index {
            Some(i) if i > 0 => self.open_index(i - 1).await,
            _ => {
                self.ui.notify(&Notice::FirstEpisode);
                false
            }
        }
    }

    /// Offers the last-read position and reopens it when accepted. The episode
    /// is looked up by name in the fresh episode list.
    pub async fn resume(&mut self) -> bool {
        let Some(last) = self.settings.last_read.clone() else {
            return false;
        };
        let message = format!("{} - {}", last.title, last.episode);
        if !self.confirm("继续上次阅读？", message, RESUME_TIMEOUT, false).await {
            return false;
        }
        if !self.load_episodes(&last.title).await {
            return false;
        }
        match self.session.position_of(&last.episode) {
            Some(index) => self.open_index(index).await,
            None => {
                self.ui.notify(&Notice::ResumeMissing(last));
                false
            }
        }
    }

    pub fn start_autoplay(&mut self) {
        if !self.loader.is_empty() {
            self.scroll.start(&self.page);
        }
    }

    pub fn stop_autoplay(&mut self) -> bool {
        self.scroll.stop()
    }

    pub fn finish_load(&mut self, ticket: Ticket, ok: bool) -> bool {
        self.loader.finish(ticket, ok, &mut self.page)
    }

    pub fn load_all(&mut self) -> usize {
        self.loader.force_load_all(&mut self.page)
    }

    pub async fn frame(&mut self) -> Tick {
        let top = self.page.scroll_top();
        let height = self.page.client_height();
        self.loader.sweep(top, height, &mut self.page);
        let tick = self.scroll.tick(&mut self.page);
        if tick.force_load {
            self.loader.force_load_all(&mut self.page);
        }
        if tick.advance {
            self.advance_episode(true).await;
        }
        tick
    }

    pub async fn update_tags(&mut self, scope: MetaScope, tags: Vec<String>) -> bool {
        let tags = types::normalize_tags(tags);
        let previous = self.meta.get(scope.title()).cloned();
        types::set_tags(&mut self.meta, &scope, tags.clone());
        let result = self.api.update_tags(&scope, &tags).await;
        self.settle(scope, previous, result)
    }

    pub async fn update_score(&mut self, scope: MetaScope, score: f32) -> bool {
        if !types::valid_score(score) {
            self.ui.notify(&Notice::SaveFailed(format!("无效评分 {}", score)));
            return false;
        }
        let previous = self.meta.get(scope.title()).cloned();
        types::set_score(&mut self.meta, &scope, score);
        let result = self.api.update_score(&scope, score).await;
        self.settle(scope, previous, result)
    }

    /// Keeps an optimistic write, or restores the entry as it was when the server refused it.
    fn settle(&mut self, scope: MetaScope, previous: Option<types::ComicMeta>, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("saving metadata for {:?} failed: {:#}", scope, e);
                match previous {
                    Some(entry) => {
                        self.meta.insert(scope.title().to_string(), entry);
                    }
                    None => {
                        self.meta.remove(scope.title());
                    }
                }
                self.ui.notify(&Notice::SaveFailed(format!("{:#}", e)));
                false
            }
        }
    }
}
