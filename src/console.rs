use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::client::{self, ComicClient};
use crate::reader::prompt::{ConfirmHandle, TimedConfirm};
use crate::reader::loader::{DEFAULT_ROOT_MARGIN, DEFAULT_WARMUP};
use crate::reader::{ImageLoader, Notice, Reader, ReaderUi, SettingsFile, Surface, Ticket, Viewport};
use crate::types::MetaScope;
use crate::util;

pub const DEFAULT_PAGE_HEIGHT: u32 = 1200;
pub const DEFAULT_CLIENT_HEIGHT: u32 = 900;

type Lines = Arc<Mutex<mpsc::Receiver<String>>>;
type ConsoleReader = Reader<ComicClient, ConsoleUi, HeadlessPage>;

/// Stdin lines, shared between the command loop and pending confirmations.
fn stdin_lines() -> Lines {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

async fn next_line(lines: &Lines) -> Option<String> {
    lines.lock().await.recv().await
}

fn parse_answer(line: &str, default: bool) -> bool {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" | "是" | "好" => true,
        "n" | "no" | "否" | "不" => false,
        _ => default,
    }
}

pub struct ConsoleUi {
    lines: Lines,
    bar: ProgressBar,
    latest_notice: Arc<AtomicU64>,
}

impl ConsoleUi {
    fn new(lines: Lines, bar: ProgressBar) -> Self {
        ConsoleUi { lines, bar, latest_notice: Arc::new(AtomicU64::new(0)) }
    }
}

impl ReaderUi for ConsoleUi {
    fn notify(&mut self, notice: &Notice) {
        let text = notice.to_string();
        let line = match notice {
            Notice::FetchFailed(_) | Notice::SaveFailed(_) => text.red().bold(),
            _ => text.yellow(),
        };
        // shown above the bar until it expires or a newer notice replaces it
        let seq = self.latest_notice.fetch_add(1, Ordering::Relaxed) + 1;
        self.bar.set_prefix(line.to_string());
        let bar = self.bar.clone();
        let latest = self.latest_notice.clone();
        let ttl = notice.duration();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if latest.load(Ordering::Relaxed) == seq {
                bar.set_prefix("");
            }
        });
    }

    fn show_header(&mut self, title: &str, episode: &str) {
        self.bar.println(format!("{} {}", title.bold(), episode.cyan()));
    }

    fn show_episodes(&mut self, title: &str, episodes: &[String], current: Option<usize>) {
        self.bar.println(format!("{} {} {}", title.bold(), "共".bold(), episodes.len()));
        for (i, ep) in episodes.iter().enumerate() {
            let marker = if Some(i) == current { ">" } else { " " };
            self.bar.println(format!("{} {:>3}. {}", marker, i + 1, ep));
        }
    }

    fn ask(&mut self, question: &TimedConfirm, mut handle: ConfirmHandle) {
        self.bar.println(format!("{} {} [y/n]", question.title.bold(), question.countdown().yellow()));
        let default = question.default_answer();
        let lines = self.lines.clone();
        tokio::spawn(async move {
            let mut rx = lines.lock().await;
            let line = tokio::select! {
                line = rx.recv() => line,
                _ = handle.closed() => None,
            };
            if let Some(line) = line {
                handle.answer(parse_answer(&line, default));
            }
        });
    }
}

/// A vertical strip of equally tall pages, scrolled without a screen.
pub struct HeadlessPage {
    http: reqwest::Client,
    out_dir: PathBuf,
    page_height: u32,
    client_height: u32,
    top: u32,
    slots: usize,
    ready: usize,
    done: mpsc::UnboundedSender<(Ticket, bool)>,
    bar: ProgressBar,
}

impl HeadlessPage {
    fn new(
        http: reqwest::Client,
        out_dir: PathBuf,
        page_height: u32,
        client_height: u32,
        done: mpsc::UnboundedSender<(Ticket, bool)>,
        bar: ProgressBar,
    ) -> Self {
        HeadlessPage {
            http,
            out_dir,
            page_height: page_height.max(1),
            client_height,
            top: 0,
            slots: 0,
            ready: 0,
            done,
            bar,
        }
    }

    fn refresh(&self) {
        self.bar.set_length(self.max_scroll() as u64);
        self.bar.set_position(self.top as u64);
        self.bar.set_message(format!("{}/{}", self.ready, self.slots));
    }
}

impl Surface for HeadlessPage {
    fn clear(&mut self) {
        self.top = 0;
        self.slots = 0;
        self.ready = 0;
        self.refresh();
    }

    fn attach(&mut self, slot: usize, _src: &str) {
        self.slots = self.slots.max(slot + 1);
        self.refresh();
    }

    fn begin_load(&mut self, ticket: Ticket, src: &str) {
        let http = self.http.clone();
        let target = self.out_dir.join(local_name(src));
        let url = src.to_string();
        let done = self.done.clone();
        tokio::spawn(async move {
            let ok = match download(&http, &url, &target).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("{:#}", e);
                    false
                }
            };
            let _ = done.send((ticket, ok));
        });
    }

    fn mark_ready(&mut self, _slot: usize) {
        self.ready += 1;
        self.refresh();
    }

    fn mark_failed(&mut self, slot: usize) {
        self.bar.println(format!("{} #{}", "图片加载失败".red(), slot + 1));
    }

    fn bounds(&self, slot: usize) -> Option<(u32, u32)> {
        (slot < self.slots).then(|| (slot as u32 * self.page_height, self.page_height))
    }
}

impl Viewport for HeadlessPage {
    fn scroll_top(&self) -> u32 {
        self.top
    }

    fn set_scroll_top(&mut self, top: u32) {
        self.top = top.min(self.max_scroll());
        self.bar.set_position(self.top as u64);
    }

    fn scroll_height(&self) -> u32 {
        self.slots as u32 * self.page_height
    }

    fn client_height(&self) -> u32 {
        self.client_height
    }
}

async fn download(http: &reqwest::Client, url: &str, target: &Path) -> Result<()> {
    if tokio::fs::try_exists(target).await.unwrap_or(false) {
        debug!("cached {}", target.display());
        return Ok(());
    }
    let bytes = client::fetch_bytes(http, url).await?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("无法创建目录 {}", parent.display()))?;
    }
    tokio::fs::write(target, bytes)
        .await
        .with_context(|| format!("写入失败: {}", target.display()))?;
    Ok(())
}

/// `<title>/<episode>/<file>` taken from the last three URL path segments.
pub fn local_name(url: &str) -> PathBuf {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let start = segments.len().saturating_sub(3);
    segments[start..]
        .iter()
        .map(|s| {
            let decoded = urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string());
            match decoded.as_str() {
                "." | ".." => "_".to_string(),
                _ => decoded.replace(['/', '\\'], "_"),
            }
        })
        .collect()
}

/// Default cache directory for downloaded pages.
pub fn default_out_dir() -> PathBuf {
    let mut dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    dir.push("manhua");
    dir
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Next,
    Prev,
    Toggle,
    Faster,
    Slower,
    AutoNext,
    Autoplay,
    LoadAll,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Command> {
        match line.trim() {
            "n" | "next" => Some(Command::Next),
            "p" | "prev" => Some(Command::Prev),
            "" | "space" => Some(Command::Toggle),
            "+" => Some(Command::Faster),
            "-" => Some(Command::Slower),
            "x" => Some(Command::AutoNext),
            "auto" => Some(Command::Autoplay),
            "a" | "all" => Some(Command::LoadAll),
            "q" | "quit" => Some(Command::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "回车 播放/暂停  n 下一集  p 上一集  +/- 调速  x 自动下一集  auto 自动播放  a 全部加载  t <标签..> 打标签  r <分数> 评分  q 退出";

pub enum Start {
    Episode { title: String, episode: Option<String> },
    Resume,
    /// Offer the last-read position, else list the library.
    Library,
}

pub struct ConsoleOptions {
    pub out_dir: PathBuf,
    pub page_height: u32,
    pub client_height: u32,
    pub warmup: usize,
    pub root_margin: u32,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        ConsoleOptions {
            out_dir: default_out_dir(),
            page_height: DEFAULT_PAGE_HEIGHT,
            client_height: DEFAULT_CLIENT_HEIGHT,
            warmup: DEFAULT_WARMUP,
            root_margin: DEFAULT_ROOT_MARGIN,
        }
    }
}

/// Reads until the user quits, or until stdin closes and nothing is left to do.
pub async fn run(client: ComicClient, settings_file: SettingsFile, start: Start, opts: ConsoleOptions) -> Result<()> {
    let settings = settings_file.load();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix}\n{spinner:.green} [{wide_bar:.cyan/blue}] {percent:>3}% 已加载 {msg}")
            .context("进度条模板错误")?
            .progress_chars("#>-"),
    );

    let lines = stdin_lines();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let page = HeadlessPage::new(
        client.http().clone(),
        opts.out_dir.clone(),
        opts.page_height,
        opts.client_height,
        done_tx,
        bar.clone(),
    );
    let ui = ConsoleUi::new(lines.clone(), bar.clone());
    let loader = ImageLoader::new(client.base())
        .with_warmup(opts.warmup)
        .with_root_margin(opts.root_margin);
    let mut reader = Reader::new(client, ui, page, loader, settings).with_settings_file(settings_file);

    bar.println(HELP.dimmed().to_string());
    match start {
        Start::Episode { title, episode } => {
            if reader.load_episodes(&title).await {
                match episode {
                    Some(ep) => {
                        reader.open_episode(&ep).await;
                    }
                    None => {
                        reader.advance_episode(false).await;
                    }
                }
            }
        }
        Start::Resume => {
            reader.resume().await;
        }
        Start::Library => {
            if !reader.resume().await {
                let groups = reader.load_comics().await;
                bar.finish_and_clear();
                util::print_groups(&groups, reader.meta());
                return Ok(());
            }
        }
    }

    let mut clock = reader.scroll().frames();
    let mut stdin_open = true;
    loop {
        let scrolling = reader.scroll().is_scrolling();
        if !stdin_open && !scrolling && reader.loader().progress().loading == 0 {
            break;
        }
        tokio::select! {
            Some((ticket, ok)) = done_rx.recv() => {
                reader.finish_load(ticket, ok);
            }
            alive = clock.next_frame(), if scrolling => {
                if alive {
                    let tick = reader.frame().await;
                    if tick.stopped.is_some() && !tick.advance {
                        bar.println("已到达底部".dimmed().to_string());
                    }
                }
            }
            line = next_line(&lines), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                if !handle_line(&mut reader, &line).await {
                    break;
                }
            }
            else => break,
        }
    }

    bar.finish_and_clear();
    let progress = reader.loader().progress();
    println!(
        "{} {}  完成 {}  失败 {}  未加载 {}",
        "图片已保存到".green().bold(),
        opts.out_dir.display(),
        progress.ready,
        progress.failed,
        progress.pending + progress.loading
    );
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(reader: &mut ConsoleReader, line: &str) -> bool {
    if let Some(rest) = line.trim().strip_prefix("t ") {
        if let Some(scope) = current_scope(reader) {
            let tags = rest.split_whitespace().map(str::to_string).collect();
            reader.update_tags(scope, tags).await;
        }
        return true;
    }
    if let Some(rest) = line.trim().strip_prefix("r ") {
        match (current_scope(reader), rest.trim().parse::<f32>()) {
            (Some(scope), Ok(score)) => {
                reader.update_score(scope, score).await;
            }
            (_, Err(_)) => reader.ui_mut().notify(&Notice::SaveFailed(format!("无效评分 {}", rest.trim()))),
            _ => {}
        }
        return true;
    }
    match Command::parse(line) {
        Some(Command::Next) => {
            reader.advance_episode(false).await;
        }
        Some(Command::Prev) => {
            reader.retreat_episode().await;
        }
        Some(Command::Toggle) => {
            if !reader.stop_autoplay() {
                reader.start_autoplay();
            }
        }
        Some(cmd @ (Command::Faster | Command::Slower)) => {
            let speed = reader.settings().scroll_speed;
            let speed = if cmd == Command::Faster { speed + 1 } else { speed.saturating_sub(1) };
            reader.set_scroll_speed(speed);
            println!("滚动速度 {}", reader.scroll().speed());
        }
        Some(Command::AutoNext) => {
            let on = !reader.settings().auto_next;
            reader.set_auto_next(on);
            println!("自动下一集 {}", if on { "开" } else { "关" });
        }
        Some(Command::Autoplay) => {
            let on = !reader.settings().auto_play;
            reader.set_autoplay(on);
            println!("自动播放 {}", if on { "开" } else { "关" });
        }
        Some(Command::LoadAll) => {
            reader.load_all();
        }
        Some(Command::Quit) => return false,
        None => println!("{}", HELP.dimmed()),
    }
    true
}

fn current_scope(reader: &ConsoleReader) -> Option<MetaScope> {
    let session = reader.session();
    let title = session.title.as_deref()?;
    Some(MetaScope::new(title, session.current_episode()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn local_names_keep_title_and_episode() {
        assert_eq!(
            local_name("http://h:3000/static/manhua/Zoo/%E7%AC%AC1%E8%AF%9D/01.jpg"),
            PathBuf::from("Zoo").join("第1话").join("01.jpg")
        );
        assert_eq!(local_name("/a.jpg?v=2"), PathBuf::from("a.jpg"));
        assert_eq!(local_name("/static/%2E%2E/x/y.png"), PathBuf::from("_").join("x").join("y.png"));
    }

    #[test]
    fn answers_fall_back_to_the_default() {
        assert!(parse_answer("Y", false));
        assert!(!parse_answer("n", true));
        assert!(parse_answer("", true));
        assert!(!parse_answer("maybe", false));
    }

    #[tokio::test(start_paused = true)]
    async fn notices_expire() {
        let (_tx, rx) = mpsc::channel(1);
        let mut ui = ConsoleUi::new(Arc::new(Mutex::new(rx)), ProgressBar::hidden());
        ui.notify(&Notice::LastEpisode);
        assert!(ui.bar.prefix().contains("已经是最后一集了"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        ui.notify(&Notice::SaveFailed("500".into()));
        // the first notice's timer must not clear the newer one
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokio::task::yield_now().await;
        assert!(ui.bar.prefix().contains("保存失败"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(ui.bar.prefix(), "");
    }

    #[test]
    fn commands() {
        assert_eq!(Command::parse("x"), Some(Command::AutoNext));
        assert_eq!(Command::parse(""), Some(Command::Toggle));
        assert_eq!(Command::parse(" n "), Some(Command::Next));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("zz"), None);
    }

    #[tokio::test]
    async fn headless_page_clamps_and_reports_bounds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let mut page = HeadlessPage::new(
            reqwest::Client::new(),
            dir.path().to_path_buf(),
            1000,
            800,
            tx,
            ProgressBar::hidden(),
        );
        for slot in 0..3 {
            page.attach(slot, "x");
        }
        assert_eq!(page.scroll_height(), 3000);
        assert_eq!(page.bounds(2), Some((2000, 1000)));
        assert_eq!(page.bounds(3), None);
        page.set_scroll_top(9999);
        assert_eq!(page.scroll_top(), 2200);
        page.clear();
        assert_eq!(page.scroll_top(), 0);
        assert_eq!(page.bounds(0), None);
    }

    #[tokio::test]
    async fn downloads_are_reported_back() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let mut page = HeadlessPage::new(
            reqwest::Client::new(),
            dir.path().to_path_buf(),
            1000,
            800,
            tx,
            ProgressBar::hidden(),
        );
        let ticket = Ticket { generation: 1, slot: 0 };
        page.begin_load(ticket, "http://127.0.0.1:1/static/manhua/t/e/1.jpg");
        assert_eq!(rx.recv().await, Some((ticket, false)));
    }
}
