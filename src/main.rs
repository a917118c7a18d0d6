use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod client;
mod console;
mod reader;
mod server;
mod types;
mod util;

use client::ComicClient;
use reader::{session, tags, SettingsFile};
use types::MetaScope;

#[derive(Parser, Debug)]
#[command(name = "manhua", version, about = "漫画阅读器：本地漫画服务与终端阅读", long_about = None)]
struct Cli {
    /// 统一输出为 JSON
    #[arg(long, global = true)]
    json: bool,

    /// 输出调试日志
    #[arg(long, global = true)]
    debug: bool,

    /// 漫画服务地址
    #[arg(long, global = true, env = "MANHUA_BASE", default_value = client::DEFAULT_BASE)]
    base: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ReadOpts {
    /// 图片保存目录
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// 每张图片占用的高度（像素）
    #[arg(long, default_value_t = console::DEFAULT_PAGE_HEIGHT)]
    page_height: u32,

    /// 可视区域高度（像素）
    #[arg(long, default_value_t = console::DEFAULT_CLIENT_HEIGHT)]
    client_height: u32,

    /// 打开时立即加载的图片数
    #[arg(long, default_value_t = reader::loader::DEFAULT_WARMUP)]
    warmup: usize,

    /// 提前加载的距离（像素）
    #[arg(long, default_value_t = reader::loader::DEFAULT_ROOT_MARGIN)]
    margin: u32,
}

impl ReadOpts {
    fn into_options(self) -> console::ConsoleOptions {
        let mut opts = console::ConsoleOptions {
            page_height: self.page_height,
            client_height: self.client_height,
            warmup: self.warmup,
            root_margin: self.margin,
            ..Default::default()
        };
        if let Some(out) = self.out {
            opts.out_dir = out;
        }
        opts
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动漫画服务
    Serve(server::ServeArgs),

    /// 按字母索引列出所有漫画
    #[command(visible_alias = "ls")]
    Comics,

    /// 列出漫画的所有分集
    Episodes { title: String },

    /// 列出某一集的所有图片
    Images { title: String, episode: String },

    /// 查看元数据（不指定漫画时输出全部）
    Meta { title: Option<String> },

    /// 设置标签（不带标签即清空）
    Tag {
        title: String,
        /// 只作用于某一集
        #[arg(short, long)]
        episode: Option<String>,
        tags: Vec<String>,
    },

    /// 评分（0-5，步长 0.5）
    Score {
        title: String,
        score: f32,
        #[arg(short, long)]
        episode: Option<String>,
    },

    /// 标签联想
    Suggest {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// 在终端中阅读（不指定漫画时先询问是否继续上次阅读，不指定分集时从第一集开始）
    Read {
        title: Option<String>,
        episode: Option<String>,
        #[command(flatten)]
        opts: ReadOpts,
    },

    /// 继续上次阅读
    Resume {
        #[command(flatten)]
        opts: ReadOpts,
    },

    /// 查看或修改阅读设置
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Speed { value: u32 },
    AutoNext {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    Autoplay {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    Brightness { percent: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_logging(cli.debug);
    let client = ComicClient::new(&cli.base);

    match cli.command {
        Commands::Serve(args) => server::serve(args).await,
        Commands::Comics => {
            let (groups, meta) = session::library(&client).await?;
            if cli.json {
                let labelled: Vec<(char, &Vec<String>)> = groups.iter().map(|(b, t)| (b.label(), t)).collect();
                util::print_output(&labelled, true);
            } else {
                util::print_groups(&groups, &meta);
            }
            Ok(())
        }
        Commands::Episodes { title } => {
            let episodes = client.episodes(&title).await?;
            if cli.json {
                util::print_output(&episodes, true);
            } else {
                util::print_list("分集", &episodes);
            }
            Ok(())
        }
        Commands::Images { title, episode } => {
            let images: Vec<String> = client
                .images(&title, &episode)
                .await?
                .iter()
                .map(|u| client.resolve(u))
                .collect();
            if cli.json {
                util::print_output(&images, true);
            } else {
                util::print_list("图片", &images);
            }
            Ok(())
        }
        Commands::Meta { title } => {
            let meta = client.meta_info().await?;
            match title {
                None => util::print_output(&meta, true),
                Some(title) => match meta.get(&title) {
                    Some(entry) if cli.json => util::print_output(entry, true),
                    Some(entry) => util::print_meta(&title, entry),
                    None => bail!("没有 {} 的元数据", title),
                },
            }
            Ok(())
        }
        Commands::Tag { title, episode, tags } => {
            let scope = MetaScope::new(&title, episode.as_deref());
            let tags = types::normalize_tags(tags);
            client.update_tags(&scope, &tags).await?;
            println!("{} {}", "已保存标签".green().bold(), tags.join(", "));
            Ok(())
        }
        Commands::Score { title, score, episode } => {
            if !types::valid_score(score) {
                bail!("评分必须在 0 到 5 之间，步长 0.5: {}", score);
            }
            let scope = MetaScope::new(&title, episode.as_deref());
            client.update_score(&scope, score).await?;
            println!("{} {}", "已保存评分".green().bold(), score);
            Ok(())
        }
        Commands::Suggest { query, limit } => {
            let meta = client.meta_info().await?;
            let found = tags::suggest(&meta, &query, limit);
            if cli.json {
                util::print_output(&found, true);
            } else {
                for tag in &found {
                    println!("{}  {}", tag, format!("{:?}", tags::category_of(tag)).dimmed());
                }
            }
            Ok(())
        }
        Commands::Read { title, episode, opts } => {
            let start = match title {
                Some(title) => console::Start::Episode { title, episode },
                None => console::Start::Library,
            };
            console::run(client, SettingsFile::locate(), start, opts.into_options()).await
        }
        Commands::Resume { opts } => {
            console::run(client, SettingsFile::locate(), console::Start::Resume, opts.into_options()).await
        }
        Commands::Config { action } => {
            let file = SettingsFile::locate();
            let mut settings = file.load();
            let changed = match action.unwrap_or(ConfigAction::Show) {
                ConfigAction::Show => false,
                ConfigAction::Speed { value } => {
                    settings.set_scroll_speed(value);
                    true
                }
                ConfigAction::AutoNext { on } => {
                    settings.auto_next = on;
                    true
                }
                ConfigAction::Autoplay { on } => {
                    settings.auto_play = on;
                    true
                }
                ConfigAction::Brightness { percent } => {
                    settings.set_brightness(percent);
                    true
                }
            };
            if changed {
                file.save(&settings)?;
            }
            if cli.json {
                util::print_output(&settings, true);
            } else {
                util::print_settings(&settings, file.path());
            }
            Ok(())
        }
    }
}
