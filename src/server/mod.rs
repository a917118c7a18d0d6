pub mod listing;
pub mod store;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Args;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::types::{self, ComicMeta, MetaInfo, MetaScope, ScoreBody, TagsBody};
use listing::STATIC_PREFIX;
use store::MetaStore;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// 漫画根目录（每个子目录是一部漫画）
    #[arg(long, default_value = "manhua", env = "MANHUA_ROOT")]
    pub root: PathBuf,

    /// 元数据文件
    #[arg(long, default_value = "comicMeta.json", env = "MANHUA_META")]
    pub meta: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, default_value_t = 3000, env = "PORT")]
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    root: Arc<PathBuf>,
    store: Arc<MetaStore>,
}

impl AppState {
    pub fn new(root: impl Into<PathBuf>, meta: impl Into<PathBuf>) -> Self {
        AppState { root: Arc::new(root.into()), store: Arc::new(MetaStore::new(meta)) }
    }
}

pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(err) => {
                let not_found = err
                    .chain()
                    .filter_map(|e| e.downcast_ref::<std::io::Error>())
                    .any(|e| e.kind() == std::io::ErrorKind::NotFound);
                if not_found {
                    (StatusCode::NOT_FOUND, format!("{:#}", err))
                } else {
                    warn!("request failed: {:#}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
                }
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn segment(name: &str) -> std::result::Result<(), ApiError> {
    listing::check_segment(name)
        .map(|_| ())
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/comics", get(comics_handler))
        .route("/api/comics/{title}", get(episodes_handler))
        .route("/api/comics/{title}/{episode}", get(images_handler))
        .route("/api/metaInfo", get(meta_info_handler))
        .route("/api/updateTags/{title}", post(update_tags_handler))
        .route("/api/updateTags/{title}/{episode}", post(update_episode_tags_handler))
        .route("/api/updateScores/{title}", post(update_score_handler))
        .route("/api/updateScores/{title}/{episode}", post(update_episode_score_handler))
        .nest_service(STATIC_PREFIX, ServeDir::new(state.root.as_path()))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(args: ServeArgs) -> Result<()> {
    let state = AppState::new(&args.root, &args.meta);

    let titles = listing::list_titles(&state.root)
        .await
        .with_context(|| format!("无法读取漫画目录 {}", args.root.display()))?;
    let added = state.store.seed(&titles).await?;
    info!(
        "📚 {} comics under {}, {} new entries in {}",
        titles.len(),
        args.root.display(),
        added,
        state.store.path().display()
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("无效的监听地址 {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;
    info!("🚀 listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// GET /api/comics
async fn comics_handler(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(listing::list_titles(&state.root).await?))
}

/// GET /api/comics/{title}
async fn episodes_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> ApiResult<Vec<String>> {
    segment(&title)?;
    Ok(Json(listing::list_episodes(&state.root, &title).await?))
}

/// GET /api/comics/{title}/{episode}
async fn images_handler(
    State(state): State<AppState>,
    Path((title, episode)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    segment(&title)?;
    segment(&episode)?;
    Ok(Json(listing::list_images(&state.root, &title, &episode).await?))
}

/// GET /api/metaInfo
async fn meta_info_handler(State(state): State<AppState>) -> ApiResult<MetaInfo> {
    Ok(Json(state.store.load().await?))
}

async fn write_tags(state: &AppState, scope: MetaScope, tags: Vec<String>) -> ApiResult<ComicMeta> {
    segment(scope.title())?;
    if let Some(ep) = scope.episode() {
        segment(ep)?;
    }
    let tags = types::normalize_tags(tags);
    let meta = state.store.update(|m| types::set_tags(m, &scope, tags)).await?;
    info!("tags updated for {:?}", scope);
    Ok(Json(meta.get(scope.title()).cloned().unwrap_or_default()))
}

async fn write_score(state: &AppState, scope: MetaScope, score: f32) -> ApiResult<ComicMeta> {
    segment(scope.title())?;
    if let Some(ep) = scope.episode() {
        segment(ep)?;
    }
    if !types::valid_score(score) {
        return Err(ApiError::BadRequest(format!("评分必须在 0-5 之间且以 0.5 为步长: {}", score)));
    }
    let meta = state.store.update(|m| types::set_score(m, &scope, score)).await?;
    info!("score {} saved for {:?}", score, scope);
    Ok(Json(meta.get(scope.title()).cloned().unwrap_or_default()))
}

/// POST /api/updateTags/{title}
async fn update_tags_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(body): Json<TagsBody>,
) -> ApiResult<ComicMeta> {
    write_tags(&state, MetaScope::Title(title), body.tags).await
}

/// POST /api/updateTags/{title}/{episode}
async fn update_episode_tags_handler(
    State(state): State<AppState>,
    Path((title, episode)): Path<(String, String)>,
    Json(body): Json<TagsBody>,
) -> ApiResult<ComicMeta> {
    write_tags(&state, MetaScope::Episode { title, episode }, body.tags).await
}

/// POST /api/updateScores/{title}
async fn update_score_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(body): Json<ScoreBody>,
) -> ApiResult<ComicMeta> {
    write_score(&state, MetaScope::Title(title), body.score).await
}

/// POST /api/updateScores/{title}/{episode}
async fn update_episode_score_handler(
    State(state): State<AppState>,
    Path((title, episode)): Path<(String, String)>,
    Json(body): Json<ScoreBody>,
) -> ApiResult<ComicMeta> {
    write_score(&state, MetaScope::Episode { title, episode }, body.score).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ComicClient;
    use std::fs;

    async fn spawn(root: &std::path::Path, meta: &std::path::Path) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(root, meta));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let ep = dir.path().join("lib").join("Zoo").join("第1话");
        fs::create_dir_all(&ep).unwrap();
        for name in ["3.jpg", "1.jpg", "10.jpg", "2.jpg"] {
            fs::write(ep.join(name), name.as_bytes()).unwrap();
        }
        fs::create_dir_all(dir.path().join("lib").join("Zoo").join("第2话")).unwrap();
        dir
    }

    #[tokio::test]
    async fn lists_titles_episodes_and_images() {
        let dir = library();
        let base = spawn(&dir.path().join("lib"), &dir.path().join("meta.json")).await;
        let client = ComicClient::new(&base);

        assert_eq!(client.comics().await.unwrap(), vec!["Zoo"]);
        assert_eq!(client.episodes("Zoo").await.unwrap(), vec!["第1话", "第2话"]);
        let images = client.images("Zoo", "第1话").await.unwrap();
        let names: Vec<&str> = images.iter().map(|p| p.rsplit('/').next().unwrap()).collect();
        assert_eq!(names, vec!["1.jpg", "2.jpg", "3.jpg", "10.jpg"]);

        let bytes = crate::client::fetch_bytes(client.http(), &client.resolve(&images[3])).await.unwrap();
        assert_eq!(bytes, b"10.jpg".to_vec());
    }

    #[tokio::test]
    async fn tags_round_trip_through_meta_info() {
        let dir = library();
        let base = spawn(&dir.path().join("lib"), &dir.path().join("meta.json")).await;
        let client = ComicClient::new(&base);

        let tags = vec!["热血".to_string(), "搞笑".to_string(), "日常".to_string()];
        client.update_tags(&MetaScope::new("Zoo", None), &tags).await.unwrap();
        client.update_score(&MetaScope::new("Zoo", Some("第1话")), 4.5).await.unwrap();

        let meta = client.meta_info().await.unwrap();
        assert_eq!(meta["Zoo"].tags, tags);
        assert_eq!(meta["Zoo"].score_in(Some("第1话")), 4.5);
    }

    #[tokio::test]
    async fn rejects_bad_scores_and_missing_titles() {
        let dir = library();
        let base = spawn(&dir.path().join("lib"), &dir.path().join("meta.json")).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{}/api/updateScores/Zoo", base))
            .json(&ScoreBody { score: 7.0 })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = http.get(format!("{}/api/comics/Nope", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = http.get(format!("{}/api/comics/a%5Cb", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
