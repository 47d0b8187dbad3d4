//! HTTP search service over the persisted indices.
//!
//! `POST /search` runs a fused query across every loaded source;
//! `GET /health` reports per-source load status. All index state is
//! loaded once at startup and shared immutably across requests.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use campusrag::document::ChunkMetadata;
use campusrag::embedder::EmbedderSettings;
use campusrag::retriever::{FusionPolicy, RetrievalHit};
use campusrag::service::{ServiceContext, SourceConfig, SourceStatus};

#[derive(Parser, Debug)]
#[command(name = "campusrag-server", about = "Search API over indexed course and rule corpora")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Directory of the courses index.
    #[arg(long)]
    courses_dir: Option<PathBuf>,

    /// Directory of the faculty-rules index.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Result count when the request omits `k`.
    #[arg(long, default_value_t = 5)]
    default_k: usize,

    /// Upper bound on `k`.
    #[arg(long, default_value_t = 50)]
    max_k: usize,

    /// Entries kept in the query result cache; 0 disables it.
    #[arg(long, default_value_t = 256)]
    cache_size: usize,

    /// OpenAI API key, for text-embedding-* spaces.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// Base URL for the OpenAI API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Base URL of the local embedding server.
    #[arg(long, env = "EMBED_SERVER_URL", default_value = "http://127.0.0.1:8081")]
    server_base_url: String,
}

struct AppState {
    context: Arc<ServiceContext>,
    cache: Option<Mutex<LruCache<String, Vec<RetrievalHit>>>>,
    default_k: usize,
    max_k: usize,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResult {
    #[serde(rename = "type")]
    source: String,
    score: f32,
    calibrated: f32,
    content: String,
    metadata: ChunkMetadata,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
    total_results: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sources: Vec<SourceStatus>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn cached(state: &AppState, key: &str) -> Option<Vec<RetrievalHit>> {
    let cache = state.cache.as_ref()?;
    let mut guard = cache.lock().ok()?;
    guard.get(key).cloned()
}

fn remember(state: &AppState, key: String, hits: &[RetrievalHit]) {
    if let Some(cache) = &state.cache {
        if let Ok(mut guard) = cache.lock() {
            guard.put(key, hits.to_vec());
        }
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "query must not be empty"));
    }
    let k = request.k.unwrap_or(state.default_k).clamp(1, state.max_k);

    let cache_key = format!("{k}:{query}");
    let hits = match cached(&state, &cache_key) {
        Some(hits) => hits,
        None => {
            let context = Arc::clone(&state.context);
            let search_query = query.clone();
            let hits = tokio::task::spawn_blocking(move || context.search(&search_query, k))
                .await
                .map_err(|err| {
                    error(StatusCode::INTERNAL_SERVER_ERROR, format!("search task failed: {err}"))
                })?
                .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
            remember(&state, cache_key, &hits);
            hits
        }
    };

    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| SearchResult {
            source: hit.source,
            score: hit.score,
            calibrated: hit.calibrated,
            content: hit.chunk.text,
            metadata: hit.chunk.metadata,
        })
        .collect();
    let total_results = results.len();
    Ok(Json(SearchResponse {
        query,
        results,
        total_results,
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.context.any_loaded() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        sources: state.context.statuses().to_vec(),
    })
}

fn source_configs(args: &Args) -> Result<Vec<SourceConfig>> {
    let mut configs = Vec::new();
    if let Some(dir) = &args.courses_dir {
        configs.push(SourceConfig {
            name: "courses".to_string(),
            dir: dir.clone(),
        });
    }
    if let Some(dir) = &args.rules_dir {
        configs.push(SourceConfig {
            name: "faculty-rules".to_string(),
            dir: dir.clone(),
        });
    }
    if configs.is_empty() {
        bail!("at least one of --courses-dir or --rules-dir is required");
    }
    Ok(configs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let configs = source_configs(&args)?;
    let settings = EmbedderSettings {
        openai_api_key: args.openai_api_key.clone(),
        openai_base_url: args.openai_base_url.clone(),
        server_base_url: args.server_base_url.clone(),
        ..EmbedderSettings::default()
    };
    // blocking HTTP clients must not be built on the runtime threads
    let context = tokio::task::spawn_blocking(move || {
        ServiceContext::load(&configs, &settings, FusionPolicy::default())
    })
    .await
    .context("startup task failed")??;
    for status in context.statuses() {
        if status.loaded {
            eprintln!("source {} loaded", status.name);
        } else {
            eprintln!(
                "source {} NOT loaded: {}",
                status.name,
                status.detail.as_deref().unwrap_or("unknown")
            );
        }
    }

    let cache = NonZeroUsize::new(args.cache_size).map(|size| Mutex::new(LruCache::new(size)));
    let state = Arc::new(AppState {
        context: Arc::new(context),
        cache,
        default_k: args.default_k.max(1),
        max_k: args.max_k.max(1),
    });

    let app = Router::new()
        .route("/search", post(search))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    eprintln!("listening on {}", args.listen);
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
