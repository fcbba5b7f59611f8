//! Coursecraft Server
//!
//! HTTP API exposing the workflow entry points.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursecraft::{
    config::Config,
    course::QuizPayload,
    embedding::{Embedder, FastembedEmbedder},
    error::Error,
    fact::FactIndex,
    llm::{LlmClient, OpenAiChatClient},
    prefetch::{PrefetchCoordinator, SectionStatus},
    search::{SearchProvider, TavilyClient},
    storage::{CurriculumStore, LanceFactIndex},
    workflows::{AuthorWorkflow, Draft, QuizDraft, ResearchReport, ResearchWorkflow, TutorWorkflow},
};

/// Application state shared across handlers
struct AppState {
    store: Arc<CurriculumStore>,
    research: ResearchWorkflow,
    author: AuthorWorkflow,
    coordinator: Arc<PrefetchCoordinator>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::default();
    config.ensure_dirs()?;
    tracing::info!("Starting Coursecraft Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    // Initialize components
    let store = Arc::new(CurriculumStore::new(&config)?);
    let facts: Arc<dyn FactIndex> = Arc::new(LanceFactIndex::new(&config).await?);
    let embedder: Arc<dyn Embedder> = Arc::new(FastembedEmbedder::new(&config)?);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChatClient::new(&config)?);
    let search: Arc<dyn SearchProvider> = Arc::new(TavilyClient::new(&config)?);

    let research = ResearchWorkflow::new(
        config.clone(),
        store.clone(),
        search,
        llm.clone(),
        embedder.clone(),
        facts.clone(),
    );
    let author = AuthorWorkflow::new(config.clone(), llm.clone(), embedder, facts);
    let tutor = Arc::new(TutorWorkflow::new(config.clone(), llm));
    let coordinator = Arc::new(PrefetchCoordinator::new(store.clone(), tutor));

    let state = Arc::new(AppState {
        store,
        research,
        author,
        coordinator,
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health))
        // Admin: research and authoring
        .route("/admin/research", post(run_research))
        .route("/admin/sections/:id/draft", post(draft_section))
        .route("/admin/sections/:id/publish", post(publish_section))
        // Admin: research-domain allowlist
        .route(
            "/admin/research-domains",
            get(list_domains).post(add_domain),
        )
        .route("/admin/research-domains/:id", delete(remove_domain))
        // Student: enrollment and polled content
        .route(
            "/student/:user_id/courses/:course_id/enroll",
            post(enroll),
        )
        .route(
            "/student/:user_id/sections/:section_id/content",
            get(section_content),
        )
        // Add CORS
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Spawn a detached prefetch pass; the caller never waits on it
fn spawn_prefetch(coordinator: Arc<PrefetchCoordinator>, course_id: i64, user_id: i64) {
    tokio::spawn(async move {
        match coordinator.prefetch(course_id, user_id).await {
            Ok(outcomes) => {
                let failed = outcomes
                    .iter()
                    .filter(|o| matches!(o.status, SectionStatus::Failed(_)))
                    .count();
                tracing::info!(
                    course_id,
                    user_id,
                    sections = outcomes.len(),
                    failed,
                    "Background prefetch finished"
                );
            }
            Err(e) => {
                tracing::error!(course_id, user_id, error = %e, "Background prefetch aborted");
            }
        }
    });
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

// --- Admin handlers ---

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    topic: String,
}

async fn run_research(
    State(state): State<SharedState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchReport>, StatusCode> {
    let report = state
        .research
        .run(&req.topic)
        .await
        .map_err(|e| status_for(&e))?;
    Ok(Json(report))
}

async fn draft_section(
    State(state): State<SharedState>,
    Path(section_id): Path<i64>,
) -> Result<Json<Draft>, StatusCode> {
    let section = state
        .store
        .get_section(section_id)
        .map_err(|e| status_for(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    let draft = state
        .author
        .run(section.search_query())
        .await
        .map_err(|e| status_for(&e))?;
    Ok(Json(draft))
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    master_content: String,
    quiz_data: Vec<QuizDraft>,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    status: &'static str,
}

async fn publish_section(
    State(state): State<SharedState>,
    Path(section_id): Path<i64>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, StatusCode> {
    let quiz: Vec<QuizPayload> = req
        .quiz_data
        .into_iter()
        .map(|q| QuizPayload {
            question: q.question,
            correct_answer: q.correct_answer,
            options: q.options,
        })
        .collect();

    state
        .store
        .publish_section(section_id, &req.master_content, &quiz)
        .map_err(|e| status_for(&e))?;
    Ok(Json(PublishResponse { status: "saved" }))
}

#[derive(Debug, Deserialize)]
struct AddDomainRequest {
    domain: String,
    label: Option<String>,
}

async fn list_domains(
    State(state): State<SharedState>,
) -> Result<Json<Vec<coursecraft::AllowedDomain>>, StatusCode> {
    let domains = state.store.list_domains().map_err(|e| status_for(&e))?;
    Ok(Json(domains))
}

async fn add_domain(
    State(state): State<SharedState>,
    Json(req): Json<AddDomainRequest>,
) -> Result<(StatusCode, Json<coursecraft::AllowedDomain>), StatusCode> {
    let domain = state
        .store
        .add_domain(&req.domain, req.label.as_deref())
        .map_err(|e| status_for(&e))?;
    Ok((StatusCode::CREATED, Json(domain)))
}

async fn remove_domain(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.store.remove_domain(id).map_err(|e| status_for(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Student handlers ---

#[derive(Debug, Serialize)]
struct EnrollResponse {
    status: &'static str,
    message: &'static str,
}

async fn enroll(
    State(state): State<SharedState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> Json<EnrollResponse> {
    spawn_prefetch(state.coordinator.clone(), course_id, user_id);
    Json(EnrollResponse {
        status: "enrolled",
        message: "Content generation started.",
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ContentResponse {
    Ready {
        content: String,
        quiz: Option<coursecraft::course::PersonalizedQuiz>,
    },
    Processing {
        message: &'static str,
    },
}

/// Polling contract: "ready" once cached content exists, otherwise
/// "processing" with a fallback prefetch kicked off in the background
async fn section_content(
    State(state): State<SharedState>,
    Path((user_id, section_id)): Path<(i64, i64)>,
) -> Result<Json<ContentResponse>, StatusCode> {
    let record = state
        .store
        .get_record(user_id, section_id)
        .map_err(|e| status_for(&e))?;

    if let Some(record) = record {
        if record.has_content() {
            return Ok(Json(ContentResponse::Ready {
                content: record.personalized_content.unwrap_or_default(),
                quiz: record.personalized_quiz,
            }));
        }
    }

    // The user may have skipped enrollment or an earlier pass failed;
    // re-trigger generation for the whole course
    if let Some(section) = state
        .store
        .get_section(section_id)
        .map_err(|e| status_for(&e))?
    {
        spawn_prefetch(state.coordinator.clone(), section.course_id, user_id);
    }

    Ok(Json(ContentResponse::Processing {
        message: "Content is being generated, poll again shortly.",
    }))
}
