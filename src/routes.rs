use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    artifact::FinalArtifact,
    events::ProgressBroadcaster,
    models::{Book, BookStatus, BookStatusView, GenerationRequest, ProgressEvent, ValidationError},
    pipeline::{GenerationPipeline, NoopObserver, PipelineError},
    store::{BookStore, StoreError},
    workflow::{GenerationWorkflow, WorkflowError, MSG_COMPLETED, MSG_FAILED},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookStore>,
    pub events: Arc<ProgressBroadcaster>,
    pub pipeline: Arc<GenerationPipeline>,
    pub workflow: Arc<GenerationWorkflow>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("book {0} not found")]
    NotFound(Uuid),
    #[error("book {id} is {status}, only pending books can be generated")]
    Conflict { id: Uuid, status: BookStatus },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Generation error: {0}")]
    Generation(PipelineError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidRequest(invalid) => ApiError::Validation(invalid),
            other => ApiError::Generation(other),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::JobNotFound(id) => ApiError::NotFound(id),
            WorkflowError::Persistence(StoreError::InvalidTransition { id, from, .. }) => {
                ApiError::Conflict { id, status: from }
            }
            WorkflowError::Persistence(other) => ApiError::Store(other),
            WorkflowError::Generation(e) => e.into(),
            WorkflowError::Panicked(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Generation(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        match &self {
            ApiError::Generation(e) => error!(stage = ?e.stage(), "❌ {}", self),
            ApiError::Store(_) | ApiError::Internal(_) => error!("❌ {}", self),
            _ => {}
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Book Forge API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "features": [
            "Multi-Model Pipeline",
            "Quality Analysis",
            "Content Refinement",
            "Live Progress Events"
        ]
    }))
}

pub async fn create_book(
    State(state): State<AppState>,
    Json(body): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    body.validate()?;
    let book = state.store.create(Book::new(body)).await?;
    info!("📘 Created book {} '{}'", book.id, book.request.title);
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_book(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Book>, ApiError> {
    find(&state, id).await.map(Json)
}

pub async fn get_book_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<BookStatusView>, ApiError> {
    let book = find(&state, id).await?;
    Ok(Json(BookStatusView::from(&book)))
}

/// Claims the book (PENDING -> GENERATING) before answering 202, then runs
/// the pipeline in the background; progress arrives on `/events/:id`.
pub async fn generate_book(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BookStatusView>), ApiError> {
    let book = state.workflow.start(id).await?;
    let view = BookStatusView::from(&book);

    let workflow = state.workflow.clone();
    tokio::spawn(async move {
        if let Err(e) = workflow.run(book).await {
            warn!("Background generation of {} ended with: {}", id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(view)))
}

/// Runs the pipeline inline without creating a book record.
pub async fn generate_content(
    State(state): State<AppState>,
    Json(body): Json<GenerationRequest>,
) -> Result<Json<FinalArtifact>, ApiError> {
    info!("🚀 Direct generation request for '{}'", body.title);
    let artifact = state.pipeline.run(&body, &NoopObserver).await?;
    Ok(Json(artifact))
}

/// Server-sent events for one job, closed after its terminal status. A job
/// that already finished gets a single event with that status.
pub async fn stream_events(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // subscribe before reading the status so no transition slips in between
    let rx = state.events.subscribe();
    let book = find(&state, id).await?;
    let replay = match book.status {
        BookStatus::Completed => Some(ProgressEvent::new(id, book.status, MSG_COMPLETED)),
        BookStatus::Failed => Some(ProgressEvent::new(id, book.status, MSG_FAILED)),
        BookStatus::Pending | BookStatus::Generating => None,
    };

    let stream = futures::stream::unfold((rx, replay, false), move |(mut rx, replay, finished)| async move {
        if finished {
            return None;
        }
        if let Some(event) = replay {
            return Some((Ok(to_sse(&event)), (rx, None, true)));
        }
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id == id => {
                    let terminal = event.status.is_terminal();
                    return Some((Ok(to_sse(&event)), (rx, None, terminal)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Event stream for {} lagged, {} events skipped", id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data(event.progress.clone()))
}

async fn find(state: &AppState, id: Uuid) -> Result<Book, ApiError> {
    state.store.get(id).await?.ok_or(ApiError::NotFound(id))
}
