//! One book generation run: drives a [`Book`] through
//! PENDING -> GENERATING -> COMPLETED | FAILED around a pipeline run.
//!
//! Every persisted transition is committed to the store first and announced
//! on the progress channel second, so a subscriber never hears about a status
//! the store does not hold yet.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifact::FinalArtifact;
use crate::events::ProgressChannel;
use crate::models::{Book, BookStatus, ProgressEvent};
use crate::pipeline::{GenerationPipeline, PipelineError, Stage, StageObserver};
use crate::store::{BookStore, StoreError};

pub const MSG_STARTING: &str = "Starting generation...";
pub const MSG_STRUCTURE: &str = "Generating book structure...";
pub const MSG_CONTENT: &str = "Creating book content...";
pub const MSG_COMPLETED: &str = "Book generation completed!";
pub const MSG_FAILED: &str = "Generation failed. Please try again.";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("book {0} not found")]
    JobNotFound(Uuid),
    #[error("persistence failure: {0}")]
    Persistence(StoreError),
    #[error(transparent)]
    Generation(#[from] PipelineError),
    #[error("generation panicked: {0}")]
    Panicked(String),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WorkflowError::JobNotFound(id),
            other => WorkflowError::Persistence(other),
        }
    }
}

pub struct GenerationWorkflow {
    store: Arc<dyn BookStore>,
    events: Arc<dyn ProgressChannel>,
    pipeline: Arc<GenerationPipeline>,
}

struct StageProgress<'a> {
    job_id: Uuid,
    events: &'a dyn ProgressChannel,
}

impl StageObserver for StageProgress<'_> {
    fn stage_started(&self, stage: Stage) {
        let message = match stage {
            Stage::Structure => MSG_STRUCTURE,
            Stage::Content => MSG_CONTENT,
            _ => return,
        };
        self.events.publish(ProgressEvent::new(self.job_id, BookStatus::Generating, message));
    }
}

impl GenerationWorkflow {
    pub fn new(
        store: Arc<dyn BookStore>,
        events: Arc<dyn ProgressChannel>,
        pipeline: Arc<GenerationPipeline>,
    ) -> Self {
        Self { store, events, pipeline }
    }

    /// Runs the pipeline for a PENDING book. On any failure after the run has
    /// started the book ends FAILED and the original error is returned.
    pub async fn generate_book(&self, id: Uuid) -> Result<Book, WorkflowError> {
        let book = self.start(id).await?;
        self.run(book).await
    }

    /// Claims a PENDING book by moving it to GENERATING. Only one caller can
    /// win this for a given book; the rest get an `InvalidTransition`.
    pub async fn start(&self, id: Uuid) -> Result<Book, WorkflowError> {
        let book = self.commit(id, BookStatus::Generating, MSG_STARTING, None).await?;
        info!(job_id = %id, "📚 Started generation of '{}'", book.request.title);
        Ok(book)
    }

    /// Drives a book claimed by [`start`](Self::start) to COMPLETED or FAILED.
    /// A panic inside the pipeline still ends the book FAILED.
    pub async fn run(&self, book: Book) -> Result<Book, WorkflowError> {
        let id = book.id;
        let progress = StageProgress { job_id: id, events: self.events.as_ref() };
        let run = AssertUnwindSafe(self.pipeline.run(&book.request, &progress))
            .catch_unwind()
            .await;

        let outcome = match run {
            Ok(Ok(artifact)) => self
                .commit(id, BookStatus::Completed, MSG_COMPLETED, Some(artifact))
                .await,
            Ok(Err(err)) => Err(err.into()),
            Err(payload) => Err(WorkflowError::Panicked(panic_message(payload.as_ref()))),
        };

        match outcome {
            Ok(book) => {
                let chars = book.content.as_ref().map_or(0, |c| c.text().len());
                info!(job_id = %id, "✅ Book generation completed ({} chars)", chars);
                Ok(book)
            }
            Err(err) => {
                error!(job_id = %id, "❌ Book generation failed: {}", err);
                self.mark_failed(id).await;
                Err(err)
            }
        }
    }

    async fn commit(
        &self,
        id: Uuid,
        status: BookStatus,
        message: &str,
        content: Option<FinalArtifact>,
    ) -> Result<Book, WorkflowError> {
        let book = self.store.transition(id, status, content).await?;
        self.events.publish(ProgressEvent::new(id, status, message));
        Ok(book)
    }

    /// Best effort: a store that refuses the FAILED write is logged, never
    /// allowed to replace the error that got us here.
    async fn mark_failed(&self, id: Uuid) {
        if let Err(err) = self.commit(id, BookStatus::Failed, MSG_FAILED, None).await {
            warn!(job_id = %id, "⚠️ Could not record failure: {}", err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedProvider;
    use crate::completion::{CompletionError, CompletionOptions, CompletionProvider};
    use crate::config::GenerationSettings;
    use crate::events::testing::RecordingChannel;
    use crate::models::sample_request;
    use crate::pipeline::REFINE_INSTRUCTION;
    use crate::store::InMemoryBookStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Harness {
        store: Arc<InMemoryBookStore>,
        events: Arc<RecordingChannel>,
        narrative: Arc<ScriptedProvider>,
        workflow: GenerationWorkflow,
    }

    fn harness(structural: ScriptedProvider, narrative: ScriptedProvider) -> Harness {
        let store = Arc::new(InMemoryBookStore::new());
        let events = Arc::new(RecordingChannel::default());
        let narrative = Arc::new(narrative);
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(structural),
            narrative.clone(),
            GenerationSettings::default(),
        ));
        let workflow = GenerationWorkflow::new(store.clone(), events.clone(), pipeline);
        Harness { store, events, narrative, workflow }
    }

    async fn pending_book(store: &InMemoryBookStore) -> Uuid {
        store.create(Book::new(sample_request())).await.unwrap().id
    }

    fn timeline(events: &[ProgressEvent]) -> Vec<(BookStatus, String)> {
        events.iter().map(|e| (e.status, e.progress.clone())).collect()
    }

    #[tokio::test]
    async fn passing_judge_completes_without_refinement() {
        let h = harness(
            ScriptedProvider::new("gpt", ["enriched", "outline", "9", "9"]),
            ScriptedProvider::new("claude", ["the book"]),
        );
        let id = pending_book(&h.store).await;

        let book = h.workflow.generate_book(id).await.unwrap();

        assert_eq!(book.status, BookStatus::Completed);
        let content = book.content.unwrap();
        assert_eq!(content.metadata.quality_metrics.final_score, 9.0);
        assert_eq!(content.text(), "the book");
        assert_eq!(h.narrative.calls_with(REFINE_INSTRUCTION), 0);
        assert_eq!(
            timeline(&h.events.events()),
            vec![
                (BookStatus::Generating, MSG_STARTING.to_string()),
                (BookStatus::Generating, MSG_STRUCTURE.to_string()),
                (BookStatus::Generating, MSG_CONTENT.to_string()),
                (BookStatus::Completed, MSG_COMPLETED.to_string()),
            ]
        );
        assert!(h.events.events().iter().all(|e| e.job_id == id));
    }

    #[tokio::test]
    async fn low_score_refines_and_reports_second_judgement() {
        let h = harness(
            ScriptedProvider::new("gpt", ["enriched", "outline", "3", "8"]),
            ScriptedProvider::new("claude", ["rough book", "polished book"]),
        );
        let id = pending_book(&h.store).await;

        let book = h.workflow.generate_book(id).await.unwrap();

        assert_eq!(h.narrative.calls_with(REFINE_INSTRUCTION), 1);
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookStatus::Completed);
        let content = stored.content.unwrap();
        assert_eq!(content.metadata.quality_metrics.final_score, 8.0);
        assert_eq!(content.text(), "polished book");
        assert_eq!(book.content.map(|c| c.text().to_string()), Some("polished book".to_string()));
    }

    #[tokio::test]
    async fn narrative_failure_ends_failed_and_returns_error() {
        let h = harness(
            ScriptedProvider::new("gpt", ["enriched", "outline"]),
            ScriptedProvider::new("claude", Vec::<String>::new())
                .then_fail(CompletionError::Fatal("model overloaded".into())),
        );
        let id = pending_book(&h.store).await;

        let err = h.workflow.generate_book(id).await.unwrap_err();

        match err {
            WorkflowError::Generation(PipelineError::Completion { stage, source }) => {
                assert_eq!(stage, Stage::Content);
                assert_eq!(source.to_string(), "completion failed: model overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookStatus::Failed);
        assert!(stored.content.is_none());

        let events = h.events.events();
        let failed: Vec<_> = events.iter().filter(|e| e.status == BookStatus::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].progress, MSG_FAILED);
        assert_eq!(events.last().map(|e| e.status), Some(BookStatus::Failed));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn enrichment_failure_skips_stage_events() {
        let h = harness(
            ScriptedProvider::new("gpt", Vec::<String>::new())
                .then_fail(CompletionError::Transient("timed out".into())),
            ScriptedProvider::new("claude", Vec::<String>::new()),
        );
        let id = pending_book(&h.store).await;

        assert!(h.workflow.generate_book(id).await.is_err());
        assert_eq!(
            timeline(&h.events.events()),
            vec![
                (BookStatus::Generating, MSG_STARTING.to_string()),
                (BookStatus::Failed, MSG_FAILED.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_book_is_job_not_found() {
        let h = harness(
            ScriptedProvider::new("gpt", Vec::<String>::new()),
            ScriptedProvider::new("claude", Vec::<String>::new()),
        );
        let id = Uuid::new_v4();

        let err = h.workflow.generate_book(id).await.unwrap_err();

        assert!(matches!(err, WorkflowError::JobNotFound(missing) if missing == id));
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn finished_book_cannot_be_regenerated() {
        let h = harness(
            ScriptedProvider::new("gpt", ["e", "o", "9", "9"]),
            ScriptedProvider::new("claude", ["book"]),
        );
        let id = pending_book(&h.store).await;
        h.workflow.generate_book(id).await.unwrap();
        let before = h.events.events().len();

        let err = h.workflow.generate_book(id).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence(StoreError::InvalidTransition { .. })));
        assert_eq!(h.events.events().len(), before);
        assert_eq!(h.store.get(id).await.unwrap().unwrap().status, BookStatus::Completed);
    }

    /// Accepts the GENERATING write, then refuses everything else.
    struct FlakyStore {
        inner: InMemoryBookStore,
    }

    #[async_trait]
    impl BookStore for FlakyStore {
        async fn create(&self, book: Book) -> Result<Book, StoreError> {
            self.inner.create(book).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Book>, StoreError> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<Book>, StoreError> {
            self.inner.list().await
        }

        async fn transition(
            &self,
            id: Uuid,
            to: BookStatus,
            content: Option<FinalArtifact>,
        ) -> Result<Book, StoreError> {
            if to == BookStatus::Generating {
                self.inner.transition(id, to, content).await
            } else {
                Err(StoreError::InvalidTransition { id, from: BookStatus::Generating, to })
            }
        }
    }

    #[tokio::test]
    async fn failing_failure_write_keeps_original_error() {
        let store = Arc::new(FlakyStore { inner: InMemoryBookStore::new() });
        let events = Arc::new(RecordingChannel::default());
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(ScriptedProvider::new("gpt", ["e", "o"])),
            Arc::new(
                ScriptedProvider::new("claude", Vec::<String>::new())
                    .then_fail(CompletionError::Fatal("boom".into())),
            ),
            GenerationSettings::default(),
        ));
        let workflow = GenerationWorkflow::new(store.clone(), events.clone(), pipeline);
        let id = store.create(Book::new(sample_request())).await.unwrap().id;

        let err = workflow.generate_book(id).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Generation(_)));
        // no FAILED event for a status the store never took
        assert!(events.events().iter().all(|e| e.status == BookStatus::Generating));
    }

    #[tokio::test]
    async fn concurrent_jobs_keep_their_own_event_order() {
        let store = Arc::new(InMemoryBookStore::new());
        let events = Arc::new(RecordingChannel::default());
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(ScriptedProvider::new("gpt", ["9"; 8])),
            Arc::new(ScriptedProvider::new("claude", ["book"; 2])),
            GenerationSettings::default(),
        ));
        let workflow = Arc::new(GenerationWorkflow::new(store.clone(), events.clone(), pipeline));
        let first = pending_book(&store).await;
        let second = pending_book(&store).await;

        let (a, b) = tokio::join!(workflow.generate_book(first), workflow.generate_book(second));
        assert!(a.is_ok() && b.is_ok());

        for id in [first, second] {
            let per_job: Vec<String> = events
                .events()
                .into_iter()
                .filter(|e| e.job_id == id)
                .map(|e| e.progress)
                .collect();
            assert_eq!(per_job, vec![MSG_STARTING, MSG_STRUCTURE, MSG_CONTENT, MSG_COMPLETED]);
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl CompletionProvider for PanickingProvider {
        fn model(&self) -> &str {
            "claude"
        }

        async fn complete(
            &self,
            _system: &str,
            _payload: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            panic!("provider blew up")
        }
    }

    #[tokio::test]
    async fn panicking_provider_still_ends_failed() {
        let store = Arc::new(InMemoryBookStore::new());
        let events = Arc::new(RecordingChannel::default());
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::new(ScriptedProvider::new("gpt", ["enriched", "outline"])),
            Arc::new(PanickingProvider),
            GenerationSettings::default(),
        ));
        let workflow = Arc::new(GenerationWorkflow::new(store.clone(), events.clone(), pipeline));
        let id = pending_book(&store).await;

        let task = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.generate_book(id).await }
        });
        let err = task.await.expect("task should not die with the panic").unwrap_err();

        assert!(matches!(&err, WorkflowError::Panicked(msg) if msg == "provider blew up"), "{err:?}");
        assert_eq!(store.get(id).await.unwrap().unwrap().status, BookStatus::Failed);
        assert_eq!(
            timeline(&events.events()),
            vec![
                (BookStatus::Generating, MSG_STARTING.to_string()),
                (BookStatus::Generating, MSG_STRUCTURE.to_string()),
                (BookStatus::Generating, MSG_CONTENT.to_string()),
                (BookStatus::Failed, MSG_FAILED.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn only_one_caller_can_start_a_book() {
        let h = harness(
            ScriptedProvider::new("gpt", ["e", "o", "9", "9"]),
            ScriptedProvider::new("claude", ["book"]),
        );
        let id = pending_book(&h.store).await;

        let claimed = h.workflow.start(id).await.unwrap();
        let second = h.workflow.start(id).await.unwrap_err();
        assert!(matches!(second, WorkflowError::Persistence(StoreError::InvalidTransition { .. })));

        let book = h.workflow.run(claimed).await.unwrap();
        assert_eq!(book.status, BookStatus::Completed);
        let starts = h.events.events().iter().filter(|e| e.progress == MSG_STARTING).count();
        assert_eq!(starts, 1);
    }
}
