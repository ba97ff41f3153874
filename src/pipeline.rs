use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::artifact::{ContentArtifact, ContentDraft, EnrichedPrompt, FinalArtifact, RefinedContent, StructureDraft};
use crate::completion::{CompletionError, CompletionOptions, CompletionProvider};
use crate::config::GenerationSettings;
use crate::models::{GenerationRequest, ValidationError};
use crate::quality::{passes, QualityGate};

pub const ENRICH_INSTRUCTION: &str =
    "You are an expert in analyzing and enriching prompts for long-form content generation.";
pub const STRUCTURE_INSTRUCTION: &str =
    "You are an expert at building complex, engaging narrative structures. Produce a detailed book outline.";
pub const CONTENT_INSTRUCTION: &str =
    "Generate detailed book content based on this structure.";
pub const REFINE_INSTRUCTION: &str =
    "Refine and improve this content while preserving its essence.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Enrichment,
    Structure,
    Content,
    QualityAnalysis,
    Refinement,
    Finalization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Enrichment => "prompt enrichment",
            Stage::Structure => "structure generation",
            Stage::Content => "content generation",
            Stage::QualityAnalysis => "quality analysis",
            Stage::Refinement => "refinement",
            Stage::Finalization => "finalization",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid generation request: {0}")]
    InvalidRequest(#[from] ValidationError),
    #[error("{stage} failed: {source}")]
    Completion {
        stage: Stage,
        #[source]
        source: CompletionError,
    },
    #[error("failed to serialize {stage} payload: {source}")]
    Payload {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::InvalidRequest(_) => None,
            PipelineError::Completion { stage, .. } | PipelineError::Payload { stage, .. } => Some(*stage),
        }
    }
}

/// Told about each stage right before it starts.
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, stage: Stage);
}

pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn stage_started(&self, _stage: Stage) {}
}

/// Runs the fixed stage sequence against two completion roles: the
/// structural model (enrichment, outline, judging) and the narrative model
/// (prose and refinement).
pub struct GenerationPipeline {
    structural: Arc<dyn CompletionProvider>,
    narrative: Arc<dyn CompletionProvider>,
    gate: QualityGate,
    settings: GenerationSettings,
}

impl GenerationPipeline {
    pub fn new(
        structural: Arc<dyn CompletionProvider>,
        narrative: Arc<dyn CompletionProvider>,
        settings: GenerationSettings,
    ) -> Self {
        let gate = QualityGate::new(structural.clone());
        Self { structural, narrative, gate, settings }
    }

    pub async fn run(
        &self,
        request: &GenerationRequest,
        observer: &dyn StageObserver,
    ) -> Result<FinalArtifact, PipelineError> {
        let resolved = request.resolve(&self.settings)?;
        let options = CompletionOptions::with_temperature(resolved.creativity_level);
        info!(
            "🚀 Generating '{}' ({}), threshold {:.2}",
            request.title, request.genre, resolved.quality_threshold
        );

        observer.stage_started(Stage::Enrichment);
        let enriched = self.enrich(request, &options).await?;

        observer.stage_started(Stage::Structure);
        let structure = self.generate_structure(enriched, &options).await?;

        observer.stage_started(Stage::Content);
        let draft = self.generate_content(structure, &options).await?;

        observer.stage_started(Stage::QualityAnalysis);
        let initial_score = self.score(Stage::QualityAnalysis, &draft.content).await?;

        let content = if passes(initial_score, resolved.quality_threshold) {
            info!("✅ Score {:.2} meets threshold, keeping draft", initial_score);
            ContentArtifact::Draft(draft)
        } else {
            observer.stage_started(Stage::Refinement);
            info!("🔄 Score {:.2} below threshold {:.2}, refining", initial_score, resolved.quality_threshold);
            ContentArtifact::Refined(self.refine(draft, &options).await?)
        };

        observer.stage_started(Stage::Finalization);
        // Scored again on purpose: refinement changed the text.
        let final_score = self.score(Stage::Finalization, content.text()).await?;
        info!("🏁 '{}' finalized with score {:.2}", request.title, final_score);
        Ok(content.finalize(initial_score, final_score))
    }

    async fn enrich(
        &self,
        request: &GenerationRequest,
        options: &CompletionOptions,
    ) -> Result<EnrichedPrompt, PipelineError> {
        let payload = to_payload(Stage::Enrichment, request)?;
        let enriched = call(&*self.structural, Stage::Enrichment, ENRICH_INSTRUCTION, &payload, options).await?;
        Ok(EnrichedPrompt::new(request.clone(), enriched))
    }

    async fn generate_structure(
        &self,
        enriched: EnrichedPrompt,
        options: &CompletionOptions,
    ) -> Result<StructureDraft, PipelineError> {
        let payload = to_payload(Stage::Structure, &enriched)?;
        let outline = call(&*self.structural, Stage::Structure, STRUCTURE_INSTRUCTION, &payload, options).await?;
        Ok(enriched.into_structure(outline))
    }

    async fn generate_content(
        &self,
        structure: StructureDraft,
        options: &CompletionOptions,
    ) -> Result<ContentDraft, PipelineError> {
        let payload = to_payload(Stage::Content, &structure)?;
        let prose = call(&*self.narrative, Stage::Content, CONTENT_INSTRUCTION, &payload, options).await?;
        Ok(structure.into_content(prose, self.narrative.model()))
    }

    async fn refine(
        &self,
        draft: ContentDraft,
        options: &CompletionOptions,
    ) -> Result<RefinedContent, PipelineError> {
        let refined = call(&*self.narrative, Stage::Refinement, REFINE_INSTRUCTION, &draft.content, options).await?;
        Ok(draft.into_refined(refined))
    }

    async fn score(&self, stage: Stage, content: &str) -> Result<f64, PipelineError> {
        self.gate
            .score(content)
            .await
            .map_err(|source| PipelineError::Completion { stage, source })
    }
}

async fn call(
    provider: &dyn CompletionProvider,
    stage: Stage,
    system: &str,
    payload: &str,
    options: &CompletionOptions,
) -> Result<String, PipelineError> {
    info!("✍️ {} via {}", stage, provider.model());
    provider
        .complete(system, payload, options)
        .await
        .map_err(|source| PipelineError::Completion { stage, source })
}

fn to_payload<T: serde::Serialize>(stage: Stage, value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value).map_err(|source| PipelineError::Payload { stage, source })
}
