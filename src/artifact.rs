//! Values threaded through the generation stages. Each stage consumes the
//! previous value and wraps it in a new one, so the final artifact carries the
//! whole history of the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::GenerationRequest;

pub const STRUCTURE_VERSION: &str = "1.0";
pub const REFINED_VERSION: &str = "refined-1.0";
pub const FINAL_VERSION: &str = "final-1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedPrompt {
    pub original_prompt: GenerationRequest,
    pub enriched_data: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionStamp {
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl VersionStamp {
    fn now(version: &str) -> Self {
        Self { timestamp: Utc::now(), version: version.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureDraft {
    pub prompt: EnrichedPrompt,
    pub structure: String,
    pub metadata: VersionStamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelStamp {
    pub timestamp: DateTime<Utc>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentDraft {
    pub structure: StructureDraft,
    pub content: String,
    pub metadata: ModelStamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefinedContent {
    pub original_content: ContentDraft,
    pub refined_content: String,
    pub metadata: VersionStamp,
}

/// The prose that leaves the refinement stage, refined or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ContentArtifact {
    Refined(RefinedContent),
    Draft(ContentDraft),
}

impl ContentArtifact {
    pub fn text(&self) -> &str {
        match self {
            ContentArtifact::Draft(draft) => &draft.content,
            ContentArtifact::Refined(refined) => &refined.refined_content,
        }
    }

    pub fn is_refined(&self) -> bool {
        matches!(self, ContentArtifact::Refined(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub final_score: f64,
    pub initial_score: f64,
    pub refined: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalMetadata {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub quality_metrics: QualityMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalArtifact {
    pub content: ContentArtifact,
    pub metadata: FinalMetadata,
}

impl EnrichedPrompt {
    pub fn new(original_prompt: GenerationRequest, enriched_data: String) -> Self {
        Self { original_prompt, enriched_data, timestamp: Utc::now() }
    }

    pub fn into_structure(self, structure: String) -> StructureDraft {
        StructureDraft { prompt: self, structure, metadata: VersionStamp::now(STRUCTURE_VERSION) }
    }
}

impl StructureDraft {
    pub fn into_content(self, content: String, model: &str) -> ContentDraft {
        ContentDraft {
            structure: self,
            content,
            metadata: ModelStamp { timestamp: Utc::now(), model: model.to_string() },
        }
    }
}

impl ContentDraft {
    pub fn into_refined(self, refined_content: String) -> RefinedContent {
        RefinedContent {
            original_content: self,
            refined_content,
            metadata: VersionStamp::now(REFINED_VERSION),
        }
    }
}

impl ContentArtifact {
    pub fn finalize(self, initial_score: f64, final_score: f64) -> FinalArtifact {
        let refined = self.is_refined();
        FinalArtifact {
            content: self,
            metadata: FinalMetadata {
                timestamp: Utc::now(),
                version: FINAL_VERSION.to_string(),
                quality_metrics: QualityMetrics { final_score, initial_score, refined },
            },
        }
    }
}

impl FinalArtifact {
    pub fn text(&self) -> &str {
        self.content.text()
    }
}
