use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::artifact::FinalArtifact;
use crate::config::GenerationSettings;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationRequest {
    pub title: String,
    pub description: String,
    pub genre: String,
    pub target_audience: String,
    pub style: String,
    pub tone: String,
    pub length: String,
    #[serde(default)]
    pub additional_instructions: Option<String>,
    #[serde(default)]
    pub creativity_level: Option<f64>, // 0.0 - 1.0
    #[serde(default)]
    pub quality_threshold: Option<f64>, // 0.0 - 10.0
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("field `{0}` must not be blank")]
    Blank(&'static str),
    #[error("creativity_level must be within [0, 1], got {0}")]
    CreativityOutOfRange(f64),
    #[error("quality_threshold must be within [0, 10], got {0}")]
    ThresholdOutOfRange(f64),
}

/// Request knobs after defaults from [`GenerationSettings`] have been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    pub creativity_level: f64,
    pub quality_threshold: f64,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("title", &self.title),
            ("description", &self.description),
            ("genre", &self.genre),
            ("target_audience", &self.target_audience),
            ("style", &self.style),
            ("tone", &self.tone),
            ("length", &self.length),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ValidationError::Blank(*name));
        }
        if let Some(level) = self.creativity_level {
            if !(0.0..=1.0).contains(&level) {
                return Err(ValidationError::CreativityOutOfRange(level));
            }
        }
        if let Some(threshold) = self.quality_threshold {
            if !(0.0..=10.0).contains(&threshold) {
                return Err(ValidationError::ThresholdOutOfRange(threshold));
            }
        }
        Ok(())
    }

    pub fn resolve(&self, settings: &GenerationSettings) -> Result<ResolvedOptions, ValidationError> {
        self.validate()?;
        Ok(ResolvedOptions {
            creativity_level: self.creativity_level.unwrap_or(settings.creativity_level),
            quality_threshold: self.quality_threshold.unwrap_or(settings.quality_threshold),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl BookStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookStatus::Completed | BookStatus::Failed)
    }

    /// PENDING -> GENERATING -> {COMPLETED | FAILED}, nothing else.
    pub fn can_transition_to(self, next: BookStatus) -> bool {
        matches!(
            (self, next),
            (BookStatus::Pending, BookStatus::Generating)
                | (BookStatus::Generating, BookStatus::Completed)
                | (BookStatus::Generating, BookStatus::Failed)
        )
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BookStatus::Pending => "pending",
            BookStatus::Generating => "generating",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Book {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: GenerationRequest,
    pub status: BookStatus,
    pub content: Option<FinalArtifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn new(request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            status: BookStatus::Pending,
            content: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct BookStatusView {
    pub id: Uuid,
    pub status: BookStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<&Book> for BookStatusView {
    fn from(book: &Book) -> Self {
        Self { id: book.id, status: book.status, updated_at: book.updated_at }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub status: BookStatus,
    pub progress: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: Uuid, status: BookStatus, progress: impl Into<String>) -> Self {
        Self { job_id, status, progress: progress.into(), timestamp: Utc::now() }
    }
}

#[cfg(test)]
pub(crate) fn sample_request() -> GenerationRequest {
    GenerationRequest {
        title: "T".into(),
        description: "A cartographer maps a city that rearranges itself nightly".into(),
        genre: "Fantasy".into(),
        target_audience: "Adult".into(),
        style: "Descriptive".into(),
        tone: "Serious".into(),
        length: "Novella".into(),
        additional_instructions: None,
        creativity_level: None,
        quality_threshold: Some(5.0),
    }
}
