use std::sync::Arc;

use tracing::{info, warn};

use crate::completion::{preview, CompletionError, CompletionOptions, CompletionProvider};

pub const QUALITY_INSTRUCTION: &str = "You are an expert in content quality analysis. \
Evaluate the quality of the following content from 0 to 10. Reply with the number only.";

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

/// Scores content with a judge model. A judge that answers with anything but
/// a number scores 0; only a failed completion call is an error.
#[derive(Clone)]
pub struct QualityGate {
    judge: Arc<dyn CompletionProvider>,
}

impl QualityGate {
    pub fn new(judge: Arc<dyn CompletionProvider>) -> Self {
        Self { judge }
    }

    pub async fn score(&self, content: &str) -> Result<f64, CompletionError> {
        let reply = self
            .judge
            .complete(QUALITY_INSTRUCTION, content, &CompletionOptions::default())
            .await?;
        let score = parse_score(&reply);
        info!("🧮 Quality score {:.2} from {} (raw: {})", score, self.judge.model(), preview(&reply, 40));
        Ok(score)
    }
}

/// Clamped into [0, 10]; unparsable or non-finite replies are 0.
pub fn parse_score(reply: &str) -> f64 {
    match reply.trim().parse::<f64>() {
        Ok(score) if score.is_finite() => score.clamp(MIN_SCORE, MAX_SCORE),
        _ => {
            warn!("⚠️ Judge reply is not a score, treating as 0: {}", preview(reply, 40));
            MIN_SCORE
        }
    }
}

pub fn passes(score: f64, threshold: f64) -> bool {
    score >= threshold
}
