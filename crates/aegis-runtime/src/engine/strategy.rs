//! Analysis strategies: how a marketplace question gets answered.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use aegis_core::{
    heuristics, HeuristicError, MatchRequest, MatchResult, PriceRecommendation, PriceRequest,
    ProjectDraft, ScoreReport, ScoreRequest, StandardizedProject,
};

use crate::config::ProviderSettings;
use crate::providers::{JsonPrompt, LlmProvider, ProviderError};

/// Errors from an analysis strategy.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Heuristic rejected input: {0}")]
    Heuristic(#[from] HeuristicError),

    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Model answer is not usable: {0}")]
    InvalidResponse(String),
}

/// One way of answering the four marketplace questions.
#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, StrategyError>;

    async fn recommend_price(
        &self,
        request: &PriceRequest,
    ) -> Result<PriceRecommendation, StrategyError>;

    /// Results ordered by descending match score.
    async fn match_providers(
        &self,
        request: &MatchRequest,
    ) -> Result<Vec<MatchResult>, StrategyError>;

    async fn standardize(&self, draft: &ProjectDraft)
        -> Result<StandardizedProject, StrategyError>;
}

/// Deterministic heuristics, no model involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineStrategy;

#[async_trait]
impl AnalysisStrategy for BaselineStrategy {
    fn name(&self) -> &str {
        "baseline"
    }

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, StrategyError> {
        Ok(heuristics::score_bid(request)?)
    }

    async fn recommend_price(
        &self,
        request: &PriceRequest,
    ) -> Result<PriceRecommendation, StrategyError> {
        Ok(heuristics::recommend_price(request)?)
    }

    async fn match_providers(
        &self,
        request: &MatchRequest,
    ) -> Result<Vec<MatchResult>, StrategyError> {
        Ok(heuristics::match_providers(request)?)
    }

    async fn standardize(
        &self,
        draft: &ProjectDraft,
    ) -> Result<StandardizedProject, StrategyError> {
        Ok(heuristics::standardize_project(draft))
    }
}

const SYSTEM_PROMPT: &str = r#"
You are the analysis service of a freelance marketplace.

Answer with a single JSON document and nothing else.
Use the exact field names of the requested shape.
Scores and confidence use a 0-100 scale.
Never invent providers or missions that are not in the request.
"#;

const SCORE_SHAPE: &str = r#"{"total_score": number, "breakdown": {"price": number, "quality": number, "fit": number, "delay": number, "risk": number, "completion_probability": number}, "explanations": [string], "confidence": number}"#;

const PRICE_SHAPE: &str = r#"{"price_range": {"min": number, "recommended": number, "max": number}, "confidence": number, "reasoning": [string], "market_position": "budget" | "competitive" | "premium"}"#;

const MATCH_SHAPE: &str = r#"[{"provider_id": string, "overall_match_score": number, "confidence": number, "breakdown": {"skills_compatibility": number, "experience_alignment": number, "quality_score": number, "budget_fit": number}, "recommendation_level": "poor" | "fair" | "good" | "excellent", "explanation": [string]}]"#;

const STANDARDIZE_SHAPE: &str = r#"{"title": string, "summary": string, "category": string, "tags": [string], "skills": [string], "acceptance_criteria": [string], "brief_quality_score": number, "richness_score": number, "missing_info": [string], "confidence": number}"#;

/// Model-backed strategy.
pub struct EnhancedStrategy {
    provider: Arc<dyn LlmProvider>,
    settings: ProviderSettings,
}

impl EnhancedStrategy {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: ProviderSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn ask<R, P>(&self, task: &str, shape: &str, payload: &P) -> Result<R, StrategyError>
    where
        R: DeserializeOwned,
        P: Serialize + Sync,
    {
        let payload = serde_json::to_string_pretty(payload)
            .map_err(|e| StrategyError::InvalidResponse(e.to_string()))?;
        let prompt = JsonPrompt {
            instructions: SYSTEM_PROMPT,
            task: format!("Task: {task}\n\nRespond with this shape:\n{shape}\n\nRequest:\n{payload}"),
        };

        let answer = self.provider.complete_json(&prompt, &self.settings).await?;
        tracing::debug!(
            provider = self.provider.name(),
            model = %answer.model,
            task,
            tokens = answer.tokens,
            "Model answered"
        );

        parse_answer(&answer.text)
    }
}

impl std::fmt::Debug for EnhancedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancedStrategy")
            .field("provider", &self.provider.name())
            .field("model", &self.settings.model)
            .finish()
    }
}

/// Pull the JSON document out of a model answer, tolerating code fences
/// and prose around it.
pub(crate) fn parse_answer<R: DeserializeOwned>(content: &str) -> Result<R, StrategyError> {
    let start = content.find(['{', '[']);
    let end = content.rfind(['}', ']']);

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(StrategyError::InvalidResponse(
                "no JSON document in answer".to_string(),
            ))
        }
    };

    serde_json::from_str(json).map_err(|e| StrategyError::InvalidResponse(e.to_string()))
}

fn check_confidence(confidence: f64) -> Result<(), StrategyError> {
    if !(0.0..=100.0).contains(&confidence) {
        return Err(StrategyError::InvalidResponse(format!(
            "confidence {confidence} outside 0-100"
        )));
    }
    Ok(())
}

#[async_trait]
impl AnalysisStrategy for EnhancedStrategy {
    fn name(&self) -> &str {
        "enhanced"
    }

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, StrategyError> {
        let report: ScoreReport = self
            .ask("Score this bid for the mission.", SCORE_SHAPE, request)
            .await?;
        check_confidence(report.confidence)?;
        Ok(report)
    }

    async fn recommend_price(
        &self,
        request: &PriceRequest,
    ) -> Result<PriceRecommendation, StrategyError> {
        let recommendation: PriceRecommendation = self
            .ask("Recommend a price range for the mission.", PRICE_SHAPE, request)
            .await?;
        check_confidence(recommendation.confidence)?;

        let range = &recommendation.price_range;
        if !(range.min <= range.recommended && range.recommended <= range.max) {
            return Err(StrategyError::InvalidResponse(
                "price range is not ordered".to_string(),
            ));
        }
        Ok(recommendation)
    }

    async fn match_providers(
        &self,
        request: &MatchRequest,
    ) -> Result<Vec<MatchResult>, StrategyError> {
        let mut results: Vec<MatchResult> = self
            .ask(
                "Rate how well each provider matches the mission.",
                MATCH_SHAPE,
                request,
            )
            .await?;

        results.retain(|r| request.providers.iter().any(|p| p.id == r.provider_id));
        for result in &results {
            check_confidence(result.confidence)?;
        }
        results.sort_by(|a, b| b.overall_match_score.total_cmp(&a.overall_match_score));
        Ok(results)
    }

    async fn standardize(
        &self,
        draft: &ProjectDraft,
    ) -> Result<StandardizedProject, StrategyError> {
        let project: StandardizedProject = self
            .ask(
                "Rewrite this project brief in the standard shape.",
                STANDARDIZE_SHAPE,
                draft,
            )
            .await?;
        check_confidence(project.confidence)?;
        Ok(project)
    }
}
