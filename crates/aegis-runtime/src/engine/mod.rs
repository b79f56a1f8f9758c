//! Marketplace analysis behind the resilience layer.
//!
//! Every operation goes through [`ResilienceOrchestrator::run_cached`]:
//! the configured strategy is the primary, the baseline heuristic is the
//! fallback, and the canned default is the data of last resort.

mod strategy;

pub use strategy::{AnalysisStrategy, BaselineStrategy, EnhancedStrategy, StrategyError};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use aegis_core::{
    heuristics, HeuristicError, MatchRequest, MatchResult, PriceRecommendation, PriceRequest,
    ProjectDraft, ScoreReport, ScoreRequest, StandardizedProject, DEFAULT_BUDGET,
};

use crate::config::RuntimeConfig;
use crate::orchestrator::ResilienceOrchestrator;
use crate::providers::LlmProvider;
use crate::resilience::{Fallback, ResilienceError, Resolved, RunOptions};

/// A request the engine knows how to answer.
trait Analysis: Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Send + 'static;

    const OPERATION: &'static str;

    fn cache_key(&self) -> String;

    fn ask<'a>(
        &'a self,
        strategy: &'a dyn AnalysisStrategy,
    ) -> BoxFuture<'a, Result<Self::Output, StrategyError>>;

    fn baseline(&self) -> Result<Self::Output, HeuristicError>;

    fn canned(&self) -> Self::Output;
}

impl Analysis for ScoreRequest {
    type Output = ScoreReport;

    const OPERATION: &'static str = "scoring";

    fn cache_key(&self) -> String {
        format!("score:{}:{}", self.mission_id, self.provider.id)
    }

    fn ask<'a>(
        &'a self,
        strategy: &'a dyn AnalysisStrategy,
    ) -> BoxFuture<'a, Result<ScoreReport, StrategyError>> {
        strategy.score(self)
    }

    fn baseline(&self) -> Result<ScoreReport, HeuristicError> {
        heuristics::score_bid(self)
    }

    fn canned(&self) -> ScoreReport {
        heuristics::canned_score()
    }
}

impl Analysis for PriceRequest {
    type Output = PriceRecommendation;

    const OPERATION: &'static str = "pricing";

    fn cache_key(&self) -> String {
        format!(
            "price:{}:{}",
            self.mission_id,
            self.budget.unwrap_or(DEFAULT_BUDGET)
        )
    }

    fn ask<'a>(
        &'a self,
        strategy: &'a dyn AnalysisStrategy,
    ) -> BoxFuture<'a, Result<PriceRecommendation, StrategyError>> {
        strategy.recommend_price(self)
    }

    fn baseline(&self) -> Result<PriceRecommendation, HeuristicError> {
        heuristics::recommend_price(self)
    }

    fn canned(&self) -> PriceRecommendation {
        heuristics::canned_price()
    }
}

impl Analysis for MatchRequest {
    type Output = Vec<MatchResult>;

    const OPERATION: &'static str = "matching";

    fn cache_key(&self) -> String {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.id.as_str()).collect();
        format!("match:{}:{}", self.mission_id, providers.join(","))
    }

    fn ask<'a>(
        &'a self,
        strategy: &'a dyn AnalysisStrategy,
    ) -> BoxFuture<'a, Result<Vec<MatchResult>, StrategyError>> {
        strategy.match_providers(self)
    }

    fn baseline(&self) -> Result<Vec<MatchResult>, HeuristicError> {
        heuristics::match_providers(self)
    }

    fn canned(&self) -> Vec<MatchResult> {
        Vec::new()
    }
}

impl Analysis for ProjectDraft {
    type Output = StandardizedProject;

    const OPERATION: &'static str = "standardization";

    fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.title.hash(&mut hasher);
        self.description.hash(&mut hasher);
        self.category.hash(&mut hasher);
        self.skills_required.hash(&mut hasher);
        self.budget.map(f64::to_bits).hash(&mut hasher);
        format!("analysis:standardize:{:016x}", hasher.finish())
    }

    fn ask<'a>(
        &'a self,
        strategy: &'a dyn AnalysisStrategy,
    ) -> BoxFuture<'a, Result<StandardizedProject, StrategyError>> {
        strategy.standardize(self)
    }

    fn baseline(&self) -> Result<StandardizedProject, HeuristicError> {
        Ok(heuristics::standardize_project(self))
    }

    fn canned(&self) -> StandardizedProject {
        heuristics::standardize_project(self)
    }
}

/// Answers marketplace questions with caching, retries and heuristics.
#[derive(Clone)]
pub struct AnalysisEngine {
    orchestrator: Arc<ResilienceOrchestrator>,
    strategy: Arc<dyn AnalysisStrategy>,
}

impl AnalysisEngine {
    pub fn builder() -> AnalysisEngineBuilder {
        AnalysisEngineBuilder::new()
    }

    pub fn orchestrator(&self) -> &Arc<ResilienceOrchestrator> {
        &self.orchestrator
    }

    /// Name of the primary strategy ("baseline" or "enhanced").
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub async fn score(
        &self,
        request: ScoreRequest,
        options: RunOptions<ScoreReport>,
    ) -> Result<Resolved<ScoreReport>, ResilienceError> {
        self.analyze(request, options).await
    }

    pub async fn recommend_price(
        &self,
        request: PriceRequest,
        options: RunOptions<PriceRecommendation>,
    ) -> Result<Resolved<PriceRecommendation>, ResilienceError> {
        self.analyze(request, options).await
    }

    pub async fn match_providers(
        &self,
        request: MatchRequest,
        options: RunOptions<Vec<MatchResult>>,
    ) -> Result<Resolved<Vec<MatchResult>>, ResilienceError> {
        self.analyze(request, options).await
    }

    pub async fn standardize(
        &self,
        draft: ProjectDraft,
        options: RunOptions<StandardizedProject>,
    ) -> Result<Resolved<StandardizedProject>, ResilienceError> {
        self.analyze(draft, options).await
    }

    async fn analyze<A: Analysis>(
        &self,
        request: A,
        mut options: RunOptions<A::Output>,
    ) -> Result<Resolved<A::Output>, ResilienceError> {
        if options.fallback_data.is_none() {
            options.fallback_data = Some(request.canned());
        }

        let key = request.cache_key();
        let request = Arc::new(request);

        let primary = {
            let request = Arc::clone(&request);
            let strategy = Arc::clone(&self.strategy);
            move || {
                let request = Arc::clone(&request);
                let strategy = Arc::clone(&strategy);
                async move { request.ask(strategy.as_ref()).await }
            }
        };
        let fallback = Fallback::sync(move || request.baseline().map_err(anyhow::Error::from));

        self.orchestrator
            .run_cached(A::OPERATION, &key, primary, fallback, options)
            .await
    }
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("strategy", &self.strategy.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AnalysisEngine`].
///
/// Without a provider, or with `offline_mode` set, the engine answers from
/// the baseline heuristics only.
pub struct AnalysisEngineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: RuntimeConfig,
    orchestrator: Option<Arc<ResilienceOrchestrator>>,
}

impl AnalysisEngineBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: RuntimeConfig::default(),
            orchestrator: None,
        }
    }

    /// Set the LLM provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing orchestrator instead of creating one from config.
    pub fn orchestrator(mut self, orchestrator: Arc<ResilienceOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn build(self) -> AnalysisEngine {
        let strategy: Arc<dyn AnalysisStrategy> = match self.provider {
            Some(provider) if !self.config.offline_mode => {
                let settings = self.config.provider.clone();
                tracing::info!(provider = provider.name(), model = %settings.model, "Using enhanced analysis");
                Arc::new(EnhancedStrategy::new(provider, settings))
            }
            _ => {
                tracing::info!(offline = self.config.offline_mode, "Using baseline analysis");
                Arc::new(BaselineStrategy)
            }
        };

        let orchestrator = self
            .orchestrator
            .unwrap_or_else(|| Arc::new(ResilienceOrchestrator::new(self.config)));

        AnalysisEngine {
            orchestrator,
            strategy,
        }
    }
}

impl Default for AnalysisEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
