use std::collections::HashSet;

use crate::types::{MatchBreakdown, MatchRequest, MatchResult, ProviderProfile, RecommendationLevel};

use super::keywords::normalize_skill;
use super::{check_budget, clamp_score, require_mission_id, round1, HeuristicError};

const MATCH_CONFIDENCE: f64 = 40.0;

fn level_for(score: f64) -> RecommendationLevel {
    match score {
        s if s >= 80.0 => RecommendationLevel::Excellent,
        s if s >= 65.0 => RecommendationLevel::Good,
        s if s >= 50.0 => RecommendationLevel::Fair,
        _ => RecommendationLevel::Poor,
    }
}

fn skills_compatibility(required: &HashSet<String>, provider: &ProviderProfile) -> f64 {
    if required.is_empty() {
        return 60.0;
    }
    let offered: HashSet<String> = provider.skills.iter().map(|s| normalize_skill(s)).collect();
    let covered = required.intersection(&offered).count();
    clamp_score(covered as f64 / required.len() as f64 * 100.0)
}

fn budget_fit(budget: Option<f64>, provider: &ProviderProfile) -> f64 {
    match (budget, provider.daily_rate) {
        // A mission budget below five days of the provider's rate is a poor fit
        (Some(budget), Some(rate)) if rate > 0.0 => clamp_score(budget / (rate * 5.0) * 70.0),
        _ => 70.0,
    }
}

fn score_provider(
    required: &HashSet<String>,
    budget: Option<f64>,
    provider: &ProviderProfile,
) -> MatchResult {
    let breakdown = MatchBreakdown {
        skills_compatibility: skills_compatibility(required, provider),
        experience_alignment: clamp_score(40.0 + provider.completed_missions as f64 * 5.0),
        quality_score: if provider.rating > 0.0 {
            clamp_score(provider.rating * 20.0)
        } else {
            60.0
        },
        budget_fit: budget_fit(budget, provider),
    };

    let overall = round1(
        breakdown.skills_compatibility * 0.4
            + breakdown.experience_alignment * 0.2
            + breakdown.quality_score * 0.25
            + breakdown.budget_fit * 0.15,
    );

    MatchResult {
        provider_id: provider.id.clone(),
        overall_match_score: overall,
        confidence: MATCH_CONFIDENCE,
        breakdown,
        recommendation_level: level_for(overall),
        explanation: vec!["Computed in fallback mode from profile data".to_string()],
        degraded: true,
    }
}

/// Rank providers for a mission, best match first.
///
/// Ties are broken by provider id so the order is stable.
pub fn match_providers(request: &MatchRequest) -> Result<Vec<MatchResult>, HeuristicError> {
    require_mission_id(&request.mission_id)?;
    let budget = check_budget(request.budget)?;

    let required: HashSet<String> = request
        .required_skills
        .iter()
        .map(|s| normalize_skill(s))
        .collect();

    let mut results: Vec<MatchResult> = request
        .providers
        .iter()
        .map(|provider| score_provider(&required, budget, provider))
        .collect();

    results.sort_by(|a, b| {
        b.overall_match_score
            .total_cmp(&a.overall_match_score)
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });

    Ok(results)
}
