//! Baseline heuristics.
//!
//! Each function is the guaranteed, cheap answer for one AI operation.
//! The `canned_*` variants never fail and serve as the static default of
//! last resort when even the heuristic rejects its input.

pub mod keywords;
mod matching;
mod pricing;
mod scoring;
mod standardize;

pub use matching::match_providers;
pub use pricing::{canned_price, recommend_price};
pub use scoring::{canned_score, score_bid};
pub use standardize::standardize_project;

use thiserror::Error;

/// Input a heuristic refuses to work with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeuristicError {
    #[error("Missing mission id")]
    MissingMissionId,

    #[error("Invalid budget: {0}")]
    InvalidBudget(f64),

    #[error("Invalid rating {rating} for provider {provider_id}")]
    InvalidRating { provider_id: String, rating: f64 },
}

pub(crate) fn require_mission_id(mission_id: &str) -> Result<(), HeuristicError> {
    if mission_id.trim().is_empty() {
        return Err(HeuristicError::MissingMissionId);
    }
    Ok(())
}

pub(crate) fn check_budget(budget: Option<f64>) -> Result<Option<f64>, HeuristicError> {
    match budget {
        Some(b) if !b.is_finite() || b <= 0.0 => Err(HeuristicError::InvalidBudget(b)),
        other => Ok(other),
    }
}

pub(crate) fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Rounds to one decimal place so reports stay readable.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
