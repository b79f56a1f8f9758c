//! # aegis-core
//!
//! Deterministic baseline heuristics for the Aegis AI call layer.
//!
//! Every AI-backed marketplace operation (scoring, pricing, matching,
//! brief standardization) needs a cheap answer that is always available
//! when the remote model is slow, failing, or disabled. This crate holds
//! those answers.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same request always produces the same result
//! 2. **No I/O**: Nothing here suspends, allocates a connection, or calls a model
//! 3. **Flagged**: Every result carries `confidence` and `degraded` so callers
//!    can tell a heuristic answer from a model answer
//!
//! ## Example
//!
//! ```rust,ignore
//! use aegis_core::{heuristics, PriceRequest};
//!
//! let request = PriceRequest::new("mission-42").with_budget(4_000.0);
//! let recommendation = heuristics::recommend_price(&request)?;
//! assert_eq!(recommendation.price_range.recommended, 4_000.0);
//! ```

pub mod heuristics;
pub mod types;

pub use heuristics::{keywords, HeuristicError};
pub use types::{
    MarketPosition, MatchBreakdown, MatchRequest, MatchResult, PriceRange, PriceRecommendation,
    PriceRequest, ProjectDraft, ProviderProfile, RecommendationLevel, ScoreBreakdown,
    ScoreReport, ScoreRequest, StandardizedProject,
};

/// Confidence reported by every baseline result (0-100 scale).
pub const BASELINE_CONFIDENCE: f64 = 50.0;

/// Budget assumed when a mission does not state one.
pub const DEFAULT_BUDGET: f64 = 3_000.0;
