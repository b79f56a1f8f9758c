//! Request and result types shared by the baseline heuristics and the
//! model-backed strategies in `aegis-runtime`.
//!
//! Confidence values use a 0-100 scale throughout.

use serde::{Deserialize, Serialize};

/// A freelancer or agency that can bid on a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,

    /// Average review rating (0.0 - 5.0)
    #[serde(default)]
    pub rating: f64,

    /// Declared skills, free-form
    #[serde(default)]
    pub skills: Vec<String>,

    /// Completed missions on the platform
    #[serde(default)]
    pub completed_missions: u32,

    /// Daily rate the provider usually asks for
    #[serde(default)]
    pub daily_rate: Option<f64>,
}

impl ProviderProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rating: 0.0,
            skills: Vec::new(),
            completed_missions: 0,
            daily_rate: None,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_completed_missions(mut self, count: u32) -> Self {
        self.completed_missions = count;
        self
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Score a provider's bid against a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub mission_id: String,
    pub provider: ProviderProfile,

    /// Proposed price for the bid
    #[serde(default)]
    pub bid_price: Option<f64>,

    /// Mission budget, if the client stated one
    #[serde(default)]
    pub budget: Option<f64>,
}

impl ScoreRequest {
    pub fn new(mission_id: impl Into<String>, provider: ProviderProfile) -> Self {
        Self {
            mission_id: mission_id.into(),
            provider,
            bid_price: None,
            budget: None,
        }
    }

    pub fn with_bid(mut self, bid_price: f64) -> Self {
        self.bid_price = Some(bid_price);
        self
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Per-dimension scores (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price: f64,
    pub quality: f64,
    pub fit: f64,
    pub delay: f64,
    pub risk: f64,
    pub completion_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
    pub explanations: Vec<String>,
    pub confidence: f64,

    /// True when produced by a heuristic rather than the model
    #[serde(default)]
    pub degraded: bool,
}

// ============================================================================
// Pricing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub mission_id: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub budget: Option<f64>,

    /// Estimated duration of the mission in weeks
    #[serde(default)]
    pub duration_weeks: Option<u32>,
}

impl PriceRequest {
    pub fn new(mission_id: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            category: None,
            budget: None,
            duration_weeks: None,
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub recommended: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPosition {
    Budget,
    Competitive,
    Premium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecommendation {
    pub price_range: PriceRange,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub market_position: MarketPosition,

    #[serde(default)]
    pub degraded: bool,
}

// ============================================================================
// Matching
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub mission_id: String,

    /// Skills the mission asks for
    #[serde(default)]
    pub required_skills: Vec<String>,

    #[serde(default)]
    pub budget: Option<f64>,

    pub providers: Vec<ProviderProfile>,
}

impl MatchRequest {
    pub fn new(mission_id: impl Into<String>, providers: Vec<ProviderProfile>) -> Self {
        Self {
            mission_id: mission_id.into(),
            required_skills: Vec::new(),
            budget: None,
            providers,
        }
    }

    pub fn with_required_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationLevel {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchBreakdown {
    pub skills_compatibility: f64,
    pub experience_alignment: f64,
    pub quality_score: f64,
    pub budget_fit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub provider_id: String,
    pub overall_match_score: f64,
    pub confidence: f64,
    pub breakdown: MatchBreakdown,
    pub recommendation_level: RecommendationLevel,
    pub explanation: Vec<String>,

    #[serde(default)]
    pub degraded: bool,
}

// ============================================================================
// Brief standardization
// ============================================================================

/// Raw project brief as typed by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub skills_required: Vec<String>,

    #[serde(default)]
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedProject {
    pub title: String,
    pub summary: String,
    pub category: String,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub brief_quality_score: f64,
    pub richness_score: f64,
    pub missing_info: Vec<String>,
    pub confidence: f64,

    #[serde(default)]
    pub degraded: bool,
}
