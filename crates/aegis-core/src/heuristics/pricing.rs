use crate::types::{MarketPosition, PriceRange, PriceRecommendation, PriceRequest};
use crate::{BASELINE_CONFIDENCE, DEFAULT_BUDGET};

use super::{check_budget, require_mission_id, HeuristicError};

const RANGE_SPREAD: f64 = 0.2;

fn recommendation_for(budget: f64, reasoning: Vec<String>) -> PriceRecommendation {
    PriceRecommendation {
        price_range: PriceRange {
            min: (budget * (1.0 - RANGE_SPREAD)).round(),
            recommended: budget,
            max: (budget * (1.0 + RANGE_SPREAD)).round(),
        },
        confidence: BASELINE_CONFIDENCE,
        reasoning,
        market_position: MarketPosition::Competitive,
        degraded: true,
    }
}

/// Static recommendation around the platform default budget.
pub fn canned_price() -> PriceRecommendation {
    recommendation_for(
        DEFAULT_BUDGET,
        vec!["Default platform budget".to_string(), "Computed in fallback mode".to_string()],
    )
}

/// Recommend a price band of +/-20% around the mission budget.
pub fn recommend_price(request: &PriceRequest) -> Result<PriceRecommendation, HeuristicError> {
    require_mission_id(&request.mission_id)?;

    let (budget, origin) = match check_budget(request.budget)? {
        Some(budget) => (budget, "Price based on the stated budget"),
        None => (DEFAULT_BUDGET, "No budget stated, using the platform default"),
    };

    let mut reasoning = vec![origin.to_string()];
    if let Some(category) = &request.category {
        reasoning.push(format!("Category '{category}' not priced in fallback mode"));
    }

    Ok(recommendation_for(budget, reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_follows_budget() {
        let rec = recommend_price(&PriceRequest::new("m1").with_budget(5000.0)).unwrap();
        assert_eq!(rec.price_range.min, 4000.0);
        assert_eq!(rec.price_range.recommended, 5000.0);
        assert_eq!(rec.price_range.max, 6000.0);
        assert_eq!(rec.market_position, MarketPosition::Competitive);
    }

    #[test]
    fn test_missing_budget_uses_default() {
        let rec = recommend_price(&PriceRequest::new("m1")).unwrap();
        assert_eq!(rec.price_range.recommended, DEFAULT_BUDGET);
        assert_eq!(rec.price_range.min, 2400.0);
    }

    #[test]
    fn test_invalid_budget_is_rejected() {
        let err = recommend_price(&PriceRequest::new("m1").with_budget(-10.0)).unwrap_err();
        assert_eq!(err, HeuristicError::InvalidBudget(-10.0));
    }

    #[test]
    fn test_canned_price_matches_default_budget() {
        let rec = canned_price();
        assert_eq!(rec.price_range.max, 3600.0);
        assert!(rec.degraded);
    }
}
