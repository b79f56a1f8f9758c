use crate::types::{ScoreBreakdown, ScoreReport, ScoreRequest};
use crate::BASELINE_CONFIDENCE;

use super::{check_budget, clamp_score, require_mission_id, round1, HeuristicError};

// Dimension weights; they sum to 1.0
const W_PRICE: f64 = 0.25;
const W_QUALITY: f64 = 0.25;
const W_FIT: f64 = 0.20;
const W_DELAY: f64 = 0.10;
const W_RISK: f64 = 0.10;
const W_COMPLETION: f64 = 0.10;

fn neutral_breakdown() -> ScoreBreakdown {
    ScoreBreakdown {
        price: 70.0,
        quality: 60.0,
        fit: 65.0,
        delay: 70.0,
        risk: 60.0,
        completion_probability: 65.0,
    }
}

fn total(b: &ScoreBreakdown) -> f64 {
    round1(
        b.price * W_PRICE
            + b.quality * W_QUALITY
            + b.fit * W_FIT
            + b.delay * W_DELAY
            + b.risk * W_RISK
            + b.completion_probability * W_COMPLETION,
    )
}

/// Static score used when nothing else is available.
pub fn canned_score() -> ScoreReport {
    let breakdown = neutral_breakdown();
    ScoreReport {
        total_score: total(&breakdown),
        breakdown,
        explanations: vec!["Score computed in fallback mode: limited data".to_string()],
        confidence: BASELINE_CONFIDENCE,
        degraded: true,
    }
}

/// Score a bid from the provider profile and the bid/budget ratio.
pub fn score_bid(request: &ScoreRequest) -> Result<ScoreReport, HeuristicError> {
    require_mission_id(&request.mission_id)?;
    let budget = check_budget(request.budget)?;

    let rating = request.provider.rating;
    if !(0.0..=5.0).contains(&rating) {
        return Err(HeuristicError::InvalidRating {
            provider_id: request.provider.id.clone(),
            rating,
        });
    }

    let mut breakdown = neutral_breakdown();
    let mut explanations = Vec::new();

    if rating > 0.0 {
        breakdown.quality = clamp_score(rating * 20.0);
        explanations.push(format!("Quality derived from a {rating:.1}/5 rating"));
    }

    if let (Some(bid), Some(budget)) = (request.bid_price, budget) {
        let ratio = bid / budget;
        breakdown.price = if ratio <= 1.0 {
            clamp_score(70.0 + (1.0 - ratio) * 50.0)
        } else {
            clamp_score(70.0 - (ratio - 1.0) * 100.0)
        };
        explanations.push(format!("Bid is {:.0}% of the budget", ratio * 100.0));
    }

    if request.provider.completed_missions > 0 {
        let track_record = (request.provider.completed_missions as f64).min(20.0);
        breakdown.completion_probability = clamp_score(65.0 + track_record * 1.5);
        breakdown.risk = clamp_score(60.0 + track_record);
    }

    if explanations.is_empty() {
        explanations.push("Neutral score: no usable signal in the request".to_string());
    }

    Ok(ScoreReport {
        total_score: total(&breakdown),
        breakdown,
        explanations,
        confidence: BASELINE_CONFIDENCE,
        degraded: true,
    })
}
