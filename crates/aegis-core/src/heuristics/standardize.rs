use std::collections::BTreeSet;

use crate::types::{ProjectDraft, StandardizedProject};

use super::keywords::{detect_technologies, normalize_skill, top_keywords, words};
use super::{clamp_score, round1};

const SUMMARY_CHARS: usize = 200;
const MAX_TAGS: usize = 8;
const MIN_DESCRIPTION_CHARS: usize = 50;

/// Normalize a raw brief into the platform's standard shape.
///
/// Never fails: an empty draft yields a low-quality placeholder that lists
/// everything missing.
pub fn standardize_project(draft: &ProjectDraft) -> StandardizedProject {
    let title = draft
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled project")
        .to_string();

    let description = draft.description.as_deref().unwrap_or("").trim();
    let summary = if description.is_empty() {
        "Description missing".to_string()
    } else {
        description.chars().take(SUMMARY_CHARS).collect()
    };

    let category = draft
        .category
        .as_deref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".to_string());

    let corpus = format!("{title} {description}");

    let mut skills: BTreeSet<String> = draft
        .skills_required
        .iter()
        .map(|s| normalize_skill(s))
        .filter(|s| !s.is_empty())
        .collect();
    skills.extend(detect_technologies(&corpus));

    let mut missing_info = Vec::new();
    if draft.budget.is_none() {
        missing_info.push("budget".to_string());
    }
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        missing_info.push("description".to_string());
    }
    if skills.is_empty() {
        missing_info.push("skills".to_string());
    }

    let word_count = words(description).len() as f64;
    let brief_quality_score = clamp_score(100.0 - missing_info.len() as f64 * 20.0).max(20.0);

    StandardizedProject {
        title,
        summary,
        category,
        tags: top_keywords(&corpus, MAX_TAGS),
        skills: skills.into_iter().collect(),
        acceptance_criteria: vec!["Delivery matches the agreed brief".to_string()],
        brief_quality_score,
        richness_score: round1(clamp_score(word_count * 2.0)),
        missing_info,
        confidence: if word_count > 0.0 { 45.0 } else { 30.0 },
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_draft_yields_placeholder() {
        let std = standardize_project(&ProjectDraft {
            title: None,
            description: None,
            category: None,
            skills_required: vec![],
            budget: None,
        });

        assert_eq!(std.title, "Untitled project");
        assert_eq!(std.summary, "Description missing");
        assert_eq!(std.category, "general");
        assert_eq!(std.missing_info, vec!["budget", "description", "skills"]);
        assert_eq!(std.brief_quality_score, 40.0);
    }

    #[test]
    fn test_detects_skills_from_description() {
        let std = standardize_project(&ProjectDraft {
            title: Some("  E-shop rebuild ".to_string()),
            description: Some(
                "Rebuild our Shopify store front in React with a Node.js backend and SEO audit"
                    .to_string(),
            ),
            category: Some("Web-Development".to_string()),
            skills_required: vec!["Figma".to_string()],
            budget: Some(8000.0),
        });

        assert_eq!(std.title, "E-shop rebuild");
        assert_eq!(std.category, "web-development");
        assert_eq!(std.skills, vec!["figma", "node", "react", "seo", "shopify"]);
        assert!(std.missing_info.is_empty());
        assert_eq!(std.brief_quality_score, 100.0);
    }

    #[test]
    fn test_summary_is_char_bounded() {
        let long = "é".repeat(500);
        let std = standardize_project(&ProjectDraft {
            title: Some("t".to_string()),
            description: Some(long),
            category: None,
            skills_required: vec![],
            budget: None,
        });
        assert_eq!(std.summary.chars().count(), SUMMARY_CHARS);
    }
}
