//! Keyword extraction shared by the standardization and matching heuristics.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    /// Words of three characters or more; keeps `c++`, `c#` and `node.js` intact
    static ref WORD_PATTERN: Regex = Regex::new(r"(?i)\b[a-z][a-z0-9+#.]{2,}").unwrap();

    /// Technologies that map directly onto marketplace skills
    static ref TECH_PATTERN: Regex = Regex::new(
        r"(?i)\b(rust|react|vue|angular|node(?:\.js)?|python|django|flask|java|kotlin|swift|flutter|php|laravel|wordpress|shopify|figma|sql|postgres(?:ql)?|mongodb|aws|docker|kubernetes|seo|typescript|javascript)\b"
    ).unwrap();

    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "and", "for", "with", "that", "this", "from", "are", "our", "you",
        "your", "will", "have", "has", "but", "not", "all", "can", "need", "needs",
        "want", "into", "about", "les", "des", "une", "pour", "avec", "dans",
    ]
    .into_iter()
    .collect();
}

/// Lower-cased words of `text`, stopwords and trailing dots removed.
pub fn words(text: &str) -> Vec<String> {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

/// The `limit` most frequent words, ties broken alphabetically.
pub fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for word in words(text) {
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    // BTreeMap iteration is alphabetical and sort_by is stable
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Known technologies mentioned in `text`, normalized and de-duplicated.
pub fn detect_technologies(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TECH_PATTERN
        .find_iter(text)
        .map(|m| normalize_skill(m.as_str()))
        .filter(|skill| seen.insert(skill.clone()))
        .collect()
}

/// Canonical spelling used to compare skills.
pub fn normalize_skill(skill: &str) -> String {
    let lower = skill.trim().to_lowercase();
    match lower.as_str() {
        "node.js" | "nodejs" => "node".to_string(),
        "postgresql" => "postgres".to_string(),
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_drop_stopwords_and_short_tokens() {
        let words = words("Build the new API for our shop, ok?");
        assert_eq!(words, vec!["build", "new", "api", "shop"]);
    }

    #[test]
    fn test_top_keywords_by_frequency() {
        let text = "shopify store, shopify theme, store migration";
        let top = top_keywords(text, 2);
        assert_eq!(top, vec!["shopify", "store"]);
    }

    #[test]
    fn test_detect_technologies_normalizes() {
        let techs = detect_technologies("React front, Node.js API, PostgreSQL and node workers");
        assert_eq!(techs, vec!["react", "node", "postgres"]);
    }
}
