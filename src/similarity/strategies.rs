/// Fallback similarity strategies and rank fusion
///
/// Four independent strategies — text, semantic, category, temporal — each
/// produce (article_id, score) pairs in [0, 1]. Rank fusion is a linear
/// combination with fixed weights {text: 0.4, semantic: 0.3, category: 0.2,
/// temporal: 0.1}. All scoring functions here are pure; the engine in
/// mod.rs owns the I/O.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::Article;

/// Strategy weights for rank fusion.
pub const TEXT_WEIGHT: f64 = 0.4;
pub const SEMANTIC_WEIGHT: f64 = 0.3;
pub const CATEGORY_WEIGHT: f64 = 0.2;
pub const TEMPORAL_WEIGHT: f64 = 0.1;

/// Temporal candidate window around the target's publish time, in days.
pub const TEMPORAL_WINDOW_DAYS: i64 = 7;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "may", "more", "most", "no", "not", "of", "on", "or", "our", "she",
    "should", "so", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "up", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "would", "you", "your",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Unigrams and bigrams over the target's title, summary, and description,
/// with stop words dropped. Bigrams are kept only when neither word is a
/// stop word.
pub fn extract_ngrams(article: &Article) -> Vec<String> {
    let text = format!(
        "{} {} {}",
        article.title, article.summary, article.description
    );
    let tokens = words(&text);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in &tokens {
        if !is_stop_word(token) && seen.insert(token.clone()) {
            out.push(token.clone());
        }
    }
    for pair in tokens.windows(2) {
        if is_stop_word(&pair[0]) || is_stop_word(&pair[1]) {
            continue;
        }
        let bigram = format!("{} {}", pair[0], pair[1]);
        if seen.insert(bigram.clone()) {
            out.push(bigram);
        }
    }
    out
}

/// Named entities (capitalized runs), quoted phrases, and technical tokens
/// (digits, hyphens, mixed case) from the target's title, summary, and
/// description.
pub fn extract_semantic_terms(article: &Article) -> Vec<String> {
    let text = format!(
        "{} {} {}",
        article.title, article.summary, article.description
    );
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |term: String| {
        let t = term.trim().to_string();
        if t.len() > 1 && seen.insert(t.to_lowercase()) {
            out.push(t);
        }
    };

    // Quoted phrases
    let mut rest = text.as_str();
    while let Some(start) = rest.find('"') {
        let Some(len) = rest[start + 1..].find('"') else {
            break;
        };
        push(rest[start + 1..start + 1 + len].to_string());
        rest = &rest[start + 1 + len + 1..];
    }

    // Capitalized runs: consecutive words starting with an uppercase letter
    let raw_words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    let mut run: Vec<&str> = Vec::new();
    for word in raw_words.iter().copied().chain(std::iter::once("")) {
        let capitalized = word.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
        if capitalized {
            run.push(word);
            continue;
        }
        if run.len() > 1 || (run.len() == 1 && run[0].len() > 3) {
            push(run.join(" "));
        }
        run.clear();
    }

    // Technical tokens: digits, hyphens, or internal capitals
    for word in &raw_words {
        let has_digit = word.chars().any(|c| c.is_ascii_digit());
        let internal_cap = word.chars().skip(1).any(|c| c.is_uppercase());
        if has_digit || internal_cap || word.contains('-') {
            push(word.to_string());
        }
    }

    out
}

/// Normalized rank score: position i of n maps to (n - i) / n, so the top
/// result scores 1.0 and scores decay linearly. Used by the text and
/// semantic strategies, whose backends return an ordered page.
pub fn rank_score(position: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (total - position) as f64 / total as f64
}

/// Category affinity between the target and a candidate:
/// 0.3 * sentiment match + 0.2 * source match + 0.3 * keyword overlap.
pub fn category_score(target: &Article, candidate: &Article) -> f64 {
    let sentiment_match = match (target.sentiment, candidate.sentiment) {
        (Some(a), Some(b)) if a == b => 1.0,
        _ => 0.0,
    };
    let source_match = if !target.source.name.is_empty()
        && target.source.name.eq_ignore_ascii_case(&candidate.source.name)
    {
        1.0
    } else {
        0.0
    };
    let category_match = keyword_overlap(&target.keywords, &candidate.keywords);
    0.3 * sentiment_match + 0.2 * source_match + 0.3 * category_match
}

fn keyword_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set: HashSet<String> = a.iter().map(|k| k.to_lowercase()).collect();
    let shared = b.iter().filter(|k| set.contains(&k.to_lowercase())).count();
    shared as f64 / a.len().max(b.len()) as f64
}

/// Temporal proximity score: max(0, 1 - delta_days / 30). Candidates are
/// pre-filtered to within TEMPORAL_WINDOW_DAYS of the target.
pub fn temporal_score(target: DateTime<Utc>, candidate: DateTime<Utc>) -> f64 {
    let delta_days = (target - candidate).num_seconds().abs() as f64 / 86_400.0;
    (1.0 - delta_days / 30.0).max(0.0)
}

/// Per-strategy scored candidates, tagged for fusion.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub weight: f64,
    pub scores: Vec<(String, f64)>,
}

/// Linear rank fusion: for each candidate, sum weight * score over every
/// strategy that returned it. Output is sorted by fused score descending.
pub fn fuse(strategies: &[StrategyResult]) -> Vec<(String, f64)> {
    let mut fused: HashMap<String, f64> = HashMap::new();
    for strategy in strategies {
        for (id, score) in &strategy.scores {
            *fused.entry(id.clone()).or_default() += strategy.weight * score;
        }
    }
    let mut result: Vec<(String, f64)> = fused.into_iter().collect();
    result.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(title: &str) -> Article {
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        Article::new(title, ts)
    }

    #[test]
    fn test_ngrams_drop_stop_words() {
        let a = article("The chips are down for the semiconductor industry");
        let grams = extract_ngrams(&a);
        assert!(grams.contains(&"chips".to_string()));
        assert!(grams.contains(&"semiconductor industry".to_string()));
        assert!(!grams.iter().any(|g| g == "the" || g == "are" || g == "for"));
        // No bigram may span a stop word
        assert!(!grams.iter().any(|g| g.starts_with("the ") || g.ends_with(" the")));
    }

    #[test]
    fn test_ngrams_dedup() {
        let a = article("chips chips chips");
        let grams = extract_ngrams(&a);
        assert_eq!(grams.iter().filter(|g| g.as_str() == "chips").count(), 1);
    }

    #[test]
    fn test_semantic_terms_capitalized_runs() {
        let mut a = article("placeholder");
        a.title = String::new();
        a.summary = "Talks between Quantum Dynamics and the European Union stalled".to_string();
        let terms = extract_semantic_terms(&a);
        assert!(terms.contains(&"Quantum Dynamics".to_string()));
        assert!(terms.contains(&"European Union".to_string()));
    }

    #[test]
    fn test_semantic_terms_quoted_and_technical() {
        let mut a = article("x");
        a.title = "Chipmaker ships \"quantum leap\" H100-class GPU".to_string();
        let terms = extract_semantic_terms(&a);
        assert!(terms.contains(&"quantum leap".to_string()));
        assert!(terms.iter().any(|t| t.contains("H100")));
    }

    #[test]
    fn test_rank_score_decays() {
        assert_eq!(rank_score(0, 4), 1.0);
        assert_eq!(rank_score(3, 4), 0.25);
        assert_eq!(rank_score(0, 0), 0.0);
    }

    #[test]
    fn test_category_score_components() {
        use crate::model::{Sentiment, Source};
        let mut target = article("t");
        target.sentiment = Some(Sentiment::Positive);
        target.source = Source { name: "wire".into(), id: None };
        target.keywords = vec!["ai".into(), "chip".into()];

        let mut candidate = article("c");
        candidate.sentiment = Some(Sentiment::Positive);
        candidate.source = Source { name: "wire".into(), id: None };
        candidate.keywords = vec!["ai".into(), "chip".into()];

        // Full match: 0.3 + 0.2 + 0.3
        assert!((category_score(&target, &candidate) - 0.8).abs() < 1e-9);

        candidate.sentiment = Some(Sentiment::Negative);
        candidate.source.name = "other".into();
        candidate.keywords = vec!["garden".into()];
        assert_eq!(category_score(&target, &candidate), 0.0);
    }

    #[test]
    fn test_temporal_score_window() {
        let target = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let same_day = target;
        let five_days = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let far = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!((temporal_score(target, same_day) - 1.0).abs() < 1e-9);
        assert!((temporal_score(target, five_days) - (1.0 - 5.0 / 30.0)).abs() < 1e-9);
        assert_eq!(temporal_score(target, far), 0.0);
    }

    #[test]
    fn test_fusion_weights_and_order() {
        let strategies = vec![
            StrategyResult {
                weight: TEXT_WEIGHT,
                scores: vec![("a".into(), 1.0), ("b".into(), 0.5)],
            },
            StrategyResult {
                weight: TEMPORAL_WEIGHT,
                scores: vec![("b".into(), 1.0)],
            },
        ];
        let fused = fuse(&strategies);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 0.4).abs() < 1e-9);
        assert!((fused[1].1 - (0.2 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_fusion_empty() {
        assert!(fuse(&[]).is_empty());
    }
}
