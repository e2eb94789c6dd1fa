//! Fuzzy wake-phrase detection over a transcript.
//!
//! The cloud transcriber regularly mangles short proper nouns ("anka" comes
//! back as "ana", "anko", "anka,"), so matching is approximate: every
//! whitespace token of the transcript is scored against the wake phrase with
//! an indel-based similarity ratio in `[0, 100]` and the best token wins.

/// Outcome of a successful wake match.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeMatch {
    /// The transcript token that scored highest.
    pub token: String,
    /// Its similarity to the wake phrase, `0.0..=100.0`.
    pub score: f64,
}

/// Pure, deterministic scorer for one configured wake phrase.
#[derive(Debug, Clone)]
pub struct WakeWordMatcher {
    phrase: String,
    threshold: f64,
}

impl WakeWordMatcher {
    /// `threshold` is clamped to `0..=100`. Observed deployments used values
    /// between 30 and 70.
    pub fn new(phrase: &str, threshold: f64) -> Self {
        Self {
            phrase: phrase.trim().to_lowercase(),
            threshold: threshold.clamp(0.0, 100.0),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether `transcript` contains a token close enough to the wake phrase.
    pub fn score(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }

    /// Best-scoring token, if it meets the threshold.
    pub fn find(&self, transcript: &str) -> Option<WakeMatch> {
        self.best_token(transcript)
            .filter(|m| m.score >= self.threshold)
    }

    /// Best-scoring token regardless of threshold. `None` for a transcript
    /// without tokens.
    pub fn best_token(&self, transcript: &str) -> Option<WakeMatch> {
        let lowered = transcript.to_lowercase();
        let mut best: Option<WakeMatch> = None;
        for token in lowered.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            let score = similarity_ratio(token, &self.phrase);
            // Strict `>` keeps the first of equally scored tokens.
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(WakeMatch {
                    token: token.to_string(),
                    score,
                });
            }
        }
        best
    }
}

/// Normalized indel similarity of two strings, `0.0..=100.0`.
///
/// `100 * (|a| + |b| - indel(a, b)) / (|a| + |b|)` where `indel` counts
/// insertions and deletions only, which equals `200 * lcs / (|a| + |b|)`.
/// Two empty strings are identical (100).
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = longest_common_subsequence(&a, &b);
    200.0 * lcs as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_token_scores_one_hundred() {
        let matcher = WakeWordMatcher::new("anka", 70.0);
        let m = matcher
            .find("hey anka how are you")
            .expect("exact wake word should match");
        assert_eq!(m.token, "anka");
        assert!((m.score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn near_miss_token_matches_when_ratio_meets_threshold() {
        let ratio = similarity_ratio("anka", "ana");
        assert!((ratio - 600.0 / 7.0).abs() < 1e-9, "ratio={ratio}");

        let matcher = WakeWordMatcher::new("anka", 70.0);
        assert!(matcher.score("hey ana how are you"));
    }

    #[test]
    fn unrelated_sentence_does_not_match_at_seventy() {
        let matcher = WakeWordMatcher::new("anka", 70.0);
        assert!(!matcher.score("completely unrelated sentence"));
    }

    #[test]
    fn low_threshold_accepts_weak_tokens() {
        // "unrelated" shares "na" with "anka": 200 * 2 / 13 ≈ 30.8
        let matcher = WakeWordMatcher::new("anka", 30.0);
        let m = matcher
            .find("completely unrelated sentence")
            .expect("threshold 30 should accept the weak match");
        assert_eq!(m.token, "unrelated");
    }

    #[test]
    fn matching_ignores_case_and_edge_punctuation() {
        let matcher = WakeWordMatcher::new("Anka", 90.0);
        let m = matcher.find("ANKA, what time is it?").expect("should match");
        assert_eq!(m.token, "anka");
    }

    #[test]
    fn empty_transcript_never_matches() {
        let matcher = WakeWordMatcher::new("anka", 0.0);
        assert!(matcher.best_token("   ").is_none());
        assert!(!matcher.score(""));
    }

    #[test]
    fn scoring_is_deterministic() {
        let matcher = WakeWordMatcher::new("anka", 50.0);
        let first = matcher.best_token("ankara anko anka");
        for _ in 0..10 {
            assert_eq!(matcher.best_token("ankara anko anka"), first);
        }
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(WakeWordMatcher::new("anka", 250.0).threshold(), 100.0);
        assert_eq!(WakeWordMatcher::new("anka", -5.0).threshold(), 0.0);
    }

    #[test]
    fn ratio_edge_cases() {
        assert_eq!(similarity_ratio("", ""), 100.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
    }
}
