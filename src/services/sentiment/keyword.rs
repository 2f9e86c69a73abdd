use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use super::{SentimentAnalyzer, SentimentScore};
use crate::Result;

const BULLISH: &[&str] = &[
    "surge", "surges", "rally", "rallies", "bullish", "record", "high", "gain", "gains", "adoption",
    "inflows", "approve", "approved", "approval", "soar", "soars", "rise", "rises", "growth", "grows",
    "upgrade", "breakout", "optimism",
];

const BEARISH: &[&str] = &[
    "plunge", "plunges", "crash", "crashes", "bearish", "hack", "hacked", "breach", "ban", "fell",
    "fall", "falls", "decline", "selloff", "selling", "lawsuit", "fraud", "weak", "outflows", "fear",
    "halted", "warn", "warns", "drop", "drops",
];

/// Offline lexicon scorer: (bullish hits - bearish hits) / total hits.
pub struct KeywordSentimentAnalyzer {
    bullish: HashSet<&'static str>,
    bearish: HashSet<&'static str>,
}

impl Default for KeywordSentimentAnalyzer {
    fn default() -> Self {
        Self {
            bullish: BULLISH.iter().copied().collect(),
            bearish: BEARISH.iter().copied().collect(),
        }
    }
}

impl KeywordSentimentAnalyzer {
    pub fn score_text(&self, text: &str) -> SentimentScore {
        let lower = text.to_lowercase();
        let mut positive = 0u32;
        let mut negative = 0u32;
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            if self.bullish.contains(word) {
                positive += 1;
            } else if self.bearish.contains(word) {
                negative += 1;
            }
        }

        let hits = positive + negative;
        if hits == 0 {
            return SentimentScore {
                score: 0.0,
                reasoning: "No sentiment keywords found".to_string(),
            };
        }
        SentimentScore {
            score: (positive as f64 - negative as f64) / hits as f64,
            reasoning: format!("{positive} bullish and {negative} bearish keywords"),
        }
    }
}

impl SentimentAnalyzer for KeywordSentimentAnalyzer {
    fn name(&self) -> &str {
        "keyword"
    }

    fn analyze<'a>(
        &'a self,
        title: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore>> + Send + 'a>> {
        let score = self.score_text(&format!("{title} {description}"));
        Box::pin(async move { Ok(score) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_direction() {
        let analyzer = KeywordSentimentAnalyzer::default();
        assert!(analyzer.score_text("Bitcoin surges to record high").score > 0.0);
        assert!(analyzer.score_text("Exchange hack: tokens plunge").score < 0.0);
        assert_eq!(analyzer.score_text("Regulators meet on Tuesday").score, 0.0);
    }

    #[test]
    fn score_is_bounded() {
        let analyzer = KeywordSentimentAnalyzer::default();
        let s = analyzer.score_text("rally rally rally surge");
        assert_eq!(s.score, 1.0);
    }
}
