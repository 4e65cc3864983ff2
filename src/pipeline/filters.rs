//! Filter pipeline — ordered predicate/extraction stages over pairs.
//!
//! Stages run cheapest-first and fail closed:
//! 1. Keyword stage — every configured token must appear in the request body.
//! 2. Pattern stage — fixed-length numeric identifier must be present
//!    (subject+body in strict mode, body only in lax mode).
//! 3. Name extraction — informational only, never gates the pipeline.
//!
//! A rejection short-circuits the remaining stages for that pair.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::pairing::ConversationPair;

/// Default keyword tokens a consultation request must contain.
pub fn default_keywords() -> Vec<String> {
    vec!["교수님".into(), "안녕하세요".into(), "입니다".into()]
}

/// Default numeric-identifier length (student id).
pub const DEFAULT_PATTERN_LENGTH: usize = 8;

/// Where the pattern stage searches for the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Search subject and body.
    #[default]
    Strict,
    /// Search body only.
    Lax,
}

/// Filter configuration for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Required substrings in the request body (case-sensitive).
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    /// Length of the numeric identifier to require. 0 disables the stage.
    #[serde(default = "default_pattern_length")]
    pub pattern_length: usize,
    #[serde(default)]
    pub match_mode: MatchMode,
}

fn default_pattern_length() -> usize {
    DEFAULT_PATTERN_LENGTH
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            pattern_length: DEFAULT_PATTERN_LENGTH,
            match_mode: MatchMode::Strict,
        }
    }
}

/// Fields extracted from an accepted pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub student_id: Option<String>,
    pub student_name: Option<String>,
}

/// Per-pair pipeline result, consumed immediately by the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass(Extracted),
    Reject { stage: &'static str, reason: String },
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass(_))
    }
}

/// Domain words that must never be accepted as a student name, even when a
/// name pattern matches them.
const NAME_STOPLIST: &[&str] = &[
    "학번",
    "학생",
    "교수님",
    "안녕하세요",
    "입니다",
    "드립니다",
    "감사합니다",
    "상담",
];

/// The staged filter pipeline. Re-entrant — all state is compiled patterns.
pub struct FilterPipeline {
    config: FilterConfig,
    id_pattern: Option<Regex>,
    name_patterns: Vec<Regex>,
}

impl FilterPipeline {
    pub fn new(config: FilterConfig) -> Self {
        let id_pattern = (config.pattern_length > 0).then(|| {
            Regex::new(&format!("[0-9]{{{}}}", config.pattern_length))
                .expect("numeric pattern is always valid")
        });

        // Ordered name patterns, first successful match wins:
        // 1. first-person self-identification ("저는 [id] [학번] <name>입니다")
        // 2. identifier-adjacent name ("<id> [학번] <name>")
        let name_patterns = vec![
            Regex::new(r"저는\s*(?:[0-9]{4,10}\s*)?(?:학번\s*)?([가-힣]{2,4})\s*입니다")
                .expect("static pattern"),
            Regex::new(r"[0-9]{6,10}\s*(?:학번\s*)?([가-힣]{2,7})").expect("static pattern"),
        ];

        Self {
            config,
            id_pattern,
            name_patterns,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Run one pair through the stages.
    pub fn evaluate(&self, pair: &ConversationPair) -> FilterVerdict {
        let body = &pair.request.body;

        // Stage 1: keywords — fail closed on the first missing token.
        for keyword in &self.config.keywords {
            if !body.contains(keyword.as_str()) {
                return FilterVerdict::Reject {
                    stage: "keyword",
                    reason: format!("missing keyword '{keyword}'"),
                };
            }
        }

        // Stage 2: numeric identifier.
        let student_id = match &self.id_pattern {
            Some(pattern) => {
                let in_subject = match self.config.match_mode {
                    MatchMode::Strict => pattern.find(&pair.request.subject),
                    MatchMode::Lax => None,
                };
                match in_subject.or_else(|| pattern.find(body)) {
                    Some(m) => Some(m.as_str().to_string()),
                    None => {
                        return FilterVerdict::Reject {
                            stage: "pattern",
                            reason: format!(
                                "no {}-digit identifier found",
                                self.config.pattern_length
                            ),
                        };
                    }
                }
            }
            None => None,
        };

        // Stage 3: name extraction — metadata enrichment only.
        let student_name = self.extract_name(body);

        FilterVerdict::Pass(Extracted {
            student_id,
            student_name,
        })
    }

    /// Run all pairs in order, invoking `on_progress(index, total)` once per
    /// pair processed (1-based, pass or reject alike).
    pub fn run(
        &self,
        pairs: &[ConversationPair],
        mut on_progress: impl FnMut(usize, usize),
    ) -> Vec<FilterVerdict> {
        let total = pairs.len();
        let mut verdicts = Vec::with_capacity(total);
        for (idx, pair) in pairs.iter().enumerate() {
            verdicts.push(self.evaluate(pair));
            on_progress(idx + 1, total);
        }
        verdicts
    }

    fn extract_name(&self, body: &str) -> Option<String> {
        for pattern in &self.name_patterns {
            if let Some(captures) = pattern.captures(body)
                && let Some(candidate) = captures.get(1)
                && let Some(name) = clean_name(candidate.as_str())
            {
                return Some(name);
            }
        }
        None
    }
}

/// Normalize a captured name candidate: strip a glued "입니다" suffix, then
/// reject stoplisted words and out-of-range lengths.
fn clean_name(candidate: &str) -> Option<String> {
    let name = candidate.trim().trim_end_matches("입니다").trim();
    let chars = name.chars().count();
    if !(2..=4).contains(&chars) {
        return None;
    }
    if NAME_STOPLIST.contains(&name) {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::RawMessage;
    use chrono::{TimeZone, Utc};

    fn pair(subject: &str, body: &str) -> ConversationPair {
        let request = RawMessage {
            id: "req".into(),
            sender: "student@univ.edu".into(),
            recipient: "prof@univ.edu".into(),
            subject: subject.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            body: body.into(),
            in_reply_to: None,
            references: vec![],
        };
        let mut response = request.clone();
        response.id = "resp".into();
        response.sender = "prof@univ.edu".into();
        response.in_reply_to = Some("req".into());
        ConversationPair { request, response }
    }

    const VALID_BODY: &str = "교수님 안녕하세요. 저는 20251234 학번 김철수입니다. 상담 요청드립니다.";

    #[test]
    fn all_keywords_and_id_pass() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let verdict = pipeline.evaluate(&pair("상담 요청", VALID_BODY));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_id.as_deref(), Some("20251234"));
                assert_eq!(extracted.student_name.as_deref(), Some("김철수"));
            }
            other => panic!("Expected pass, got {other:?}"),
        }
    }

    #[test]
    fn missing_keyword_rejects_regardless_of_id() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let verdict = pipeline.evaluate(&pair("문의", "학번 20251111 문의사항 있습니다."));
        match verdict {
            FilterVerdict::Reject { stage, reason } => {
                assert_eq!(stage, "keyword");
                assert!(reason.contains("교수님"));
            }
            other => panic!("Expected keyword reject, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_rejects_at_pattern_stage() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let verdict = pipeline.evaluate(&pair(
            "상담 문의",
            "교수님 안녕하세요. 저는 김영희입니다. 상담 받고 싶습니다.",
        ));
        assert_eq!(
            verdict,
            FilterVerdict::Reject {
                stage: "pattern",
                reason: "no 8-digit identifier found".into()
            }
        );
    }

    #[test]
    fn strict_mode_searches_subject() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let verdict = pipeline.evaluate(&pair(
            "상담 요청 (20259876)",
            "교수님 안녕하세요. 저는 김영희입니다.",
        ));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_id.as_deref(), Some("20259876"));
            }
            other => panic!("Expected pass via subject, got {other:?}"),
        }
    }

    #[test]
    fn lax_mode_ignores_subject() {
        let pipeline = FilterPipeline::new(FilterConfig {
            match_mode: MatchMode::Lax,
            ..FilterConfig::default()
        });
        let verdict = pipeline.evaluate(&pair(
            "상담 요청 (20259876)",
            "교수님 안녕하세요. 저는 김영희입니다.",
        ));
        assert!(!verdict.passed());
    }

    #[test]
    fn custom_pattern_length() {
        let pipeline = FilterPipeline::new(FilterConfig {
            pattern_length: 6,
            ..FilterConfig::default()
        });
        let verdict = pipeline.evaluate(&pair(
            "문의",
            "교수님 안녕하세요. 저는 201234 학번입니다.",
        ));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_id.as_deref(), Some("201234"));
            }
            other => panic!("Expected pass, got {other:?}"),
        }
    }

    #[test]
    fn zero_pattern_length_disables_stage() {
        let pipeline = FilterPipeline::new(FilterConfig {
            pattern_length: 0,
            ..FilterConfig::default()
        });
        let verdict = pipeline.evaluate(&pair(
            "상담",
            "교수님 안녕하세요. 저는 김영희입니다.",
        ));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_id, None);
                assert_eq!(extracted.student_name.as_deref(), Some("김영희"));
            }
            other => panic!("Expected pass, got {other:?}"),
        }
    }

    #[test]
    fn name_from_id_adjacent_form() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let verdict = pipeline.evaluate(&pair(
            "상담",
            "교수님 안녕하세요. 20251234 박지연 상담 요청입니다.",
        ));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_name.as_deref(), Some("박지연"));
            }
            other => panic!("Expected pass, got {other:?}"),
        }
    }

    #[test]
    fn stoplisted_word_is_never_a_name() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        // "20259876입니다" would capture "입니다" without the stoplist/cleanup.
        let verdict = pipeline.evaluate(&pair(
            "질문",
            "교수님 안녕하세요. 저는 학번 20259876입니다. 과제 관련 질문드립니다.",
        ));
        match verdict {
            FilterVerdict::Pass(extracted) => {
                assert_eq!(extracted.student_id.as_deref(), Some("20259876"));
                assert_eq!(extracted.student_name, None);
            }
            other => panic!("Expected pass, got {other:?}"),
        }
    }

    #[test]
    fn run_reports_progress_per_pair() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let pairs = vec![
            pair("a", VALID_BODY),
            pair("b", "no keywords here"),
            pair("c", VALID_BODY),
        ];

        let mut seen = Vec::new();
        let verdicts = pipeline.run(&pairs, |idx, total| seen.push((idx, total)));

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(verdicts.len(), 3);
        assert!(verdicts[0].passed());
        assert!(!verdicts[1].passed());
        assert!(verdicts[2].passed());
    }

    #[test]
    fn rerun_is_deterministic() {
        let pipeline = FilterPipeline::new(FilterConfig::default());
        let pairs = vec![pair("a", VALID_BODY), pair("b", "교수님만 있습니다 안녕하세요")];
        let first = pipeline.run(&pairs, |_, _| {});
        let second = pipeline.run(&pairs, |_, _| {});
        assert_eq!(first, second);
    }
}
