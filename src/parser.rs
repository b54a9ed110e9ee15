use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::i18n::Localizer;
use crate::models::{AnalysisResult, GroundingSource, RiskLevel};

const SNIPPET_CHARS: usize = 150;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?\s*```$").expect("fence pattern is valid")
    })
}

fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Turns raw provider output into a typed verdict. Never fails: every
/// malformed shape degrades to an `UNKNOWN` verdict with diagnostic text.
#[derive(Clone)]
pub struct ResponseParser {
    localizer: Arc<dyn Localizer>,
}

impl ResponseParser {
    pub fn new(localizer: Arc<dyn Localizer>) -> Self {
        Self { localizer }
    }

    pub fn parse(&self, raw: &str) -> AnalysisResult {
        let original = raw.trim();
        // An empty fence still counts as fenced and falls through to the generic failure
        let fenced = fence_regex()
            .captures(original)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim());
        let candidate = fenced.unwrap_or(original);

        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => match Self::typed_verdict(&value) {
                Some(result) => result,
                None => {
                    log::error!("Provider JSON is missing verdict fields: {}", snippet(original));
                    AnalysisResult::unknown(
                        self.localizer.format(
                            "gemini.errorAIResponseFormatInvalidContent",
                            &[("responseText", snippet(original).as_str())],
                        ),
                        vec![
                            self.localizer.text("gemini.suggestionRetryClearer"),
                            self.localizer.text("gemini.suggestionEnsureJsonFormatUser"),
                        ],
                    )
                }
            },
            Err(e) => {
                let looks_structured = original.starts_with('{') || original.starts_with('[');
                if fenced.is_none() && !looks_structured && !original.is_empty() {
                    log::warn!("Provider answered in prose where a verdict was expected ({})", e);
                    return AnalysisResult::unknown(
                        original,
                        vec![
                            self.localizer.text("gemini.suggestionProvideMoreDetails"),
                            self.localizer.text("gemini.suggestionRetryClearer"),
                        ],
                    );
                }
                log::error!("Failed to parse provider JSON: {} (raw: {})", e, snippet(original));
                AnalysisResult::unknown(
                    self.localizer.format(
                        "gemini.errorParseResponseGeneric",
                        &[("responseText", snippet(original).as_str())],
                    ),
                    vec![
                        self.localizer.text("gemini.suggestionRetryLater"),
                        self.localizer.text("gemini.suggestionCheckInput"),
                    ],
                )
            }
        }
    }

    fn typed_verdict(value: &Value) -> Option<AnalysisResult> {
        let risk = value.get("riskLevel")?.as_str().filter(|r| !r.trim().is_empty())?;
        let explanation = value.get("explanation")?.as_str()?;
        let suggestions = value
            .get("suggestions")?
            .as_array()?
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();
        Some(AnalysisResult {
            risk_level: Some(RiskLevel::from_verdict(risk)),
            explanation: explanation.to_string(),
            suggestions,
            grounding_sources: None,
        })
    }

    /// Analysis-mode result with the envelope's citations attached.
    pub fn parse_with_citations(&self, raw: &str, citations: &[GroundingSource]) -> AnalysisResult {
        let mut result = self.parse(raw);
        if !citations.is_empty() {
            result.grounding_sources = Some(citations.to_vec());
        }
        result
    }

    /// Follow-up replies pass through verbatim; citations, if any, ride along
    /// in a conversational (`risk_level == None`) result.
    pub fn conversational(&self, raw: &str, citations: &[GroundingSource]) -> (String, Option<AnalysisResult>) {
        let carrier = (!citations.is_empty()).then(|| AnalysisResult::citations(citations.to_vec()));
        (raw.to_string(), carrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Catalog;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn parser() -> ResponseParser {
        ResponseParser::new(Arc::new(Catalog::english()))
    }

    #[test]
    fn test_plain_json_verdict() {
        let result = parser().parse(r#"{"riskLevel":"SAFE","explanation":"Fine","suggestions":[]}"#);
        assert_eq!(result.risk_level, Some(RiskLevel::Safe));
        assert_eq!(result.explanation, "Fine");
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_fenced_json_verdict() {
        let raw = "```json\n{\"riskLevel\":\"HIGH\",\"explanation\":\"Phishing\",\"suggestions\":[\"Do not click\"]}\n```";
        let result = parser().parse(raw);
        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert_eq!(result.suggestions, vec!["Do not click".to_string()]);

        let bare_fence = "```\n{\"riskLevel\":\"LOW\",\"explanation\":\"ok\",\"suggestions\":[]}\n```";
        assert_eq!(parser().parse(bare_fence).risk_level, Some(RiskLevel::Low));
    }

    #[test]
    fn test_missing_fields_yield_unknown_with_snippet() {
        let raw = r#"{"riskLevel":"HIGH","explanation":"x"}"#;
        let result = parser().parse(raw);
        assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
        assert!(result.explanation.contains(raw));
        assert_eq!(result.suggestions.len(), 2);
        assert_eq!(
            result.suggestions[0],
            Catalog::english().text("gemini.suggestionRetryClearer")
        );
    }

    #[test]
    fn test_snippet_truncated_to_150_chars() {
        let long_explanation = "y".repeat(400);
        let raw = format!(r#"{{"explanation":"{}"}}"#, long_explanation);
        let result = parser().parse(&raw);
        let expected = format!("{}...", raw.chars().take(150).collect::<String>());
        assert!(result.explanation.contains(&expected));
        assert!(!result.explanation.contains(&raw));
    }

    #[test]
    fn test_prose_is_used_verbatim() {
        let raw = "  This message is a classic advance-fee scam.  ";
        let result = parser().parse(raw);
        assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
        assert_eq!(result.explanation, "This message is a classic advance-fee scam.");
        assert_eq!(
            result.suggestions[0],
            Catalog::english().text("gemini.suggestionProvideMoreDetails")
        );
    }

    #[test]
    fn test_broken_json_yields_generic_failure() {
        let result = parser().parse(r#"{"riskLevel": "HIGH", "explanation": "#);
        assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
        assert!(result.explanation.starts_with("Could not read the AI response"));

        let fenced_prose = parser().parse("```json\nnot json at all\n```");
        assert!(fenced_prose.explanation.starts_with("Could not read the AI response"));
    }

    #[test]
    fn test_empty_fence_is_generic_failure() {
        for raw in ["```json\n```", "```json\n   \n```", "``````"] {
            let result = parser().parse(raw);
            assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
            assert!(
                result.explanation.starts_with("Could not read the AI response"),
                "input {raw:?}"
            );
            assert_eq!(
                result.suggestions[0],
                Catalog::english().text("gemini.suggestionRetryLater")
            );
        }
    }

    #[test]
    fn test_unrecognized_risk_level_maps_to_unknown() {
        let result = parser().parse(r#"{"riskLevel":"EXTREME","explanation":"e","suggestions":["a", 3]}"#);
        assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
        assert_eq!(result.explanation, "e");
        assert_eq!(result.suggestions, vec!["a".to_string()]);
    }

    #[test]
    fn test_citations_attach_in_both_modes() {
        let sources = vec![GroundingSource {
            uri: "https://a.example".into(),
            title: "A".into(),
        }];
        let verdict = parser().parse_with_citations(
            r#"{"riskLevel":"LOW","explanation":"e","suggestions":[]}"#,
            &sources,
        );
        assert_eq!(verdict.grounding_sources.as_ref(), Some(&sources));

        let (text, carrier) = parser().conversational("Sure, here is more.", &sources);
        assert_eq!(text, "Sure, here is more.");
        assert!(carrier.unwrap().is_conversational());

        let (_, carrier) = parser().conversational("No sources.", &[]);
        assert!(carrier.is_none());
    }

    #[test]
    fn test_parse_never_panics_on_fuzzed_input() {
        let fragments = [
            "", " ", "{", "}", "[", "]", "```", "```json", "\n", "\"riskLevel\"", ":", "\"SAFE\"",
            ",", "\"explanation\"", "\"suggestions\"", "[]", "null", "42", "prose ", "ünïcødé",
            "\\", "\"", "true",
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let parser = parser();
        for _ in 0..2000 {
            let len = rng.gen_range(0..12);
            let raw: String = (0..len)
                .map(|_| fragments[rng.gen_range(0..fragments.len())])
                .collect();
            let result = parser.parse(&raw);
            assert!(result.risk_level.is_some(), "input {raw:?}");
        }
    }

    #[test]
    fn test_empty_input_is_generic_failure() {
        let result = parser().parse("   ");
        assert_eq!(result.risk_level, Some(RiskLevel::Unknown));
        assert!(result.explanation.starts_with("Could not read the AI response"));
    }
}
