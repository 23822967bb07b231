use serde::{Deserialize, Serialize};

/// Identifier embedded in every fingerprint and persisted result. Bumping it
/// partitions the cache and result space so a changed analysis algorithm
/// never serves results produced by an older one.
pub const PIPELINE_VERSION: &str = "v2";

/// Outcome category of a fact-check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Confirmed,
    Contradicted,
    Disputed,
    Uncertain,
    Info,
}

impl Verdict {
    /// Map free-form model verdict wording onto the fixed verdict set.
    /// Unknown or empty wording lands on `Uncertain`.
    pub fn normalize(raw: &str) -> Verdict {
        let v = raw.trim().to_lowercase();
        if v.is_empty() {
            return Verdict::Uncertain;
        }
        if v.contains("misleading") || v.contains("partial") || v.contains("mixed") {
            return Verdict::Disputed;
        }
        if v.contains("false")
            || v.contains("fake")
            || v.contains("incorrect")
            || v.contains("contradicted")
        {
            return Verdict::Contradicted;
        }
        if v.contains("true")
            || v.contains("accurate")
            || v.contains("correct")
            || v.contains("confirmed")
        {
            return Verdict::Confirmed;
        }
        if v.contains("disputed") {
            return Verdict::Disputed;
        }
        if v.contains("info") {
            return Verdict::Info;
        }
        Verdict::Uncertain
    }

    /// Whether this verdict asserts something about the world and therefore
    /// requires cited evidence.
    pub fn is_assertive(self) -> bool {
        matches!(
            self,
            Verdict::Confirmed | Verdict::Contradicted | Verdict::Disputed
        )
    }
}

/// A cited evidence source attached to a verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

/// Per-claim analysis line within a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownItem {
    pub claim: String,
    pub status: String,
    pub reason: String,
    /// 1-based index into `sources`; 0 means no supporting source.
    pub source_id: u32,
}

/// Final output of the verification pipeline. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verdict: Verdict,
    pub confidence: f64,
    pub summary: String,
    pub key_claim: Option<String>,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub breakdown: Vec<BreakdownItem>,
    pub model_used: String,
    pub pipeline_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_id: Option<uuid::Uuid>,
}

impl VerificationResult {
    /// Trust rule: an assertive verdict with no cited source is downgraded to
    /// `Uncertain` with confidence capped at 0.5. A confident-sounding but
    /// unsupported verdict never reaches a client.
    pub fn enforce_trust_rule(&mut self) {
        if self.verdict.is_assertive() && self.sources.is_empty() {
            self.verdict = Verdict::Uncertain;
            self.confidence = self.confidence.min(0.5);
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_wording_families() {
        assert_eq!(Verdict::normalize("Mostly TRUE"), Verdict::Confirmed);
        assert_eq!(Verdict::normalize("accurate"), Verdict::Confirmed);
        assert_eq!(Verdict::normalize("FALSE"), Verdict::Contradicted);
        assert_eq!(Verdict::normalize("fake news"), Verdict::Contradicted);
        assert_eq!(Verdict::normalize("misleading"), Verdict::Disputed);
        assert_eq!(Verdict::normalize("partially correct"), Verdict::Disputed);
        assert_eq!(Verdict::normalize(""), Verdict::Uncertain);
        assert_eq!(Verdict::normalize("banana"), Verdict::Uncertain);
        assert_eq!(Verdict::normalize("INFO"), Verdict::Info);
    }

    #[test]
    fn trust_rule_downgrades_unsupported_assertions() {
        let mut result = VerificationResult {
            verdict: Verdict::Confirmed,
            confidence: 0.95,
            summary: "looks right".into(),
            key_claim: None,
            sources: vec![],
            breakdown: vec![],
            model_used: "test".into(),
            pipeline_version: PIPELINE_VERSION.into(),
            check_id: None,
        };
        result.enforce_trust_rule();
        assert_eq!(result.verdict, Verdict::Uncertain);
        assert!(result.confidence <= 0.5);
    }

    #[test]
    fn trust_rule_keeps_supported_assertions() {
        let mut result = VerificationResult {
            verdict: Verdict::Contradicted,
            confidence: 0.9,
            summary: "refuted".into(),
            key_claim: None,
            sources: vec![Source {
                title: "Encyclopedia".into(),
                url: "https://example.org/a".into(),
                excerpt: "evidence".into(),
            }],
            breakdown: vec![],
            model_used: "test".into(),
            pipeline_version: PIPELINE_VERSION.into(),
            check_id: None,
        };
        result.enforce_trust_rule();
        assert_eq!(result.verdict, Verdict::Contradicted);
        assert!((result.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn trust_rule_leaves_uncertain_alone() {
        let mut result = VerificationResult {
            verdict: Verdict::Uncertain,
            confidence: 0.9,
            summary: "unclear".into(),
            key_claim: None,
            sources: vec![],
            breakdown: vec![],
            model_used: "test".into(),
            pipeline_version: PIPELINE_VERSION.into(),
            check_id: None,
        };
        result.enforce_trust_rule();
        assert_eq!(result.verdict, Verdict::Uncertain);
        assert!((result.confidence - 0.9).abs() < f64::EPSILON);
    }
}
