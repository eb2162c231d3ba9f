use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub issue: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Structured final estimate shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateResult {
    pub analysis: Analysis,
    pub cost_estimate: CostEstimate,
    /// Set when this result is a degraded placeholder rather than a
    /// real backend answer.
    #[serde(default)]
    pub fallback: bool,
}

/// Everything the analysis backend can come back with, validated once
/// at the boundary instead of poked at optimistically all over the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Final(EstimateResult),
    NeedsClarification { questions: Vec<String> },
    OffTopic { message: String },
}

impl AnalysisOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Final(result) if result.fallback => "fallback_result",
            Self::Final(_) => "final_result",
            Self::NeedsClarification { .. } => "needs_clarification",
            Self::OffTopic { .. } => "off_topic",
        }
    }
}

/// Parses the backend's loosely-shaped JSON into a tagged outcome.
///
/// The response is dynamic: `analysis` and `cost_estimate` appear only
/// on success, `questions` only when clarification is needed, and a
/// `fallback` marker may ride along on either. Anything contradictory
/// or incomplete is an error here, not a guess downstream.
pub fn parse_outcome(payload: &Value) -> Result<AnalysisOutcome> {
    let Some(root) = payload.as_object() else {
        bail!("analysis response is not a JSON object");
    };

    if root
        .get("is_off_topic")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let message = root
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("This does not look like a home-maintenance issue we handle.")
            .to_string();
        return Ok(AnalysisOutcome::OffTopic { message });
    }

    if root
        .get("needs_clarification")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let questions: Vec<String> = root
            .get("questions")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if questions.is_empty() {
            bail!("backend asked for clarification without any questions");
        }
        return Ok(AnalysisOutcome::NeedsClarification { questions });
    }

    if !root
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let message = root
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("backend reported failure without a message");
        bail!("analysis failed: {message}");
    }

    let analysis = parse_analysis(root.get("analysis"))?;
    let cost_estimate = parse_cost_estimate(root.get("cost_estimate"))?;
    let fallback = root
        .get("fallback")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(AnalysisOutcome::Final(EstimateResult {
        analysis,
        cost_estimate,
        fallback,
    }))
}

fn parse_analysis(value: Option<&Value>) -> Result<Analysis> {
    let Some(obj) = value.and_then(Value::as_object) else {
        bail!("successful response is missing the analysis object");
    };
    let issue = obj
        .get("issue")
        .or_else(|| obj.get("problem"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let Some(issue) = issue else {
        bail!("analysis object has no issue description");
    };
    Ok(Analysis {
        issue: issue.to_string(),
        detail: obj
            .get("detail")
            .or_else(|| obj.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string),
        severity: obj
            .get("severity")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_cost_estimate(value: Option<&Value>) -> Result<CostEstimate> {
    let Some(obj) = value.and_then(Value::as_object) else {
        bail!("successful response is missing the cost_estimate object");
    };
    let min = obj
        .get("min")
        .or_else(|| obj.get("min_cost"))
        .and_then(Value::as_f64);
    let max = obj
        .get("max")
        .or_else(|| obj.get("max_cost"))
        .and_then(Value::as_f64);
    let (Some(min), Some(max)) = (min, max) else {
        bail!("cost_estimate is missing min/max bounds");
    };
    if min < 0.0 || max < min {
        bail!("cost_estimate bounds are inverted ({min}..{max})");
    }
    Ok(CostEstimate {
        min,
        max,
        currency: obj
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("EUR")
            .to_string(),
    })
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_outcome, AnalysisOutcome};

    #[test]
    fn parses_final_result() {
        let payload = json!({
            "success": true,
            "analysis": {"issue": "Leaking trap under sink", "detail": "Corroded joint", "severity": "medium"},
            "cost_estimate": {"min": 90.0, "max": 140.0, "currency": "EUR"}
        });
        match parse_outcome(&payload).unwrap() {
            AnalysisOutcome::Final(result) => {
                assert_eq!(result.analysis.issue, "Leaking trap under sink");
                assert_eq!(result.cost_estimate.min, 90.0);
                assert!(!result.fallback);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn parses_clarification_questions() {
        let payload = json!({
            "success": true,
            "needs_clarification": true,
            "questions": ["Where is the leak?", "  ", "Is the water shut off?"]
        });
        match parse_outcome(&payload).unwrap() {
            AnalysisOutcome::NeedsClarification { questions } => {
                assert_eq!(questions, vec!["Where is the leak?", "Is the water shut off?"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn clarification_without_questions_is_an_error() {
        let payload = json!({"needs_clarification": true, "questions": []});
        assert!(parse_outcome(&payload).is_err());
    }

    #[test]
    fn off_topic_wins_over_other_flags() {
        let payload = json!({
            "success": true,
            "is_off_topic": true,
            "message": "We only handle home maintenance."
        });
        match parse_outcome(&payload).unwrap() {
            AnalysisOutcome::OffTopic { message } => {
                assert_eq!(message, "We only handle home maintenance.");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn alternate_field_names_are_tolerated() {
        let payload = json!({
            "success": true,
            "analysis": {"problem": "Cracked tile", "description": "Hairline crack"},
            "cost_estimate": {"min_cost": 40, "max_cost": 80}
        });
        match parse_outcome(&payload).unwrap() {
            AnalysisOutcome::Final(result) => {
                assert_eq!(result.analysis.issue, "Cracked tile");
                assert_eq!(result.analysis.detail.as_deref(), Some("Hairline crack"));
                assert_eq!(result.cost_estimate.currency, "EUR");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_estimate_on_success_is_an_error() {
        let payload = json!({
            "success": true,
            "analysis": {"issue": "Leak"}
        });
        assert!(parse_outcome(&payload).is_err());
    }

    #[test]
    fn inverted_bounds_are_an_error() {
        let payload = json!({
            "success": true,
            "analysis": {"issue": "Leak"},
            "cost_estimate": {"min": 200, "max": 100}
        });
        assert!(parse_outcome(&payload).is_err());
    }

    #[test]
    fn unsuccessful_response_carries_backend_message() {
        let payload = json!({"success": false, "error": "model unavailable"});
        let err = parse_outcome(&payload).unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
    }
}
