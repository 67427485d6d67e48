use crate::error::Result;
use crate::matcher::FaqMatcher;
use crate::model::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// One labelled question. `expected_question: None` means the fallback answer
/// is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    pub question: String,
    #[serde(default)]
    pub expected_question: Option<String>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl EvalCase {
    pub fn expected_decision(&self) -> Decision {
        if self.expected_question.is_some() {
            Decision::Hit
        } else {
            Decision::Miss
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub case_id: String,
    pub passed: bool,
    pub actual_decision: Decision,
    pub matched_question: Option<String>,
    pub score: f32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub evaluated_at: DateTime<Utc>,
    pub threshold: f32,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<EvalOutcome>,
}

impl EvalSummary {
    pub fn meets(&self, required_pass_rate: f32) -> bool {
        self.pass_rate >= required_pass_rate
    }
}

pub struct CaseExpectation;

impl CaseExpectation {
    pub fn matches(
        expected_question: Option<&str>,
        min_score: Option<f32>,
        actual_question: Option<&str>,
        score: f32,
    ) -> bool {
        if expected_question != actual_question {
            return false;
        }

        if let Some(min) = min_score {
            if score < min {
                return false;
            }
        }

        true
    }
}

pub fn load_eval_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let file = std::fs::File::open(path)?;
    let cases: Vec<EvalCase> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(cases)
}

pub fn evaluate_cases(
    matcher: &FaqMatcher,
    cases: &[EvalCase],
    threshold: f32,
) -> Result<EvalSummary> {
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let start = Instant::now();
        let result = matcher.resolve(&case.question, threshold)?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let passed = CaseExpectation::matches(
            case.expected_question.as_deref(),
            case.min_score,
            result.matched_question.as_deref(),
            result.score,
        );

        outcomes.push(EvalOutcome {
            case_id: case.case_id.clone(),
            passed,
            actual_decision: result.decision(),
            matched_question: result.matched_question,
            score: result.score,
            latency_ms,
        });
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = total.saturating_sub(passed);
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f32 / total as f32
    };

    Ok(EvalSummary {
        evaluated_at: Utc::now(),
        threshold,
        total,
        passed,
        failed,
        pass_rate,
        outcomes,
    })
}
