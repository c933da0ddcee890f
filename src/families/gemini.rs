//! Gemini-family heuristic. Gemma/Gemini templates delimit messages with
//! `<start_of_turn>`/`<end_of_turn>` plus a role word glued to the opener.

use regex::Regex;
use std::sync::LazyLock;

use super::{FamilyHeuristic, FamilyId};

const SIGNATURES: &[&str] = &["<start_of_turn>", "<end_of_turn>"];

// Role-qualified openers first so the bare opener rule cannot strand the
// role word.
static STRIP_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"<start_of_turn>model\n?",
        r"<start_of_turn>user\n?",
        r"<start_of_turn>",
        r"<end_of_turn>",
    ]
    .iter()
    .map(|m| Regex::new(m).unwrap())
    .collect()
});

#[derive(Debug)]
pub struct GeminiHeuristic;

impl FamilyHeuristic for GeminiHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Gemini
    }

    fn detect_family(&self, sample: &str) -> Option<FamilyId> {
        SIGNATURES
            .iter()
            .any(|s| sample.contains(s))
            .then_some(FamilyId::Gemini)
    }

    fn strip_markers(&self, token: &str) -> String {
        let mut text = token.to_string();
        for rule in STRIP_RULES.iter() {
            text = rule.replace_all(&text, "").into_owned();
        }
        text
    }
}
