//! Phi-family heuristic. Phi chat templates use ChatML-style role tags
//! closed by `<|end|>`.

use regex::Regex;
use std::sync::LazyLock;

use super::{FamilyHeuristic, FamilyId};

const SIGNATURES: &[&str] = &["<|system|>", "<|user|>", "<|assistant|>", "<|end|>"];

static STRIP_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .map(|m| Regex::new(&regex::escape(m)).unwrap())
        .collect()
});

#[derive(Debug)]
pub struct PhiHeuristic;

impl FamilyHeuristic for PhiHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Phi
    }

    fn detect_family(&self, sample: &str) -> Option<FamilyId> {
        SIGNATURES
            .iter()
            .any(|s| sample.contains(s))
            .then_some(FamilyId::Phi)
    }

    fn strip_markers(&self, token: &str) -> String {
        let mut text = token.to_string();
        for rule in STRIP_RULES.iter() {
            text = rule.replace_all(&text, "").into_owned();
        }
        text
    }
}
