//! Claude-family heuristic.
//!
//! Claude-style transcripts leak line-leading `Human:` / `Assistant:` role
//! labels and `[END_OF_TURN]` sentinels. Role labels are only stripped at
//! line starts so quoted dialogue in the middle of a sentence survives.

use regex::Regex;
use std::sync::LazyLock;

use super::{base, FamilyHeuristic, FamilyId};

static SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:Human|Assistant):").unwrap());

static STRIP_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?m)^Human:[ \t]*").unwrap(), ""),
        (Regex::new(r"(?m)^Assistant:[ \t]*").unwrap(), ""),
        (Regex::new(r"(?m)^System:[ \t]*").unwrap(), ""),
        (Regex::new(r"\[END_OF_TURN\]").unwrap(), ""),
    ]
});

#[derive(Debug)]
pub struct ClaudeHeuristic;

impl FamilyHeuristic for ClaudeHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Claude
    }

    fn detect_family(&self, sample: &str) -> Option<FamilyId> {
        (SIGNATURE.is_match(sample) || sample.contains("[END_OF_TURN]"))
            .then_some(FamilyId::Claude)
    }

    fn strip_markers(&self, token: &str) -> String {
        let mut text = token.to_string();
        for (rule, replacement) in STRIP_RULES.iter() {
            text = rule.replace_all(&text, *replacement).into_owned();
        }
        text
    }

    fn format_code(&self, code: &str, language: &str) -> String {
        if language == "markdown" || language == "md" {
            // Header spacing and blank-line collapse are the only markdown
            // fixes worth applying inside a fence.
            return base::repair_common(code);
        }
        base::format_code_common(code, language)
    }
}
