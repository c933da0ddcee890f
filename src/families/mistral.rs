//! Mistral-family heuristic.
//!
//! Detection keys on the `<|end_of_text|>` sentinel spellings only; the
//! `[INST]` brackets Mistral shares with Llama are still stripped here but
//! never used for detection, so order-sensitive ambiguity stays with the
//! registry.

use regex::Regex;
use std::sync::LazyLock;

use super::{base, FamilyHeuristic, FamilyId};

const SIGNATURES: &[&str] = &["<|end_of_text|>", "<|endoftext|>"];

static STRIP_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        "<|end_of_text|>",
        "<|endoftext|>",
        "[TOOL_CALLS]",
        "[/TOOL_CALLS]",
        "[INST]",
        "[/INST]",
        "</s>",
    ]
    .iter()
    .map(|m| Regex::new(&regex::escape(m)).unwrap())
    .collect()
});

#[derive(Debug)]
pub struct MistralHeuristic;

impl FamilyHeuristic for MistralHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Mistral
    }

    fn detect_family(&self, sample: &str) -> Option<FamilyId> {
        SIGNATURES
            .iter()
            .any(|s| sample.contains(s))
            .then_some(FamilyId::Mistral)
    }

    fn strip_markers(&self, token: &str) -> String {
        let mut text = token.to_string();
        for rule in STRIP_RULES.iter() {
            text = rule.replace_all(&text, "").into_owned();
        }
        text
    }

    fn format_code(&self, code: &str, language: &str) -> String {
        if language == "bash" || language == "sh" {
            // Mistral tends to glue the shebang to the first command.
            static SHEBANG_GLUE: LazyLock<Regex> = LazyLock::new(|| {
                Regex::new(r"(?m)^(#!/(?:[\w.]+/)*\w+)[ \t]+([^-\s].*)$").unwrap()
            });
            return SHEBANG_GLUE.replace_all(code, "${1}\n${2}").into_owned();
        }
        base::format_code_common(code, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_end_of_text_sentinels_only() {
        let h = MistralHeuristic;
        assert_eq!(h.detect_family("done<|end_of_text|>"), Some(FamilyId::Mistral));
        assert_eq!(h.detect_family("done<|endoftext|>"), Some(FamilyId::Mistral));
        // Shared with Llama; never a Mistral detection signal.
        assert_eq!(h.detect_family("[INST] hi [/INST]"), None);
    }

    #[test]
    fn strips_sentinels_idempotently() {
        let h = MistralHeuristic;
        let once = h.strip_markers("hello<|end_of_text|></s>");
        assert_eq!(once, "hello");
        assert_eq!(h.strip_markers(&once), once);
    }

    #[test]
    fn bash_format_splits_glued_shebang() {
        let h = MistralHeuristic;
        assert_eq!(h.format_code("#!/bin/sh ls -la", "bash"), "#!/bin/sh\nls -la");
        assert_eq!(h.format_code("#!/bin/sh -e", "bash"), "#!/bin/sh -e");
        let py = "import os";
        assert_eq!(h.format_code(py, "ruby"), py);
    }
}
