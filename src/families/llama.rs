//! Llama-family heuristic.
//!
//! Llama chat fine-tunes leak `[INST]`/`[/INST]` instruction brackets,
//! `<<SYS>>` system-prompt fences, and BOS/EOS sentinels into their output.
//! Mistral fine-tunes emit `[INST]` too; registration order gives this
//! family ownership of that marker (see the registry docs).

use regex::Regex;
use std::sync::LazyLock;

use super::{base, FamilyHeuristic, FamilyId};

const SIGNATURES: &[&str] = &["[INST]", "[/INST]", "<<SYS>>"];

static STRIP_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["[INST]", "[/INST]", "<<SYS>>", "<</SYS>>", "<s>", "</s>"]
        .iter()
        .map(|m| Regex::new(&regex::escape(m)).unwrap())
        .collect()
});

/// Instruction brackets wrapping nothing but whitespace.
static EMPTY_INST_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[INST\]\s*\[/INST\]").unwrap());

#[derive(Debug)]
pub struct LlamaHeuristic;

impl FamilyHeuristic for LlamaHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Llama
    }

    fn detect_family(&self, sample: &str) -> Option<FamilyId> {
        SIGNATURES
            .iter()
            .any(|s| sample.contains(s))
            .then_some(FamilyId::Llama)
    }

    fn strip_markers(&self, token: &str) -> String {
        let mut text = token.to_string();
        for rule in STRIP_RULES.iter() {
            text = rule.replace_all(&text, "").into_owned();
        }
        text
    }

    fn repair_message(&self, message: &str) -> String {
        let text = EMPTY_INST_BLOCK.replace_all(message, "").into_owned();
        base::repair_common(&text)
    }

    fn format_code(&self, code: &str, language: &str) -> String {
        // Llama output loses indentation under control-flow headers more
        // than the other families; fold that repair into its python rule.
        if language == "python" {
            let fixed = base::format_code_common(code, language);
            return base::reindent_control_bodies(&fixed);
        }
        base::format_code_common(code, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_instruction_brackets() {
        let h = LlamaHeuristic;
        assert_eq!(h.detect_family("[INST] hi [/INST]"), Some(FamilyId::Llama));
        assert_eq!(h.detect_family("<<SYS>>be brief<</SYS>>"), Some(FamilyId::Llama));
        assert_eq!(h.detect_family("plain text"), None);
    }

    #[test]
    fn strips_all_markers_idempotently() {
        let h = LlamaHeuristic;
        let input = "<s>[INST] hi [/INST] hello <<SYS>>x<</SYS>></s>";
        let once = h.strip_markers(input);
        assert!(!once.contains("[INST]"));
        assert!(!once.contains("<<SYS>>"));
        assert!(!once.contains("<s>"));
        assert_eq!(h.strip_markers(&once), once);
    }

    #[test]
    fn repair_removes_empty_instruction_blocks() {
        let h = LlamaHeuristic;
        assert_eq!(h.repair_message("[INST]  [/INST]hello"), "hello");
        let clean = h.repair_message("hello world");
        assert_eq!(clean, "hello world");
        assert_eq!(h.repair_message(&clean), clean);
    }

    #[test]
    fn python_format_restores_control_flow_indentation() {
        let h = LlamaHeuristic;
        let fixed = h.format_code("if ok:\nrun()", "python");
        assert_eq!(fixed, "if ok:\n    run()");
        // No rule for this language: strict no-op.
        assert_eq!(h.format_code("if ok:\nrun()", "lua"), "if ok:\nrun()");
    }
}
