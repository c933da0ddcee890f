//! The dispatcher tying families and streaming together.
//!
//! [`ModelProcessingService`] holds the ordered heuristic registry and
//! routes each incoming token or complete message to the right family,
//! falling back to the base heuristic when nothing is detected. The
//! service itself is immutable after construction and can be shared
//! across threads; all per-stream state lives in the caller-owned
//! [`ProcessorState`].

use log::{debug, trace};
use regex::Regex;
use std::sync::LazyLock;

use crate::families::{registry, DetectionResult, FamilyHeuristic, FamilyId};
use crate::streaming::{self, ProcessorState, StreamConfig};

/// Provider boilerplate lines that carry no content worth showing.
static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\[ERROR\][^\n]*\n?").unwrap(),
        Regex::new(r"(?m)^\[WARNING\][^\n]*\n?").unwrap(),
        Regex::new(r"(?mi)^(?:error|failed):\s*(?:model|generation)[^\n]*\n?").unwrap(),
    ]
});

pub struct ModelProcessingService {
    heuristics: Vec<Box<dyn FamilyHeuristic>>,
    config: StreamConfig,
    /// Whole-message thinking-block removers built from the marker tables:
    /// for each tag-shaped start, a lazy paired matcher and an
    /// unterminated-tail matcher, in that order.
    thinking_removers: Vec<Regex>,
}

impl Default for ModelProcessingService {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProcessingService {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let mut thinking_removers = Vec::new();
        // Longest start first, so "<think>" never eats a "<thinking>" block
        // as a prefix match.
        let mut starts: Vec<&String> = config.thinking_starts.iter().collect();
        starts.sort_by_key(|s| std::cmp::Reverse(s.len()));
        for start in starts {
            let Some(name) = start.strip_prefix('<').and_then(|r| r.strip_suffix('>')) else {
                continue;
            };
            let end = format!("</{name}>");
            if config.thinking_ends.iter().any(|e| e.marker == end) {
                let open = regex::escape(start);
                let close = regex::escape(&end);
                thinking_removers
                    .push(Regex::new(&format!(r"(?s){open}.*?{close}")).unwrap());
                thinking_removers.push(Regex::new(&format!(r"(?s){open}.*$")).unwrap());
            }
        }
        Self {
            heuristics: registry(),
            config,
            thinking_removers,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Resolve a family to its heuristic, failing closed to base for any
    /// id missing from the registry.
    fn heuristic_for(&self, family: FamilyId) -> &dyn FamilyHeuristic {
        self.heuristics
            .iter()
            .find(|h| h.family() == family)
            .unwrap_or(&self.heuristics[0])
            .as_ref()
    }

    /// First registered non-base heuristic whose signatures match wins;
    /// registration order is the priority, there is no scoring.
    pub fn detect_model_family(&self, content: &str) -> Option<FamilyId> {
        if content.is_empty() {
            return None;
        }
        let found = self
            .heuristics
            .iter()
            .filter(|h| h.family() != FamilyId::Base)
            .find_map(|h| h.detect_family(content));
        if let Some(family) = found {
            trace!("detected model family {family}");
        }
        found
    }

    /// Process one streamed token in order. Family resolution prefers the
    /// explicit hint, then the stream's sticky family, then fresh
    /// detection from the token itself; whatever resolves becomes sticky.
    /// `None` means the token is suppressed.
    pub fn process_token(
        &self,
        state: &mut ProcessorState,
        token: &str,
        family: Option<FamilyId>,
    ) -> Option<String> {
        if token.is_empty() {
            return None;
        }
        let resolved = family
            .or(state.detected_family())
            .or_else(|| self.detect_model_family(token));
        if let Some(found) = resolved {
            if state.detected_family() != Some(found) {
                debug!("stream locked to family {found}");
            }
            state.last_detected_family = Some(found);
        }
        let heuristic = self.heuristic_for(resolved.unwrap_or(FamilyId::Base));
        streaming::process_token(&self.config, state, token, heuristic)
    }

    /// Normalize a full, already-assembled message for display. Detection
    /// is independent of any streaming state: the sticky family is neither
    /// consulted nor updated.
    pub fn process_complete_message(&self, message: &str, family: Option<FamilyId>) -> String {
        if message.trim().is_empty() {
            return String::new();
        }
        let resolved = family
            .or_else(|| self.detect_model_family(message))
            .unwrap_or(FamilyId::Base);
        let heuristic = self.heuristic_for(resolved);

        let mut text = message.to_string();
        for remover in &self.thinking_removers {
            text = remover.replace_all(&text, "").into_owned();
        }
        text = self.common_cleanup(&text);
        text = heuristic.strip_markers(&text);
        text = heuristic.repair_message(&text);
        text.trim().to_string()
    }

    /// Boilerplate removal plus trailing answer-marker truncation: when a
    /// resume marker is present, everything before its last occurrence is
    /// preamble and is dropped.
    fn common_cleanup(&self, text: &str) -> String {
        let mut text = text.to_string();
        for pattern in BOILERPLATE.iter() {
            text = pattern.replace_all(&text, "").into_owned();
        }
        let cut = self
            .config
            .thinking_ends
            .iter()
            .filter(|e| e.resumes_answer)
            .filter_map(|e| text.rfind(&e.marker).map(|i| i + e.marker.len()))
            .max();
        if let Some(pos) = cut {
            debug!("truncating preamble before answer marker");
            text = text[pos..].to_string();
        }
        text
    }

    /// Highest-confidence classification across every registered
    /// heuristic; the first-registered heuristic wins exact ties.
    pub fn detect_code_language(&self, code: &str) -> DetectionResult {
        let mut best = DetectionResult::none();
        for heuristic in &self.heuristics {
            let result = heuristic.detect_code_language(code);
            if result.confidence > best.confidence {
                best = result;
            }
        }
        best
    }

    /// Cosmetic code repair for display. The stream's sticky family gets
    /// first go; otherwise the first registered heuristic whose output
    /// differs wins; otherwise the code comes back unchanged.
    pub fn format_code(&self, state: &ProcessorState, code: &str, language: &str) -> String {
        if code.is_empty() {
            return String::new();
        }
        if let Some(family) = state.detected_family() {
            let formatted = self.heuristic_for(family).format_code(code, language);
            if formatted != code {
                return formatted;
            }
        }
        for heuristic in &self.heuristics {
            let formatted = heuristic.format_code(code, language);
            if formatted != code {
                return formatted;
            }
        }
        code.to_string()
    }

    /// Stream end: emit a still-open code block, if any.
    pub fn flush(&self, state: &mut ProcessorState) -> Option<String> {
        let heuristic = self.heuristic_for(state.detected_family().unwrap_or(FamilyId::Base));
        streaming::flush(state, heuristic)
    }

    /// Clear all per-stream state before an independent stream/message.
    pub fn reset(&self, state: &mut ProcessorState) {
        debug!("resetting processor state");
        state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_detection_is_first_match_in_registration_order() {
        let service = ModelProcessingService::new();
        // Llama registers before Mistral and owns the shared [INST] marker.
        assert_eq!(
            service.detect_model_family("[INST] hi [/INST]<|end_of_text|>"),
            Some(FamilyId::Llama)
        );
        assert_eq!(
            service.detect_model_family("bye<|end_of_text|>"),
            Some(FamilyId::Mistral)
        );
        assert_eq!(service.detect_model_family("plain text"), None);
        assert_eq!(service.detect_model_family(""), None);
    }

    #[test]
    fn token_family_stays_sticky_once_detected() {
        let service = ModelProcessingService::new();
        let mut state = ProcessorState::new();
        service.process_token(&mut state, "<|assistant|>Hello", None);
        assert_eq!(state.detected_family(), Some(FamilyId::Phi));
        // Later tokens with no signature keep the sticky family.
        let out = service.process_token(&mut state, " world<|end|>", None);
        assert_eq!(out.as_deref(), Some(" world"));
        assert_eq!(state.detected_family(), Some(FamilyId::Phi));
    }

    #[test]
    fn explicit_hint_overrides_detection() {
        let service = ModelProcessingService::new();
        let mut state = ProcessorState::new();
        let out = service.process_token(&mut state, "[INST]hi", Some(FamilyId::Mistral));
        assert_eq!(out.as_deref(), Some("hi"));
        assert_eq!(state.detected_family(), Some(FamilyId::Mistral));
    }

    #[test]
    fn claude_complete_message_is_normalized() {
        let service = ModelProcessingService::new();
        let out = service
            .process_complete_message("Human: hi\nAssistant: Hello\n[END_OF_TURN]", Some(FamilyId::Claude));
        assert_eq!(out, "hi\nHello");
    }

    #[test]
    fn complete_message_detects_family_on_its_own() {
        let service = ModelProcessingService::new();
        let out = service.process_complete_message("Assistant: Hello there\n[END_OF_TURN]", None);
        assert_eq!(out, "Hello there");
    }

    #[test]
    fn complete_message_drops_thinking_blocks_wholesale() {
        let service = ModelProcessingService::new();
        let out = service.process_complete_message(
            "<think>\nstep 1\nstep 2\n</think>\nThe capital is Paris.",
            None,
        );
        assert_eq!(out, "The capital is Paris.");
        // Unterminated block drops to the end of the text.
        let out = service.process_complete_message("Sure.\n<think>half a thought", None);
        assert_eq!(out, "Sure.");
    }

    #[test]
    fn complete_message_truncates_before_trailing_answer_marker() {
        let service = ModelProcessingService::new();
        let out = service.process_complete_message("Let me think it over.\nAnswer: 42", None);
        assert_eq!(out, "42");
    }

    #[test]
    fn complete_message_strips_boilerplate_lines() {
        let service = ModelProcessingService::new();
        let out = service.process_complete_message("[ERROR] upstream timeout\nHello.", None);
        assert_eq!(out, "Hello.");
    }

    #[test]
    fn empty_and_whitespace_messages_normalize_to_empty() {
        let service = ModelProcessingService::new();
        assert_eq!(service.process_complete_message("", None), "");
        assert_eq!(service.process_complete_message("   \n  ", None), "");
        let mut state = ProcessorState::new();
        assert_eq!(service.process_token(&mut state, "", None), None);
    }

    #[test]
    fn code_language_detection_takes_the_best_confidence() {
        let service = ModelProcessingService::new();
        let result = service.detect_code_language("package main\nfunc main() {}");
        assert_eq!(result.language.as_deref(), Some("go"));
        assert_eq!(result.confidence, 0.9);
        assert_eq!(service.detect_code_language("hi"), DetectionResult::none());
    }

    #[test]
    fn format_code_prefers_the_sticky_family() {
        let service = ModelProcessingService::new();
        let mut state = ProcessorState::new();
        state.last_detected_family = Some(FamilyId::Llama);
        // Llama's python rule re-indents control-flow bodies.
        let out = service.format_code(&state, "if ok:\nrun()", "python");
        assert_eq!(out, "if ok:\n    run()");
    }

    #[test]
    fn format_code_falls_through_to_any_willing_heuristic() {
        let service = ModelProcessingService::new();
        let state = ProcessorState::new();
        let out = service.format_code(&state, "package main\nimport (\n\"fmt\"\n)\n", "go");
        assert_eq!(out, "package main\nimport (\n\t\"fmt\"\n)\n");
        // Nobody has a rule for this language: unchanged.
        let code = "SELECT 1;";
        assert_eq!(service.format_code(&state, code, "sql"), code);
    }

    #[test]
    fn reset_clears_sticky_family() {
        let service = ModelProcessingService::new();
        let mut state = ProcessorState::new();
        service.process_token(&mut state, "[INST]hello", None);
        assert_eq!(state.detected_family(), Some(FamilyId::Llama));
        service.reset(&mut state);
        assert_eq!(state.detected_family(), None);
    }
}
