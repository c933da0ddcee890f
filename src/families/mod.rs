//! Model-family heuristics and the registry used to dispatch between them.
//!
//! Each supported family (Llama, Mistral, Claude, Phi, Gemini) ships its
//! output with different control tokens and formatting quirks. A
//! [`FamilyHeuristic`] knows how to recognize its family's signature
//! markers, strip them, and repair the family's typical damage. The
//! [`Base`](FamilyId::Base) heuristic carries the shared rules and is the
//! fallback when no family is recognized.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod base;
pub mod claude;
pub mod gemini;
pub mod llama;
pub mod mistral;
pub mod phi;

/// Identifies which heuristic set applies to a piece of model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyId {
    Base,
    Llama,
    Mistral,
    Claude,
    Phi,
    Gemini,
}

impl FamilyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyId::Base => "base",
            FamilyId::Llama => "llama",
            FamilyId::Mistral => "mistral",
            FamilyId::Claude => "claude",
            FamilyId::Phi => "phi",
            FamilyId::Gemini => "gemini",
        }
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a family name coming from configuration or an API request
/// does not match any registered family.
#[derive(Debug, thiserror::Error)]
#[error("unknown model family: {0}")]
pub struct UnknownFamilyError(pub String);

impl FromStr for FamilyId {
    type Err = UnknownFamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" | "default" => Ok(FamilyId::Base),
            "llama" => Ok(FamilyId::Llama),
            "mistral" => Ok(FamilyId::Mistral),
            "claude" => Ok(FamilyId::Claude),
            "phi" => Ok(FamilyId::Phi),
            "gemini" => Ok(FamilyId::Gemini),
            other => Err(UnknownFamilyError(other.to_string())),
        }
    }
}

/// Result of code-language classification.
///
/// `confidence` is in `[0, 1]`. A sample too short to classify yields
/// `{ language: None, confidence: 0.0 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub language: Option<String>,
    pub confidence: f32,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self {
            language: None,
            confidence: 0.0,
        }
    }
}

/// Trait for family-specific output processing.
///
/// Implementations own no mutable state; all per-stream state lives in
/// [`crate::streaming::ProcessorState`]. Every operation is best-effort:
/// empty or malformed input comes back unchanged, never as an error.
pub trait FamilyHeuristic: Send + Sync {
    fn family(&self) -> FamilyId;

    /// Check whether the sample carries this family's signature markers.
    /// Cheap substring/regex checks only; this runs on every token during
    /// streaming fallback.
    fn detect_family(&self, sample: &str) -> Option<FamilyId>;

    /// Remove this family's control tokens from a token fragment.
    /// Idempotent: stripping twice is a no-op.
    fn strip_markers(&self, token: &str) -> String;

    /// Apply family-specific whole-message repairs. Safe on already-clean
    /// text and idempotent.
    fn repair_message(&self, message: &str) -> String {
        base::repair_common(message)
    }

    /// Classify a code sample's language from surface syntax signatures.
    fn detect_code_language(&self, code: &str) -> DetectionResult {
        base::detect_language_common(code)
    }

    /// Language-specific cosmetic repair. A no-op when no rule matches the
    /// given language.
    fn format_code(&self, code: &str, language: &str) -> String {
        base::format_code_common(code, language)
    }
}

/// Build the heuristic registry in priority order.
///
/// Registration order is the family-detection priority: the first heuristic
/// whose `detect_family` answers positively wins, with no cross-family
/// scoring. Base registers first but never detects, so it only ever applies
/// as the fallback. Llama registers ahead of Mistral on purpose: both
/// lineages emit `[INST]` blocks, and Llama owns that marker here while
/// Mistral detection keys on its `<|end_of_text|>` tokens instead.
pub fn registry() -> Vec<Box<dyn FamilyHeuristic>> {
    vec![
        Box::new(base::BaseHeuristic),
        Box::new(llama::LlamaHeuristic),
        Box::new(mistral::MistralHeuristic),
        Box::new(claude::ClaudeHeuristic),
        Box::new(phi::PhiHeuristic),
        Box::new(gemini::GeminiHeuristic),
    ]
}
