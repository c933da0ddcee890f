//! Model-output text normalization for chat transcripts.
//!
//! Raw text streamed or stored from different language-model families
//! (Llama, Mistral, Claude, Phi, Gemini) arrives littered with control
//! tokens, chain-of-thought sections, and broken code fences. This crate
//! turns it into clean, consistently formatted chat content: markers
//! stripped, thinking sections suppressed, fenced code blocks reassembled
//! and repaired, and the code's language guessed for syntax highlighting.
//!
//! The host application owns transport and rendering; it feeds tokens (or
//! complete messages) into a shared [`ModelProcessingService`] together
//! with one [`ProcessorState`] per concurrent stream, and appends whatever
//! comes back to the visible transcript.

pub mod families;
pub mod service;
pub mod streaming;

pub use families::{DetectionResult, FamilyHeuristic, FamilyId, UnknownFamilyError};
pub use service::ModelProcessingService;
pub use streaming::{ProcessorState, StreamConfig, ThinkingEnd};
