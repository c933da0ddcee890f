//! Per-stream processing state and the token-level state machine.
//!
//! One [`ProcessorState`] exists per active stream and is owned by the
//! caller, never by the service: concurrent streams each pass their own
//! state into every call, so they cannot corrupt each other. Tokens must
//! be fed in order; the machine assumes in-order delivery.
//!
//! Per token the machine decides whether to suppress it (thinking section,
//! in-progress code block) or pass it through after marker stripping,
//! reassembling fenced code blocks into complete repaired chunks before
//! emitting them.

use log::{debug, trace};

use crate::families::{base, FamilyHeuristic, FamilyId};

/// Default cap on the cross-token lookback buffer.
const DEFAULT_LOOKBACK_CAP: usize = 500;

const FENCE: &str = "```";

/// An end-of-thinking marker. `resumes_answer` marks the "answer resumes
/// here" variants whose trailing text is emitted instead of suppressed.
#[derive(Debug, Clone)]
pub struct ThinkingEnd {
    pub marker: String,
    pub resumes_answer: bool,
}

/// Marker tables and buffer bounds for the streaming machine.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub lookback_cap: usize,
    pub thinking_starts: Vec<String>,
    pub thinking_ends: Vec<ThinkingEnd>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let end = |marker: &str, resumes_answer: bool| ThinkingEnd {
            marker: marker.to_string(),
            resumes_answer,
        };
        Self {
            lookback_cap: DEFAULT_LOOKBACK_CAP,
            thinking_starts: ["<think>", "<thinking>", "<reasoning>", "Let me think", "Thinking:"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            thinking_ends: vec![
                end("</think>", false),
                end("</thinking>", false),
                end("</reasoning>", false),
                end("Answer:", true),
                end("Response:", true),
            ],
        }
    }
}

/// Mutable per-stream state. Created at stream start, mutated token by
/// token, reset between independent streams.
#[derive(Debug, Default)]
pub struct ProcessorState {
    /// Family remembered across tokens once first detected.
    pub(crate) last_detected_family: Option<FamilyId>,
    /// Bounded tail of the raw stream, used only for cross-token marker
    /// matching; never returned to the caller.
    lookback: String,
    in_thinking_section: bool,
    in_code_block: bool,
    code_block_language: Option<String>,
    /// In-progress, not-yet-closed fenced code block.
    pending_code_block: String,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sticky family for this stream, if one was detected or hinted.
    pub fn detected_family(&self) -> Option<FamilyId> {
        self.last_detected_family
    }

    pub fn is_thinking(&self) -> bool {
        self.in_thinking_section
    }

    pub fn is_buffering_code(&self) -> bool {
        self.in_code_block
    }

    /// Clear everything for a new independent stream.
    pub fn reset(&mut self) {
        self.last_detected_family = None;
        self.lookback.clear();
        self.in_thinking_section = false;
        self.in_code_block = false;
        self.code_block_language = None;
        self.pending_code_block.clear();
    }

    fn cap_lookback(&mut self, cap: usize) {
        if self.lookback.len() > cap {
            let mut cut = self.lookback.len() - cap;
            while cut < self.lookback.len() && !self.lookback.is_char_boundary(cut) {
                cut += 1;
            }
            self.lookback.drain(..cut);
        }
    }
}

struct MarkerHit {
    start: usize,
    len: usize,
    resumes_answer: bool,
}

impl MarkerHit {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Earliest marker occurrence; the longest marker wins at equal positions
/// so `<thinking>` is never shadowed by its `<think>` prefix.
fn find_earliest<'a, I>(haystack: &str, markers: I) -> Option<MarkerHit>
where
    I: Iterator<Item = (&'a str, bool)>,
{
    let mut best: Option<MarkerHit> = None;
    for (marker, resumes_answer) in markers {
        if marker.is_empty() {
            continue;
        }
        if let Some(start) = haystack.find(marker) {
            let hit = MarkerHit {
                start,
                len: marker.len(),
                resumes_answer,
            };
            let better = match &best {
                None => true,
                Some(b) => hit.start < b.start || (hit.start == b.start && hit.len > b.len),
            };
            if better {
                best = Some(hit);
            }
        }
    }
    best
}

enum ThinkingOutcome {
    /// No thinking marker involved: the token continues to fence handling.
    Untouched,
    /// Thinking filtering consumed the token; emit the payload if any.
    Handled(Option<String>),
}

/// Step 1–2 of the token pipeline: lookback bookkeeping and
/// thinking-section transitions. At most one transition per token; the
/// matched marker is consumed from the lookback so it cannot re-trigger.
fn thinking_filter(
    config: &StreamConfig,
    state: &mut ProcessorState,
    token: &str,
) -> ThinkingOutcome {
    let token_start = state.lookback.len();
    state.lookback.push_str(token);

    let outcome = if state.in_thinking_section {
        let ends = config
            .thinking_ends
            .iter()
            .map(|e| (e.marker.as_str(), e.resumes_answer));
        match find_earliest(&state.lookback, ends) {
            Some(hit) => {
                let after = state.lookback[hit.end()..].to_string();
                state.in_thinking_section = false;
                debug!("exiting thinking section (resume={})", hit.resumes_answer);
                let emit = if hit.resumes_answer && !after.is_empty() {
                    Some(after.clone())
                } else {
                    None
                };
                state.lookback = after;
                ThinkingOutcome::Handled(emit)
            }
            None => {
                trace!("suppressing thinking token");
                ThinkingOutcome::Handled(None)
            }
        }
    } else {
        let starts = config.thinking_starts.iter().map(|s| (s.as_str(), false));
        let start_hit = find_earliest(&state.lookback, starts);
        // A stray answer-resume marker is consumed so it never reaches
        // the transcript.
        let resumes = config
            .thinking_ends
            .iter()
            .filter(|e| e.resumes_answer)
            .map(|e| (e.marker.as_str(), true));
        let resume_hit = find_earliest(&state.lookback, resumes);
        let hit = match (start_hit, resume_hit) {
            (Some(s), Some(r)) => Some(if s.start <= r.start { s } else { r }),
            (s, r) => s.or(r),
        };
        match hit {
            Some(hit) if !hit.resumes_answer => {
                // Entering a thinking section: emit only the trimmed
                // portion of the current token preceding the marker.
                let prefix = if hit.start > token_start {
                    state.lookback[token_start..hit.start].trim().to_string()
                } else {
                    String::new()
                };
                state.lookback = state.lookback[hit.end()..].to_string();
                state.in_thinking_section = true;
                debug!("entering thinking section");
                ThinkingOutcome::Handled((!prefix.is_empty()).then_some(prefix))
            }
            Some(hit) => {
                let after = state.lookback[hit.end()..].to_string();
                state.lookback = after.clone();
                debug!("consumed answer-resume marker outside thinking section");
                ThinkingOutcome::Handled((!after.is_empty()).then_some(after))
            }
            None => ThinkingOutcome::Untouched,
        }
    };
    state.cap_lookback(config.lookback_cap);
    outcome
}

/// Locate the end (exclusive byte offset) of the closing fence in an
/// accumulated block. The opening fence line must be terminated first.
fn find_closing_fence(pending: &str) -> Option<usize> {
    let open_line_end = pending.find('\n')?;
    let rel = pending[open_line_end..].find(FENCE)?;
    Some(open_line_end + rel + FENCE.len())
}

fn parse_fence_language(from_fence: &str) -> Option<String> {
    let tag: String = from_fence
        .chars()
        .skip(FENCE.len())
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '#'))
        .collect();
    base::normalize_language_tag(&tag)
}

fn repair_block(block: &str, language: Option<&str>, heuristic: &dyn FamilyHeuristic) -> String {
    let mut fixed = heuristic.repair_message(block);
    if let Some(language) = language {
        fixed = heuristic.format_code(&fixed, language);
    }
    fixed
}

/// Close the pending block if its closing fence has arrived; emission is
/// the whole repaired block plus any trailing text after the fence.
fn try_close_block(state: &mut ProcessorState, heuristic: &dyn FamilyHeuristic) -> Option<String> {
    let close_end = find_closing_fence(&state.pending_code_block)?;
    let tail = state.pending_code_block[close_end..].to_string();
    let block = state.pending_code_block[..close_end].to_string();
    let repaired = repair_block(&block, state.code_block_language.as_deref(), heuristic);
    state.in_code_block = false;
    state.code_block_language = None;
    state.pending_code_block.clear();
    debug!("emitting reassembled code block ({} bytes)", repaired.len());
    let mut out = repaired;
    out.push_str(&tail);
    Some(out)
}

/// Step 3–4 of the token pipeline: code-fence handling and plain
/// passthrough with marker stripping.
fn code_stage(
    state: &mut ProcessorState,
    token: &str,
    heuristic: &dyn FamilyHeuristic,
) -> Option<String> {
    if state.in_code_block {
        state.pending_code_block.push_str(token);
        return try_close_block(state, heuristic);
    }

    let Some(fence_at) = token.find(FENCE) else {
        let stripped = heuristic.strip_markers(token);
        if stripped.is_empty() && !token.is_empty() {
            return None;
        }
        return Some(stripped);
    };

    // Inline code (fence...fence, no newline between) passes through.
    let after_open = fence_at + FENCE.len();
    if let Some(rel) = token[after_open..].find(FENCE) {
        if !token[after_open..after_open + rel].contains('\n') {
            return Some(heuristic.strip_markers(token));
        }
    }

    // Opening a new block: buffer from the fence onward, emit only the
    // trimmed text preceding it.
    let prefix = heuristic.strip_markers(token[..fence_at].trim());
    let from_fence = &token[fence_at..];
    state.code_block_language = parse_fence_language(from_fence);
    state.in_code_block = true;
    state.pending_code_block = from_fence.to_string();
    // The buffered portion already sits at the tail of the lookback; drop
    // it so block content can never re-match a marker after the close.
    match state.lookback.len().checked_sub(from_fence.len()) {
        Some(keep) => state.lookback.truncate(keep),
        None => state.lookback.clear(),
    }
    debug!("buffering code block (language={:?})", state.code_block_language);

    // The same token may already carry the closing fence.
    if let Some(block) = try_close_block(state, heuristic) {
        let mut out = String::new();
        if !prefix.trim().is_empty() {
            out.push_str(prefix.trim());
            out.push('\n');
        }
        out.push_str(&block);
        return Some(out);
    }
    (!prefix.trim().is_empty()).then(|| prefix.trim().to_string())
}

/// Run one streamed token through the full pipeline. `None` means the
/// token is suppressed: nothing should reach the visible transcript.
pub(crate) fn process_token(
    config: &StreamConfig,
    state: &mut ProcessorState,
    token: &str,
    heuristic: &dyn FamilyHeuristic,
) -> Option<String> {
    if token.is_empty() {
        return None;
    }
    // Once a block is buffering, every token is block content; it stays
    // out of the lookback entirely, so thinking filtering is skipped
    // until the block closes.
    if state.in_code_block {
        return code_stage(state, token, heuristic);
    }
    match thinking_filter(config, state, token) {
        ThinkingOutcome::Handled(emit) => emit
            .map(|text| heuristic.strip_markers(&text))
            .filter(|text| !text.trim().is_empty()),
        ThinkingOutcome::Untouched => code_stage(state, token, heuristic),
    }
}

/// Stream end: emit a still-open code block, repaired and terminated.
pub(crate) fn flush(state: &mut ProcessorState, heuristic: &dyn FamilyHeuristic) -> Option<String> {
    if !state.in_code_block {
        return None;
    }
    let block = std::mem::take(&mut state.pending_code_block);
    let language = state.code_block_language.take();
    state.in_code_block = false;
    let mut repaired = repair_block(&block, language.as_deref(), heuristic);
    if !repaired.trim_end().ends_with(FENCE) {
        repaired = format!("{}\n{}", repaired.trim_end(), FENCE);
    }
    debug!("flushing unterminated code block");
    (!repaired.trim().is_empty()).then_some(repaired)
}
