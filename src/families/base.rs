//! Default heuristic plus the repair and detection tables shared by every
//! family.
//!
//! The family modules compose on top of these free functions instead of
//! overriding a base class: each family keeps its own marker tables and
//! calls back into the common rules for everything generic.

use regex::Regex;
use std::sync::LazyLock;

use super::{DetectionResult, FamilyHeuristic, FamilyId};

/// Samples shorter than this are too short to classify reliably.
const MIN_DETECTABLE_LEN: usize = 10;

/// Fence language tags we recognize, in alternation-preference order.
/// Longer names come before their prefixes (javascript/java, cpp/c) so the
/// glued-tag regex picks the most specific tag.
pub(crate) const KNOWN_LANGS: &[&str] = &[
    "javascript",
    "typescript",
    "python",
    "kotlin",
    "swift",
    "rust",
    "bash",
    "ruby",
    "json",
    "java",
    "html",
    "yaml",
    "toml",
    "cpp",
    "css",
    "sql",
    "xml",
    "php",
    "go",
    "sh",
    "c",
];

/// An ordered find/replace repair rule.
pub(crate) struct RepairRule {
    pub re: Regex,
    pub replace: &'static str,
}

/// Repairs applied to every message regardless of family, in order, to a
/// fixpoint. Each rule breaks its own match on insertion so the fixpoint
/// terminates quickly.
static COMMON_REPAIRS: LazyLock<Vec<RepairRule>> = LazyLock::new(|| {
    vec![
        // Runs of four or more backticks collapse back to a fence.
        RepairRule {
            re: Regex::new(r"`{4,}").unwrap(),
            replace: "```",
        },
        // Markdown header glued to its text: "##Setup" -> "## Setup".
        // Uppercase/digit only, so C preprocessor lines stay untouched.
        RepairRule {
            re: Regex::new(r"(?m)^(#{1,6})([A-Z0-9])").unwrap(),
            replace: "${1} ${2}",
        },
        // Language tag glued to the first code line: "```bashecho" ->
        // "```bash\necho".
        RepairRule {
            re: glued_tag_regex(),
            replace: "```${1}\n${2}",
        },
        // Closing fence glued to the last code line gets its own line.
        RepairRule {
            re: Regex::new(r"(?m)^(.*[^\s`])```[ \t]*$").unwrap(),
            replace: "${1}\n```",
        },
        // Shebang line glued to the first statement. Flags ("-e") stay on
        // the shebang line.
        RepairRule {
            re: Regex::new(
                r"(?m)^(#!/usr/bin/env[ \t]+[\w.]+|#!/(?:[\w.]+/)*(?:ba|z|da|k|tc|fi)?sh|#!/(?:[\w.]+/)*(?:python[\d.]*|perl|ruby|node))[ \t]+([^-\s].*)$",
            )
            .unwrap(),
            replace: "${1}\n${2}",
        },
        // Package declaration glued to the next statement.
        RepairRule {
            re: Regex::new(r"(?m)^(package[ \t]+[A-Za-z_][\w.]*;?)[ \t]+(\S.*)$").unwrap(),
            replace: "${1}\n${2}",
        },
        // Two imports glued onto one line split apart; the fixpoint pass
        // unrolls longer runs.
        RepairRule {
            re: Regex::new(r"(?m)^((?:import|from)[ \t]+[^\n;]+?;?)[ \t]+((?:import|from)[ \t].*)$")
                .unwrap(),
            replace: "${1}\n${2}",
        },
        // More than two consecutive blank lines collapse to one blank line.
        RepairRule {
            re: Regex::new(r"\n{3,}").unwrap(),
            replace: "\n\n",
        },
    ]
});

fn glued_tag_regex() -> Regex {
    let alternation = KNOWN_LANGS.join("|");
    Regex::new(&format!(r"(?m)^```({})([^\s`].*)$", alternation)).unwrap()
}

struct LangSig {
    re: Regex,
    language: &'static str,
    confidence: f32,
}

/// Surface-syntax signatures scored by specificity. Evaluated in order; the
/// highest confidence wins and earlier rules win exact ties.
static LANG_SIGS: LazyLock<Vec<LangSig>> = LazyLock::new(|| {
    let sig = |re: &str, language: &'static str, confidence: f32| LangSig {
        re: Regex::new(re).unwrap(),
        language,
        confidence,
    };
    vec![
        sig(r"(?m)^#!.*\b(?:bash|zsh|sh)\b", "bash", 0.95),
        sig(r"(?m)^#!.*\bpython[\d.]*\b", "python", 0.95),
        sig(r"(?m)^#!.*\bnode\b", "javascript", 0.95),
        sig(r"<\?php", "php", 0.95),
        sig(r"\bpackage\s+main\b", "go", 0.9),
        sig(r"\bfn\s+\w+\s*\(|\blet\s+mut\s|\bimpl\s+\w+", "rust", 0.9),
        sig(r"#include\s*<[\w./]+>", "c", 0.9),
        sig(r"\bstd::\w+|\bcout\s*<<", "cpp", 0.9),
        sig(r"\bpublic\s+(?:class|static)\b", "java", 0.9),
        sig(r"(?i)<!DOCTYPE\s+html|<html[\s>]", "html", 0.9),
        sig(r"\bfunc\s+\w+\s*\(", "go", 0.85),
        sig(r"(?m)^\s*def\s+\w+\s*\(.*\)\s*:", "python", 0.85),
        sig(r"\binterface\s+\w+\s*\{|:\s*(?:string|number|boolean)\b", "typescript", 0.85),
        sig(r"(?is)\bSELECT\b.+\bFROM\b", "sql", 0.85),
        sig(r"\bconsole\.log\b|\bfunction\s+\w+\s*\(|=>\s*\{", "javascript", 0.8),
        sig(r#"(?s)^\s*\{\s*"[^"]+"\s*:"#, "json", 0.8),
        // Generic interpreted-language shape; weak evidence, python-leaning.
        sig(r"\bimport\s+\w+|\breturn\b|(?m)^\s*\w+\s*=\s*\S", "python", 0.7),
    ]
});

/// Shared whole-message repair pass: every rule applied in order, repeated
/// to a fixpoint so the result is idempotent.
pub(crate) fn repair_common(message: &str) -> String {
    if message.is_empty() {
        return String::new();
    }
    let mut text = message.to_string();
    loop {
        let mut next = text.clone();
        for rule in COMMON_REPAIRS.iter() {
            next = rule.re.replace_all(&next, rule.replace).into_owned();
        }
        next = reindent_control_bodies(&next);
        if next == text {
            return next;
        }
        text = next;
    }
}

/// Re-indent unindented lines directly under a `:`-terminated control-flow
/// header (Python convention). Bodies run until a blank line, a dedented
/// header keyword, or an already-indented line.
pub(crate) fn reindent_control_bodies(text: &str) -> String {
    static HEADER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:if|elif|else|for|while|with|def|class|try|except|finally)\b.*:$")
            .unwrap()
    });
    static KEYWORD_START: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:if|elif|else|for|while|with|def|class|try|except|finally)\b").unwrap()
    });

    let mut out: Vec<String> = Vec::new();
    let mut body_indent: Option<usize> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        if let Some(base_indent) = body_indent {
            let is_body_candidate = !trimmed.is_empty()
                && indent <= base_indent
                && !KEYWORD_START.is_match(trimmed)
                && !trimmed.starts_with("```");
            if is_body_candidate {
                out.push(format!("{}{}", " ".repeat(base_indent + 4), trimmed));
                continue;
            }
            body_indent = None;
        }
        if HEADER.is_match(trimmed) {
            body_indent = Some(indent);
        }
        out.push(line.to_string());
    }
    let mut fixed = out.join("\n");
    if text.ends_with('\n') {
        fixed.push('\n');
    }
    fixed
}

/// Shared code-language classifier used by every heuristic's
/// `detect_code_language` unless it overrides.
pub(crate) fn detect_language_common(code: &str) -> DetectionResult {
    if code.trim().len() < MIN_DETECTABLE_LEN {
        return DetectionResult::none();
    }
    let mut best = DetectionResult::none();
    for sig in LANG_SIGS.iter() {
        if sig.confidence > best.confidence && sig.re.is_match(code) {
            best = DetectionResult {
                language: Some(sig.language.to_string()),
                confidence: sig.confidence,
            };
        }
    }
    best
}

/// Shared cosmetic per-language repair. Strict no-op for languages without
/// a rule here or in a family override.
pub(crate) fn format_code_common(code: &str, language: &str) -> String {
    match language {
        "go" => format_go(code),
        "python" => format_python(code),
        _ => code.to_string(),
    }
}

fn format_go(code: &str) -> String {
    static PACKAGE_GLUE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(package[ \t]+[A-Za-z_][\w.]*)[ \t]+(\S.*)$").unwrap()
    });
    let text = PACKAGE_GLUE.replace_all(code, "${1}\n${2}").into_owned();

    // Tab-indent the contents of a grouped import block.
    let mut out: Vec<String> = Vec::new();
    let mut in_imports = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import (") {
            in_imports = true;
            out.push(line.to_string());
            continue;
        }
        if in_imports {
            if trimmed.starts_with(')') {
                in_imports = false;
                out.push(trimmed.to_string());
                continue;
            }
            if !trimmed.is_empty() && !line.starts_with('\t') {
                out.push(format!("\t{trimmed}"));
                continue;
            }
        }
        out.push(line.to_string());
    }
    let mut fixed = out.join("\n");
    if text.ends_with('\n') {
        fixed.push('\n');
    }
    fixed
}

fn format_python(code: &str) -> String {
    // De-indent imports in the module header region (before the first
    // def/class); imports inside functions are legitimately indented.
    let mut out: Vec<String> = Vec::new();
    let mut in_header = true;
    for line in code.lines() {
        let trimmed = line.trim_start();
        if in_header && (trimmed.starts_with("def ") || trimmed.starts_with("class ")) {
            in_header = false;
        }
        if in_header
            && line.starts_with(char::is_whitespace)
            && (trimmed.starts_with("import ") || trimmed.starts_with("from "))
        {
            out.push(trimmed.to_string());
        } else {
            out.push(line.to_string());
        }
    }
    let mut fixed = out.join("\n");
    if code.ends_with('\n') {
        fixed.push('\n');
    }
    fixed
}

/// Normalize a raw fence tag (possibly glued to code, e.g. "gopackage")
/// down to a known language name.
pub(crate) fn normalize_language_tag(tag: &str) -> Option<String> {
    if tag.is_empty() {
        return None;
    }
    let lower = tag.to_lowercase();
    if let Some(exact) = KNOWN_LANGS.iter().find(|l| **l == lower) {
        return Some((*exact).to_string());
    }
    if let Some(prefix) = KNOWN_LANGS.iter().find(|l| lower.starts_with(**l)) {
        return Some((*prefix).to_string());
    }
    if lower.len() <= 12 {
        Some(lower)
    } else {
        None
    }
}

/// Fallback heuristic: no detection signatures, no family markers, shared
/// repairs only.
#[derive(Debug)]
pub struct BaseHeuristic;

impl FamilyHeuristic for BaseHeuristic {
    fn family(&self) -> FamilyId {
        FamilyId::Base
    }

    fn detect_family(&self, _sample: &str) -> Option<FamilyId> {
        None
    }

    fn strip_markers(&self, token: &str) -> String {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_go_package_main_at_point_nine() {
        let result = detect_language_common("package main\nfunc main() {}");
        assert_eq!(result.language.as_deref(), Some("go"));
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn short_samples_are_unclassifiable() {
        assert_eq!(detect_language_common("hi"), DetectionResult::none());
        assert_eq!(detect_language_common(""), DetectionResult::none());
    }

    #[test]
    fn shebang_outranks_generic_signatures() {
        let result = detect_language_common("#!/bin/bash\necho hello world");
        assert_eq!(result.language.as_deref(), Some("bash"));
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn generic_import_shape_leans_python() {
        let result = detect_language_common("import os\nx = os.getcwd()");
        assert_eq!(result.language.as_deref(), Some("python"));
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn repair_splits_glued_language_tag() {
        assert_eq!(repair_common("```bashecho hi\n```"), "```bash\necho hi\n```");
    }

    #[test]
    fn repair_gives_closing_fence_its_own_line() {
        assert_eq!(repair_common("```go\nfunc f() {}```"), "```go\nfunc f() {}\n```");
    }

    #[test]
    fn repair_fixes_header_spacing_and_backtick_runs() {
        assert_eq!(repair_common("##Setup\n`````\ncode\n```"), "## Setup\n```\ncode\n```");
    }

    #[test]
    fn repair_splits_shebang_but_keeps_flags() {
        assert_eq!(repair_common("#!/bin/bash echo hi"), "#!/bin/bash\necho hi");
        assert_eq!(repair_common("#!/bin/bash -euo pipefail"), "#!/bin/bash -euo pipefail");
    }

    #[test]
    fn long_glued_import_runs_fully_unroll() {
        // The import rule splits one pair per pass; a long run needs the
        // loop to keep going until nothing changes.
        let glued = (1..=12)
            .map(|i| format!("import m{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let once = repair_common(&glued);
        assert_eq!(once.lines().count(), 12);
        assert_eq!(repair_common(&once), once);
    }

    #[test]
    fn repair_is_idempotent() {
        let messy = "##Title\n```gopackage main\nfunc main() {}```\nif ready:\nrun()\n";
        let once = repair_common(messy);
        assert_eq!(repair_common(&once), once);
    }

    #[test]
    fn reindent_fixes_lost_control_flow_bodies() {
        let fixed = reindent_control_bodies("if ready:\nrun()\nelse:\nstop()");
        assert_eq!(fixed, "if ready:\n    run()\nelse:\n    stop()");
    }

    #[test]
    fn format_code_is_a_noop_for_unknown_languages() {
        let code = "SELECT * FROM users;";
        assert_eq!(format_code_common(code, "sql"), code);
        assert_eq!(format_code_common(code, "klingon"), code);
    }

    #[test]
    fn format_go_indents_grouped_imports() {
        let code = "package main\nimport (\n\"fmt\"\n\"os\"\n)\n";
        assert_eq!(
            format_code_common(code, "go"),
            "package main\nimport (\n\t\"fmt\"\n\t\"os\"\n)\n"
        );
    }

    #[test]
    fn format_python_dedents_header_imports() {
        let code = "  import os\ndef main():\n    import json\n";
        assert_eq!(
            format_code_common(code, "python"),
            "import os\ndef main():\n    import json\n"
        );
    }

    #[test]
    fn language_tag_normalization_prefers_known_prefixes() {
        assert_eq!(normalize_language_tag("go").as_deref(), Some("go"));
        assert_eq!(normalize_language_tag("gopackage").as_deref(), Some("go"));
        assert_eq!(normalize_language_tag("bashecho").as_deref(), Some("bash"));
        assert_eq!(normalize_language_tag("").as_deref(), None);
        assert_eq!(normalize_language_tag("somethingverylongtag"), None);
    }
}
