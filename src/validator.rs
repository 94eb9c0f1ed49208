//! Garbage classifier for completed narration text.
//!
//! Models occasionally answer a story prompt with release notes, code, or the
//! same line over and over. [`OutputValidator`] scores a complete text blob;
//! it is pure and performs no I/O.
//!
//! Checks run in a fixed order and the first match wins:
//! 1. forbidden markers (code, changelog phrasing)
//! 2. repeated lines (hallucination loop)
//! 3. minimum length
//! 4. story content (context-aware variant only)

use crate::config::ValidatorConfig;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Substrings that never appear in narration.
const FORBIDDEN_MARKERS: &[(&str, &str)] = &[
    ("```", "code fence (```)"),
    ("`", "backtick (`)"),
    ("changelog", "changelog phrasing"),
    ("release notes", "release-note phrasing"),
    ("breaking changes", "release-note phrasing"),
    ("bug fixes", "release-note phrasing"),
    ("pull request", "release-note phrasing"),
];

/// Markdown-style changelog headers: "## [1.2.0]", "### Added", "Version 2.1.0 -".
#[allow(clippy::expect_used)]
static CHANGELOG_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:#{1,4}\s*(?:\[?v?\d+\.\d+(?:\.\d+)?\]?|added|fixed|changed|removed|deprecated|unreleased)\b|version\s+v?\d+\.\d+(?:\.\d+)?\s*[-:])",
    )
    .expect("changelog header pattern is valid")
});

/// Words that only show up when the model is actually telling a story.
const NARRATIVE_VOCABULARY: &[&str] = &[
    "you", "your", "suddenly", "shadow", "shadows", "light", "dark", "darkness", "door",
    "voice", "eyes", "air", "room", "silence", "wind", "step", "steps", "ahead", "behind",
    "whisper", "whispers", "cold", "warm", "smell", "sound", "ground", "wall", "walls", "sky",
    "night", "forest", "path", "blade", "heart", "breath", "figure", "stranger", "gaze",
];

/// Characters that mark dialogue.
const DIALOGUE_PUNCTUATION: &[char] = &['"', '\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'];

/// Why a text was classified as garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GarbageReason {
    /// A forbidden substring or changelog header was found.
    ForbiddenMarker { marker: String },
    /// A line repeated at or above the threshold.
    RepeatedLine { line: String, count: usize },
    /// Trimmed text shorter than the floor.
    TooShort { chars: usize, min: usize },
    /// No dialogue, player name, or narrative vocabulary anywhere.
    NoStoryContent,
}

impl fmt::Display for GarbageReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GarbageReason::ForbiddenMarker { marker } => {
                write!(f, "non-narrative content: {marker}")
            }
            GarbageReason::RepeatedLine { line, count } => {
                write!(f, "hallucination loop: line repeated {count}x: {line:?}")
            }
            GarbageReason::TooShort { chars, min } => {
                write!(f, "too short: {chars} chars (minimum {min})")
            }
            GarbageReason::NoStoryContent => write!(f, "no story content"),
        }
    }
}

/// Outcome of classifying one text blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_garbage: bool,
    pub reason: Option<GarbageReason>,
}

impl Verdict {
    pub fn clean() -> Self {
        Self {
            is_garbage: false,
            reason: None,
        }
    }

    pub fn garbage(reason: GarbageReason) -> Self {
        Self {
            is_garbage: true,
            reason: Some(reason),
        }
    }

    /// Diagnostic string for logs: the reason, or "clean".
    pub fn describe(&self) -> String {
        match &self.reason {
            Some(reason) => reason.to_string(),
            None => "clean".to_string(),
        }
    }
}

/// Names and other context that count as story content.
#[derive(Debug, Clone, Default)]
pub struct StoryContext {
    pub player_names: Vec<String>,
}

impl StoryContext {
    pub fn with_players<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            player_names: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// Garbage classifier.
#[derive(Debug, Clone)]
pub struct OutputValidator {
    min_length: usize,
    repeat_threshold: usize,
    min_repeated_line_chars: usize,
}

impl Default for OutputValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl OutputValidator {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            min_length: config.min_length,
            repeat_threshold: config.repeat_threshold,
            min_repeated_line_chars: config.min_repeated_line_chars,
        }
    }

    /// Classify without story context (checks 1–3).
    pub fn classify(&self, text: &str) -> Verdict {
        self.verdict(self.detect(text, None))
    }

    /// Classify with story context (checks 1–4).
    pub fn classify_with_context(&self, text: &str, context: &StoryContext) -> Verdict {
        self.verdict(self.detect(text, Some(context)))
    }

    /// Diagnostic string for `text`, mirroring [`classify`](Self::classify).
    pub fn describe_reason(&self, text: &str) -> String {
        self.classify(text).describe()
    }

    /// Diagnostic string for `text`, mirroring
    /// [`classify_with_context`](Self::classify_with_context).
    pub fn describe_reason_with_context(&self, text: &str, context: &StoryContext) -> String {
        self.classify_with_context(text, context).describe()
    }

    fn verdict(&self, reason: Option<GarbageReason>) -> Verdict {
        match reason {
            Some(reason) => Verdict::garbage(reason),
            None => Verdict::clean(),
        }
    }

    fn detect(&self, text: &str, context: Option<&StoryContext>) -> Option<GarbageReason> {
        if let Some(marker) = find_forbidden_marker(text) {
            return Some(GarbageReason::ForbiddenMarker { marker });
        }

        if let Some((line, count)) = self.find_repeated_line(text) {
            return Some(GarbageReason::RepeatedLine { line, count });
        }

        let chars = text.trim().chars().count();
        if chars < self.min_length {
            return Some(GarbageReason::TooShort {
                chars,
                min: self.min_length,
            });
        }

        if let Some(context) = context
            && !has_story_content(text, context)
        {
            return Some(GarbageReason::NoStoryContent);
        }

        None
    }

    /// Most repeated qualifying line, if it meets the threshold.
    fn find_repeated_line(&self, text: &str) -> Option<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for line in text.lines().map(str::trim) {
            if line.chars().count() > self.min_repeated_line_chars {
                *counts.entry(line).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count >= self.repeat_threshold)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(line, count)| (line.to_string(), count))
    }
}

fn find_forbidden_marker(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for (needle, label) in FORBIDDEN_MARKERS {
        if lower.contains(needle) {
            return Some((*label).to_string());
        }
    }
    CHANGELOG_HEADER
        .find(text)
        .map(|m| format!("changelog header ({})", m.as_str().trim()))
}

fn has_story_content(text: &str, context: &StoryContext) -> bool {
    if text.contains(DIALOGUE_PUNCTUATION) {
        return true;
    }

    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    let names_present = context
        .player_names
        .iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .any(|name| lower.contains(&name));
    if names_present {
        return true;
    }

    words.iter().any(|w| NARRATIVE_VOCABULARY.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORY: &str = "The lantern gutters as you step into the archive. Dust hangs in the \
                         air, and somewhere behind the shelves a voice is counting slowly.";

    fn validator() -> OutputValidator {
        OutputValidator::default()
    }

    #[test]
    fn test_clean_story_passes() {
        let verdict = validator().classify(STORY);
        assert_eq!(verdict, Verdict::clean());
        assert_eq!(validator().describe_reason(STORY), "clean");
    }

    #[test]
    fn test_any_backtick_is_garbage() {
        for text in [
            format!("{STORY} Use `cargo run` to continue."),
            format!("```rust\nfn main() {{}}\n```\n{STORY}"),
            format!("`{STORY}"),
        ] {
            let verdict = validator().classify(&text);
            assert!(verdict.is_garbage, "should reject: {text}");
            assert!(matches!(
                verdict.reason,
                Some(GarbageReason::ForbiddenMarker { .. })
            ));
            assert!(validator().describe_reason(&text).contains('`'));
        }
    }

    #[test]
    fn test_changelog_headers_are_garbage() {
        for text in [
            format!("## [1.4.2] - 2024-03-01\n{STORY}"),
            format!("### Added\n- new door\n{STORY}"),
            format!("Version 2.1.0 - improvements\n{STORY}"),
            format!("{STORY}\nSee the CHANGELOG for details."),
        ] {
            let verdict = validator().classify(&text);
            assert!(verdict.is_garbage, "should reject: {text}");
            assert!(matches!(
                verdict.reason,
                Some(GarbageReason::ForbiddenMarker { .. })
            ));
        }
    }

    #[test]
    fn test_markdown_headings_in_prose_are_not_changelog() {
        let text = format!("## The Drowned Bell\n{STORY}");
        assert!(!validator().classify(&text).is_garbage);
    }

    #[test]
    fn test_line_repeated_four_times_is_garbage() {
        let line = "The corridor stretches on and on forever.";
        let text = format!("{STORY}\n{line}\n{line}\n{line}\n{line}");
        let verdict = validator().classify(&text);
        assert_eq!(
            verdict.reason,
            Some(GarbageReason::RepeatedLine {
                line: line.to_string(),
                count: 4
            })
        );
        assert!(validator().describe_reason(&text).starts_with("hallucination loop"));
    }

    #[test]
    fn test_line_repeated_three_times_passes() {
        let line = "The corridor stretches on and on forever.";
        let text = format!("{STORY}\n{line}\n{line}\n{line}");
        assert!(!validator().classify(&text).is_garbage);
    }

    #[test]
    fn test_short_lines_may_repeat() {
        let text = format!("{STORY}\nDrip.\nDrip.\nDrip.\nDrip.\nDrip.");
        assert!(!validator().classify(&text).is_garbage);
    }

    #[test]
    fn test_line_of_exactly_min_chars_is_ignored() {
        // Only lines strictly longer than the minimum are counted.
        let line = "a".repeat(20);
        let text = format!("{STORY}\n{line}\n{line}\n{line}\n{line}");
        assert!(!validator().classify(&text).is_garbage);
    }

    #[test]
    fn test_short_text_is_garbage_regardless_of_content() {
        for text in ["", "   ", "You step inside.", "\"Run!\" she whispers, eyes wide."] {
            let verdict = validator().classify(text);
            assert!(verdict.is_garbage, "should reject: {text:?}");
            assert!(matches!(
                verdict.reason,
                Some(GarbageReason::TooShort { .. })
            ));
        }
    }

    #[test]
    fn test_length_counts_trimmed_chars() {
        let padded = format!("{}{}{}", " ".repeat(40), "x".repeat(49), " ".repeat(40));
        assert!(matches!(
            validator().classify(&padded).reason,
            Some(GarbageReason::TooShort { chars: 49, min: 50 })
        ));
    }

    #[test]
    fn test_forbidden_marker_wins_over_length() {
        let verdict = validator().classify("`x`");
        assert!(matches!(
            verdict.reason,
            Some(GarbageReason::ForbiddenMarker { .. })
        ));
    }

    #[test]
    fn test_context_rejects_text_without_story_content() {
        let text = "Quarterly revenue increased by twelve percent compared to the previous period.";
        let context = StoryContext::default();
        assert!(!validator().classify(text).is_garbage);
        assert_eq!(
            validator().classify_with_context(text, &context).reason,
            Some(GarbageReason::NoStoryContent)
        );
    }

    #[test]
    fn test_context_accepts_player_name_dialogue_or_vocabulary() {
        let context = StoryContext::with_players(["Isolde"]);
        let by_name = "Isolde studies the ledger of quarterly revenue figures for a long moment.";
        let by_dialogue = "\u{201C}Quarterly revenue increased,\u{201D} the clerk reports, unimpressed.";
        let by_vocab = "Quarterly revenue increased, and the silence that followed was total.";

        for text in [by_name, by_dialogue, by_vocab] {
            assert!(
                !validator().classify_with_context(text, &context).is_garbage,
                "should accept: {text}"
            );
        }
    }

    #[test]
    fn test_describe_reason_maps_one_to_one() {
        let context = StoryContext::default();
        let line = "The corridor stretches on and on forever.";
        let samples = vec![
            STORY.to_string(),
            format!("{STORY} `code`"),
            format!("{STORY}\n{line}\n{line}\n{line}\n{line}"),
            "too short".to_string(),
            "Quarterly revenue increased by twelve percent compared to the previous period."
                .to_string(),
        ];

        let mut seen: HashMap<String, Verdict> = HashMap::new();
        for text in &samples {
            let verdict = validator().classify_with_context(text, &context);
            let described = validator().describe_reason_with_context(text, &context);

            assert_eq!(verdict.is_garbage, described != "clean");
            assert_eq!(verdict.describe(), described);
            if let Some(previous) = seen.insert(described.clone(), verdict.clone()) {
                assert_eq!(previous, verdict, "one diagnostic per verdict: {described}");
            }
        }
        assert_eq!(seen.len(), samples.len());
    }

    #[test]
    fn test_custom_thresholds() {
        let config = ValidatorConfig {
            min_length: 10,
            repeat_threshold: 2,
            min_repeated_line_chars: 5,
            player_names: vec![],
        };
        let validator = OutputValidator::new(&config);

        assert!(!validator.classify("Twelve chars").is_garbage);
        assert!(
            validator
                .classify("echoing hall\necholing\nechoing hall")
                .is_garbage
        );
    }
}
