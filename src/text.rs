use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Promotional footer appended to agent replies.
pub const DEFAULT_FOOTER_PATTERN: &str = r"Want to elevate your Aqua System Knowledge\?.*Aquademy";

fn blank_line_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\r?\n){2,}").expect("blank line pattern is valid"))
}

/// Best-effort removal of a leading quoted email header block.
///
/// Everything up to and including the first run of two or more line breaks is
/// treated as header and dropped; the remainder is trimmed. Text without such a
/// run is returned as-is. This is a heuristic, not an email parser: a
/// description whose first paragraph is real content loses that paragraph.
pub fn strip_email_headers(text: &str) -> String {
    match blank_line_run().find(text) {
        Some(m) => text[m.end()..].trim().to_string(),
        None => text.to_string(),
    }
}

/// Flattens free text into a single ASCII line for training records.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    footer: Option<Regex>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::with_footer_pattern(DEFAULT_FOOTER_PATTERN)
            .expect("default footer pattern is valid")
    }
}

impl TextNormalizer {
    /// The pattern is matched with `.` spanning line breaks.
    pub fn with_footer_pattern(pattern: &str) -> Result<Self, regex::Error> {
        let footer = Regex::new(&format!("(?s){pattern}"))?;
        Ok(Self {
            footer: Some(footer),
        })
    }

    pub fn without_footer() -> Self {
        Self { footer: None }
    }

    pub fn normalize(&self, text: &str) -> String {
        let without_footer = match &self.footer {
            Some(re) => re.replace_all(text, ""),
            None => text.into(),
        };

        let ascii: String = without_footer
            .nfkd()
            .filter(char::is_ascii)
            .collect();

        ascii.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_header_block_before_first_blank_line() {
        let raw = "From: a@b.c\nSent: Monday\nSubject: help\n\n  The pump is leaking.\nPlease advise.  ";
        assert_eq!(
            strip_email_headers(raw),
            "The pump is leaking.\nPlease advise."
        );
    }

    #[test]
    fn handles_crlf_and_longer_runs() {
        let raw = "header\r\n\r\n\r\nbody";
        assert_eq!(strip_email_headers(raw), "body");
    }

    #[test]
    fn leaves_text_without_blank_line_untouched() {
        let raw = "  single paragraph\nwith two lines ";
        assert_eq!(strip_email_headers(raw), raw);
    }

    #[test]
    fn stripping_is_idempotent_once_no_blank_run_remains() {
        let once = strip_email_headers("To: x\n\nline one\nline two");
        let twice = strip_email_headers(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalizes_to_single_ascii_line() {
        let normalizer = TextNormalizer::without_footer();
        let out = normalizer.normalize("Caf\u{e9}  na\u{ef}ve\r\n\n\tr\u{e9}sum\u{e9} \u{2603} done");
        assert_eq!(out, "Cafe naive resume done");
    }

    #[test]
    fn removes_promotional_footer_across_lines() {
        let normalizer = TextNormalizer::default();
        let out = normalizer.normalize(
            "Thanks for reaching out.\n\nWant to elevate your Aqua System Knowledge?\nJoin us at\nAquademy",
        );
        assert_eq!(out, "Thanks for reaching out.");
    }

    #[test]
    fn rejects_invalid_footer_pattern() {
        assert!(TextNormalizer::with_footer_pattern("(").is_err());
    }
}
