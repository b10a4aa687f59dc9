//! Pronunciation rules for the spoken (TTS) track.
//!
//! These rewrite abbreviations a Danish voice reads badly. They are applied
//! to the text sent to the provider only, never to the text that ends up in
//! DTBook, PEF or the DAISY navigation file.
//!
//! Rules (applied in order):
//! 1. Standalone address abbreviations (`st.`, `mf.`, `th.`, `tv.`, with or
//!    without the dot) and `UN`, case-insensitive. A dot glued to the next
//!    word (`St.Peter`) is not an abbreviation and is left as written.
//! 2. Clock times `09:30` → `klokken 09 30`

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Whether the rules apply to a job in `language`.
pub fn applies_to(language: &str) -> bool {
    let lang = language.trim().to_lowercase();
    lang == "da" || lang.starts_with("da-") || lang.starts_with("da_")
}

/// Apply every rule to `input`.
pub fn apply_danish_fixes(input: &str) -> String {
    let s = expand_abbreviations(input);
    expand_clock_times(&s)
}

// ── Rule 1: Abbreviations ────────────────────────────────────────────────────

static RE_ABBREVIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(st|mf|th|tv|un)\b\.?").unwrap());

fn expansion(abbr: &str) -> &'static str {
    match abbr.to_lowercase().as_str() {
        "st" => "stueetagen",
        "mf" => "midt for",
        "th" => "til højre",
        "tv" => "til venstre",
        _ => "De Forenede Nationer",
    }
}

fn expand_abbreviations(input: &str) -> String {
    RE_ABBREVIATION
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            let glued = whole.ends_with('.')
                && caps
                    .get(0)
                    .and_then(|m| input[m.end()..].chars().next())
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
            if glued {
                whole.to_string()
            } else {
                expansion(&caps[1]).to_string()
            }
        })
        .into_owned()
}

// ── Rule 2: Clock times ──────────────────────────────────────────────────────

static RE_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").unwrap());

fn expand_clock_times(input: &str) -> String {
    RE_CLOCK.replace_all(input, "klokken $1 $2").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_detection() {
        assert!(applies_to("da-DK"));
        assert!(applies_to("da"));
        assert!(applies_to(" DA-dk "));
        assert!(!applies_to("en-GB"));
        assert!(!applies_to("dan"));
    }

    #[test]
    fn expands_address_abbreviations() {
        assert_eq!(
            apply_danish_fixes("Nørregade 4, 2. th."),
            "Nørregade 4, 2. til højre"
        );
        assert_eq!(apply_danish_fixes("1. tv"), "1. til venstre");
        assert_eq!(apply_danish_fixes("St. og mf."), "stueetagen og midt for");
    }

    #[test]
    fn dot_glued_to_next_word_is_kept() {
        assert_eq!(apply_danish_fixes("St.Peter"), "St.Peter");
        assert_eq!(apply_danish_fixes("mf.x og st. tv."), "mf.x og stueetagen til venstre");
    }

    #[test]
    fn leaves_longer_words_alone() {
        assert_eq!(apply_danish_fixes("stor stue"), "stor stue");
        assert_eq!(apply_danish_fixes("mft thing tvist"), "mft thing tvist");
    }

    #[test]
    fn expands_un() {
        assert_eq!(
            apply_danish_fixes("Rapport fra UN i dag"),
            "Rapport fra De Forenede Nationer i dag"
        );
    }

    #[test]
    fn expands_clock_times() {
        assert_eq!(apply_danish_fixes("Mødet er 09:30."), "Mødet er klokken 09 30.");
        assert_eq!(apply_danish_fixes("kl 23:59"), "kl klokken 23 59");
        assert_eq!(apply_danish_fixes("score 24:61"), "score 24:61");
    }
}
