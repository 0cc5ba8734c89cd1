//! Name cleaning: strip titles, honorifics and stray initials from a
//! recipient name before it is printed on a certificate.
//!
//! ## Rule order
//!
//! 1. Disabled rules return the input untouched.
//! 2. Slash truncation keeps only what follows the last `/`
//!    (`Dept/Name` → `Name`).
//! 3. Interior whitespace runs collapse to one space.
//! 4. A fixpoint loop over the remaining text, each pass trimming edge
//!    separators and then trying, in order:
//!    * the longest configured title that sits at the start as a whole
//!      token (case-insensitive, separator or end of text after it),
//!    * a lone leading alef,
//!    * any other lone leading letter, then a lone trailing letter.
//!
//! Titles are only ever removed from the leading position. A removal that
//! would leave nothing behind is skipped, so a name that *is* a title
//! survives. Because the loop runs until no rule applies, the result is a
//! fixpoint: normalising it again yields the same text.
//!
//! [`comparison_key`] is a separate, lossy canonical form used only to spot
//! names that were already processed; it is never displayed.

use crate::config::CleanupRules;

/// Punctuation treated like whitespace around tokens.
const SEPARATOR_PUNCT: [char; 4] = ['.', ':', '-', '_'];

/// Alef and its hamza / madda variants.
const ALEF_VARIANTS: [char; 4] = ['ا', 'أ', 'إ', 'آ'];

fn is_separator(c: char) -> bool {
    c.is_whitespace() || SEPARATOR_PUNCT.contains(&c)
}

fn is_alef(c: char) -> bool {
    ALEF_VARIANTS.contains(&c)
}

/// Compiled form of [`CleanupRules`].
///
/// The word table is sorted once, longest first (stable, so equal lengths
/// keep their configured order), which makes the first match at a position
/// also the longest one.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    enabled: bool,
    remove_before_slash: bool,
    remove_leading_alef: bool,
    strip_single_letters: bool,
    collapse_whitespace: bool,
    words: Vec<String>,
}

impl NameNormalizer {
    pub fn new(rules: &CleanupRules) -> Self {
        let mut words: Vec<String> = rules
            .remove_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));

        Self {
            enabled: rules.enabled,
            remove_before_slash: rules.remove_before_slash,
            remove_leading_alef: rules.remove_leading_alef,
            strip_single_letters: rules.strip_single_letters,
            collapse_whitespace: rules.collapse_whitespace,
            words,
        }
    }

    /// Clean one raw cell value.
    pub fn normalize(&self, raw: &str) -> String {
        if !self.enabled {
            return raw.to_string();
        }

        let mut name = raw;
        if self.remove_before_slash && name.contains('/') {
            name = name.rsplit('/').next().unwrap_or("");
        }

        let mut current = if self.collapse_whitespace {
            name.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            name.to_string()
        };

        loop {
            let trimmed = current.trim_matches(is_separator);
            match self.strip_once(trimmed) {
                Some(rest) => current = rest.to_string(),
                None => return trimmed.to_string(),
            }
        }
    }

    /// Apply the first rule that matches, returning the remainder.
    fn strip_once<'a>(&self, s: &'a str) -> Option<&'a str> {
        if let Some(rest) = self.strip_leading_word(s) {
            return Some(rest);
        }
        if self.remove_leading_alef {
            if let Some(rest) = strip_leading_letter(s, is_alef) {
                return Some(rest);
            }
        }
        if self.strip_single_letters {
            if let Some(rest) = strip_leading_letter(s, |c| !is_alef(c)) {
                return Some(rest);
            }
            if let Some(rest) = strip_trailing_letter(s) {
                return Some(rest);
            }
        }
        None
    }

    fn strip_leading_word<'a>(&self, s: &'a str) -> Option<&'a str> {
        self.words.iter().find_map(|word| {
            let rest = strip_prefix_ci(s, word)?;
            let bounded = rest.is_empty()
                || rest.starts_with(is_separator)
                || word.ends_with(is_separator);
            if !bounded {
                return None;
            }
            non_empty(rest.trim_start_matches(is_separator))
        })
    }
}

/// Convenience wrapper for one-off calls.
pub fn normalize(raw: &str, rules: &CleanupRules) -> String {
    NameNormalizer::new(rules).normalize(raw)
}

/// Case-insensitive `strip_prefix`, comparing char by char so the returned
/// slice always starts on a char boundary of `s`.
fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = s.char_indices();
    for pc in prefix.chars() {
        let (_, c) = chars.next()?;
        if c != pc && !c.to_lowercase().eq(pc.to_lowercase()) {
            return None;
        }
    }
    let idx = chars.next().map_or(s.len(), |(i, _)| i);
    Some(&s[idx..])
}

/// Strip a one-letter token at the start when `accept` allows the letter.
fn strip_leading_letter(s: &str, accept: impl Fn(char) -> bool) -> Option<&str> {
    let mut chars = s.chars();
    let first = chars.next()?;
    let second = chars.next()?;
    if !first.is_alphabetic() || !accept(first) || !is_separator(second) {
        return None;
    }
    non_empty(s[first.len_utf8()..].trim_start_matches(is_separator))
}

/// Strip a one-letter token at the end.
fn strip_trailing_letter(s: &str) -> Option<&str> {
    let mut chars = s.chars().rev();
    let last = chars.next()?;
    let before = chars.next()?;
    if !last.is_alphabetic() || !is_separator(before) {
        return None;
    }
    non_empty(s[..s.len() - last.len_utf8()].trim_end_matches(is_separator))
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Canonical form for "same person" checks.
///
/// Unifies alef variants, teh marbuta / heh, alef maksura / yeh, drops
/// tatweel and harakat, lowercases, and collapses whitespace.
pub fn comparison_key(name: &str) -> String {
    let folded: String = name
        .chars()
        .filter_map(|c| match c {
            'أ' | 'إ' | 'آ' | 'ٱ' => Some('ا'),
            'ة' => Some('ه'),
            'ى' => Some('ي'),
            'ـ' => None,
            '\u{064B}'..='\u{0652}' => None,
            c => Some(c),
        })
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(s: &str) -> String {
        normalize(s, &CleanupRules::default())
    }

    #[test]
    fn disabled_rules_are_identity() {
        let rules = CleanupRules::disabled();
        assert_eq!(normalize("  د. احمد / x ", &rules), "  د. احمد / x ");
    }

    #[test]
    fn leading_titles_removed() {
        assert_eq!(clean("السيد احمد محمد"), "احمد محمد");
        assert_eq!(clean("المهندس احمد"), "احمد");
        assert_eq!(clean("ا. احمد"), "احمد");
        assert_eq!(clean("أ. احمد"), "احمد");
        assert_eq!(clean("Mr. John Smith"), "John Smith");
        assert_eq!(clean("mrs smith"), "smith");
    }

    #[test]
    fn longest_title_wins() {
        let rules = CleanupRules {
            remove_words: vec!["د".into(), "دكتور".into()],
            ..CleanupRules::default()
        };
        assert_eq!(normalize("دكتور فلان", &rules), "فلان");
    }

    #[test]
    fn titles_never_match_inside_words() {
        assert_eq!(clean("عبدالشيخ احمد"), "عبدالشيخ احمد");
        assert_eq!(clean("شيخه محمد"), "شيخه محمد");
        assert_eq!(clean("Sirius Black"), "Sirius Black");
    }

    #[test]
    fn trailing_titles_kept() {
        assert_eq!(clean("احمد محمد محمود السيد"), "احمد محمد محمود السيد");
        assert_eq!(clean("محمد مهندس"), "محمد مهندس");
        assert_eq!(
            clean("أحمد محمد أحمد السيد المنياوى"),
            "أحمد محمد أحمد السيد المنياوى"
        );
    }

    #[test]
    fn single_letter_tokens() {
        assert_eq!(clean("د دعاء حبيب"), "دعاء حبيب");
        assert_eq!(clean("A John Doe"), "John Doe");
        assert_eq!(clean("John D"), "John");
        assert_eq!(clean("خالد محمود"), "خالد محمود");
    }

    #[test]
    fn alef_with_punctuation() {
        for (input, expected) in [
            ("ا_ محمد", "محمد"),
            ("أ_محمد", "محمد"),
            ("ا: محمد", "محمد"),
            ("أ:محمد", "محمد"),
            ("ا- محمد", "محمد"),
            ("ا-محمد", "محمد"),
            ("أ-محمد", "محمد"),
            ("أ: د. احمد", "احمد"),
            ("_احمد_", "احمد"),
        ] {
            assert_eq!(clean(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn alef_starting_a_word_survives() {
        assert_eq!(clean("احمد"), "احمد");
        assert_eq!(clean("أسامة علي"), "أسامة علي");
    }

    #[test]
    fn alef_rule_can_be_disabled() {
        let rules = CleanupRules {
            remove_leading_alef: false,
            ..CleanupRules::default()
        };
        assert_eq!(normalize("ا محمد", &rules), "ا محمد");
        // other letters still go
        assert_eq!(normalize("د محمد", &rules), "محمد");
    }

    #[test]
    fn slash_truncation() {
        assert_eq!(clean("Dept/محمد"), "محمد");
        assert_eq!(clean("د/ احمد"), "احمد");
        // a trailing slash leaves nothing
        assert_eq!(clean("قسم/"), "");
        assert_eq!(clean("Dept/"), "");
        assert_eq!(clean("a/b/ علي "), "علي");
    }

    #[test]
    fn title_alone_is_kept() {
        assert_eq!(clean("Dr"), "Dr");
        assert_eq!(clean("Dr Dr"), "Dr");
        assert_eq!(clean("A"), "A");
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(clean("  محمد \t  علي  "), "محمد علي");
    }

    #[test]
    fn idempotent_on_samples() {
        for s in [
            "أ: د. احمد",
            "Dr. A. B. Smith J",
            "  _ د / x ",
            "السيد السيد احمد",
            "Mr Mrs Ms",
        ] {
            let once = clean(s);
            assert_eq!(clean(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn comparison_key_unifies_variants() {
        assert_eq!(comparison_key("أحمد"), "احمد");
        assert_eq!(comparison_key("إسلام  فاطمة"), "اسلام فاطمه");
        assert_eq!(comparison_key("مُحَمَّد"), "محمد");
        assert_eq!(comparison_key("John DOE"), "john doe");
    }
}
