//! Placeholder detection in template text.
//!
//! A placeholder is `<<body>>` where the body is letters (Latin or Arabic),
//! digits, underscore and whitespace. Anything else between the brackets is
//! not a placeholder and is left alone.

use crate::config::Variable;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<([\x{0600}-\x{06FF}a-zA-Z0-9_\s]+)>>").unwrap());

/// Unique placeholders in first-seen order, re-wrapped with a trimmed body.
///
/// ```rust
/// use certbatch::template::detect_placeholders;
///
/// let found = detect_placeholders("Dear << الاسم >>, on <<date>> … <<الاسم>>");
/// assert_eq!(found, vec!["<<الاسم>>", "<<date>>"]);
/// ```
pub fn detect_placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in RE_PLACEHOLDER.captures_iter(text) {
        let body = caps[1].trim();
        if body.is_empty() {
            continue;
        }
        let token = format!("<<{body}>>");
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}

/// Merge freshly detected placeholders with existing bindings.
///
/// Existing tokens keep their binding; new ones start unbound. Variables
/// whose token is no longer in the template are dropped.
pub fn merge_detected(existing: &[Variable], detected: &[String]) -> Vec<Variable> {
    detected
        .iter()
        .map(|token| {
            existing
                .iter()
                .find(|v| &v.token == token)
                .cloned()
                .unwrap_or_else(|| Variable::unbound(token.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;

    #[test]
    fn detects_arabic_and_latin_bodies() {
        let text = "شهادة تقدير <<الاسم>>\nCourse: <<course_name>> <<Grade 2>>";
        assert_eq!(
            detect_placeholders(text),
            vec!["<<الاسم>>", "<<course_name>>", "<<Grade 2>>"]
        );
    }

    #[test]
    fn ignores_bodies_with_punctuation() {
        assert!(detect_placeholders("<<a.b>> <<>> << >> <a>").is_empty());
    }

    #[test]
    fn merge_keeps_existing_bindings() {
        let existing = vec![
            Variable::column("<<name>>", Column::from_index(2)),
            Variable::literal("<<old>>", "x"),
        ];
        let merged = merge_detected(&existing, &["<<name>>".into(), "<<date>>".into()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], existing[0]);
        assert_eq!(merged[1], Variable::unbound("<<date>>"));
    }
}
