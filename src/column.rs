//! Spreadsheet column addressing.
//!
//! Columns are written as bijective base-26 letters: `A`..`Z`, then `AA`,
//! `AB`, … `AZ`, `BA`. There is no zero digit, which is why the conversion
//! subtracts one before each division instead of using plain base 26.

use crate::error::CertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Convert a 0-based column index to its letter form (`0 → "A"`, `26 → "AA"`).
pub fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    // Only ASCII bytes were pushed.
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to a 0-based index. Case-insensitive, surrounding
/// whitespace ignored. Returns `None` for empty input or non-letter chars.
pub fn column_index(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        result = result.checked_mul(26)?.checked_add(digit)?;
    }
    Some(result - 1)
}

/// A validated spreadsheet column.
///
/// Serialises as its letter form so configuration files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column(usize);

impl Column {
    pub const A: Column = Column(0);

    pub const fn from_index(index: usize) -> Self {
        Column(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn letter(self) -> String {
        column_letter(self.0)
    }

    /// Cell text at this column of `row`, or `None` when the row is shorter.
    pub fn cell(self, row: &[String]) -> Option<&str> {
        row.get(self.0).map(String::as_str)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letter())
    }
}

impl FromStr for Column {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        column_index(s).map(Column).ok_or_else(|| CertError::InvalidColumn {
            input: s.to_string(),
        })
    }
}

impl Serialize for Column {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.letter())
    }
}

impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(14), "O");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("z"), Some(25));
    }

    #[test]
    fn carry_into_second_letter() {
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
        assert_eq!(column_index(" ab "), Some(27));
        assert_eq!(column_index("ZZ"), Some(701));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
        assert!("".parse::<Column>().is_err());
    }

    #[test]
    fn round_trip_first_thousand() {
        for i in 0..1000 {
            assert_eq!(column_index(&column_letter(i)), Some(i), "index {i}");
        }
    }

    #[test]
    fn column_serde_uses_letters() {
        let col: Column = "AB".parse().unwrap();
        assert_eq!(serde_json::to_string(&col).unwrap(), "\"AB\"");
        let back: Column = serde_json::from_str("\"o\"").unwrap();
        assert_eq!(back.index(), 14);
    }

    #[test]
    fn cell_lookup_handles_short_rows() {
        let row = vec!["a".to_string(), "b".to_string()];
        assert_eq!(Column::from_index(1).cell(&row), Some("b"));
        assert_eq!(Column::from_index(5).cell(&row), None);
    }
}
