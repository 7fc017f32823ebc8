//! Canonical entity keys
//!
//! Every region name passes through [`EntityKey::parse`] before it is used as a
//! cache key, a live query parameter, or a snapshot file name, so the three
//! always agree on spelling and case.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// USPS abbreviations accepted in place of a state name
const USPS_CODES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("DC", "District of Columbia"),
];

/// Words kept lower-case unless they start the name
const LOWERCASE_WORDS: &[&str] = &["of", "and", "the"];

/// Errors produced while normalizing an entity name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityKeyError {
    /// Nothing left after trimming whitespace
    #[error("Entity name must not be empty")]
    Empty,
}

/// Normalized region identifier
///
/// Normalization trims the input, collapses runs of whitespace to one space,
/// expands two-letter USPS codes, and title-cases each word (connecting words
/// such as "of" stay lower-case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Normalizes a raw region name
    ///
    /// # Arguments
    /// * `raw` - Name as typed by a user, e.g. `"  new   york "` or `"ny"`
    ///
    /// # Returns
    /// * `Ok(EntityKey)` holding the canonical name, e.g. `"New York"`
    /// * `Err(EntityKeyError::Empty)` for blank input
    pub fn parse(raw: &str) -> Result<Self, EntityKeyError> {
        let words: Vec<&str> = raw.split_whitespace().collect();
        if words.is_empty() {
            return Err(EntityKeyError::Empty);
        }

        if let [code] = words.as_slice() {
            if code.len() == 2 {
                let upper = code.to_ascii_uppercase();
                if let Some((_, name)) = USPS_CODES.iter().find(|(c, _)| *c == upper) {
                    return Ok(Self((*name).to_string()));
                }
            }
        }

        let name = words
            .iter()
            .enumerate()
            .map(|(i, word)| title_case_word(word, i == 0))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name stem for snapshot and report artifacts (spaces become underscores)
    pub fn storage_stem(&self) -> String {
        self.0.replace(' ', "_")
    }
}

fn title_case_word(word: &str, first: bool) -> String {
    let lower = word.to_lowercase();
    if !first && LOWERCASE_WORDS.contains(&lower.as_str()) {
        return lower;
    }
    let mut chars = lower.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl FromStr for EntityKey {
    type Err = EntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_title_cases_and_collapses_whitespace() {
        let key = EntityKey::parse("  new   YORK ").unwrap();
        assert_eq!(key.as_str(), "New York");
    }

    #[test]
    fn test_parse_expands_usps_codes() {
        assert_eq!(EntityKey::parse("ny").unwrap().as_str(), "New York");
        assert_eq!(EntityKey::parse("DC").unwrap().as_str(), "District of Columbia");
        assert_eq!(EntityKey::parse("ca").unwrap().as_str(), "California");
    }

    #[test]
    fn test_parse_keeps_connecting_words_lowercase() {
        let key = EntityKey::parse("DISTRICT OF COLUMBIA").unwrap();
        assert_eq!(key.as_str(), "District of Columbia");
        assert_eq!(key, EntityKey::parse("dc").unwrap());
    }

    #[test]
    fn test_unknown_two_letter_name_is_title_cased() {
        assert_eq!(EntityKey::parse("zz").unwrap().as_str(), "Zz");
    }

    #[test]
    fn test_parse_rejects_blank_input() {
        assert_eq!(EntityKey::parse("   "), Err(EntityKeyError::Empty));
        assert_eq!("".parse::<EntityKey>(), Err(EntityKeyError::Empty));
    }

    #[test]
    fn test_differently_typed_names_share_one_key() {
        let a = EntityKey::parse("new york").unwrap();
        let b = EntityKey::parse("New York").unwrap();
        let c = EntityKey::parse("NEW\tYORK").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_storage_stem_replaces_spaces() {
        let key = EntityKey::parse("north carolina").unwrap();
        assert_eq!(key.storage_stem(), "North_Carolina");
    }
}
