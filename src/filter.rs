//! Boolean keyword filtering over paper records.
//!
//! A [`FilterSet`] combines rules in three roles:
//!
//! 1. every `Must` rule has to match,
//! 2. no `MustNot` rule may match,
//! 3. at least `min_should_match` of the `Should` rules have to match.
//!
//! With no `Should` rules the third step always passes. Matching is a
//! case-insensitive substring test; a field the record does not have reads as
//! empty and never satisfies `Contains`. Disabled rules and rules with an
//! empty pattern are ignored.
//!
//! # Example
//!
//! ```
//! use paperspider_core::filter::{FilterRule, FilterSet, evaluate};
//! use paperspider_core::{PaperKey, PaperRecord};
//!
//! let set = FilterSet::new()
//!     .with_rule("title:contains:graph".parse::<FilterRule>().unwrap().must());
//! let paper = PaperRecord::new(PaperKey::new("neurips", 2024, "p1"), "Graph Nets");
//! assert!(evaluate(&set, &paper));
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::record::PaperRecord;

/// Error from parsing a `FIELD:MODE:PATTERN` rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterParseError {
    /// The input did not have three `:`-separated parts.
    #[error("invalid filter '{0}': expected FIELD:MODE:PATTERN (e.g. title:contains:graph)")]
    Syntax(String),

    /// Unknown field name.
    #[error("unknown filter field '{0}': expected all, title, authors, abstract or keywords")]
    Field(String),

    /// Unknown match mode.
    #[error("unknown match mode '{0}': expected contains or not-contains")]
    Mode(String),
}

/// Which part of a record a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterField {
    /// Title, authors, abstract and keywords together.
    #[default]
    All,
    /// Paper title.
    Title,
    /// Author names.
    Authors,
    /// Abstract text; empty until fetched.
    Abstract,
    /// Keywords.
    Keywords,
}

impl FilterField {
    /// Lowercased haystack for this field.
    fn haystack(self, record: &PaperRecord) -> String {
        let text = match self {
            Self::All => [
                record.title.clone(),
                record.authors.join(" "),
                record.abstract_text.clone().unwrap_or_default(),
                join_keywords(record),
            ]
            .join("\n"),
            Self::Title => record.title.clone(),
            Self::Authors => record.authors.join("\n"),
            Self::Abstract => record.abstract_text.clone().unwrap_or_default(),
            Self::Keywords => join_keywords(record),
        };
        text.to_lowercase()
    }
}

fn join_keywords(record: &PaperRecord) -> String {
    record
        .keywords
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

impl FromStr for FilterField {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "any" | "*" => Ok(Self::All),
            "title" => Ok(Self::Title),
            "authors" | "author" => Ok(Self::Authors),
            "abstract" => Ok(Self::Abstract),
            "keywords" | "keyword" => Ok(Self::Keywords),
            _ => Err(FilterParseError::Field(s.to_string())),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::All => "all",
            Self::Title => "title",
            Self::Authors => "authors",
            Self::Abstract => "abstract",
            Self::Keywords => "keywords",
        };
        f.write_str(label)
    }
}

/// How a rule's pattern is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    /// The field contains the pattern.
    #[default]
    Contains,
    /// The field does not contain the pattern.
    NotContains,
}

impl FromStr for MatchMode {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contains" | "has" => Ok(Self::Contains),
            "not-contains" | "not_contains" | "notcontains" | "lacks" => Ok(Self::NotContains),
            _ => Err(FilterParseError::Mode(s.to_string())),
        }
    }
}

/// Role of a rule inside a [`FilterSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClauseRole {
    /// Has to match.
    Must,
    /// Counts toward `min_should_match`.
    #[default]
    Should,
    /// Must not match.
    MustNot,
}

/// One filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// Field to test.
    pub field: FilterField,
    /// Test mode.
    pub mode: MatchMode,
    /// Case-insensitive substring.
    pub pattern: String,
    /// Role in the set.
    pub role: ClauseRole,
    /// Disabled rules are ignored.
    pub enabled: bool,
}

impl FilterRule {
    /// Enabled `Should` rule.
    #[must_use]
    pub fn new(field: FilterField, mode: MatchMode, pattern: impl Into<String>) -> Self {
        Self {
            field,
            mode,
            pattern: pattern.into(),
            role: ClauseRole::Should,
            enabled: true,
        }
    }

    /// Sets the role to `Must`.
    #[must_use]
    pub fn must(self) -> Self {
        self.with_role(ClauseRole::Must)
    }

    /// Sets the role to `Should`.
    #[must_use]
    pub fn should(self) -> Self {
        self.with_role(ClauseRole::Should)
    }

    /// Sets the role to `MustNot`.
    #[must_use]
    pub fn must_not(self) -> Self {
        self.with_role(ClauseRole::MustNot)
    }

    /// Sets the role.
    #[must_use]
    pub fn with_role(mut self, role: ClauseRole) -> Self {
        self.role = role;
        self
    }

    /// Sets whether the rule participates.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.pattern.trim().is_empty()
    }

    /// Tests the rule against one record, ignoring its role.
    #[must_use]
    pub fn matches(&self, record: &PaperRecord) -> bool {
        let needle = self.pattern.trim().to_lowercase();
        let found = self.field.haystack(record).contains(&needle);
        match self.mode {
            MatchMode::Contains => found,
            MatchMode::NotContains => !found,
        }
    }
}

/// Parses `FIELD:MODE:PATTERN`; the pattern may itself contain `:`.
/// The parsed rule is an enabled `Should` rule.
impl FromStr for FilterRule {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(field), Some(mode), Some(pattern)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FilterParseError::Syntax(s.to_string()));
        };
        if pattern.trim().is_empty() {
            return Err(FilterParseError::Syntax(s.to_string()));
        }
        Ok(Self::new(field.parse()?, mode.parse()?, pattern.trim()))
    }
}

/// A set of rules plus the `Should` threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    /// Rules in any role order.
    pub rules: Vec<FilterRule>,
    /// Minimum number of matching `Should` rules.
    pub min_should_match: usize,
}

impl FilterSet {
    /// Empty set; matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the `Should` threshold.
    #[must_use]
    pub fn with_min_should_match(mut self, min: usize) -> Self {
        self.min_should_match = min;
        self
    }

    /// True when no rule is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.rules.iter().any(FilterRule::is_active)
    }

    fn active(&self, role: ClauseRole) -> impl Iterator<Item = &FilterRule> {
        self.rules
            .iter()
            .filter(move |rule| rule.role == role && rule.is_active())
    }
}

/// Returns true if `record` passes `set`.
///
/// Pure and deterministic.
#[must_use]
pub fn evaluate(set: &FilterSet, record: &PaperRecord) -> bool {
    if !set.active(ClauseRole::Must).all(|rule| rule.matches(record)) {
        return false;
    }
    if set.active(ClauseRole::MustNot).any(|rule| rule.matches(record)) {
        return false;
    }

    let mut should = set.active(ClauseRole::Should).peekable();
    if should.peek().is_none() {
        return true;
    }
    should.filter(|rule| rule.matches(record)).count() >= set.min_should_match
}

/// Keeps the records that pass `set`, preserving order.
#[must_use]
pub fn apply<'a>(set: &FilterSet, records: &'a [PaperRecord]) -> Vec<&'a PaperRecord> {
    records.iter().filter(|record| evaluate(set, record)).collect()
}
