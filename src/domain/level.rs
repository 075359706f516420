//! Hierarchical item levels (`1`, `1.2`, `2.3.0`).

use std::{cmp::Ordering, fmt, str::FromStr};

use super::error::DomainError;

/// Position of an item inside its document.
///
/// Levels compare numerically part by part, so `1.10` sorts after `1.9` and a
/// heading such as `1.0` sorts before its first child `1.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Level {
    parts: Vec<u32>,
}

impl Level {
    pub fn new(parts: Vec<u32>) -> Result<Self, DomainError> {
        if parts.is_empty() {
            return Err(DomainError::invalid_level("", "level has no parts"));
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// A trailing zero marks a heading-only level (`2.0`, `1.3.0`).
    pub fn is_heading(&self) -> bool {
        self.parts.len() > 1 && self.parts.last() == Some(&0)
    }

    /// Number of non-zero parts, which drives the heading tag depth.
    pub fn heading_depth(&self) -> usize {
        self.parts.iter().filter(|part| **part != 0).count()
    }

    /// Whether `self` is shown alongside `selected` in a section view: the
    /// same level, a sibling under the same parent, or the direct parent.
    pub fn shares_section(&self, selected: &Level) -> bool {
        let own = self.without_heading_zero();
        let other = selected.without_heading_zero();

        if own.len() + 1 == other.len() && other.starts_with(own) {
            return true;
        }
        if own.len() != other.len() {
            return false;
        }
        own.is_empty() || own[..own.len() - 1] == other[..other.len() - 1]
    }

    fn without_heading_zero(&self) -> &[u32] {
        match self.parts.split_last() {
            Some((0, rest)) => rest,
            _ => &self.parts,
        }
    }
}

impl FromStr for Level {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_level(value, "level is empty"));
        }

        let parts = trimmed
            .split('.')
            .map(|part| {
                part.trim().parse::<u32>().map_err(|err| {
                    DomainError::invalid_level(value, format!("part `{part}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(parts)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
