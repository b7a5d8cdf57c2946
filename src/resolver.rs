use crate::schema::{BranchMapping, ReferenceData};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A raw branch identifier as it appears in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchIdentifier {
    Code(i64),
    Name(String),
    /// A number that cannot be a branch code (fractional or out of range).
    Unmapped(String),
}

impl BranchIdentifier {
    /// Interprets a text cell. Integral numbers (including `"12936.0"` as written by
    /// spreadsheet exports) become codes, anything else is taken as a name.
    /// Blank text has no identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(code) = raw.parse::<i64>() {
            return Some(Self::Code(code));
        }

        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(Self::numeric(v, raw)),
            _ => Some(Self::Name(raw.to_string())),
        }
    }

    /// Interprets a numeric cell. Non-finite values have no identifier.
    pub fn from_number(value: f64) -> Option<Self> {
        value
            .is_finite()
            .then(|| Self::numeric(value, &value.to_string()))
    }

    fn numeric(value: f64, raw: &str) -> Self {
        // i64::MAX as f64 rounds up to 2^63, which is already out of range
        let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
        if value.fract() == 0.0 && in_range {
            Self::Code(value as i64)
        } else {
            Self::Unmapped(raw.to_string())
        }
    }
}

impl fmt::Display for BranchIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{}", code),
            Self::Name(name) | Self::Unmapped(name) => f.write_str(name),
        }
    }
}

/// Maps numeric branch codes onto canonical branch names.
///
/// Resolution is total: an unknown code resolves to `"Branch <code>"`, so unknown
/// branches still group under a stable key of their own.
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    names: HashMap<i64, String>,
}

impl IdentifierResolver {
    pub fn new(mappings: &[BranchMapping]) -> Self {
        let names = mappings
            .iter()
            .map(|m| (m.code, m.name.trim().to_string()))
            .collect();
        Self { names }
    }

    pub fn from_reference(reference: &ReferenceData) -> Self {
        Self::new(&reference.branches)
    }

    pub fn resolve(&self, identifier: &BranchIdentifier) -> String {
        match identifier {
            BranchIdentifier::Code(code) => self.resolve_code(*code),
            BranchIdentifier::Name(name) => name.trim().to_string(),
            BranchIdentifier::Unmapped(raw) => placeholder(raw),
        }
    }

    pub fn resolve_code(&self, code: i64) -> String {
        self.names
            .get(&code)
            .cloned()
            .unwrap_or_else(|| placeholder(code))
    }

    pub fn resolve_raw(&self, raw: &str) -> Option<String> {
        BranchIdentifier::parse(raw).map(|id| self.resolve(&id))
    }

    pub fn is_known(&self, code: i64) -> bool {
        self.names.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn placeholder(identifier: impl fmt::Display) -> String {
    format!("Branch {}", identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentifierResolver {
        IdentifierResolver::new(&[
            BranchMapping {
                code: 12936,
                name: "BURUBURU BRANCH".to_string(),
            },
            BranchMapping {
                code: 8550,
                name: "TOWN BRANCH".to_string(),
            },
        ])
    }

    #[test]
    fn test_known_and_unknown_codes() {
        let r = resolver();
        assert_eq!(r.resolve_code(12936), "BURUBURU BRANCH");
        assert_eq!(r.resolve_code(4242), "Branch 4242");
        assert_ne!(r.resolve_code(1), r.resolve_code(2));
    }

    #[test]
    fn test_raw_identifiers() {
        let r = resolver();
        assert_eq!(r.resolve_raw("8550"), Some("TOWN BRANCH".to_string()));
        assert_eq!(r.resolve_raw("8550.0"), Some("TOWN BRANCH".to_string()));
        assert_eq!(
            r.resolve_raw("  Kiambu Branch "),
            Some("Kiambu Branch".to_string())
        );
        assert_eq!(r.resolve_raw(""), None);
        assert_eq!(r.resolve_raw("12.5"), Some("Branch 12.5".to_string()));
    }

    #[test]
    fn test_numbers_that_are_not_codes() {
        let r = resolver();
        assert_eq!(
            BranchIdentifier::from_number(12936.0),
            Some(BranchIdentifier::Code(12936))
        );
        assert_eq!(BranchIdentifier::from_number(f64::NAN), None);

        let huge = BranchIdentifier::parse("1e30").unwrap();
        assert_eq!(huge, BranchIdentifier::Unmapped("1e30".to_string()));
        assert_eq!(r.resolve(&huge), "Branch 1e30");
        assert_ne!(r.resolve_raw("1e30"), Some(r.resolve_code(i64::MAX)));

        let fractional = BranchIdentifier::from_number(12.5).unwrap();
        assert_eq!(r.resolve(&fractional), "Branch 12.5");
    }

    #[test]
    fn test_builtin_reference_table() {
        let r = IdentifierResolver::from_reference(&ReferenceData::default());
        assert_eq!(r.len(), 11);
        assert_eq!(r.resolve_code(55886), "Utawala Branch");
    }
}
