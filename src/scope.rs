//! OAuth2 scope matching between what a consumer needs and what a domain of
//! credentials is allowed to grant.
//!
//! Several provider integrations may share one domain; each specification
//! only judges requirements of its own provider kind and answers
//! [`MatchResult::Unknown`] for everyone else's.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The provider a requirement or specification belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Google,
    Other(String),
}

/// Tri-state outcome of testing a requirement against a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Positive,
    Negative,
    Unknown,
}

impl MatchResult {
    /// Folds two results: a negative anywhere wins, then a positive.
    pub fn combine(self, other: MatchResult) -> MatchResult {
        use MatchResult::*;
        match (self, other) {
            (Negative, _) | (_, Negative) => Negative,
            (Positive, _) | (_, Positive) => Positive,
            _ => Unknown,
        }
    }

    pub fn is_negative(self) -> bool {
        self == MatchResult::Negative
    }
}

/// The set of scopes a consumer needs. Order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRequirement {
    kind: ProviderKind,
    scopes: BTreeSet<String>,
}

impl ScopeRequirement {
    pub fn new<I, S>(kind: ProviderKind, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn google<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ProviderKind::Google, scopes)
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// The scopes a domain allows, for one provider kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpecification {
    kind: ProviderKind,
    scopes: BTreeSet<String>,
}

impl ScopeSpecification {
    pub fn new<I, S>(kind: ProviderKind, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn google<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ProviderKind::Google, scopes)
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn specified_scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    /// Positive iff every required scope is specified here. Requirements of
    /// another provider kind are always `Unknown`.
    pub fn test(&self, requirement: &ScopeRequirement) -> MatchResult {
        if requirement.kind != self.kind {
            return MatchResult::Unknown;
        }
        if requirement.scopes.is_subset(&self.scopes) {
            MatchResult::Positive
        } else {
            MatchResult::Negative
        }
    }

    pub fn test_all(&self, requirements: &[ScopeRequirement]) -> MatchResult {
        requirements
            .iter()
            .fold(MatchResult::Unknown, |acc, r| acc.combine(self.test(r)))
    }
}

/// A named bucket of scope specifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub specifications: Vec<ScopeSpecification>,
}

impl Domain {
    pub fn new(name: impl Into<String>, specifications: Vec<ScopeSpecification>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            specifications,
        }
    }

    /// False iff any specification rejects the requirements outright.
    pub fn test(&self, requirements: &[ScopeRequirement]) -> bool {
        !self
            .specifications
            .iter()
            .any(|s| s.test_all(requirements).is_negative())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> Vec<&'static str> {
        vec!["foo", "baz"]
    }

    #[test]
    fn test_foreign_kind_is_unknown() {
        let spec = ScopeSpecification::google(good());
        let req = ScopeRequirement::new(ProviderKind::Other("github".into()), good());
        assert_eq!(spec.test(&req), MatchResult::Unknown);

        let empty =
            ScopeRequirement::new(ProviderKind::Other("github".into()), Vec::<String>::new());
        assert_eq!(spec.test(&empty), MatchResult::Unknown);
    }

    #[test]
    fn test_subset_is_positive() {
        let spec = ScopeSpecification::google(good());
        assert_eq!(spec.test(&ScopeRequirement::google(good())), MatchResult::Positive);
        assert_eq!(spec.test(&ScopeRequirement::google(["baz"])), MatchResult::Positive);
        assert_eq!(
            spec.test(&ScopeRequirement::google(Vec::<String>::new())),
            MatchResult::Positive
        );
    }

    #[test]
    fn test_missing_scope_is_negative() {
        let spec = ScopeSpecification::google(good());
        let req = ScopeRequirement::google(["foo", "bar"]);
        assert_eq!(spec.test(&req), MatchResult::Negative);
    }

    #[test]
    fn test_scope_order_is_irrelevant() {
        assert_eq!(
            ScopeRequirement::google(["a", "b"]),
            ScopeRequirement::google(["b", "a", "a"])
        );
    }

    #[test]
    fn test_combine() {
        use MatchResult::*;
        assert_eq!(Unknown.combine(Unknown), Unknown);
        assert_eq!(Unknown.combine(Positive), Positive);
        assert_eq!(Positive.combine(Negative), Negative);
        assert_eq!(Negative.combine(Unknown), Negative);
    }

    #[test]
    fn test_domain_ignores_foreign_requirements() {
        let domain = Domain::new("metadata", vec![ScopeSpecification::google(good())]);
        let foreign = ScopeRequirement::new(ProviderKind::Other("x".into()), ["anything"]);

        assert!(domain.test(&[foreign.clone()]));
        assert!(domain.test(&[foreign.clone(), ScopeRequirement::google(["foo"])]));
        assert!(!domain.test(&[foreign, ScopeRequirement::google(["bar"])]));
        assert!(domain.test(&[]));
    }
}
