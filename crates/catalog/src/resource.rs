//! Resource declarations and desired-state schemas
//!
//! A resource is the unit of desired state, identified by a `(type, title)`
//! pair. Declarations carry an attribute bag plus explicit ordering
//! references; the compiler validates the bag against the fixed schema of
//! the declared type and produces a typed [`Desired`] state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scalar value carried by facts and resource attributes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    /// Get the string value, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the boolean value, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Identity of a resource: the unique `(type, title)` pair
///
/// Rendered and parsed as `type[title]`, e.g. `service[backend-server]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub rtype: String,
    pub title: String,
}

impl ResourceRef {
    pub fn new(rtype: &str, title: &str) -> Self {
        Self {
            rtype: rtype.to_string(),
            title: title.to_string(),
        }
    }

    /// Shorthand for a `service` reference
    pub fn service(title: &str) -> Self {
        Self::new("service", title)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.rtype, self.title)
    }
}

/// Error parsing a `type[title]` reference string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource reference `{0}`, expected `type[title]`")]
pub struct InvalidRef(pub String);

impl FromStr for ResourceRef {
    type Err = InvalidRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let open = s.find('[').ok_or_else(|| InvalidRef(s.to_string()))?;
        if !s.ends_with(']') || open == 0 || open + 2 > s.len() - 1 {
            return Err(InvalidRef(s.to_string()));
        }
        let rtype = &s[..open];
        let title = &s[open + 1..s.len() - 1];
        if title.is_empty() || title.contains('[') || title.contains(']') {
            return Err(InvalidRef(s.to_string()));
        }
        Ok(Self::new(rtype, title))
    }
}

/// A single declared resource: identity, attribute bag, ordering references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub rtype: String,
    pub title: String,
    /// Attribute name -> desired value (validated against the type schema at compile)
    #[serde(default)]
    pub attributes: BTreeMap<String, Scalar>,
    /// Explicit dependencies: these resources converge before this one
    #[serde(default)]
    pub requires: Vec<ResourceRef>,
    /// Containing class scope, if any
    #[serde(default)]
    pub class: Option<String>,
}

impl ResourceDeclaration {
    pub fn new(rtype: &str, title: &str) -> Self {
        Self {
            rtype: rtype.to_string(),
            title: title.to_string(),
            attributes: BTreeMap::new(),
            requires: Vec::new(),
            class: None,
        }
    }

    /// Shorthand for a `service` declaration
    pub fn service(title: &str) -> Self {
        Self::new("service", title)
    }

    /// Set a desired attribute value
    pub fn attr(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Add an explicit dependency reference
    pub fn require(mut self, reference: ResourceRef) -> Self {
        self.requires.push(reference);
        self
    }

    /// Place this resource inside a class scope
    pub fn in_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.rtype, &self.title)
    }
}

/// Insertion-ordered collection of declarations plus class-level prerequisites
///
/// Constructed fresh for each compile from parameters and facts. Duplicate
/// `(type, title)` pairs are detected at compile time, not insertion time,
/// so the compiler can report them as [`crate::CompileError::DuplicateResource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSet {
    declarations: Vec<ResourceDeclaration>,
    /// Class name -> resources that must converge before any member of the class
    class_requires: BTreeMap<String, Vec<ResourceRef>>,
}

impl DeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, declaration: ResourceDeclaration) {
        self.declarations.push(declaration);
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, declaration: ResourceDeclaration) -> Self {
        self.push(declaration);
        self
    }

    /// Record a class-level prerequisite: every member of `class` gains a
    /// dependency edge on `reference`
    pub fn require_for_class(&mut self, class: &str, reference: ResourceRef) {
        self.class_requires
            .entry(class.to_string())
            .or_default()
            .push(reference);
    }

    pub fn declarations(&self) -> &[ResourceDeclaration] {
        &self.declarations
    }

    pub fn class_requires(&self) -> &BTreeMap<String, Vec<ResourceRef>> {
        &self.class_requires
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// Desired run state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnsure {
    Running,
    Stopped,
}

impl fmt::Display for ServiceEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Typed desired state, one variant per registered resource type
///
/// Produced by the compiler after validating a declaration's attribute bag,
/// so the convergence engine never sees stringly-typed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Desired {
    Service {
        ensure: ServiceEnsure,
        /// Boot enablement; `None` leaves the flag unmanaged
        enable: Option<bool>,
    },
}

impl Desired {
    /// Canonical attribute map used for diffing against live state
    pub fn attributes(&self) -> BTreeMap<String, Scalar> {
        let mut attrs = BTreeMap::new();
        match self {
            Self::Service { ensure, enable } => {
                attrs.insert("ensure".to_string(), Scalar::Str(ensure.to_string()));
                if let Some(enable) = enable {
                    attrs.insert("enable".to_string(), Scalar::Bool(*enable));
                }
            }
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_display_roundtrip() {
        let r = ResourceRef::service("backend-server");
        assert_eq!(r.to_string(), "service[backend-server]");
        assert_eq!("service[backend-server]".parse::<ResourceRef>().unwrap(), r);
    }

    #[test]
    fn test_reference_parse_rejects_malformed() {
        assert!("service".parse::<ResourceRef>().is_err());
        assert!("[title]".parse::<ResourceRef>().is_err());
        assert!("service[]".parse::<ResourceRef>().is_err());
        assert!("service[a][b]".parse::<ResourceRef>().is_err());
        assert!("service[a]b]".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_desired_service_attributes() {
        let desired = Desired::Service {
            ensure: ServiceEnsure::Running,
            enable: Some(true),
        };
        let attrs = desired.attributes();
        assert_eq!(attrs.get("ensure"), Some(&Scalar::Str("running".into())));
        assert_eq!(attrs.get("enable"), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn test_unmanaged_enable_is_absent_from_attributes() {
        let desired = Desired::Service {
            ensure: ServiceEnsure::Stopped,
            enable: None,
        };
        assert!(!desired.attributes().contains_key("enable"));
    }
}
