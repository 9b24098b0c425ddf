//! Manifest loader - TOML declarations to a DeclarationSet
//!
//! The manifest is how the invoking environment expresses desired state:
//! `[[resource]]` tables with an attribute bag and `require` references,
//! `[[class]]` tables naming class-level prerequisites. String values may
//! interpolate `%{key}` from the run's parameters and facts.
//!
//! ```toml
//! [[class]]
//! name = "backend"
//!
//! [[resource]]
//! type = "service"
//! title = "%{service_name}"
//! class = "backend"
//!
//! [resource.attributes]
//! ensure = "running"
//! enable = true
//! ```

use crate::facts::FactStore;
use crate::resource::{DeclarationSet, ResourceDeclaration, ResourceRef, Scalar};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or resolving a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },

    #[error("invalid resource reference `{0}`, expected `type[title]`")]
    BadReference(String),

    #[error("unknown interpolation key `%{{{key}}}` in `{value}`")]
    UnknownKey { key: String, value: String },

    #[error("unterminated interpolation in `{0}`")]
    Unterminated(String),
}

/// Parsed manifest file, prior to interpolation and reference resolution
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub class: Vec<ClassEntry>,
    #[serde(default)]
    pub resource: Vec<ResourceEntry>,
}

/// A class scope with class-level prerequisites
#[derive(Debug, Clone, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    /// References (as `type[title]`) that precede every member of the class
    #[serde(default)]
    pub require: Vec<String>,
}

/// One declared resource
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    #[serde(rename = "type")]
    pub rtype: String,
    pub title: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub class: Option<String>,
}

/// Parse a manifest file
pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Resolve a manifest into a declaration set
///
/// Titles and string attribute values are interpolated; parameters shadow
/// facts when both define a key.
pub fn resolve(
    manifest: &Manifest,
    params: &BTreeMap<String, Scalar>,
    facts: &FactStore,
) -> Result<DeclarationSet, ManifestError> {
    let lookup = |key: &str| params.get(key).or_else(|| facts.get(key));

    let mut set = DeclarationSet::new();

    for class in &manifest.class {
        for reference in &class.require {
            let reference = parse_reference(&interpolate(reference, &lookup)?)?;
            set.require_for_class(&class.name, reference);
        }
    }

    for entry in &manifest.resource {
        let mut declaration =
            ResourceDeclaration::new(&entry.rtype, &interpolate(&entry.title, &lookup)?);
        for (name, value) in &entry.attributes {
            let value = match value {
                Scalar::Str(s) => Scalar::Str(interpolate(s, &lookup)?),
                other => other.clone(),
            };
            declaration.attributes.insert(name.clone(), value);
        }
        for reference in &entry.require {
            declaration = declaration.require(parse_reference(&interpolate(reference, &lookup)?)?);
        }
        if let Some(class) = &entry.class {
            declaration = declaration.in_class(class);
        }
        set.push(declaration);
    }

    Ok(set)
}

fn parse_reference(s: &str) -> Result<ResourceRef, ManifestError> {
    s.parse()
        .map_err(|_| ManifestError::BadReference(s.to_string()))
}

/// Substitute `%{key}` occurrences using `lookup`
fn interpolate<'a>(
    value: &str,
    lookup: &impl Fn(&str) -> Option<&'a Scalar>,
) -> Result<String, ManifestError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ManifestError::Unterminated(value.to_string()));
        };
        let key = &after[..end];
        let replacement = lookup(key).ok_or_else(|| ManifestError::UnknownKey {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        out.push_str(&replacement.to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKEND_MANIFEST: &str = r#"
        [[class]]
        name = "backend"

        [[resource]]
        type = "service"
        title = "backend-server"
        class = "backend"

        [resource.attributes]
        ensure = "running"
        enable = true
    "#;

    fn no_params() -> BTreeMap<String, Scalar> {
        BTreeMap::new()
    }

    #[test]
    fn test_parse_backend_manifest() {
        let manifest: Manifest = toml::from_str(BACKEND_MANIFEST).unwrap();
        let set = resolve(&manifest, &no_params(), &FactStore::new()).unwrap();

        assert_eq!(set.len(), 1);
        let declaration = &set.declarations()[0];
        assert_eq!(declaration.reference().to_string(), "service[backend-server]");
        assert_eq!(
            declaration.attributes.get("ensure"),
            Some(&Scalar::Str("running".into()))
        );
        assert_eq!(declaration.attributes.get("enable"), Some(&Scalar::Bool(true)));
        assert_eq!(declaration.class.as_deref(), Some("backend"));
    }

    #[test]
    fn test_interpolation_prefers_params_over_facts() {
        let manifest: Manifest = toml::from_str(
            r#"
            [[resource]]
            type = "service"
            title = "%{name}-on-%{hostname}"
            [resource.attributes]
            ensure = "running"
            "#,
        )
        .unwrap();

        let params = BTreeMap::from([("name".to_string(), Scalar::Str("backend".into()))]);
        let facts = FactStore::new()
            .with("hostname", "storm.example.org")
            .with("name", "shadowed");

        let set = resolve(&manifest, &params, &facts).unwrap();
        assert_eq!(set.declarations()[0].title, "backend-on-storm.example.org");
    }

    #[test]
    fn test_unknown_interpolation_key_is_an_error() {
        let manifest: Manifest = toml::from_str(
            r#"
            [[resource]]
            type = "service"
            title = "%{nope}"
            "#,
        )
        .unwrap();

        let err = resolve(&manifest, &no_params(), &FactStore::new()).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownKey { ref key, .. } if key == "nope"));
    }

    #[test]
    fn test_unterminated_interpolation_is_an_error() {
        let lookup = |_: &str| -> Option<&Scalar> { None };
        let err = interpolate("%{open", &lookup).unwrap_err();
        assert!(matches!(err, ManifestError::Unterminated(_)));
    }

    #[test]
    fn test_bad_require_reference_is_an_error() {
        let manifest: Manifest = toml::from_str(
            r#"
            [[resource]]
            type = "service"
            title = "x"
            require = ["not-a-reference"]
            "#,
        )
        .unwrap();

        let err = resolve(&manifest, &no_params(), &FactStore::new()).unwrap_err();
        assert!(matches!(err, ManifestError::BadReference(ref s) if s == "not-a-reference"));
    }

    #[test]
    fn test_class_requires_carry_into_set() {
        let manifest: Manifest = toml::from_str(
            r#"
            [[class]]
            name = "backend"
            require = ["service[db]"]

            [[resource]]
            type = "service"
            title = "db"
            [resource.attributes]
            ensure = "running"

            [[resource]]
            type = "service"
            title = "web"
            class = "backend"
            [resource.attributes]
            ensure = "running"
            "#,
        )
        .unwrap();

        let set = resolve(&manifest, &no_params(), &FactStore::new()).unwrap();
        let requires = set.class_requires().get("backend").unwrap();
        assert_eq!(requires, &vec![ResourceRef::service("db")]);
    }
}
