//! Command implementations for the converge CLI

pub mod apply;
pub mod check;
pub mod plan;

use crate::cli::InputArgs;
use anyhow::{Context as AnyhowContext, Result, bail};
use catalog::{DeclarationSet, FactStore, Scalar};
use std::collections::BTreeMap;
use std::fs;

/// Resolved run inputs: declarations plus the fact store
pub struct Inputs {
    pub set: DeclarationSet,
    pub facts: FactStore,
}

/// Load the manifest, facts file, and `--param` overrides into run inputs
pub fn load_inputs(args: &InputArgs) -> Result<Inputs> {
    let manifest = catalog::manifest::load(&args.manifest)?;

    let facts = match &args.facts {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("could not read facts file {}", path.display()))?;
            let table: BTreeMap<String, Scalar> = toml::from_str(&content)
                .with_context(|| format!("invalid facts file {}", path.display()))?;
            FactStore::from(table)
        }
        None => FactStore::new(),
    };

    let params = parse_params(&args.params)?;
    let set = catalog::manifest::resolve(&manifest, &params, &facts)?;

    log::debug!(
        "loaded {} declaration(s), {} fact(s), {} parameter(s)",
        set.len(),
        facts.len(),
        params.len()
    );
    Ok(Inputs { set, facts })
}

fn parse_params(pairs: &[String]) -> Result<BTreeMap<String, Scalar>> {
    let mut params = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid parameter `{pair}`, expected KEY=VALUE");
        };
        params.insert(key.to_string(), parse_scalar(value));
    }
    Ok(params)
}

/// Interpret a flag value as bool, then integer, falling back to string
fn parse_scalar(value: &str) -> Scalar {
    match value {
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        _ => value
            .parse::<i64>()
            .map(Scalar::Int)
            .unwrap_or_else(|_| Scalar::Str(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "hostname=storm.example.org".to_string(),
            "enable=true".to_string(),
            "port=8080".to_string(),
        ])
        .unwrap();

        assert_eq!(
            params.get("hostname"),
            Some(&Scalar::Str("storm.example.org".into()))
        );
        assert_eq!(params.get("enable"), Some(&Scalar::Bool(true)));
        assert_eq!(params.get("port"), Some(&Scalar::Int(8080)));
    }

    #[test]
    fn test_parse_params_rejects_missing_equals() {
        assert!(parse_params(&["hostname".to_string()]).is_err());
    }
}
