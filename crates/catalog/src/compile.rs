//! Catalog compiler - declarations to a dependency-ordered, acyclic catalog
//!
//! Compilation is a pure function of the declaration set and the fact store:
//! it validates identity uniqueness and attribute schemas, resolves every
//! dependency reference, builds the dependency graph (explicit `require`
//! edges plus containment-implied edges), and rejects cycles. No partial
//! catalog is ever produced.

use crate::facts::FactStore;
use crate::resource::{
    DeclarationSet, Desired, ResourceDeclaration, ResourceRef, ServiceEnsure,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use thiserror::Error;

/// Errors that abort a compile call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Two declarations share the same `(type, title)` pair
    #[error("duplicate resource {0}")]
    DuplicateResource(ResourceRef),

    /// A `require` reference does not resolve to a declared resource
    #[error("{from} requires {missing}, which is not declared")]
    UnresolvedReference {
        from: ResourceRef,
        missing: ResourceRef,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", format_cycle(members))]
    DependencyCycle { members: Vec<ResourceRef> },

    /// The declared type has no registered schema
    #[error("unknown resource type `{rtype}` for resource `{title}`")]
    UnknownResourceType { rtype: String, title: String },

    /// An attribute fails the type's schema (unknown name, bad enum value)
    #[error("invalid attribute `{attribute}` on {resource}: {reason}")]
    InvalidAttribute {
        resource: ResourceRef,
        attribute: String,
        reason: String,
    },
}

fn format_cycle(members: &[ResourceRef]) -> String {
    let mut path: Vec<String> = members.iter().map(ToString::to_string).collect();
    if let Some(first) = path.first().cloned() {
        path.push(first);
    }
    path.join(" -> ")
}

/// One compiled resource: identity plus validated desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogNode {
    pub reference: ResourceRef,
    pub desired: Desired,
}

/// The compiled artifact: an acyclic dependency graph of desired states
///
/// Nodes keep declaration insertion order; `order` is a topological order
/// that is deterministic for a fixed insertion order. Serializable so the
/// optional on-disk cache can snapshot it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    nodes: Vec<CatalogNode>,
    /// Edges as (dependency, dependent) node indices
    edges: BTreeSet<(usize, usize)>,
    order: Vec<usize>,
    digest: String,
}

impl Catalog {
    pub fn nodes(&self) -> &[CatalogNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &CatalogNode {
        &self.nodes[index]
    }

    /// Dependency-consistent processing order (node indices)
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Edge set as (dependency, dependent) index pairs
    pub fn edges(&self) -> &BTreeSet<(usize, usize)> {
        &self.edges
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|(_, dependent)| *dependent == index)
            .map(|(dependency, _)| *dependency)
            .collect()
    }

    pub fn find(&self, rtype: &str, title: &str) -> Option<&CatalogNode> {
        self.nodes
            .iter()
            .find(|n| n.reference.rtype == rtype && n.reference.title == title)
    }

    /// Content digest of the declarations+facts this catalog was compiled from
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Blake3 digest of the serialized declarations and facts
///
/// Keys the optional catalog cache and stamps compiled catalogs.
pub(crate) fn source_digest(set: &DeclarationSet, facts: &FactStore) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(set).expect("declaration sets serialize"));
    hasher.update(&serde_json::to_vec(facts).expect("fact stores serialize"));
    hasher.finalize().to_hex().to_string()
}

/// Compile a declaration set into a catalog
///
/// Pure and deterministic: the same declarations and facts always produce
/// the same node set, edge set, and order.
pub fn compile(set: &DeclarationSet, facts: &FactStore) -> Result<Catalog, CompileError> {
    let declarations = set.declarations();

    // Identity index; duplicates are a compile error
    let mut index: BTreeMap<ResourceRef, usize> = BTreeMap::new();
    for (i, declaration) in declarations.iter().enumerate() {
        let reference = declaration.reference();
        if index.insert(reference.clone(), i).is_some() {
            return Err(CompileError::DuplicateResource(reference));
        }
    }

    // Validate every declaration against its type schema
    let nodes = declarations
        .iter()
        .map(validate_declaration)
        .collect::<Result<Vec<_>, _>>()?;

    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();

    // Explicit require edges
    for (i, declaration) in declarations.iter().enumerate() {
        for required in &declaration.requires {
            let dependency = *index.get(required).ok_or_else(|| {
                CompileError::UnresolvedReference {
                    from: declaration.reference(),
                    missing: required.clone(),
                }
            })?;
            edges.insert((dependency, i));
        }
    }

    // Containment rule: class-level prerequisites precede class members
    for (i, declaration) in declarations.iter().enumerate() {
        let Some(class) = &declaration.class else {
            continue;
        };
        let Some(prerequisites) = set.class_requires().get(class) else {
            continue;
        };
        for required in prerequisites {
            let dependency = *index.get(required).ok_or_else(|| {
                CompileError::UnresolvedReference {
                    from: ResourceRef::new("class", class),
                    missing: required.clone(),
                }
            })?;
            edges.insert((dependency, i));
        }
    }

    let order = topological_order(declarations.len(), &edges).map_err(|remaining| {
        let members = extract_cycle(&remaining, &edges)
            .into_iter()
            .map(|i| declarations[i].reference())
            .collect();
        CompileError::DependencyCycle { members }
    })?;

    log::debug!(
        "compiled catalog: {} resources, {} edges",
        declarations.len(),
        edges.len()
    );

    Ok(Catalog {
        nodes,
        edges,
        order,
        digest: source_digest(set, facts),
    })
}

/// Check a declaration's attribute bag against its type schema
fn validate_declaration(declaration: &ResourceDeclaration) -> Result<CatalogNode, CompileError> {
    let reference = declaration.reference();
    let desired = match declaration.rtype.as_str() {
        "service" => validate_service(declaration)?,
        _ => {
            return Err(CompileError::UnknownResourceType {
                rtype: declaration.rtype.clone(),
                title: declaration.title.clone(),
            });
        }
    };
    Ok(CatalogNode { reference, desired })
}

fn validate_service(declaration: &ResourceDeclaration) -> Result<Desired, CompileError> {
    let mut ensure = None;
    let mut enable = None;

    for (name, value) in &declaration.attributes {
        match name.as_str() {
            "ensure" => {
                ensure = Some(match value.as_str() {
                    Some("running") => ServiceEnsure::Running,
                    Some("stopped") => ServiceEnsure::Stopped,
                    _ => {
                        return Err(invalid_attribute(
                            declaration,
                            name,
                            format!("expected \"running\" or \"stopped\", got `{value}`"),
                        ));
                    }
                });
            }
            "enable" => {
                enable = Some(value.as_bool().ok_or_else(|| {
                    invalid_attribute(
                        declaration,
                        name,
                        format!("expected true or false, got `{value}`"),
                    )
                })?);
            }
            _ => {
                return Err(invalid_attribute(
                    declaration,
                    name,
                    "not a service attribute".to_string(),
                ));
            }
        }
    }

    let ensure = ensure.ok_or_else(|| {
        invalid_attribute(declaration, "ensure", "required attribute is missing".to_string())
    })?;

    Ok(Desired::Service { ensure, enable })
}

fn invalid_attribute(
    declaration: &ResourceDeclaration,
    attribute: &str,
    reason: String,
) -> CompileError {
    CompileError::InvalidAttribute {
        resource: declaration.reference(),
        attribute: attribute.to_string(),
        reason,
    }
}

/// Kahn's algorithm with an index-ordered ready heap
///
/// Independent nodes at the same depth come out in insertion order, which
/// keeps repeated compiles of the same set byte-identical.
fn topological_order(
    node_count: usize,
    edges: &BTreeSet<(usize, usize)>,
) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0usize; node_count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(dependency, dependent) in edges {
        indegree[dependent] += 1;
        dependents[dependency].push(dependent);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..node_count)
        .filter(|&i| indegree[i] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(node_count);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &dependent in &dependents[i] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() == node_count {
        Ok(order)
    } else {
        Err((0..node_count).filter(|&i| indegree[i] > 0).collect())
    }
}

/// Walk the residual graph to name one concrete cycle
fn extract_cycle(remaining: &[usize], edges: &BTreeSet<(usize, usize)>) -> Vec<usize> {
    let residual: BTreeSet<usize> = remaining.iter().copied().collect();
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    // Walk upstream through in-residual predecessors until a node repeats.
    // Every residual node still has positive in-degree within the residual
    // graph, so the walk cannot dead-end and always lands in a cycle, even
    // when it starts from a node that merely depends on one.
    let mut path = vec![start];
    let mut seen: BTreeMap<usize, usize> = BTreeMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(next) = edges
            .iter()
            .find(|(dependency, dependent)| {
                *dependent == current && residual.contains(dependency)
            })
            .map(|(dependency, _)| *dependency)
        else {
            return path;
        };
        if let Some(&at) = seen.get(&next) {
            return path[at..].to_vec();
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
