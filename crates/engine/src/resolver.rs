//! Dependency resolver - orders resources so dependencies apply first
//!
//! Resolution runs in two passes over the document:
//!
//! 1. A depth-first walk in declaration order validates every edge and
//!    reports the first back-edge as a cycle, naming the participating keys.
//! 2. A topological sort that always picks the earliest-declared ready
//!    resource, so independent resources keep their declaration order.

use crate::document::Document;
use crate::error::{Error, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Order the document's resource keys so every dependency precedes its dependents
///
/// Fails with [`Error::NotFound`] for a dependency on an unknown key and with
/// [`Error::CycleDetected`] when the graph is not acyclic. A partial order is
/// never returned.
pub fn order(document: &Document) -> Result<Vec<String>> {
    check_acyclic(document)?;

    let resources = document.resources();
    let mut pending_deps: Vec<usize> = Vec::with_capacity(resources.len());
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];

    for (position, resource) in resources.iter().enumerate() {
        let deps = dependency_positions(document, position)?;
        for &dep in &deps {
            dependents[dep].push(position);
        }
        pending_deps.push(deps.len());
    }

    let mut ready: BTreeSet<usize> = pending_deps
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(position, _)| position)
        .collect();

    let mut ordered = Vec::with_capacity(resources.len());
    while let Some(position) = ready.pop_first() {
        ordered.push(resources[position].key.clone());
        for &dependent in &dependents[position] {
            pending_deps[dependent] -= 1;
            if pending_deps[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if ordered.len() != resources.len() {
        // check_acyclic guarantees this cannot happen
        let stuck = resources
            .iter()
            .filter(|r| !ordered.contains(&r.key))
            .map(|r| r.key.clone())
            .collect();
        return Err(Error::CycleDetected { keys: stuck });
    }

    Ok(ordered)
}

/// Distinct dependency positions of a resource, in declared order
fn dependency_positions(document: &Document, position: usize) -> Result<Vec<usize>> {
    let resource = &document.resources()[position];
    let mut seen = BTreeSet::new();
    let mut deps = Vec::with_capacity(resource.depends_on.len());

    for key in &resource.depends_on {
        let dep = document.position(key).ok_or_else(|| Error::NotFound { key: key.clone() })?;
        if seen.insert(dep) {
            deps.push(dep);
        }
    }

    Ok(deps)
}

/// Depth-first walk that fails on the first back-edge
///
/// The walk keeps its own stack of `(position, dependencies, next index)`
/// frames, so chain length is bounded by memory rather than thread stack.
fn check_acyclic(document: &Document) -> Result<()> {
    let mut marks = vec![Mark::Unvisited; document.len()];
    let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();

    for root in 0..document.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::Visiting;
        stack.push((root, dependency_positions(document, root)?, 0));

        while let Some((position, deps, next)) = stack.last_mut() {
            let Some(&dep) = deps.get(*next) else {
                marks[*position] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;

            match marks[dep] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[dep] = Mark::Visiting;
                    let deps = dependency_positions(document, dep)?;
                    stack.push((dep, deps, 0));
                }
                Mark::Visiting => {
                    let start = stack.iter().position(|(p, _, _)| *p == dep).unwrap_or(0);
                    let keys = stack[start..]
                        .iter()
                        .map(|(p, _, _)| document.resources()[*p].key.clone())
                        .collect();
                    return Err(Error::CycleDetected { keys });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, ResourceInstance};

    fn doc(specs: &[(&str, &[&str])]) -> Document {
        let resources = specs
            .iter()
            .map(|(key, deps)| {
                deps.iter()
                    .fold(ResourceInstance::new("Test", *key), |r, d| r.with_dependency(*d))
            })
            .collect();
        Document::new(DocumentMetadata::default(), resources).unwrap()
    }

    fn assert_topological(document: &Document, order: &[String]) {
        assert_eq!(order.len(), document.len());
        for resource in document {
            let me = order.iter().position(|k| k == &resource.key).unwrap();
            for dep in &resource.depends_on {
                let them = order.iter().position(|k| k == dep).unwrap();
                assert!(them < me, "{dep} must come before {}", resource.key);
            }
        }
    }

    #[test]
    fn test_independent_resources_keep_declaration_order() {
        let d = doc(&[("c", &[]), ("a", &[]), ("b", &[])]);
        assert_eq!(order(&d).unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let d = doc(&[("app", &["db", "net"]), ("db", &["net"]), ("net", &[]), ("log", &[])]);
        let ordered = order(&d).unwrap();
        assert_topological(&d, &ordered);
        assert_eq!(ordered, vec!["net", "db", "app", "log"]);
    }

    #[test]
    fn test_ready_resources_follow_declaration_order() {
        // b and c are both dependency-free; a waits for c
        let d = doc(&[("a", &["c"]), ("b", &[]), ("c", &[])]);
        assert_eq!(order(&d).unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_diamond() {
        let d = doc(&[("top", &["left", "right"]), ("left", &["base"]), ("right", &["base"]), ("base", &[])]);
        let ordered = order(&d).unwrap();
        assert_topological(&d, &ordered);
        assert_eq!(ordered.first().map(String::as_str), Some("base"));
        assert_eq!(ordered.last().map(String::as_str), Some("top"));
    }

    #[test]
    fn test_duplicate_dependency_entries() {
        let d = doc(&[("a", &["b", "b"]), ("b", &[])]);
        assert_eq!(order(&d).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_cycle_names_participants() {
        let d = doc(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        match order(&d) {
            Err(Error::CycleDetected { keys }) => assert_eq!(keys, vec!["A", "B", "C"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_excludes_bystanders() {
        let d = doc(&[("entry", &["A"]), ("A", &["B"]), ("B", &["A"]), ("free", &[])]);
        match order(&d) {
            Err(Error::CycleDetected { keys }) => assert_eq!(keys, vec!["A", "B"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let d = doc(&[("A", &["A"])]);
        assert!(matches!(order(&d), Err(Error::CycleDetected { keys }) if keys == vec!["A"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let d = doc(&[("A", &["ghost"])]);
        assert!(matches!(order(&d), Err(Error::NotFound { key }) if key == "ghost"));
    }

    #[test]
    fn test_long_chain() {
        let resources = (0..100_000)
            .map(|i| {
                let r = ResourceInstance::new("Test", format!("r{i}"));
                if i == 0 { r } else { r.with_dependency(format!("r{}", i - 1)) }
            })
            .rev()
            .collect();
        let d = Document::new(DocumentMetadata::default(), resources).unwrap();
        let ordered = order(&d).unwrap();
        assert_eq!(ordered.len(), 100_000);
        assert_eq!(ordered.first().map(String::as_str), Some("r0"));
        assert_eq!(ordered.last().map(String::as_str), Some("r99999"));
    }

    #[test]
    fn test_long_cycle() {
        let n = 50_000;
        let resources = (0..n)
            .map(|i| ResourceInstance::new("Test", format!("r{i}")).with_dependency(format!("r{}", (i + 1) % n)))
            .collect();
        let d = Document::new(DocumentMetadata::default(), resources).unwrap();
        match order(&d) {
            Err(Error::CycleDetected { keys }) => {
                assert_eq!(keys.len(), n);
                assert_eq!(keys[0], "r0");
            }
            other => panic!("expected cycle, got {:?}", other.map(|o| o.len())),
        }
    }

    #[test]
    fn test_empty_document() {
        let d = doc(&[]);
        assert!(order(&d).unwrap().is_empty());
    }
}
