//! Dependency resolver - topological ordering with cycle detection
//!
//! Depth-first traversal with three colours (unvisited, in progress, done).
//! Roots are visited in input order and dependencies in edge order, which
//! makes the resulting order stable for a given input.

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::types::Address;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Order `nodes` so that every node comes after all of its dependencies.
///
/// Dependencies that are not in `nodes` are ignored. A back-edge to a node
/// that is still in progress yields `CyclicDependency` with the full path.
pub fn topological_order<K, F, I>(nodes: &[K], mut deps: F) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> I,
    I: IntoIterator<Item = K>,
{
    let known: HashSet<&K> = nodes.iter().collect();
    let mut marks: HashMap<K, Mark> = HashMap::with_capacity(nodes.len());
    let mut order = Vec::with_capacity(nodes.len());

    let mut edges = |node: &K| -> std::vec::IntoIter<K> {
        deps(node)
            .into_iter()
            .filter(|d| known.contains(d))
            .collect::<Vec<_>>()
            .into_iter()
    };

    for root in nodes {
        if marks.contains_key(root) {
            continue;
        }

        // Explicit stack: (node, remaining dependencies)
        marks.insert(root.clone(), Mark::InProgress);
        let mut stack = vec![(root.clone(), edges(root))];

        loop {
            let next = match stack.last_mut() {
                None => break,
                Some((_, pending)) => pending.next(),
            };

            match next {
                Some(dep) => match marks.get(&dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                        path.push(dep.to_string());
                        return Err(Error::CyclicDependency { path });
                    }
                    None => {
                        marks.insert(dep.clone(), Mark::InProgress);
                        let pending = edges(&dep);
                        stack.push((dep, pending));
                    }
                },
                None => {
                    if let Some((node, _)) = stack.pop() {
                        marks.insert(node.clone(), Mark::Done);
                        order.push(node);
                    }
                }
            }
        }
    }

    Ok(order)
}

/// Resolve a resource graph into a total order of instance addresses.
pub fn resolve(graph: &ResourceGraph) -> Result<Vec<Address>> {
    let nodes: Vec<Address> = graph
        .instances()
        .iter()
        .map(|i| i.address.clone())
        .collect();

    let order = topological_order(&nodes, |address| {
        graph
            .get(address)
            .map(|i| i.dependencies.clone())
            .unwrap_or_default()
    })?;

    log::debug!("Resolved {} instances", order.len());
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceDeclaration, Variables};
    use crate::types::Expr;

    fn decl(kind: &str, name: &str, refs: &[&str]) -> ResourceDeclaration {
        refs.iter().enumerate().fold(ResourceDeclaration::new(kind, name), |d, (i, r)| {
            d.attr(format!("ref{i}"), Expr::reference(r, None).unwrap())
        })
    }

    fn order_of(decls: &[ResourceDeclaration]) -> Result<Vec<String>> {
        let graph = ResourceGraph::build(decls, &Variables::new())?;
        Ok(resolve(&graph)?.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_targets_precede_referrers() {
        // Declared in reverse dependency order on purpose
        let decls = [
            decl("aws_instance", "web", &["aws_subnet.app"]),
            decl("aws_subnet", "app", &["aws_vpc.main"]),
            decl("aws_vpc", "main", &[]),
        ];
        assert_eq!(
            order_of(&decls).unwrap(),
            vec!["aws_vpc.main", "aws_subnet.app", "aws_instance.web"]
        );
    }

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let decls = [
            decl("aws_vpc", "b", &[]),
            decl("aws_vpc", "a", &[]),
            decl("aws_vpc", "c", &[]),
        ];
        assert_eq!(
            order_of(&decls).unwrap(),
            vec!["aws_vpc.b", "aws_vpc.a", "aws_vpc.c"]
        );
    }

    #[test]
    fn test_mutual_reference_reports_cycle() {
        let decls = [
            decl("aws_security_group", "a", &["aws_security_group.b"]),
            decl("aws_security_group", "b", &["aws_security_group.a"]),
        ];
        match order_of(&decls) {
            Err(Error::CyclicDependency { path }) => {
                assert!(path.contains(&"aws_security_group.a".to_string()));
                assert!(path.contains(&"aws_security_group.b".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_reports_cycle() {
        let decls = [decl("aws_vpc", "main", &["aws_vpc.main"])];
        match order_of(&decls) {
            Err(Error::CyclicDependency { path }) => {
                assert_eq!(path, vec!["aws_vpc.main", "aws_vpc.main"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_longer_cycle_path_is_complete() {
        let nodes = vec![1, 2, 3, 4];
        let err = topological_order(&nodes, |n| match n {
            1 => vec![2],
            2 => vec![3],
            3 => vec![4],
            4 => vec![2],
            _ => vec![],
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: 2 -> 3 -> 4 -> 2");
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let order = topological_order(&[1, 2], |n| if *n == 2 { vec![1, 99] } else { vec![] }).unwrap();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let nodes: Vec<u32> = (0..20_000).rev().collect();
        let order = topological_order(&nodes, |n| if *n == 0 { vec![] } else { vec![n - 1] }).unwrap();
        assert_eq!(order.first(), Some(&0));
        assert_eq!(order.len(), 20_000);
    }
}
