//! Dependency-graph construction and validation.

use std::collections::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;
use taskgraph_types::WorkflowError;

use crate::step::Step;

/// Maps each step name to the set of names it depends on.
pub type DependencyGraph = HashMap<String, HashSet<String>>;

/// Builds and validates the dependency graph for a step list.
///
/// Fails with `UnknownDependency` if a step names a dependency absent from
/// the step list, or `Cycle` if the dependency graph is not acyclic.
/// Runs before any step is dispatched; its failures are fatal.
pub fn build_dependency_graph(steps: &[std::sync::Arc<dyn Step>]) -> Result<DependencyGraph, WorkflowError> {
    build_dependency_graph_with_external(steps, &HashSet::new())
}

/// As [`build_dependency_graph`], but dependencies named in `external` are
/// accepted even though they are absent from `steps`. Used by resume
/// (§4.7), where previously-completed steps are dropped from the step list
/// but still valid, already-satisfied dependency targets for the rest.
pub fn build_dependency_graph_with_external(
    steps: &[std::sync::Arc<dyn Step>],
    external: &HashSet<String>,
) -> Result<DependencyGraph, WorkflowError> {
    let step_names: HashSet<&str> = steps.iter().map(|s| s.name()).collect();

    let mut graph = DependencyGraph::new();
    for step in steps {
        let mut deps_in_graph = HashSet::new();
        for dep in step.dependencies() {
            if step_names.contains(dep.as_str()) {
                deps_in_graph.insert(dep.clone());
            } else if external.contains(dep.as_str()) {
                // Already satisfied by a prior run; not part of this graph.
                continue;
            } else {
                return Err(WorkflowError::UnknownDependency {
                    step: step.name().to_string(),
                    dependency: dep.clone(),
                });
            }
        }
        graph.insert(step.name().to_string(), deps_in_graph);
    }

    validate_no_cycles(&graph)?;

    Ok(graph)
}

/// Walks the dependency graph with a `petgraph::graphmap::DiGraphMap` and
/// fails naming one step on the cycle, using a depth-first search with an
/// explicit recursion-stack marker.
fn validate_no_cycles(graph: &DependencyGraph) -> Result<(), WorkflowError> {
    let mut pg = DiGraphMap::<&str, ()>::new();
    for name in graph.keys() {
        pg.add_node(name.as_str());
    }
    for (name, deps) in graph {
        for dep in deps {
            // Edge dependency -> dependent.
            pg.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut rec_stack: HashSet<&str> = HashSet::new();

    for &start in pg.nodes().collect::<Vec<_>>().iter() {
        if !visited.contains(start) {
            if let Some(culprit) = has_cycle(&pg, start, &mut visited, &mut rec_stack) {
                return Err(WorkflowError::Cycle {
                    step: culprit.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn has_cycle<'a>(
    graph: &DiGraphMap<&'a str, ()>,
    node: &'a str,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<&'a str> {
    visited.insert(node);
    rec_stack.insert(node);

    for neighbor in graph.neighbors(node) {
        if !visited.contains(neighbor) {
            if let Some(culprit) = has_cycle(graph, neighbor, visited, rec_stack) {
                return Some(culprit);
            }
        } else if rec_stack.contains(neighbor) {
            return Some(node);
        }
    }

    rec_stack.remove(node);
    None
}
