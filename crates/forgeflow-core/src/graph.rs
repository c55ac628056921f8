//! Plan-shape validation and dependency indexing.
//!
//! Runs once per plan, before it is stored. Builds a `petgraph::DiGraph`
//! from `depends_on` edges (plus the implicit group -> member edges of
//! parallel groups), rejects duplicate ids, unresolvable references, and
//! cycles -- reporting the specific cycle path -- and produces the
//! `GraphIndex` the execution engine seeds its ready-set computation from.

use std::collections::HashMap;

use forgeflow_types::error::ValidationError;
use forgeflow_types::plan::{StepConfig, StepDefinition};
use petgraph::graph::{DiGraph, NodeIndex};

// ---------------------------------------------------------------------------
// GraphIndex
// ---------------------------------------------------------------------------

/// Precomputed dependency structure for a validated step set.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    /// step id -> ids of steps that depend on it (includes implicit
    /// group -> member edges).
    pub dependents: HashMap<String, Vec<String>>,
    /// step id -> number of incoming dependency edges. A step becomes ready
    /// exactly when its counter reaches zero.
    pub indegree: HashMap<String, usize>,
    /// member step id -> owning parallel group id.
    pub group_of: HashMap<String, String>,
}

impl GraphIndex {
    /// Step ids with no dependencies (the initial ready frontier).
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate plan shape and build the dependency index.
///
/// Checks, in one pass over the graph:
/// - step ids are unique,
/// - every `depends_on` resolves to a declared step,
/// - parallel-group members resolve, belong to at most one group, and a
///   group is not its own member,
/// - the combined edge set (dependencies + group membership) is acyclic.
///
/// Cycle failures name at least one full cycle path in the reason.
pub fn validate(steps: &[StepDefinition]) -> Result<GraphIndex, ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::plan("workflow must have at least one step"));
    }

    // Unique ids
    let mut node_of: HashMap<&str, NodeIndex> = HashMap::with_capacity(steps.len());
    let mut graph = DiGraph::<&str, ()>::new();
    for step in steps {
        if node_of.contains_key(step.id.as_str()) {
            return Err(ValidationError::new(&step.id, "duplicate step id"));
        }
        node_of.insert(step.id.as_str(), graph.add_node(step.id.as_str()));
    }

    let mut group_of: HashMap<String, String> = HashMap::new();

    // Edges: dependency -> dependent
    for step in steps {
        let to = node_of[step.id.as_str()];
        for dep in &step.depends_on {
            let from = *node_of.get(dep.as_str()).ok_or_else(|| {
                ValidationError::new(&step.id, format!("depends on unknown step '{dep}'"))
            })?;
            graph.add_edge(from, to, ());
        }

        // Implicit group -> member edges
        if let StepConfig::ParallelGroup { members, max_concurrent } = &step.config {
            if members.is_empty() {
                return Err(ValidationError::new(&step.id, "parallel group has no members"));
            }
            if let Some(0) = max_concurrent {
                return Err(ValidationError::new(&step.id, "max_concurrent must be >= 1"));
            }
            for member in members {
                if member == &step.id {
                    return Err(ValidationError::new(&step.id, "group lists itself as a member"));
                }
                let member_node = *node_of.get(member.as_str()).ok_or_else(|| {
                    ValidationError::new(&step.id, format!("group member '{member}' is not a declared step"))
                })?;
                if let Some(existing) = group_of.get(member.as_str()) {
                    return Err(ValidationError::new(
                        member,
                        format!("already a member of group '{existing}'"),
                    ));
                }
                group_of.insert(member.clone(), step.id.clone());
                graph.add_edge(node_of[step.id.as_str()], member_node, ());
            }
        }
    }

    detect_cycle(&graph)?;

    // Build index
    let mut dependents: HashMap<String, Vec<String>> = HashMap::with_capacity(steps.len());
    let mut indegree: HashMap<String, usize> = HashMap::with_capacity(steps.len());
    for step in steps {
        dependents.entry(step.id.clone()).or_default();
        indegree.entry(step.id.clone()).or_default();
    }
    for edge in graph.raw_edges() {
        let from = graph[edge.source()].to_string();
        let to = graph[edge.target()].to_string();
        *indegree.entry(to.clone()).or_default() += 1;
        dependents.entry(from).or_default().push(to);
    }

    Ok(GraphIndex {
        dependents,
        indegree,
        group_of,
    })
}

/// Colored depth-first traversal: white (unvisited), grey (on the current
/// path), black (done). Hitting a grey node closes a cycle; the path from
/// its first occurrence on the stack is reported.
fn detect_cycle(graph: &DiGraph<&str, ()>) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let mut color = vec![Color::White; graph.node_count()];
    let mut path: Vec<NodeIndex> = Vec::new();

    // Iterative DFS keeping the grey path explicit so the cycle can be named.
    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }
        let mut stack: Vec<(NodeIndex, petgraph::graph::Neighbors<'_, ()>)> =
            vec![(start, graph.neighbors(start))];
        color[start.index()] = Color::Grey;
        path.push(start);

        while let Some((node, neighbors)) = stack.last_mut() {
            let node = *node;
            match neighbors.next() {
                Some(next) => match color[next.index()] {
                    Color::White => {
                        color[next.index()] = Color::Grey;
                        path.push(next);
                        stack.push((next, graph.neighbors(next)));
                    }
                    Color::Grey => {
                        let cycle_start = path
                            .iter()
                            .position(|n| *n == next)
                            .unwrap_or(0);
                        let mut names: Vec<&str> =
                            path[cycle_start..].iter().map(|n| graph[*n]).collect();
                        names.push(graph[next]);
                        let offender = graph[next].to_string();
                        return Err(ValidationError::new(
                            offender,
                            format!("dependency cycle: {}", names.join(" -> ")),
                        ));
                    }
                    Color::Black => {}
                },
                None => {
                    color[node.index()] = Color::Black;
                    path.pop();
                    stack.pop();
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
