//! Dependency DAG over operation names.
//!
//! Edges point from an operation to the operations that must have succeeded
//! before it runs. The graph is built once when the catalog loads and
//! rejected eagerly if it contains a cycle.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FillError, Result};
use crate::interface::{Operation, Verb};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Declaration order of all nodes.
    nodes:      Vec<String>,
    depends_on: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

/// Give every operation without explicit dependencies the creators of its
/// collection: `GET /widgets/{id}` depends on `POST /widgets`.
pub fn infer_dependencies(operations: &mut [Operation]) {
    let creators: Vec<(String, String)> = operations
        .iter()
        .filter(|o| o.verb == Verb::Post)
        .map(|o| (o.route.shape(), o.name.clone()))
        .collect();

    for op in operations.iter_mut() {
        if op.explicit_dependencies {
            continue;
        }
        let Some(collection) = op.route.collection() else { continue };
        let shape = collection.shape();
        for (creator_shape, creator) in &creators {
            if *creator_shape == shape && *creator != op.name {
                tracing::debug!(operation = %op.name, depends_on = %creator, "inferred dependency");
                op.depends_on.insert(creator.clone());
            }
        }
    }
}

impl DependencyGraph {
    /// Build from resolved operations and reject cycles (DFS coloring).
    pub fn build(operations: &[Operation]) -> Result<Self> {
        let mut graph = DependencyGraph::default();
        for op in operations {
            graph.nodes.push(op.name.clone());
            graph.depends_on.insert(op.name.clone(), op.depends_on.clone());
            for dep in &op.depends_on {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(op.name.clone());
            }
        }
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Mark {
            Temp,
            Perm,
        }

        fn visit<'a>(
            v: &'a str,
            graph: &'a DependencyGraph,
            marks: &mut BTreeMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Result<()> {
            match marks.get(v) {
                Some(Mark::Perm) => return Ok(()),
                Some(Mark::Temp) => {
                    // v is on the current path: report the loop starting at v
                    let start = stack.iter().position(|s| *s == v).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(v.to_string());
                    return Err(FillError::CyclicDependency { cycle });
                }
                None => {}
            }

            marks.insert(v, Mark::Temp);
            stack.push(v);
            if let Some(deps) = graph.depends_on.get(v) {
                for d in deps {
                    visit(d, graph, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(v, Mark::Perm);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();
        for n in &self.nodes {
            stack.clear();
            visit(n, self, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    pub fn depends_on(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depends_on
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Every operation reachable through dependency edges, nearest first.
    pub fn transitive_dependencies(&self, name: &str) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue: std::collections::VecDeque<&str> = self.depends_on(name).collect();
        while let Some(n) = queue.pop_front() {
            if seen.insert(n) {
                out.push(n);
                queue.extend(self.depends_on(n));
            }
        }
        out
    }

    pub fn edge_count(&self) -> usize {
        self.depends_on.values().map(|s| s.len()).sum()
    }

    /// Dependencies before dependents; unrelated nodes keep declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        fn place<'a>(
            v: &'a str,
            graph: &'a DependencyGraph,
            placed: &mut BTreeSet<&'a str>,
            out: &mut Vec<&'a str>,
        ) {
            if !placed.insert(v) {
                return;
            }
            for d in graph.depends_on(v) {
                place(d, graph, placed, out);
            }
            out.push(v);
        }

        let mut placed = BTreeSet::new();
        let mut out = Vec::with_capacity(self.nodes.len());
        for n in &self.nodes {
            place(n, self, &mut placed, &mut out);
        }
        out
    }
}
