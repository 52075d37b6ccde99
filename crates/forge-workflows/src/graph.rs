// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::{WorkflowDefinition, WorkflowError};

/// DAG over workflow steps: nodes are step ids, edges run from a dependency
/// to its dependent.
#[derive(Debug, Default)]
pub struct WorkflowGraph {
    /// step id → dependents
    adjacency: BTreeMap<String, Vec<String>>,
    /// step id → dependencies
    reverse: BTreeMap<String, Vec<String>>,
}

impl WorkflowGraph {
    /// Build and validate the graph for a definition.
    ///
    /// Rejects unresolved `depends_on` references and cycles (reporting the
    /// cycle path).  Unknown `parallel_with` references only warn.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, WorkflowError> {
        let mut graph = Self::default();
        for step in &definition.steps {
            graph.adjacency.entry(step.id.clone()).or_default();
            graph.reverse.entry(step.id.clone()).or_default();
        }

        for step in &definition.steps {
            for dep in &step.depends_on {
                if !graph.adjacency.contains_key(dep) {
                    return Err(WorkflowError::UnknownStep {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph.adjacency.get_mut(dep).expect("node exists").push(step.id.clone());
                graph.reverse.get_mut(&step.id).expect("node exists").push(dep.clone());
            }
            for hint in &step.parallel_with {
                if !graph.adjacency.contains_key(hint) {
                    warn!(
                        step = %step.id,
                        hint = %hint,
                        "parallel_with references a non-existent step"
                    );
                }
            }
        }

        graph.check_cycles()?;
        debug!(steps = graph.adjacency.len(), "workflow graph validated");
        Ok(graph)
    }

    pub fn dependencies(&self, step_id: &str) -> &[String] {
        self.reverse.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, step_id: &str) -> &[String] {
        self.adjacency.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cycle detection by 3-colour DFS.  On a back edge the cycle path is
    /// reconstructed from the parent pointers for the error message.
    fn check_cycles(&self) -> Result<(), WorkflowError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        let mut colour: HashMap<&str, Colour> =
            self.adjacency.keys().map(|k| (k.as_str(), Colour::White)).collect();
        let mut parent: HashMap<&str, Option<&str>> =
            self.adjacency.keys().map(|k| (k.as_str(), None)).collect();

        // Iterative DFS with an explicit stack: (node, next-child index).
        for start in self.adjacency.keys() {
            if colour[start.as_str()] != Colour::White {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            colour.insert(start.as_str(), Colour::Grey);

            while let Some((node, child_idx)) = stack.pop() {
                let children = self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let next = children[child_idx].as_str();
                    match colour[next] {
                        Colour::Grey => {
                            return Err(WorkflowError::Cycle(cycle_path(node, next, &parent)));
                        }
                        Colour::White => {
                            parent.insert(next, Some(node));
                            colour.insert(next, Colour::Grey);
                            stack.push((next, 0));
                        }
                        Colour::Black => {}
                    }
                } else {
                    colour.insert(node, Colour::Black);
                }
            }
        }
        Ok(())
    }

    /// Kahn-style batch schedule: each batch is the set of steps whose
    /// remaining in-degree is zero; steps in a batch may run in parallel.
    pub fn execution_batches(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .reverse
            .iter()
            .map(|(k, deps)| (k.as_str(), deps.len()))
            .collect();
        let mut remaining: Vec<&str> = self.adjacency.keys().map(String::as_str).collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let batch: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| in_degree[id] == 0)
                .collect();
            if batch.is_empty() {
                // Unreachable after validation; report what is stuck.
                return Err(WorkflowError::Cycle(remaining.join(" -> ")));
            }
            remaining.retain(|id| !batch.contains(id));
            for id in &batch {
                for dependent in self.dependents(id) {
                    *in_degree.get_mut(dependent.as_str()).expect("node exists") -= 1;
                }
            }
            batches.push(batch.into_iter().map(str::to_string).collect());
        }
        Ok(batches)
    }
}

fn cycle_path(from: &str, back_to: &str, parent: &HashMap<&str, Option<&str>>) -> String {
    let mut path = vec![back_to.to_string()];
    let mut current = Some(from);
    while let Some(node) = current {
        path.push(node.to_string());
        if node == back_to {
            break;
        }
        current = parent.get(node).copied().flatten();
    }
    path.reverse();
    if path.first().map(String::as_str) != Some(back_to) {
        path.insert(0, back_to.to_string());
    }
    path.join(" -> ")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
