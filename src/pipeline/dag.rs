// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! DAG (Directed Acyclic Graph) builder for agent dependencies
//!
//! Builds the dependency graph of an agent set and levels it with Kahn's
//! algorithm: level *k* holds every agent whose dependencies all sit in
//! levels `< k`, so members of a level can run concurrently.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::errors::AgentflowError;
use crate::pipeline::AgentSet;

/// One scheduled level of an [`ExecutionPlan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLevel {
    /// Level index in the full graph
    pub index: usize,
    /// Selected agents on this level
    pub agents: Vec<String>,
}

/// Leveled plan for one invocation
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Levels of the full graph
    pub levels: Vec<Vec<String>>,
    /// Levels restricted to the selected agents (empty levels dropped)
    pub scheduled: Vec<PlannedLevel>,
    /// Unselected agents the selection depends on; compared, never spawned
    pub context: Vec<String>,
}

impl ExecutionPlan {
    /// Every scheduled agent, in level order
    pub fn scheduled_agents(&self) -> Vec<&str> {
        self.scheduled
            .iter()
            .flat_map(|l| l.agents.iter().map(String::as_str))
            .collect()
    }

    /// Whether an agent is scheduled to run
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.scheduled
            .iter()
            .any(|l| l.agents.iter().any(|a| a == name))
    }
}

/// Builder for agent dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl DagBuilder {
    /// Create a new DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        }
    }

    /// Build a DAG from an agent set, rejecting unknown dependencies and cycles
    pub fn build(set: &AgentSet) -> Result<Self, AgentflowError> {
        let mut builder = Self::new();

        for (idx, agent) in set.agents.iter().enumerate() {
            if builder.name_to_index.contains_key(&agent.name) {
                return Err(AgentflowError::InvalidDefinition {
                    reason: format!("duplicate agent name '{}'", agent.name),
                    help: None,
                });
            }
            let node = builder.graph.add_node(idx);
            builder.name_to_index.insert(agent.name.clone(), node);
            builder.index_to_name.insert(node, agent.name.clone());
        }

        for agent in &set.agents {
            let agent_node = builder.name_to_index[&agent.name];

            for dep_name in &agent.depends_on {
                let dep_node = builder.name_to_index.get(dep_name).ok_or_else(|| {
                    AgentflowError::UnknownDependency {
                        agent: agent.name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;

                if !builder.graph.contains_edge(*dep_node, agent_node) {
                    builder.graph.add_edge(*dep_node, agent_node, ());
                }
            }
        }

        // Cycles surface as a non-empty residual set
        builder.levels()?;

        Ok(builder)
    }

    /// Compute execution levels with Kahn's algorithm
    pub fn levels(&self) -> Result<Vec<Vec<String>>, AgentflowError> {
        let mut remaining_deps: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let deps = self.graph.neighbors_directed(n, Direction::Incoming).count();
                (n, deps)
            })
            .collect();

        let mut levels = Vec::new();

        loop {
            let mut ready: Vec<NodeIndex> = remaining_deps
                .iter()
                .filter(|(_, deps)| **deps == 0)
                .map(|(node, _)| *node)
                .collect();

            if ready.is_empty() {
                break;
            }

            // Declaration order within a level
            ready.sort_by_key(|n| self.graph[*n]);

            for node in &ready {
                remaining_deps.remove(node);
            }
            for node in &ready {
                for dependent in self.graph.neighbors_directed(*node, Direction::Outgoing) {
                    if let Some(count) = remaining_deps.get_mut(&dependent) {
                        *count = count.saturating_sub(1);
                    }
                }
            }

            levels.push(
                ready
                    .into_iter()
                    .map(|n| self.index_to_name[&n].clone())
                    .collect(),
            );
        }

        if !remaining_deps.is_empty() {
            let mut agents: Vec<String> = remaining_deps
                .keys()
                .map(|n| self.index_to_name[n].clone())
                .collect();
            agents.sort();
            return Err(AgentflowError::CircularDependency { agents });
        }

        Ok(levels)
    }

    /// Level the full graph, then restrict scheduling to `selection`
    ///
    /// An empty selection schedules every agent. Level indices always refer
    /// to the full graph.
    pub fn plan(&self, selection: &[String]) -> Result<ExecutionPlan, AgentflowError> {
        let levels = self.levels()?;

        for name in selection {
            if !self.name_to_index.contains_key(name) {
                return Err(AgentflowError::AgentNotFound {
                    agent: name.clone(),
                });
            }
        }

        let selected: HashSet<&str> = if selection.is_empty() {
            self.name_to_index.keys().map(String::as_str).collect()
        } else {
            selection.iter().map(String::as_str).collect()
        };

        let mut needed = HashSet::new();
        for name in &selected {
            needed.extend(self.transitive_dependencies(name).unwrap_or_default());
        }

        let scheduled = levels
            .iter()
            .enumerate()
            .map(|(index, level)| PlannedLevel {
                index,
                agents: level
                    .iter()
                    .filter(|a| selected.contains(a.as_str()))
                    .cloned()
                    .collect(),
            })
            .filter(|l| !l.agents.is_empty())
            .collect();

        let context = levels
            .iter()
            .flatten()
            .filter(|a| needed.contains(*a) && !selected.contains(a.as_str()))
            .cloned()
            .collect();

        Ok(ExecutionPlan {
            levels,
            scheduled,
            context,
        })
    }

    /// Get direct dependencies for an agent
    pub fn dependencies(&self, name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(name)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .collect();
        deps.sort_by_key(|n| self.graph[*n]);
        Some(deps.into_iter().map(|n| self.index_to_name[&n].clone()).collect())
    }

    /// Get direct dependents for an agent
    pub fn dependents(&self, name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(name)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .collect();
        deps.sort_by_key(|n| self.graph[*n]);
        Some(deps.into_iter().map(|n| self.index_to_name[&n].clone()).collect())
    }

    /// Every agent `name` depends on, directly or transitively
    pub fn transitive_dependencies(&self, name: &str) -> Option<HashSet<String>> {
        let start = *self.name_to_index.get(name)?;
        let mut seen = HashSet::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        Some(
            seen.into_iter()
                .map(|n| self.index_to_name[&n].clone())
                .collect(),
        )
    }

    /// Check if agent A depends (directly or transitively) on agent B
    pub fn depends_on(&self, agent_a: &str, agent_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(agent_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(agent_b) else {
            return false;
        };

        node_a != node_b
            && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in self.graph.node_indices() {
            let name = &self.index_to_name[&node];
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    {} --> {}\n", from, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph agents {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        for node in self.graph.node_indices() {
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", self.index_to_name[&node]));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the execution levels
    pub fn to_text(&self) -> Result<String, AgentflowError> {
        let levels = self.levels()?;
        let mut out = String::new();

        for (i, level) in levels.iter().enumerate() {
            out.push_str(&format!("Level {}:\n", i));
            for name in level {
                let deps = self.dependencies(name).unwrap_or_default();
                out.push_str(&format!("  - {}", name));
                if !deps.is_empty() {
                    out.push_str(&format!(" [depends: {}]", deps.join(", ")));
                }
                out.push('\n');
            }
        }

        Ok(out)
    }

    fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| {
                (
                    self.index_to_name[&from].as_str(),
                    self.index_to_name[&to].as_str(),
                )
            })
            .collect()
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
