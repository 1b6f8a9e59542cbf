// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! DAG (Directed Acyclic Graph) builder for stage context wiring
//!
//! Builds the graph of `context` edges between stages, detects cycles and
//! unknown references, and renders the graph for the `graph` command.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::GenflowError;
use crate::pipeline::PipelineDefinition;

/// Builder for stage dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<usize, ()>,
    id_to_index: HashMap<String, NodeIndex>,
    index_to_id: HashMap<NodeIndex, String>,
    /// Stage ids in declared order
    declared: Vec<String>,
}

impl DagBuilder {
    /// Create a new DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            id_to_index: HashMap::new(),
            index_to_id: HashMap::new(),
            declared: Vec::new(),
        }
    }

    /// Build a DAG from a pipeline definition
    pub fn build(pipeline: &PipelineDefinition) -> Result<Self, GenflowError> {
        let mut builder = Self::new();

        for (idx, stage) in pipeline.stages.iter().enumerate() {
            let node = builder.graph.add_node(idx);
            builder.id_to_index.insert(stage.id.clone(), node);
            builder.index_to_id.insert(node, stage.id.clone());
            builder.declared.push(stage.id.clone());
        }

        for stage in &pipeline.stages {
            let stage_node = builder.id_to_index[&stage.id];

            for dep_id in &stage.context {
                let dep_node = builder.id_to_index.get(dep_id).ok_or_else(|| {
                    GenflowError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep_id.clone(),
                    }
                })?;

                if !builder.graph.contains_edge(*dep_node, stage_node) {
                    builder.graph.add_edge(*dep_node, stage_node, ());
                }
            }
        }

        builder.validate_acyclic()?;

        Ok(builder)
    }

    fn validate_acyclic(&self) -> Result<(), GenflowError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            GenflowError::CircularDependency {
                stages: self.find_cycle_members(cycle.node_id()),
            }
        })
    }

    /// Stages reachable from `start` that lead back to it
    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        let mut members: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&n| {
                petgraph::algo::has_path_connecting(&self.graph, start, n, None)
                    && petgraph::algo::has_path_connecting(&self.graph, n, start, None)
            })
            .map(|n| self.index_to_id[&n].clone())
            .collect();
        members.sort();
        members
    }

    /// Context references that point at a stage declared later.
    ///
    /// Stages run in declared order, so such a reference would always see an
    /// empty context.
    pub fn forward_references(&self) -> Vec<(String, String)> {
        let position: HashMap<&str, usize> = self
            .declared
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut refs = Vec::new();
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                let dep = &self.index_to_id[&from];
                let stage = &self.index_to_id[&to];
                if position[dep.as_str()] > position[stage.as_str()] {
                    refs.push((stage.clone(), dep.clone()));
                }
            }
        }
        refs.sort();
        refs
    }

    /// Get dependencies for a stage (stages whose output it reads)
    pub fn dependencies(&self, stage_id: &str) -> Option<Vec<String>> {
        let node = self.id_to_index.get(stage_id)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| self.index_to_id[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Get dependents for a stage (stages that read its output)
    pub fn dependents(&self, stage_id: &str) -> Option<Vec<String>> {
        let node = self.id_to_index.get(stage_id)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| self.index_to_id[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for id in &self.declared {
            out.push_str(&format!("    {}[{}]\n", id, id));
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    {} --> {}\n", from, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        for id in &self.declared {
            let node = self.id_to_index[id];
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", id));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, pipeline: &PipelineDefinition) -> String {
        let mut out = String::new();

        for (i, stage) in pipeline.stages.iter().enumerate() {
            let deps = self.dependencies(&stage.id).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, stage.id, stage.executor));

            if let Some(ref file) = stage.output_file {
                out.push_str(&format!(" -> {}", file.display()));
            }

            if !deps.is_empty() {
                out.push_str(&format!(" [context: {}]", deps.join(", ")));
            }

            if pipeline.is_integration(&stage.id) {
                out.push_str(" *integration*");
            }

            out.push('\n');
        }

        out
    }

    /// Edges as (from, to) ids, in declared order of the target stage
    fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(usize, String, String)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| {
                (
                    self.graph[to],
                    self.index_to_id[&from].clone(),
                    self.index_to_id[&to].clone(),
                )
            })
            .collect();
        edges.sort();
        edges.into_iter().map(|(_, from, to)| (from, to)).collect()
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
