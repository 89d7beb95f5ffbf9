// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Job dependency graph
//!
//! Builds the `needs` DAG of a definition, rejects cycles and unknown
//! dependencies, and groups jobs into levels that can run in parallel.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

use crate::errors::ReflowError;
use crate::pipeline::Job;

/// Anything with a name and a `needs` list can be placed in a [`JobGraph`]
pub trait JobNode {
    fn job_name(&self) -> &str;
    fn job_needs(&self) -> &[String];
}

impl JobNode for Job {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn job_needs(&self) -> &[String] {
        &self.needs
    }
}

/// Validated job DAG. Node weights are indices into the job list.
#[derive(Debug, Clone)]
pub struct JobGraph {
    graph: DiGraph<usize, ()>,
    names: Vec<String>,
    name_to_index: HashMap<String, NodeIndex>,
    levels: Vec<Vec<usize>>,
}

impl JobGraph {
    /// Build the graph for a list of jobs
    pub fn build<J: JobNode>(jobs: &[J]) -> Result<Self, ReflowError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut names = Vec::with_capacity(jobs.len());

        for (idx, job) in jobs.iter().enumerate() {
            let name = job.job_name().to_string();
            if name_to_index.contains_key(&name) {
                return Err(ReflowError::DuplicateJob { job: name });
            }
            let node = graph.add_node(idx);
            name_to_index.insert(name.clone(), node);
            names.push(name);
        }

        for job in jobs {
            let node = name_to_index[job.job_name()];
            for dep in job.job_needs() {
                let dep_node = name_to_index.get(dep).ok_or_else(|| {
                    ReflowError::UnknownDependency {
                        job: job.job_name().to_string(),
                        dependency: dep.clone(),
                    }
                })?;

                if !graph.contains_edge(*dep_node, node) {
                    graph.add_edge(*dep_node, node, ());
                }
            }
        }

        let mut dag = Self {
            graph,
            names,
            name_to_index,
            levels: Vec::new(),
        };
        dag.levels = dag.compute_levels()?;
        Ok(dag)
    }

    /// Kahn's algorithm, one wave at a time
    fn compute_levels(&self) -> Result<Vec<Vec<usize>>, ReflowError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut current: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut levels = Vec::new();
        let mut processed = 0;

        while !current.is_empty() {
            current.sort_by_key(|n| self.graph[*n]);
            let mut next = Vec::new();

            for &node in &current {
                processed += 1;
                for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    in_degree[succ.index()] -= 1;
                    if in_degree[succ.index()] == 0 {
                        next.push(succ);
                    }
                }
            }

            levels.push(current.iter().map(|n| self.graph[*n]).collect());
            current = next;
        }

        if processed < self.graph.node_count() {
            return Err(ReflowError::Cycle {
                members: self.cycle_members(&in_degree),
            });
        }

        Ok(levels)
    }

    /// Jobs left with in-degree > 0 after Kahn's pass, minus the ones that
    /// merely hang off a cycle without leading back into it.
    fn cycle_members(&self, in_degree: &[usize]) -> Vec<String> {
        let mut remaining: Vec<bool> = in_degree.iter().map(|d| *d > 0).collect();
        let mut out_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| {
                self.graph
                    .neighbors_directed(n, Direction::Outgoing)
                    .filter(|s| remaining[s.index()])
                    .count()
            })
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| remaining[n.index()] && out_degree[n.index()] == 0)
            .collect();

        while let Some(node) = queue.pop_front() {
            remaining[node.index()] = false;
            for pred in self.graph.neighbors_directed(node, Direction::Incoming) {
                if remaining[pred.index()] {
                    out_degree[pred.index()] -= 1;
                    if out_degree[pred.index()] == 0 {
                        queue.push_back(pred);
                    }
                }
            }
        }

        let mut members: Vec<usize> = self
            .graph
            .node_indices()
            .filter(|n| remaining[n.index()])
            .map(|n| self.graph[n])
            .collect();
        members.sort_unstable();
        members.into_iter().map(|i| self.names[i].clone()).collect()
    }

    /// Job indices grouped by level; level 0 has no needs
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Job indices in a valid execution order (level by level)
    pub fn topological_order(&self) -> Vec<usize> {
        self.levels.iter().flatten().copied().collect()
    }

    /// Direct dependencies of the job at `index`, by index
    pub fn dependency_indices(&self, index: usize) -> Vec<usize> {
        let Some(node) = self.name_to_index.get(&self.names[index]) else {
            return Vec::new();
        };
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Get dependencies for a job (jobs that must finish before it)
    pub fn dependencies(&self, job_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(job_name)?;
        Some(
            self.dependency_indices(self.graph[*node])
                .into_iter()
                .map(|i| self.names[i].clone())
                .collect(),
        )
    }

    fn sorted_edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(usize, usize)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from], self.graph[to]))
            .collect();
        edges.sort_unstable();
        edges
            .into_iter()
            .map(|(from, to)| (self.names[from].as_str(), self.names[to].as_str()))
            .collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for name in &self.names {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    {} --> {}\n", mermaid_id(from), mermaid_id(to)));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        // Isolated jobs have no edge to appear on
        for name in &self.names {
            let node = self.name_to_index[name];
            if self.graph.neighbors_undirected(node).next().is_none() {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the execution levels
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (level, jobs) in self.levels.iter().enumerate() {
            out.push_str(&format!("level {}:\n", level));
            for &idx in jobs {
                let deps = self.dependencies(&self.names[idx]).unwrap_or_default();
                out.push_str(&format!("  - {}", self.names[idx]));
                if !deps.is_empty() {
                    out.push_str(&format!(" [needs: {}]", deps.join(", ")));
                }
                out.push('\n');
            }
        }

        out
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jobs(jobs: Vec<(&str, Vec<&str>)>) -> Vec<Job> {
        jobs.into_iter()
            .map(|(name, needs)| Job {
                name: name.into(),
                description: None,
                needs: needs.into_iter().map(String::from).collect(),
                always: false,
                timeout_secs: None,
                env: Default::default(),
                steps: vec![],
            })
            .collect()
    }

    #[test]
    fn test_linear_dag() {
        let jobs = make_jobs(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let dag = JobGraph::build(&jobs).unwrap();

        assert_eq!(dag.topological_order(), vec![0, 1, 2]);
        assert_eq!(dag.levels(), &[vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_diamond_levels() {
        let jobs = make_jobs(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);

        let dag = JobGraph::build(&jobs).unwrap();

        assert_eq!(dag.levels(), &[vec![0], vec![1, 2], vec![3]]);
        assert_eq!(dag.dependencies("d").unwrap(), vec!["b", "c"]);
        assert_eq!(dag.dependency_indices(3), vec![1, 2]);
    }

    #[test]
    fn test_independent_jobs_share_level_zero() {
        let jobs = make_jobs(vec![("lint", vec![]), ("test", vec![])]);
        let dag = JobGraph::build(&jobs).unwrap();
        assert_eq!(dag.levels(), &[vec![0, 1]]);
    }

    #[test]
    fn test_cycle_reports_only_cycle_members() {
        // d hangs off the a-b-c cycle, e feeds into it
        let jobs = make_jobs(vec![
            ("e", vec![]),
            ("a", vec!["c", "e"]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("d", vec!["c"]),
        ]);

        match JobGraph::build(&jobs) {
            Err(ReflowError::Cycle { members }) => assert_eq!(members, vec!["a", "b", "c"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let jobs = make_jobs(vec![("a", vec!["a"])]);
        match JobGraph::build(&jobs) {
            Err(ReflowError::Cycle { members }) => assert_eq!(members, vec!["a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let jobs = make_jobs(vec![("a", vec!["nonexistent"])]);

        let result = JobGraph::build(&jobs);
        assert!(matches!(
            result,
            Err(ReflowError::UnknownDependency { ref job, ref dependency })
                if job == "a" && dependency == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_job() {
        let jobs = make_jobs(vec![("a", vec![]), ("a", vec![])]);
        assert!(matches!(
            JobGraph::build(&jobs),
            Err(ReflowError::DuplicateJob { .. })
        ));
    }

    #[test]
    fn test_mermaid_output() {
        let jobs = make_jobs(vec![("build", vec![]), ("deploy-prod", vec!["build"])]);

        let dag = JobGraph::build(&jobs).unwrap();
        let mermaid = dag.to_mermaid();

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("build --> deploy_prod"));
        assert!(mermaid.contains("deploy_prod[deploy-prod]"));
    }

    #[test]
    fn test_text_output() {
        let jobs = make_jobs(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        let dag = JobGraph::build(&jobs).unwrap();

        insta::assert_snapshot!(dag.to_text(), @r###"
        level 0:
          - a
        level 1:
          - b [needs: a]
          - c [needs: a]
        level 2:
          - d [needs: b, c]
        "###);
    }

    #[test]
    fn test_dot_lists_isolated_jobs() {
        let jobs = make_jobs(vec![("a", vec![]), ("b", vec!["a"]), ("solo", vec![])]);
        let dot = JobGraph::build(&jobs).unwrap().to_dot();
        assert!(dot.contains("\"a\" -> \"b\";"));
        assert!(dot.contains("    \"solo\";"));
    }
}
