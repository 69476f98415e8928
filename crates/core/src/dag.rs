use crate::component::ComponentHandle;
use crate::error::ConstructionError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use uuid::Uuid;

/// Index-based dependency graph, finalized from the edges declared on a
/// workflow.
///
/// Node `i` is the `i`-th registered component. Edges point from a
/// dependency to its dependent.
pub struct WorkflowDag {
    graph: DiGraph<usize, ()>,
}

impl WorkflowDag {
    /// Build and validate the graph.
    ///
    /// `edges` are `(dependent, dependency)` pairs as declared. Every handle
    /// must belong to `workflow` and the result must be acyclic.
    pub fn build(
        workflow: Uuid,
        names: &[String],
        edges: &[(ComponentHandle, ComponentHandle)],
    ) -> Result<Self, ConstructionError> {
        let mut graph = DiGraph::with_capacity(names.len(), edges.len());
        let nodes: Vec<NodeIndex> = (0..names.len()).map(|i| graph.add_node(i)).collect();

        let owned =
            |handle: &ComponentHandle| handle.workflow == workflow && handle.index < names.len();

        for (dependent, dependency) in edges {
            if !owned(dependent) {
                return Err(ConstructionError::ForeignComponent {
                    component: format!("#{}", dependent.index),
                });
            }
            if !owned(dependency) {
                return Err(ConstructionError::ForeignComponent {
                    component: names[dependent.index].clone(),
                });
            }

            // Edge from dependency to dependent (dependency -> component)
            graph.update_edge(nodes[dependency.index], nodes[dependent.index], ());
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(ConstructionError::Cycle {
                component: names[graph[cycle.node_id()]].clone(),
            });
        }

        Ok(Self { graph })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Components with no dependencies (can start immediately).
    pub fn entry_nodes(&self) -> Vec<usize> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n])
            .collect()
    }

    /// Number of distinct direct dependencies of each component.
    pub fn dependency_counts(&self) -> Vec<usize> {
        self.graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect()
    }

    /// Direct dependencies of a component.
    pub fn dependencies(&self, node: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(NodeIndex::new(node), Direction::Incoming)
            .map(|n| self.graph[n])
            .collect()
    }

    /// Components that depend directly on `node`.
    pub fn dependents(&self, node: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(NodeIndex::new(node), Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect()
    }

    /// Every component reachable from `node` along dependency edges, not
    /// including `node` itself.
    pub fn descendants(&self, node: usize) -> Vec<usize> {
        let start = NodeIndex::new(node);
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();

        while let Some(n) = bfs.next(&self.graph) {
            if n != start {
                found.push(self.graph[n]);
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(workflow: Uuid, count: usize) -> Vec<ComponentHandle> {
        (0..count)
            .map(|index| ComponentHandle { workflow, index })
            .collect()
    }

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("step{}", i)).collect()
    }

    #[test]
    fn test_linear_dag() {
        let id = Uuid::new_v4();
        let h = handles(id, 3);
        let dag = WorkflowDag::build(id, &names(3), &[(h[1], h[0]), (h[2], h[1])]).unwrap();

        assert_eq!(dag.len(), 3);
        assert_eq!(dag.entry_nodes(), vec![0]);
        assert_eq!(dag.dependency_counts(), vec![0, 1, 1]);
        assert_eq!(dag.dependents(0), vec![1]);

        let mut below = dag.descendants(0);
        below.sort();
        assert_eq!(below, vec![1, 2]);
    }

    #[test]
    fn test_fan_out_fan_in() {
        let id = Uuid::new_v4();
        let h = handles(id, 5);
        // 0 and 1 feed 2, 3, 4
        let edges: Vec<_> = [2, 3, 4]
            .iter()
            .flat_map(|&d| [(h[d], h[0]), (h[d], h[1])])
            .collect();
        let dag = WorkflowDag::build(id, &names(5), &edges).unwrap();

        let mut entry = dag.entry_nodes();
        entry.sort();
        assert_eq!(entry, vec![0, 1]);
        assert_eq!(dag.dependency_counts(), vec![0, 0, 2, 2, 2]);

        let mut deps = dag.dependencies(3);
        deps.sort();
        assert_eq!(deps, vec![0, 1]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let id = Uuid::new_v4();
        let h = handles(id, 2);
        let dag = WorkflowDag::build(id, &names(2), &[(h[1], h[0]), (h[1], h[0])]).unwrap();

        assert_eq!(dag.dependency_counts(), vec![0, 1]);
    }

    #[test]
    fn test_cyclic_dag_rejected() {
        let id = Uuid::new_v4();
        let h = handles(id, 3);
        let result = WorkflowDag::build(id, &names(3), &[(h[0], h[2]), (h[1], h[0]), (h[2], h[1])]);

        assert!(matches!(result, Err(ConstructionError::Cycle { .. })));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let id = Uuid::new_v4();
        let h = handles(id, 1);
        let result = WorkflowDag::build(id, &names(1), &[(h[0], h[0])]);

        assert_eq!(
            result.err(),
            Some(ConstructionError::Cycle {
                component: "step0".to_string()
            })
        );
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let h = handles(id, 2);
        let foreign = ComponentHandle {
            workflow: other,
            index: 0,
        };

        let result = WorkflowDag::build(id, &names(2), &[(h[1], foreign)]);
        assert_eq!(
            result.err(),
            Some(ConstructionError::ForeignComponent {
                component: "step1".to_string()
            })
        );
    }
}
