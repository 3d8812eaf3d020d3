//! Dependency graph and wave scheduling for task components.
//!
//! 1. **Builder** - validates the declared components and dependency edges,
//!    failing with the explicit path on a cycle.
//! 2. **Scheduler** - layers the graph into waves, keeping components with
//!    overlapping path scopes out of the same wave.
//!
//! ## Example
//!
//! ```
//! use conductor::dag::{GraphBuilder, WavePlan};
//! use conductor::task::ComponentSpec;
//!
//! let graph = GraphBuilder::new(vec![
//!     ComponentSpec::new("A", &[]),
//!     ComponentSpec::new("B", &[]),
//!     ComponentSpec::new("C", &["A", "B"]),
//! ])
//! .build()
//! .unwrap();
//!
//! let plan = WavePlan::compute(&graph);
//! assert_eq!(plan.waves(), &[vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]);
//! ```

mod builder;
mod scheduler;

pub use builder::{ComponentGraph, GraphBuilder, NodeIndex};
pub use scheduler::{WavePlan, scopes_overlap};

use crate::errors::EngineError;
use crate::task::ComponentSpec;

/// Build the graph and its wave plan in one step.
pub fn plan(components: &[ComponentSpec]) -> Result<(ComponentGraph, WavePlan), EngineError> {
    let graph = GraphBuilder::new(components.to_vec()).build()?;
    let waves = WavePlan::compute(&graph);
    Ok((graph, waves))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_propagates_cycle() {
        let err = plan(&[
            ComponentSpec::new("A", &["B"]),
            ComponentSpec::new("B", &["A"]),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cycle detected in component dependencies: A -> B -> A"
        );
    }

    #[test]
    fn test_plan_returns_graph_and_waves() {
        let (graph, waves) = plan(&[
            ComponentSpec::new("core", &[]),
            ComponentSpec::new("cli", &["core"]),
        ])
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves.wave_of("cli"), Some(1));
    }
}
