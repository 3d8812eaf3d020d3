//! Wave computation over a [`ComponentGraph`].
//!
//! Waves are Kahn layers: a component joins the first wave after all of its
//! dependencies. Within a layer components are taken in name order, and a
//! component whose path scope overlaps one already admitted to the wave is
//! deferred to the next wave even without a dependency edge between them.

use crate::dag::builder::{ComponentGraph, NodeIndex};
use std::collections::BTreeSet;
use std::path::{Component as PathComponent, Path, PathBuf};

/// Ordered execution waves, each a list of component names in name order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WavePlan {
    waves: Vec<Vec<String>>,
}

impl WavePlan {
    pub fn compute(graph: &ComponentGraph) -> Self {
        let mut waves = Vec::new();
        let mut placed: BTreeSet<NodeIndex> = BTreeSet::new();

        while placed.len() < graph.len() {
            let ready: Vec<NodeIndex> = (0..graph.len())
                .filter(|i| !placed.contains(i) && graph.dependencies_satisfied(*i, &placed))
                .collect();
            if ready.is_empty() {
                // Unreachable for a graph produced by GraphBuilder.
                break;
            }

            let mut wave: Vec<NodeIndex> = Vec::new();
            for candidate in ready {
                let conflicts = wave.iter().any(|&admitted| {
                    scopes_overlap(
                        graph.node(candidate).map_or(&[], |n| n.scope.as_slice()),
                        graph.node(admitted).map_or(&[], |n| n.scope.as_slice()),
                    )
                });
                if !conflicts {
                    wave.push(candidate);
                }
            }

            placed.extend(wave.iter().copied());
            waves.push(wave.into_iter().map(|i| graph.name(i).to_string()).collect());
        }

        Self { waves }
    }

    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Index of the wave containing `name`.
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|n| n == name))
    }
}

/// Whether two declared scopes claim a common path. A scope claims every
/// path beneath each of its prefixes; an empty scope claims nothing.
pub fn scopes_overlap(a: &[String], b: &[String]) -> bool {
    a.iter().any(|left| {
        let left = normalize(left);
        b.iter().any(|right| {
            let right = normalize(right);
            left.starts_with(&right) || right.starts_with(&left)
        })
    })
}

fn normalize(scope: &str) -> PathBuf {
    Path::new(scope.trim())
        .components()
        .filter(|c| !matches!(c, PathComponent::CurDir))
        .collect()
}
