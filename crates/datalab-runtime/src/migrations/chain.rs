use std::collections::HashMap;

use datalab_core::error::{DatalabError, Result};

use super::migration::Migration;

/// Migrations ordered as a singly linked list from the root to the head.
///
/// Every step names its predecessor. Construction rejects anything that is
/// not a single unbranched line: multiple roots, duplicate revisions,
/// dangling predecessors, forks and unreachable steps.
#[derive(Debug, Clone)]
pub struct MigrationChain {
    steps: Vec<Migration>,
    positions: HashMap<String, usize>,
}

impl MigrationChain {
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        let mut by_revision: HashMap<String, Migration> = HashMap::with_capacity(migrations.len());
        for m in migrations {
            if by_revision.contains_key(&m.revision) {
                return Err(order_error(format!("duplicate revision '{}'", m.revision)));
            }
            by_revision.insert(m.revision.clone(), m);
        }

        let mut roots = by_revision.values().filter(|m| m.down_revision.is_none());
        let root = match (roots.next(), roots.next()) {
            (None, _) if by_revision.is_empty() => return Ok(Self::empty()),
            (None, _) => return Err(order_error("no root revision".to_string())),
            (Some(root), None) => root.revision.clone(),
            (Some(a), Some(b)) => {
                return Err(order_error(format!(
                    "multiple root revisions ('{}', '{}')",
                    a.revision, b.revision
                )))
            }
        };

        // predecessor -> successor
        let mut children: HashMap<&str, &str> = HashMap::new();
        for m in by_revision.values() {
            let Some(parent) = m.down_revision.as_deref() else {
                continue;
            };
            if !by_revision.contains_key(parent) {
                return Err(order_error(format!(
                    "'{}' revises unknown revision '{}'",
                    m.revision, parent
                )));
            }
            if let Some(existing) = children.insert(parent, &m.revision) {
                return Err(order_error(format!(
                    "'{}' is revised by both '{}' and '{}'",
                    parent, existing, m.revision
                )));
            }
        }

        let mut order = vec![root];
        while let Some(next) = order.last().and_then(|last| children.get(last.as_str())) {
            order.push(next.to_string());
        }

        if order.len() != by_revision.len() {
            let mut unreachable: Vec<&str> = by_revision
                .keys()
                .map(String::as_str)
                .filter(|rev| !order.iter().any(|o| o == rev))
                .collect();
            unreachable.sort_unstable();
            return Err(order_error(format!(
                "revisions not reachable from the root: {}",
                unreachable.join(", ")
            )));
        }

        let steps: Vec<Migration> = order
            .iter()
            .filter_map(|rev| by_revision.remove(rev))
            .collect();
        let positions = steps
            .iter()
            .enumerate()
            .map(|(i, m)| (m.revision.clone(), i))
            .collect();

        Ok(Self { steps, positions })
    }

    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Steps from root to head.
    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn head(&self) -> Option<&Migration> {
        self.steps.last()
    }

    pub fn get(&self, revision: &str) -> Option<&Migration> {
        self.position(revision).map(|i| &self.steps[i])
    }

    /// Zero-based index of a revision in apply order.
    pub fn position(&self, revision: &str) -> Option<usize> {
        self.positions.get(revision).copied()
    }

    /// Position of `revision`, or a `MigrationOrder` error naming it.
    pub fn require(&self, revision: &str) -> Result<usize> {
        self.position(revision)
            .ok_or_else(|| order_error(format!("unknown revision '{}'", revision)))
    }
}

fn order_error(message: String) -> DatalabError {
    DatalabError::MigrationOrder(message)
}
