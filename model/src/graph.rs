use crate::error::{self, Result};
use crate::inject::InjectionExpression;
use crate::resource::{ResourceDocument, ResourceRef};
use std::collections::BTreeSet;

/// Edges between documents, by index into the slice the graph was built from. An edge exists when
/// a document names another in `krtest.dev/depends-on` or references its observed state in a
/// `${resource.…}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn build(documents: &[ResourceDocument]) -> Result<Self> {
        let mut dependencies = vec![BTreeSet::new(); documents.len()];
        let mut dependents = vec![BTreeSet::new(); documents.len()];
        for (i, document) in documents.iter().enumerate() {
            let references = document.depends_on.iter().chain(
                document
                    .placeholders
                    .iter()
                    .filter_map(|placeholder| match &placeholder.expression {
                        InjectionExpression::Resource { target, .. } => Some(target),
                        InjectionExpression::DataSource { .. } => None,
                    }),
            );
            for reference in references {
                let target = resolve_reference(documents, document, reference)?;
                dependencies[i].insert(target);
                dependents[target].insert(i);
            }
        }
        Ok(Self {
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// The documents `index` waits for.
    pub fn dependencies_of(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependencies
            .get(index)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// The documents that wait for `index`.
    pub fn dependents_of(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependents
            .get(index)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// A topological order in which every document comes after its dependencies. Among documents
    /// that are ready at the same time, the one declared first wins, so documents without ordering
    /// constraints keep their declaration order. Returns the indices that are part of a cycle as
    /// the error.
    pub fn order(&self) -> std::result::Result<Vec<usize>, Vec<usize>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.len());
        while let Some(next) = ready.iter().next().copied() {
            ready.remove(&next);
            order.push(next);
            for dependent in &self.dependents[next] {
                remaining[*dependent] -= 1;
                if remaining[*dependent] == 0 {
                    ready.insert(*dependent);
                }
            }
        }
        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(remaining
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(i, _)| i)
                .collect())
        }
    }

    /// Like `order`, but reports a cycle as an `OrderingCycle` error naming the resources involved.
    pub fn ordered(&self, documents: &[ResourceDocument]) -> Result<Vec<usize>> {
        self.order().or_else(|cycle| {
            error::OrderingCycleSnafu {
                resources: cycle
                    .into_iter()
                    .filter_map(|i| documents.get(i))
                    .map(|document| document.identity.to_string())
                    .collect::<Vec<_>>(),
            }
            .fail()
        })
    }
}

fn resolve_reference(
    documents: &[ResourceDocument],
    from: &ResourceDocument,
    reference: &ResourceRef,
) -> Result<usize> {
    let candidates: Vec<usize> = documents
        .iter()
        .enumerate()
        .filter(|(_, document)| reference.matches(&document.identity))
        .map(|(i, _)| i)
        .collect();
    match candidates.as_slice() {
        [] => error::UnknownReferenceSnafu {
            resource: from.identity.to_string(),
            source_location: from.source.to_string(),
            reference: reference.to_string(),
        }
        .fail(),
        [single] => Ok(*single),
        many => error::AmbiguousReferenceSnafu {
            resource: from.identity.to_string(),
            source_location: from.source.to_string(),
            reference: reference.to_string(),
            candidates: many
                .iter()
                .map(|i| documents[*i].identity.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
        .fail(),
    }
}
