//! Query engine.
//!
//! Every operation starts from [`Store::triple_lines`] and classifies objects
//! with the resident tables:
//!
//! - CVT if the CVT table flags it;
//! - otherwise Entity if it is MID-shaped, an `en.` key, or has a name;
//! - otherwise Value.
//!
//! A triple is dropped when its predicate has a majority kind that differs,
//! when its object is a known ghost, or when it names an entity that has no
//! name. Neighborhood queries follow at most one CVT hop.
//!
//! Internal methods return [`Result`]; [`QueryService`] is the outer boundary
//! that logs failures and degrades to empty results.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::bucket::utf16_len;
use crate::error::{Result, StoreError};
use crate::graph::{GraphNode, NodeId, NodeKind, NodeTable, PredicateObjects, Subgraph};
use crate::store::Store;

// ============================================================================
// Outbound predicate exclusions
// ============================================================================

const SKIPPED_PREFIX: &str = "wikipedia.";

/// Structural predicates never reported as adjoining.
const ADJOINING_EXCLUDED: [&str; 7] = [
    "type.object.type",
    "type.object.key",
    "type.object.name",
    "type.object.permission",
    "common.topic.alias",
    "common.topic.description",
    "common.topic.image",
];

/// Predicates never followed into a CVT.
const CVT_HOP_EXCLUDED: [&str; 5] = [
    "common.topic.article",
    "common.topic.webpage",
    "common.topic.description",
    "common.document.text",
    "common.topic.image",
];

/// Predicates of the CVT itself left out of `outer inner` pairs.
const CVT_INNER_EXCLUDED: [&str; 4] = [
    "type.object.type",
    "type.object.key",
    "common.topic.description",
    "common.document.text",
];

fn is_adjoining_predicate(predicate: &str) -> bool {
    !predicate.starts_with(SKIPPED_PREFIX) && !ADJOINING_EXCLUDED.contains(&predicate)
}

fn is_cvt_hop_predicate(predicate: &str) -> bool {
    !predicate.starts_with(SKIPPED_PREFIX) && !CVT_HOP_EXCLUDED.contains(&predicate)
}

fn count_by_key<'a>(keys: &[&'a str]) -> AHashMap<&'a str, usize> {
    keys.par_iter()
        .fold(AHashMap::new, |mut counts, &key| {
            *counts.entry(key).or_insert(0) += 1;
            counts
        })
        .reduce(AHashMap::new, |mut left, right| {
            for (key, count) in right {
                *left.entry(key).or_insert(0) += count;
            }
            left
        })
}

// ============================================================================
// Engine
// ============================================================================

impl Store {
    /// [`Store::triple_lines`], with an undecodable chunk treated as a
    /// subject without triples.
    fn pairs(&self, subject: &str) -> Result<Vec<(String, String)>> {
        match self.triple_lines(subject) {
            Err(err @ StoreError::MalformedChunk { .. }) => {
                tracing::warn!(subject, error = %err, "skipping malformed chunk");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Classify `object` and apply the type cross-check and ghost filters.
    /// `None` means the triple is suppressed.
    pub fn admit(&self, predicate: &str, object: &str) -> Option<NodeKind> {
        let tables = self.tables();
        let kind = tables.object_kind(object);
        if tables
            .predicate_types
            .get(predicate)
            .is_some_and(|majority| majority != kind)
        {
            return None;
        }
        if kind != NodeKind::Value && tables.ghosts.contains(object) {
            return None;
        }
        if kind == NodeKind::Entity && tables.name(object).is_none() {
            return None;
        }
        Some(kind)
    }

    fn entity_node(&self, mid: &str) -> GraphNode {
        GraphNode::Entity {
            mid: mid.to_string(),
            name: self.tables().name(mid).map(str::to_string),
            predicates: None,
        }
    }

    /// Build the predicate list of `subject` into `table`.
    ///
    /// Entities are registered shallow. With `follow_cvt` every CVT object is
    /// expanded one level, including one first registered unexpanded inside
    /// another CVT; CVTs met inside that expansion stay unexpanded.
    fn expand(
        &self,
        subject: &str,
        max_per_predicate: usize,
        follow_cvt: bool,
        table: &mut NodeTable,
    ) -> Result<Vec<PredicateObjects>> {
        let mut groups: Vec<PredicateObjects> = Vec::new();
        let mut group_of: AHashMap<String, usize> = AHashMap::new();

        for (predicate, object) in self.pairs(subject)? {
            let Some(kind) = self.admit(&predicate, &object) else {
                continue;
            };
            let group = match group_of.get(&predicate) {
                Some(&i) => i,
                None => {
                    group_of.insert(predicate.clone(), groups.len());
                    groups.push(PredicateObjects {
                        predicate,
                        objects: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            if groups[group].objects.len() >= max_per_predicate {
                continue;
            }

            let node = match kind {
                NodeKind::Value => table.push_value(&object),
                NodeKind::Entity => table.get_or_insert_with(&object, || self.entity_node(&object)).0,
                NodeKind::Cvt => {
                    let (id, _) = table.get_or_insert_with(&object, || GraphNode::Cvt {
                        mid: object.clone(),
                        predicates: None,
                    });
                    if follow_cvt && !table.get(id).is_expanded() {
                        let inner = self.expand(&object, max_per_predicate, false, table)?;
                        table.set_predicates(id, inner);
                    }
                    id
                }
            };
            groups[group].objects.push(node);
        }
        // a zero cap admits nothing
        groups.retain(|g| !g.objects.is_empty());
        Ok(groups)
    }

    fn neighborhood_table(
        &self,
        subject: &str,
        max_per_predicate: usize,
        follow_cvt: bool,
    ) -> Result<(NodeTable, NodeId)> {
        let mut table = NodeTable::new();
        let (root, _) = table.get_or_insert_with(subject, || self.entity_node(subject));
        let list = self.expand(subject, max_per_predicate, follow_cvt, &mut table)?;
        table.set_predicates(root, list);
        Ok((table, root))
    }

    /// One hop around `subject` plus at most one CVT hop when `follow_cvt`.
    /// `max_per_predicate` keeps the first N admitted objects per predicate.
    pub fn neighborhood(
        &self,
        subject: &str,
        max_per_predicate: Option<usize>,
        follow_cvt: bool,
    ) -> Result<Subgraph> {
        let (table, root) =
            self.neighborhood_table(subject, max_per_predicate.unwrap_or(usize::MAX), follow_cvt)?;
        Ok(table.into_subgraph(root))
    }

    /// The neighborhood restricted to one relation: `"p1"` or `"p1 p2"`, the
    /// second segment reaching through CVT objects of `p1`. Unexpanded
    /// entities at the end of the relation get their own one-hop neighborhood.
    ///
    /// A missing first predicate yields the root with no predicates; more than
    /// two segments yields `None`.
    pub fn filtered(&self, subject: &str, predicate: &str) -> Result<Option<Subgraph>> {
        let segments: Vec<&str> = predicate.split(' ').collect();
        if segments.len() > 2 {
            return Ok(None);
        }

        let (mut table, root) = self.neighborhood_table(subject, usize::MAX, true)?;
        let kept = table
            .get(root)
            .predicates()
            .unwrap_or_default()
            .iter()
            .find(|po| po.predicate == segments[0])
            .cloned();
        let Some(kept) = kept else {
            table.set_predicates(root, Vec::new());
            return Ok(Some(table.into_subgraph(root)));
        };

        let leaves: Vec<NodeId> = match segments.get(1) {
            None => kept.objects.clone(),
            Some(second) => kept
                .objects
                .iter()
                .filter(|&&id| table.get(id).kind() == NodeKind::Cvt)
                .flat_map(|&cvt| {
                    table
                        .get(cvt)
                        .predicates()
                        .unwrap_or_default()
                        .iter()
                        .filter(|po| po.predicate == *second)
                        .flat_map(|po| po.objects.iter().copied())
                })
                .collect(),
        };
        table.set_predicates(root, vec![kept]);

        for leaf in leaves {
            let mid = match table.get(leaf) {
                GraphNode::Entity {
                    mid,
                    predicates: None,
                    ..
                } => mid.clone(),
                _ => continue,
            };
            let list = self.expand(&mid, usize::MAX, false, &mut table)?;
            table.set_predicates(leaf, list);
        }
        Ok(Some(table.into_subgraph(root)))
    }

    /// The relation schema around `subject`: adjoining predicate names plus
    /// `"outer inner"` pairs for predicates that lead through a CVT, sorted
    /// and deduplicated.
    ///
    /// A predicate seen both ways is kept only on the side where it occurs
    /// more often; a tie drops it entirely.
    pub fn outbound_predicates(&self, subject: &str) -> Result<Vec<String>> {
        if utf16_len(subject) < 2 {
            return Ok(Vec::new());
        }
        let pairs = self.pairs(subject)?;
        let tables = self.tables();

        let adjoining: Vec<&str> = pairs
            .par_iter()
            .filter(|(p, o)| is_adjoining_predicate(p) && !tables.is_cvt(o))
            .map(|(p, _)| p.as_str())
            .collect();
        let cvt_hops: Vec<(&str, &str)> = pairs
            .par_iter()
            .filter(|(p, o)| tables.is_cvt(o) && is_cvt_hop_predicate(p))
            .map(|(p, o)| (p.as_str(), o.as_str()))
            .collect();
        let hop_predicates: Vec<&str> = cvt_hops.iter().map(|&(p, _)| p).collect();

        let mut adjoining_counts = count_by_key(&adjoining);
        let mut hop_counts = count_by_key(&hop_predicates);

        let conflicts: Vec<&str> = adjoining_counts
            .keys()
            .filter(|p| hop_counts.contains_key(*p))
            .copied()
            .collect();
        for predicate in conflicts {
            let adjoining_n = adjoining_counts[predicate];
            let hop_n = hop_counts[predicate];
            if adjoining_n > hop_n {
                hop_counts.remove(predicate);
            } else if adjoining_n < hop_n {
                adjoining_counts.remove(predicate);
            } else {
                tracing::warn!(
                    subject,
                    predicate,
                    count = adjoining_n,
                    "cannot resolve adjoining/CVT predicate conflict; dropping it"
                );
                adjoining_counts.remove(predicate);
                hop_counts.remove(predicate);
            }
        }

        let through_cvts: Vec<Vec<String>> = cvt_hops
            .par_iter()
            .filter(|(p, _)| hop_counts.contains_key(p))
            .map(|&(outer, cvt)| -> Result<Vec<String>> {
                let inner: BTreeSet<String> = self
                    .pairs(cvt)?
                    .into_iter()
                    .map(|(p, _)| p)
                    .filter(|p| !CVT_INNER_EXCLUDED.contains(&p.as_str()))
                    .collect();
                Ok(inner.into_iter().map(|p| format!("{outer} {p}")).collect())
            })
            .collect::<Result<_>>()?;

        let mut all: BTreeSet<String> = adjoining
            .iter()
            .filter(|p| adjoining_counts.contains_key(*p))
            .map(|p| p.to_string())
            .collect();
        all.extend(through_cvts.into_iter().flatten());
        Ok(all.into_iter().collect())
    }

    /// Every object sequence that follows `chain` exactly from `start`.
    ///
    /// Objects are matched on raw triples, without classification. `None` for
    /// an empty chain or when no full path exists; branches that dead-end are
    /// dropped.
    pub fn chain<S: AsRef<str>>(&self, start: &str, chain: &[S]) -> Result<Option<Vec<Vec<String>>>> {
        let Some((first, rest)) = chain.split_first() else {
            return Ok(None);
        };
        let first = first.as_ref();
        let objects: Vec<String> = self
            .pairs(start)?
            .into_iter()
            .filter(|(p, _)| p == first)
            .map(|(_, o)| o)
            .collect();
        if objects.is_empty() {
            return Ok(None);
        }
        if rest.is_empty() {
            return Ok(Some(objects.into_iter().map(|o| vec![o]).collect()));
        }

        let mut sequences = Vec::new();
        for object in objects {
            let Some(tails) = self.chain(&object, rest)? else {
                continue;
            };
            for tail in tails {
                let mut sequence = Vec::with_capacity(tail.len() + 1);
                sequence.push(object.clone());
                sequence.extend(tail);
                sequences.push(sequence);
            }
        }
        Ok((!sequences.is_empty()).then_some(sequences))
    }

    /// Names for each MID, `""` when unknown.
    pub fn entity_names<S: AsRef<str>>(&self, mids: &[S]) -> Vec<String> {
        mids.iter()
            .map(|mid| {
                self.tables()
                    .names
                    .get(mid.as_ref())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}

// ============================================================================
// Service boundary
// ============================================================================

/// The five query operations over a shared store. Failures are logged and
/// reported as empty results; nothing here returns an error.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<Store>,
}

fn recover<T>(operation: &str, subject: &str, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|err| {
        tracing::error!(operation, subject, error = %err, "query failed");
        fallback
    })
}

impl QueryService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn get_outbound_predicates(&self, subject: &str) -> Vec<String> {
        tracing::debug!(subject, "GetOutboundPredicates");
        recover(
            "GetOutboundPredicates",
            subject,
            self.store.outbound_predicates(subject),
            Vec::new(),
        )
    }

    pub fn get_entity_names(&self, mids: &[String]) -> Vec<String> {
        tracing::debug!(count = mids.len(), "GetEntityNames");
        self.store.entity_names(mids)
    }

    pub fn get_simple_object_predicates_and_cvts(
        &self,
        subject: &str,
        max_per_predicate: Option<usize>,
        follow_cvt: bool,
    ) -> Option<Subgraph> {
        tracing::debug!(subject, ?max_per_predicate, follow_cvt, "GetSimpleObjectPredicatesAndCVTs");
        recover(
            "GetSimpleObjectPredicatesAndCVTs",
            subject,
            self.store
                .neighborhood(subject, max_per_predicate, follow_cvt)
                .map(Some),
            None,
        )
    }

    pub fn get_simple_object_filtered_predicate_and_objects(
        &self,
        subject: &str,
        predicate: &str,
    ) -> Option<Subgraph> {
        tracing::debug!(subject, predicate, "GetSimpleObjectFilteredPredicateAndObjects");
        recover(
            "GetSimpleObjectFilteredPredicateAndObjects",
            subject,
            self.store.filtered(subject, predicate),
            None,
        )
    }

    pub fn find_node_sequences_on_predicate_chain(
        &self,
        subject: &str,
        chain: &[String],
    ) -> Option<Vec<Vec<String>>> {
        tracing::debug!(subject, chain = %chain.join(" "), "FindNodeSequencesOnPredicateChain");
        recover(
            "FindNodeSequencesOnPredicateChain",
            subject,
            self.store.chain(subject, chain),
            None,
        )
    }
}
