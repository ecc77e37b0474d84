//! Cut-set enumeration
//!
//! Structural AND/OR combination of leaf identifiers. Numeric attributes are
//! ignored. [`cut_sets`] returns the raw combination family: exact duplicates
//! collapse because the family is a set of sets, but supersets are kept.
//! Callers that want minimal cut sets apply [`minimize`] explicitly.
//!
//! Nodes are combined in post order with an explicit stack, so deep graphs
//! do not grow the call stack.
//!
//! Enumeration is exponential in the number of AND-combined alternatives.
//! Large families are reported through `log::warn!`, never truncated.

use crate::config::EngineConfig;
use crate::graph::{GateType, NodeGraph, NodeId};
use crate::{EngineError, EngineResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Leaf ids whose joint occurrence implies the analysed node
pub type CutSet = BTreeSet<NodeId>;

/// Set of cut sets
pub type CutSetFamily = BTreeSet<CutSet>;

/// Cut sets of `id` with the default configuration
pub fn cut_sets(graph: &NodeGraph, id: NodeId) -> EngineResult<CutSetFamily> {
    cut_sets_with(graph, id, &EngineConfig::default())
}

/// Cut sets of `id`.
///
/// - a node without children yields `{{id}}`, clones resolving to their primary
/// - AND combines one set from each child in every possible way
/// - OR passes every child's sets through unchanged
pub fn cut_sets_with(
    graph: &NodeGraph,
    id: NodeId,
    config: &EngineConfig,
) -> EngineResult<CutSetFamily> {
    let mut memo: HashMap<NodeId, CutSetFamily> = HashMap::new();
    for primary in graph.post_order(id, |_| false)? {
        let family = family_below(graph, &memo, primary)?;
        memo.insert(primary, family);
    }
    let family = memo.remove(&graph.primary_of(id)?).unwrap_or_default();
    if family.len() > config.cut_set_warning_threshold {
        log::warn!(
            "{} produced {} cut sets (warning threshold {})",
            id,
            family.len(),
            config.cut_set_warning_threshold
        );
    }
    Ok(family)
}

/// Family of one primary whose children are all in `memo`
fn family_below(
    graph: &NodeGraph,
    memo: &HashMap<NodeId, CutSetFamily>,
    primary: NodeId,
) -> EngineResult<CutSetFamily> {
    let node = graph.node(primary)?;
    if node.children().is_empty() {
        return Ok(CutSetFamily::from([CutSet::from([primary])]));
    }

    let gate = node.kind().gate_type().unwrap_or_default();
    let mut family = match gate {
        GateType::And => CutSetFamily::from([CutSet::new()]),
        GateType::Or => CutSetFamily::new(),
    };
    for &child in node.children() {
        let child = graph.primary_of(child)?;
        let Some(child_family) = memo.get(&child) else {
            return Err(EngineError::UnknownNode(child));
        };
        family = match gate {
            GateType::And => and_combine(&family, child_family),
            GateType::Or => family.into_iter().chain(child_family.iter().cloned()).collect(),
        };
    }
    Ok(family)
}

/// Every union of one set from `left` with one set from `right`
fn and_combine(left: &CutSetFamily, right: &CutSetFamily) -> CutSetFamily {
    let mut combined = CutSetFamily::new();
    for a in left {
        for b in right {
            combined.insert(a.union(b).copied().collect());
        }
    }
    combined
}

/// Drop every set that contains another set of the family
pub fn minimize(family: &CutSetFamily) -> CutSetFamily {
    let mut by_order: Vec<&CutSet> = family.iter().collect();
    by_order.sort_by_key(|set| set.len());

    let mut minimal: Vec<&CutSet> = Vec::new();
    for set in by_order {
        if !minimal.iter().any(|kept| kept.is_subset(set)) {
            minimal.push(set);
        }
    }
    minimal.into_iter().cloned().collect()
}

/// One cut set with resolved event names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSetEntry {
    pub events: Vec<NodeId>,
    /// Names of the events (for reports)
    pub event_names: Vec<String>,
    /// Number of events
    pub order: usize,
}

impl CutSetEntry {
    /// Check if this cut set is a single-point failure (order 1)
    pub fn is_single_point(&self) -> bool {
        self.order == 1
    }

    pub fn contains_event(&self, id: NodeId) -> bool {
        self.events.contains(&id)
    }
}

/// Summary of a cut-set family
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CutSetAnalysis {
    /// Cut sets, lowest order first
    pub cut_sets: Vec<CutSetEntry>,
    /// Number of cut sets by order
    pub cut_sets_by_order: IndexMap<usize, usize>,
    /// Order-1 cut sets
    pub single_point_failures: Vec<CutSetEntry>,
}

impl CutSetAnalysis {
    /// Summarize a family, resolving event names through the graph
    pub fn from_family(graph: &NodeGraph, family: &CutSetFamily) -> EngineResult<Self> {
        let mut cut_sets = Vec::with_capacity(family.len());
        for set in family {
            let mut event_names = Vec::with_capacity(set.len());
            for &event in set {
                event_names.push(graph.node(event)?.name().to_string());
            }
            cut_sets.push(CutSetEntry {
                events: set.iter().copied().collect(),
                event_names,
                order: set.len(),
            });
        }
        cut_sets.sort_by_key(|cs| cs.order);

        let mut analysis = Self::default();
        for cs in &cut_sets {
            *analysis.cut_sets_by_order.entry(cs.order).or_insert(0) += 1;
        }
        analysis.single_point_failures = cut_sets
            .iter()
            .filter(|cs| cs.is_single_point())
            .cloned()
            .collect();
        analysis.cut_sets = cut_sets;
        Ok(analysis)
    }

    /// Get maximum cut set order
    pub fn max_order(&self) -> usize {
        self.cut_sets.iter().map(|cs| cs.order).max().unwrap_or(0)
    }

    /// Get total number of cut sets
    pub fn total_cut_sets(&self) -> usize {
        self.cut_sets.len()
    }
}

/// Enumerate and summarize the cut sets of one node
pub fn analyze(graph: &NodeGraph, id: NodeId) -> EngineResult<CutSetAnalysis> {
    let family = cut_sets(graph, id)?;
    let analysis = CutSetAnalysis::from_family(graph, &family)?;
    log::debug!(
        "{}: {} cut sets, max order {}, {} single-point",
        id,
        analysis.total_cut_sets(),
        analysis.max_order(),
        analysis.single_point_failures.len()
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FaultType, NodeKind};

    fn event(graph: &mut NodeGraph, name: &str) -> NodeId {
        graph
            .create_named(name, NodeKind::basic_event(10.0, 0.0, FaultType::Permanent))
            .unwrap()
    }

    fn gate_over(graph: &mut NodeGraph, gate: GateType, children: &[NodeId]) -> NodeId {
        let id = graph.create(NodeKind::gate(gate)).unwrap();
        for &child in children {
            graph.attach_child(id, child).unwrap();
        }
        id
    }

    fn set(ids: &[NodeId]) -> CutSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_leaf_cut_set() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        assert_eq!(cut_sets(&graph, a).unwrap(), CutSetFamily::from([set(&[a])]));
    }

    #[test]
    fn test_and_gate() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        let gate = gate_over(&mut graph, GateType::And, &[a, b]);
        assert_eq!(
            cut_sets(&graph, gate).unwrap(),
            CutSetFamily::from([set(&[a, b])])
        );
    }

    #[test]
    fn test_or_gate() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        let gate = gate_over(&mut graph, GateType::Or, &[a, b]);
        assert_eq!(
            cut_sets(&graph, gate).unwrap(),
            CutSetFamily::from([set(&[a]), set(&[b])])
        );
    }

    #[test]
    fn test_nested_and_of_ors() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        let c = event(&mut graph, "C");
        let left = gate_over(&mut graph, GateType::Or, &[a, b]);
        let right = gate_over(&mut graph, GateType::Or, &[b, c]);
        let top = graph.create(NodeKind::top_event(3)).unwrap();
        graph.attach_child(top, left).unwrap();
        graph.attach_child(top, right).unwrap();

        let family = cut_sets(&graph, top).unwrap();
        let expected = CutSetFamily::from([
            set(&[a, b]),
            set(&[a, c]),
            set(&[b]),
            set(&[b, c]),
        ]);
        assert_eq!(family, expected);

        // {B} absorbs its supersets only when asked
        assert_eq!(
            minimize(&family),
            CutSetFamily::from([set(&[b]), set(&[a, c])])
        );
    }

    #[test]
    fn test_clone_resolves_to_primary() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "A");
        let b = event(&mut graph, "B");
        let a_clone = graph.clone_of(a).unwrap();
        let gate = gate_over(&mut graph, GateType::And, &[a_clone, b]);

        assert_eq!(cut_sets(&graph, a_clone).unwrap(), CutSetFamily::from([set(&[a])]));
        assert_eq!(
            cut_sets(&graph, gate).unwrap(),
            CutSetFamily::from([set(&[a, b])])
        );
    }

    #[test]
    fn test_empty_gate_is_a_leaf() {
        let mut graph = NodeGraph::new();
        let gate = graph.create(NodeKind::gate(GateType::Or)).unwrap();
        assert_eq!(
            cut_sets(&graph, gate).unwrap(),
            CutSetFamily::from([set(&[gate])])
        );
    }

    #[test]
    fn test_unknown_node() {
        let graph = NodeGraph::new();
        assert_eq!(
            cut_sets(&graph, NodeId(42)),
            Err(EngineError::UnknownNode(NodeId(42)))
        );
    }

    #[test]
    fn test_cut_set_analysis() {
        let mut graph = NodeGraph::new();
        let a = event(&mut graph, "Sensor stuck");
        let b = event(&mut graph, "ECU reset");
        let c = event(&mut graph, "Watchdog missed");
        let and = gate_over(&mut graph, GateType::And, &[b, c]);
        let top = gate_over(&mut graph, GateType::Or, &[a, and]);

        let analysis = analyze(&graph, top).unwrap();
        assert_eq!(analysis.total_cut_sets(), 2);
        assert_eq!(analysis.max_order(), 2);
        assert_eq!(analysis.cut_sets_by_order.get(&1), Some(&1));
        assert_eq!(analysis.cut_sets_by_order.get(&2), Some(&1));
        assert_eq!(analysis.single_point_failures.len(), 1);
        assert_eq!(analysis.single_point_failures[0].event_names, vec!["Sensor stuck"]);
        assert!(analysis.cut_sets[1].contains_event(c));
    }
}
