//! Assurance propagation
//!
//! Bottom-up evaluation of Prototype Assurance Levels over a [`NodeGraph`].
//! One call to [`evaluate_levels`] is one pass: every node is resolved at
//! most once, through a memo table that lives only for that call.
//!
//! Nodes are resolved in the post order of [`NodeGraph::post_order`], so
//! graph depth never grows the call stack.
//!
//! Per node:
//! - leaf inputs contribute their `quant_value`, clamped to [1, 5]
//! - gates and top events discretize their children's levels and fold them
//!   with the AND table or the OR mean, optionally combined with a direct
//!   confidence/robustness rating
//! - severity-bearing nodes are then pulled towards the relevant severity
//!
//! Basic events and gates without any rated input are *unrated* and do not
//! take part in their parents' folds.

use crate::config::EngineConfig;
use crate::graph::{Derived, GateType, NodeGraph, NodeId, NodeKind};
use crate::scores::{self, DecompositionGuidance};
use crate::{EngineError, EngineResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where the severity used by the adjustment step comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityScope {
    /// Highest severity among the node's immediate parents
    #[default]
    Parents,
    /// Highest severity among top events sharing the node's hazard
    Hazard,
}

/// Resolved level of one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeLevel {
    pub node: NodeId,
    /// Continuous level in [1, 5]
    pub level: f64,
    /// Discretized PAL
    pub pal: u8,
}

/// Subgraph skipped because of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortedSubgraph {
    /// Root whose evaluation was abandoned
    pub root: NodeId,
    /// Node at which the cycle was found
    pub cycle_at: NodeId,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelReport {
    /// Rated nodes, clones included, in graph order
    pub levels: IndexMap<NodeId, NodeLevel>,
    /// Nodes without any rated input
    pub unrated: Vec<NodeId>,
    pub aborted: Vec<AbortedSubgraph>,
}

impl LevelReport {
    pub fn get(&self, id: NodeId) -> Option<&NodeLevel> {
        self.levels.get(&id)
    }

    pub fn pal(&self, id: NodeId) -> Option<u8> {
        self.levels.get(&id).map(|l| l.pal)
    }

    /// True when no subgraph was aborted
    pub fn is_complete(&self) -> bool {
        self.aborted.is_empty()
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidInput(format!("level report export failed: {}", e)))
    }
}

/// Severity adjustment applied to a severity-bearing node.
///
/// `(aggregated + highest_severity) / 2` in general,
/// `2 * aggregated - own_severity` for vehicle-level functions. The result
/// is clamped to [1, 5].
pub fn adjust_for_severity(
    aggregated: f64,
    own_severity: u8,
    highest_severity: Option<u8>,
    vehicle_level: bool,
) -> f64 {
    let level = if vehicle_level {
        2.0 * aggregated - f64::from(own_severity)
    } else {
        let severity = highest_severity.unwrap_or(own_severity);
        (aggregated + f64::from(severity)) / 2.0
    };
    scores::clamp_level(level)
}

/// Combine rated child levels and an optional direct base level under one
/// gate. Returns `None` when there is nothing to combine.
pub fn combine_levels(
    gate: GateType,
    child_levels: &[f64],
    direct_base: Option<u8>,
) -> EngineResult<Option<f64>> {
    let pals: Vec<u8> = child_levels.iter().map(|&l| scores::discretize(l)).collect();
    let from_children = match gate {
        GateType::And => scores::and_fold(&pals)?.map(f64::from),
        GateType::Or => {
            let values: Vec<f64> = pals.iter().map(|&p| f64::from(p)).collect();
            scores::or_fold(&values)?
        }
    };

    match (from_children, direct_base.map(f64::from)) {
        (None, direct) => Ok(direct),
        (Some(children), None) => Ok(Some(children)),
        (Some(children), Some(direct)) => {
            let combined = match gate {
                GateType::And => scores::complement_product(&[children, direct])?,
                GateType::Or => scores::or_aggregate(children, direct)?,
            };
            Ok(Some(combined))
        }
    }
}

/// One evaluation pass. Dropped at the end of the call.
struct Pass<'a> {
    graph: &'a NodeGraph,
    config: &'a EngineConfig,
    /// hazard -> highest severity of the top events naming it
    hazard_severity: HashMap<String, u8>,
    memo: HashMap<NodeId, Option<f64>>,
}

impl<'a> Pass<'a> {
    fn new(graph: &'a NodeGraph, config: &'a EngineConfig) -> Self {
        let mut hazard_severity: HashMap<String, u8> = HashMap::new();
        for node in graph.nodes().filter(|n| n.is_primary()) {
            if let NodeKind::TopEvent(top) = node.kind() {
                if let Some(hazard) = &top.hazard {
                    let entry = hazard_severity.entry(hazard.clone()).or_insert(top.severity);
                    *entry = (*entry).max(top.severity);
                }
            }
        }
        Self {
            graph,
            config,
            hazard_severity,
            memo: HashMap::new(),
        }
    }

    /// Resolve `id` and everything below it that is not memoized yet. On a
    /// cycle nothing from this walk is memoized.
    fn level_of(&mut self, id: NodeId) -> EngineResult<Option<f64>> {
        let order = self
            .graph
            .post_order(id, |primary| self.memo.contains_key(&primary))?;
        for primary in order {
            let level = self.compute(primary)?;
            self.memo.insert(primary, level);
        }
        let primary = self.graph.primary_of(id)?;
        Ok(self.memo.get(&primary).copied().flatten())
    }

    /// Level of one primary whose children are all memoized
    fn compute(&self, primary: NodeId) -> EngineResult<Option<f64>> {
        let graph = self.graph;
        let node = graph.node(primary)?;
        let kind = node.kind();
        match kind {
            NodeKind::LeafInput { quant_value, .. } => {
                let level = scores::clamp_level(*quant_value);
                if level != *quant_value {
                    log::warn!("{} has quant_value {} outside [1, 5]", primary, quant_value);
                }
                Ok(Some(level))
            }
            NodeKind::BasicEvent(_) => Ok(None),
            NodeKind::Gate { .. } | NodeKind::TopEvent(_) => {
                let mut child_levels = Vec::with_capacity(node.children().len());
                for &child in node.children() {
                    let child = graph.primary_of(child)?;
                    if let Some(level) = self.memo.get(&child).copied().flatten() {
                        child_levels.push(level);
                    }
                }

                let direct_base = match kind.direct_rating() {
                    Some(d) => Some(scores::base_from_confidence_robustness(
                        d.confidence,
                        d.robustness,
                    )?),
                    None => None,
                };
                let gate = kind.gate_type().unwrap_or_default();
                let Some(aggregated) = combine_levels(gate, &child_levels, direct_base)? else {
                    return Ok(None);
                };

                let Some(own_severity) = kind.severity() else {
                    return Ok(Some(aggregated));
                };
                let vehicle_level = matches!(kind, NodeKind::TopEvent(top) if top.vehicle_level);
                let highest = self.highest_severity(primary)?;
                Ok(Some(adjust_for_severity(
                    aggregated,
                    own_severity,
                    highest,
                    vehicle_level,
                )))
            }
        }
    }

    /// Severity the adjustment pulls towards, `None` when only the node's own
    /// severity applies
    fn highest_severity(&self, primary: NodeId) -> EngineResult<Option<u8>> {
        let node = self.graph.node(primary)?;
        if self.config.severity_scope == SeverityScope::Hazard {
            if let NodeKind::TopEvent(top) = node.kind() {
                if let Some(hazard) = &top.hazard {
                    return Ok(self.hazard_severity.get(hazard).copied());
                }
            }
        }

        let mut highest = None;
        for position in self.graph.positions_of(primary) {
            for &parent in self.graph.node(position)?.parents() {
                if let Some(severity) = self.graph.resolved(parent)?.kind().severity() {
                    highest = highest.max(Some(severity));
                }
            }
        }
        Ok(highest)
    }
}

/// Evaluate every top event, then every node not below one. A cycle aborts
/// only the subgraph it was found in; it is listed in
/// [`LevelReport::aborted`] and the remaining subgraphs still resolve.
///
/// Derived level and PAL are written back onto every node, clones included.
pub fn evaluate_levels(graph: &mut NodeGraph) -> EngineResult<LevelReport> {
    evaluate_levels_with(graph, &EngineConfig::default())
}

/// [`evaluate_levels`] with explicit configuration
pub fn evaluate_levels_with(
    graph: &mut NodeGraph,
    config: &EngineConfig,
) -> EngineResult<LevelReport> {
    log::debug!("Starting evaluation pass over {} nodes", graph.len());

    let mut roots = graph.top_events();
    roots.extend(
        graph
            .nodes()
            .filter(|n| n.is_primary() && !matches!(n.kind(), NodeKind::TopEvent(_)))
            .map(|n| n.id()),
    );

    let mut aborted = Vec::new();
    let memo = {
        let mut pass = Pass::new(graph, config);
        for root in roots {
            if pass.memo.contains_key(&root) {
                continue;
            }
            match pass.level_of(root) {
                Ok(_) => {}
                Err(EngineError::CycleDetected { node }) => {
                    log::warn!("Evaluation of {} aborted: cycle at {}", root, node);
                    aborted.push(AbortedSubgraph {
                        root,
                        cycle_at: node,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        pass.memo
    };

    let mut report = LevelReport {
        aborted,
        ..LevelReport::default()
    };
    let ids: Vec<NodeId> = graph.nodes().map(|n| n.id()).collect();
    for id in ids {
        let primary = graph.primary_of(id)?;
        let derived = match memo.get(&primary).copied().flatten() {
            Some(level) => {
                let pal = scores::discretize(level);
                report.levels.insert(
                    id,
                    NodeLevel {
                        node: id,
                        level,
                        pal,
                    },
                );
                Derived {
                    level: Some(level),
                    pal: Some(pal),
                }
            }
            None => {
                if memo.contains_key(&primary) {
                    report.unrated.push(id);
                }
                Derived::default()
            }
        };
        graph.set_derived(id, derived)?;
    }

    log::info!(
        "Evaluation pass complete: {} rated, {} unrated, {} aborted",
        report.levels.len(),
        report.unrated.len(),
        report.aborted.len()
    );
    Ok(report)
}

/// Evaluate the subgraph below one node and write its derived values back.
///
/// Returns `Ok(None)` for unrated nodes. A cycle is returned as
/// [`EngineError::CycleDetected`].
pub fn evaluate_node(graph: &mut NodeGraph, id: NodeId) -> EngineResult<Option<NodeLevel>> {
    evaluate_node_with(graph, id, &EngineConfig::default())
}

/// [`evaluate_node`] with explicit configuration
pub fn evaluate_node_with(
    graph: &mut NodeGraph,
    id: NodeId,
    config: &EngineConfig,
) -> EngineResult<Option<NodeLevel>> {
    let memo = {
        let mut pass = Pass::new(graph, config);
        pass.level_of(id)?;
        pass.memo
    };

    for (&primary, &level) in &memo {
        let derived = match level {
            Some(level) => Derived {
                level: Some(level),
                pal: Some(scores::discretize(level)),
            },
            None => Derived::default(),
        };
        let positions: Vec<NodeId> = graph.positions_of(primary).collect();
        for position in positions {
            graph.set_derived(position, derived)?;
        }
    }

    let primary = graph.primary_of(id)?;
    Ok(memo.get(&primary).copied().flatten().map(|level| NodeLevel {
        node: id,
        level,
        pal: scores::discretize(level),
    }))
}

/// Decomposition hints for the children of an evaluated node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildTargetHints {
    pub node: NodeId,
    /// PAL the hints were derived from
    pub pal: u8,
    pub gate_type: GateType,
    pub range: DecompositionGuidance,
    /// Two-child splits that aggregate back to `pal`
    pub pairs: Vec<(u8, u8)>,
    pub children: Vec<NodeId>,
}

/// Advisory child targets for a gate or top event, based on the PAL written
/// by the last evaluation. Nothing is enforced on the children.
pub fn child_target_hints(graph: &NodeGraph, id: NodeId) -> EngineResult<ChildTargetHints> {
    let node = graph.resolved(id)?;
    let Some(gate_type) = node.kind().gate_type() else {
        return Err(EngineError::InvalidInput(format!(
            "{} is a {} and has no children to allocate",
            id,
            node.kind().name()
        )));
    };
    let Some(pal) = node.derived().pal else {
        return Err(EngineError::InvalidInput(format!("{} has no evaluated PAL", id)));
    };

    Ok(ChildTargetHints {
        node: id,
        pal,
        gate_type,
        range: scores::decomposition_targets(pal)?,
        pairs: scores::decomposition_for_gate(pal, gate_type)?,
        children: node.children().to_vec(),
    })
}
