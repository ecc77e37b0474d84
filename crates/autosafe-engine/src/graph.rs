//! Node graph model for assurance, fault tree and FMEDA analysis
//!
//! The graph is a DAG of [`Node`]s. A node may have several parents, and one
//! logical entity may appear at several places in the hierarchy: the
//! *primary* instance owns the semantic attributes, while every *clone*
//! mirrors them and owns only its placement and parent edges.
//!
//! Key rules:
//! - ids come from the graph's [`IdAllocator`] and are never reused until
//!   [`NodeGraph::reset`]
//! - clones never own children; a clone's subtree is its primary's subtree
//! - attribute edits on a clone are redirected to its primary, and clones
//!   pick the edit up when the editor calls [`NodeGraph::sync_from_primary`]
//! - attaching a child that is already an ancestor of the parent is rejected

use crate::asil::AsilLevel;
use crate::scores::{MAX_LEVEL, MIN_LEVEL};
use crate::{EngineError, EngineResult};
use indexmap::{IndexMap, IndexSet};
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Unique identifier for graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {}", self.0)
    }
}

/// Monotonic id counter owned by one [`NodeGraph`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Create a counter starting at id 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Hand out the next id
    pub fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Make sure `id` is never handed out again
    pub fn observe(&mut self, id: NodeId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }

    /// Restart numbering for a new model
    pub fn reset(&mut self) {
        self.next = 1;
    }

    /// Id that the next call to [`IdAllocator::allocate`] returns
    pub fn peek(&self) -> NodeId {
        NodeId(self.next)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate semantics for combining child events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateType {
    /// All inputs must occur
    #[default]
    And,
    /// Any input occurring is enough
    Or,
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateType::And => write!(f, "AND"),
            GateType::Or => write!(f, "OR"),
        }
    }
}

/// Which rating a leaf input carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    /// Confidence in the prototype
    Confidence,
    /// Robustness of the prototype
    Robustness,
}

/// Permanence of a failure mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    /// Contributes to the single point fault metric
    #[default]
    Permanent,
    /// Contributes to the latent fault metric
    Transient,
}

/// How a basic event's FIT turns into a failure probability over the
/// mission time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityModel {
    /// `λτ`
    #[default]
    Linear,
    /// `1 − e^(−λτ)`
    Exponential,
    /// The event's `failure_prob` as given
    Constant,
}

/// Confidence and robustness levels carried directly on a gate or top event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectRating {
    /// Confidence level, 1–5
    pub confidence: u8,
    /// Robustness level, 1–5
    pub robustness: u8,
}

/// FMEDA data attached to a basic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmedaAttributes {
    /// Physical component this failure mode belongs to
    #[serde(default)]
    pub component: Option<String>,
    /// Failure rate in FIT, used when no component FIT is known
    #[serde(default)]
    pub fit_rate: f64,
    /// Diagnostic coverage, 0–1
    #[serde(default)]
    pub diag_coverage: f64,
    /// Fault permanence
    #[serde(default)]
    pub fault_type: FaultType,
    /// Share of the component FIT, 0–1 (values above 1 are percentages)
    #[serde(default)]
    pub fault_fraction: f64,
    /// Safety goal used when the event is not below any top event
    #[serde(default)]
    pub safety_goal: Option<String>,
    #[serde(default)]
    pub prob_model: ProbabilityModel,
    /// Failure probability used by [`ProbabilityModel::Constant`]
    #[serde(default)]
    pub failure_prob: f64,
}

impl Default for FmedaAttributes {
    fn default() -> Self {
        Self {
            component: None,
            fit_rate: 0.0,
            diag_coverage: 0.0,
            fault_type: FaultType::Permanent,
            fault_fraction: 0.0,
            safety_goal: None,
            prob_model: ProbabilityModel::Linear,
            failure_prob: 0.0,
        }
    }
}

/// Attributes of a top event (safety goal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEventAttributes {
    /// How the children combine
    #[serde(default)]
    pub gate_type: GateType,
    /// Severity, 1–3
    pub severity: u8,
    /// Controllability, 1–3
    pub controllability: u8,
    /// Exposure, 1–4
    pub exposure: u8,
    /// Vehicle level function: `level = 2 * aggregated - severity`
    #[serde(default)]
    pub vehicle_level: bool,
    /// Safety goal name for FMEDA grouping
    #[serde(default)]
    pub safety_goal: Option<String>,
    /// ASIL assigned by the hazard analysis; derived from S/C/E if absent
    #[serde(default)]
    pub asil: Option<AsilLevel>,
    /// Hazard shared with other top events
    #[serde(default)]
    pub hazard: Option<String>,
    /// Direct confidence/robustness rating
    #[serde(default)]
    pub direct: Option<DirectRating>,
}

impl Default for TopEventAttributes {
    fn default() -> Self {
        Self {
            gate_type: GateType::And,
            severity: 1,
            controllability: 1,
            exposure: 1,
            vehicle_level: false,
            safety_goal: None,
            asil: None,
            hazard: None,
            direct: None,
        }
    }
}

impl TopEventAttributes {
    /// Explicit ASIL, or the risk graph result for the S/C/E ratings
    pub fn effective_asil(&self) -> EngineResult<AsilLevel> {
        match self.asil {
            Some(asil) => Ok(asil),
            None => crate::asil::determine_asil(self.severity, self.controllability, self.exposure),
        }
    }
}

/// Role of a node, with the attributes that role carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Confidence or robustness rating
    LeafInput {
        /// Continuous rating, 1.0–5.0
        quant_value: f64,
        /// Rating kind
        input: InputKind,
    },
    /// Failure mode
    BasicEvent(FmedaAttributes),
    /// Intermediate AND/OR aggregator
    Gate {
        /// How the children combine
        #[serde(default)]
        gate_type: GateType,
        /// Direct confidence/robustness rating
        #[serde(default)]
        direct: Option<DirectRating>,
        /// Severity, 1–3, for severity-bearing gates
        #[serde(default)]
        severity: Option<u8>,
    },
    /// Safety goal
    TopEvent(TopEventAttributes),
}

impl NodeKind {
    /// Leaf input with the given rating
    pub fn leaf_input(quant_value: f64, input: InputKind) -> Self {
        NodeKind::LeafInput { quant_value, input }
    }

    /// Gate without direct rating or severity
    pub fn gate(gate_type: GateType) -> Self {
        NodeKind::Gate {
            gate_type,
            direct: None,
            severity: None,
        }
    }

    /// Top event with the given severity and default ratings otherwise
    pub fn top_event(severity: u8) -> Self {
        NodeKind::TopEvent(TopEventAttributes {
            severity,
            ..TopEventAttributes::default()
        })
    }

    /// Basic event with an own FIT value
    pub fn basic_event(fit_rate: f64, diag_coverage: f64, fault_type: FaultType) -> Self {
        NodeKind::BasicEvent(FmedaAttributes {
            fit_rate,
            diag_coverage,
            fault_type,
            ..FmedaAttributes::default()
        })
    }

    /// Short name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::LeafInput { .. } => "leaf input",
            NodeKind::BasicEvent(_) => "basic event",
            NodeKind::Gate { .. } => "gate",
            NodeKind::TopEvent(_) => "top event",
        }
    }

    /// Gates and top events combine children; the other kinds are leaves
    pub fn accepts_children(&self) -> bool {
        matches!(self, NodeKind::Gate { .. } | NodeKind::TopEvent(_))
    }

    /// Gate semantics, for gate and top-event nodes
    pub fn gate_type(&self) -> Option<GateType> {
        match self {
            NodeKind::Gate { gate_type, .. } => Some(*gate_type),
            NodeKind::TopEvent(top) => Some(top.gate_type),
            _ => None,
        }
    }

    /// Severity, for severity-bearing nodes
    pub fn severity(&self) -> Option<u8> {
        match self {
            NodeKind::Gate { severity, .. } => *severity,
            NodeKind::TopEvent(top) => Some(top.severity),
            _ => None,
        }
    }

    /// Direct confidence/robustness rating, if any
    pub fn direct_rating(&self) -> Option<DirectRating> {
        match self {
            NodeKind::Gate { direct, .. } => *direct,
            NodeKind::TopEvent(top) => top.direct,
            _ => None,
        }
    }

    /// FMEDA attributes, for basic events
    pub fn fmeda(&self) -> Option<&FmedaAttributes> {
        match self {
            NodeKind::BasicEvent(fmeda) => Some(fmeda),
            _ => None,
        }
    }

    /// Check every rating against its allowed range
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            NodeKind::LeafInput { quant_value, .. } => {
                let range = f64::from(MIN_LEVEL)..=f64::from(MAX_LEVEL);
                if !range.contains(quant_value) {
                    return Err(EngineError::InvalidInput(format!(
                        "quant_value {} outside [{}, {}]",
                        quant_value, MIN_LEVEL, MAX_LEVEL
                    )));
                }
            }
            NodeKind::BasicEvent(fmeda) => {
                if !fmeda.fit_rate.is_finite() || fmeda.fit_rate < 0.0 {
                    return Err(EngineError::InvalidInput(format!(
                        "fit_rate {} must be a non-negative number",
                        fmeda.fit_rate
                    )));
                }
                if !(0.0..=1.0).contains(&fmeda.diag_coverage) {
                    return Err(EngineError::InvalidInput(format!(
                        "diag_coverage {} outside [0, 1]",
                        fmeda.diag_coverage
                    )));
                }
                if !(0.0..=100.0).contains(&fmeda.fault_fraction) {
                    return Err(EngineError::InvalidInput(format!(
                        "fault_fraction {} outside [0, 1] (or [0, 100] as a percentage)",
                        fmeda.fault_fraction
                    )));
                }
                if !(0.0..=1.0).contains(&fmeda.failure_prob) {
                    return Err(EngineError::InvalidInput(format!(
                        "failure_prob {} outside [0, 1]",
                        fmeda.failure_prob
                    )));
                }
            }
            NodeKind::Gate {
                direct, severity, ..
            } => {
                if let Some(direct) = direct {
                    check_direct(direct)?;
                }
                if let Some(severity) = severity {
                    check_rating("severity", *severity, 3)?;
                }
            }
            NodeKind::TopEvent(top) => {
                check_rating("severity", top.severity, 3)?;
                check_rating("controllability", top.controllability, 3)?;
                check_rating("exposure", top.exposure, 4)?;
                if let Some(direct) = &top.direct {
                    check_direct(direct)?;
                }
            }
        }
        Ok(())
    }
}

fn check_rating(name: &str, value: u8, max: u8) -> EngineResult<()> {
    if value == 0 || value > max {
        return Err(EngineError::InvalidInput(format!(
            "{} {} outside 1..={}",
            name, value, max
        )));
    }
    Ok(())
}

fn check_direct(direct: &DirectRating) -> EngineResult<()> {
    check_rating("confidence level", direct.confidence, MAX_LEVEL)?;
    check_rating("robustness level", direct.robustness, MAX_LEVEL)
}

/// Semantic attributes owned by the primary instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// User-visible name
    #[serde(default)]
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Role and role-specific values
    pub kind: NodeKind,
}

impl NodeAttributes {
    /// Unnamed attributes of the given kind
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            kind,
        }
    }
}

/// Canvas position; owned by each instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
}

/// Values written back by an evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    /// Continuous level, 1.0–5.0
    pub level: Option<f64>,
    /// Discretized PAL, 1–5
    pub pal: Option<u8>,
}

/// A node in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    attributes: NodeAttributes,
    #[serde(default)]
    placement: Placement,
    /// Primary this node mirrors; `None` for primary instances
    #[serde(default)]
    original: Option<NodeId>,
    #[serde(default)]
    children: Vec<NodeId>,
    /// Rebuilt from children lists by [`NodeGraph::rebuild_index`]
    #[serde(default)]
    parents: Vec<NodeId>,
    #[serde(default)]
    derived: Derived,
}

impl Node {
    /// Node as reconstructed by a host from its own storage.
    ///
    /// Parent lists are derived from children lists when the node is handed
    /// to [`NodeGraph::from_nodes`].
    pub fn restored(
        id: NodeId,
        attributes: NodeAttributes,
        original: Option<NodeId>,
        children: Vec<NodeId>,
    ) -> Self {
        Self {
            id,
            attributes,
            placement: Placement::default(),
            original,
            children,
            parents: Vec::new(),
            derived: Derived::default(),
        }
    }

    /// Set the placement of a restored node
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Semantic attributes; for clones, the copy made at the last sync
    pub fn attributes(&self) -> &NodeAttributes {
        &self.attributes
    }

    pub fn kind(&self) -> &NodeKind {
        &self.attributes.kind
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn derived(&self) -> Derived {
        self.derived
    }

    /// Primary this clone mirrors
    pub fn original(&self) -> Option<NodeId> {
        self.original
    }

    pub fn is_primary(&self) -> bool {
        self.original.is_none()
    }

    /// Leaf-input quant value, if this is a leaf input
    pub fn quant_value(&self) -> Option<f64> {
        match self.attributes.kind {
            NodeKind::LeafInput { quant_value, .. } => Some(quant_value),
            _ => None,
        }
    }
}

/// Node arena plus the clone index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    ids: IdAllocator,
    /// Node lookup by ID
    #[serde(skip)]
    node_index: IndexMap<NodeId, usize>,
    /// clone id -> primary id
    #[serde(skip)]
    clone_index: IndexMap<NodeId, NodeId>,
    /// primary id -> clone ids, in creation order
    #[serde(skip)]
    clones_by_primary: IndexMap<NodeId, Vec<NodeId>>,
}

impl NodeGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from host-reconstructed nodes.
    ///
    /// Indexes are rebuilt from the nodes themselves and the result is
    /// validated, so a cyclic or dangling structure is rejected here.
    pub fn from_nodes(nodes: Vec<Node>) -> EngineResult<Self> {
        let mut graph = Self {
            nodes,
            ids: IdAllocator::new(),
            node_index: IndexMap::new(),
            clone_index: IndexMap::new(),
            clones_by_primary: IndexMap::new(),
        };
        graph.rebuild_index()?;
        graph.validate()?;
        Ok(graph)
    }

    /// Drop every node and restart id numbering
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.node_index.clear();
        self.clone_index.clear();
        self.clones_by_primary.clear();
        self.ids.reset();
    }

    /// Count nodes (primaries and clones)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).and_then(|&idx| self.nodes.get(idx))
    }

    /// Get a node by ID or fail with [`EngineError::UnknownNode`]
    pub fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.get(id).ok_or(EngineError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        let idx = *self
            .node_index
            .get(&id)
            .ok_or(EngineError::UnknownNode(id))?;
        Ok(&mut self.nodes[idx])
    }

    /// Primary instance behind `id` (itself for primaries)
    pub fn primary_of(&self, id: NodeId) -> EngineResult<NodeId> {
        self.node(id)?;
        Ok(self.clone_index.get(&id).copied().unwrap_or(id))
    }

    /// The node holding the authoritative attributes for `id`
    pub fn resolved(&self, id: NodeId) -> EngineResult<&Node> {
        let primary = self.primary_of(id)?;
        self.node(primary)
    }

    /// Every clone of `primary`, in creation order
    pub fn clones_of(&self, primary: NodeId) -> &[NodeId] {
        self.clones_by_primary
            .get(&primary)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `primary` followed by its clones
    pub fn positions_of(&self, primary: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(primary).chain(self.clones_of(primary).iter().copied())
    }

    /// Primary top events, in creation order
    pub fn top_events(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_primary() && matches!(n.kind(), NodeKind::TopEvent(_)))
            .map(|n| n.id)
            .collect()
    }

    /// Primary basic events, in creation order
    pub fn basic_events(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_primary() && matches!(n.kind(), NodeKind::BasicEvent(_)))
            .map(|n| n.id)
            .collect()
    }

    // ===== Creation =====

    /// Allocate a new primary node
    pub fn create(&mut self, kind: NodeKind) -> EngineResult<NodeId> {
        self.create_with(NodeAttributes::new(kind))
    }

    /// Allocate a new primary node with a name
    pub fn create_named(&mut self, name: &str, kind: NodeKind) -> EngineResult<NodeId> {
        let mut attributes = NodeAttributes::new(kind);
        attributes.name = name.to_string();
        self.create_with(attributes)
    }

    /// Allocate a new primary node from full attributes
    pub fn create_with(&mut self, attributes: NodeAttributes) -> EngineResult<NodeId> {
        attributes.kind.validate()?;
        let id = self.ids.allocate();
        self.insert(Node::restored(id, attributes, None, Vec::new()));
        Ok(id)
    }

    /// Allocate a clone of `id`. Clone chains are followed to their root, so
    /// the new node always refers to a primary.
    pub fn clone_of(&mut self, id: NodeId) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        let attributes = self.node(primary)?.attributes.clone();
        let placement = self.node(id)?.placement;
        let clone_id = self.ids.allocate();
        let node = Node::restored(clone_id, attributes, Some(primary), Vec::new())
            .with_placement(placement);
        self.insert(node);
        self.clone_index.insert(clone_id, primary);
        self.clones_by_primary.entry(primary).or_default().push(clone_id);
        log::debug!("{} cloned as {}", primary, clone_id);
        Ok(clone_id)
    }

    fn insert(&mut self, node: Node) {
        self.node_index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
    }

    // ===== Attribute edits =====

    /// Copy the primary's attributes onto every clone; returns how many
    /// clones were updated. A clone id is resolved to its primary first.
    pub fn sync_from_primary(&mut self, primary: NodeId) -> EngineResult<usize> {
        let primary = self.primary_of(primary)?;
        let attributes = self.node(primary)?.attributes.clone();
        let clones = self.clones_of(primary).to_vec();
        for clone in &clones {
            self.node_mut(*clone)?.attributes = attributes.clone();
        }
        Ok(clones.len())
    }

    /// Edit the semantic attributes behind `id`, redirecting clones to their
    /// primary. The edit is validated before it is committed. Returns the id
    /// of the primary that was changed.
    pub fn edit<F>(&mut self, id: NodeId, f: F) -> EngineResult<NodeId>
    where
        F: FnOnce(&mut NodeAttributes),
    {
        let primary = self.primary_of(id)?;
        let node = self.node(primary)?;
        let mut attributes = node.attributes.clone();
        f(&mut attributes);
        attributes.kind.validate()?;
        if !attributes.kind.accepts_children() && !node.children.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{} has children and cannot become a {}",
                primary,
                attributes.kind.name()
            )));
        }
        self.node_mut(primary)?.attributes = attributes;
        Ok(primary)
    }

    /// Switch the role of a node
    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) -> EngineResult<NodeId> {
        self.edit(id, |attrs| attrs.kind = kind)
    }

    /// Set the rating of a leaf input
    pub fn set_quant_value(&mut self, id: NodeId, value: f64) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        if !matches!(self.node(primary)?.kind(), NodeKind::LeafInput { .. }) {
            return Err(EngineError::InvalidInput(format!(
                "{} is not a leaf input",
                primary
            )));
        }
        self.edit(primary, |attrs| {
            if let NodeKind::LeafInput { quant_value, .. } = &mut attrs.kind {
                *quant_value = value;
            }
        })
    }

    /// Set the gate semantics of a gate or top event
    pub fn set_gate_type(&mut self, id: NodeId, gate: GateType) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        if !self.node(primary)?.kind().accepts_children() {
            return Err(EngineError::InvalidInput(format!(
                "{} is not a gate or top event",
                primary
            )));
        }
        self.edit(primary, |attrs| match &mut attrs.kind {
            NodeKind::Gate { gate_type, .. } => *gate_type = gate,
            NodeKind::TopEvent(top) => top.gate_type = gate,
            _ => {}
        })
    }

    /// Set the severity of a gate or top event
    pub fn set_severity(&mut self, id: NodeId, value: u8) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        if !self.node(primary)?.kind().accepts_children() {
            return Err(EngineError::InvalidInput(format!(
                "{} cannot carry a severity",
                primary
            )));
        }
        self.edit(primary, |attrs| match &mut attrs.kind {
            NodeKind::Gate { severity, .. } => *severity = Some(value),
            NodeKind::TopEvent(top) => top.severity = value,
            _ => {}
        })
    }

    /// Attach a direct confidence/robustness rating to a gate or top event
    pub fn set_direct_rating(
        &mut self,
        id: NodeId,
        rating: Option<DirectRating>,
    ) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        if !self.node(primary)?.kind().accepts_children() {
            return Err(EngineError::InvalidInput(format!(
                "{} cannot carry a direct rating",
                primary
            )));
        }
        self.edit(primary, |attrs| match &mut attrs.kind {
            NodeKind::Gate { direct, .. } => *direct = rating,
            NodeKind::TopEvent(top) => top.direct = rating,
            _ => {}
        })
    }

    /// Replace the FMEDA attributes of a basic event
    pub fn set_fmeda(&mut self, id: NodeId, fmeda: FmedaAttributes) -> EngineResult<NodeId> {
        let primary = self.primary_of(id)?;
        if !matches!(self.node(primary)?.kind(), NodeKind::BasicEvent(_)) {
            return Err(EngineError::InvalidInput(format!(
                "{} is not a basic event",
                primary
            )));
        }
        self.edit(primary, |attrs| attrs.kind = NodeKind::BasicEvent(fmeda))
    }

    /// Move one instance; placement is never shared with clones
    pub fn set_placement(&mut self, id: NodeId, placement: Placement) -> EngineResult<()> {
        self.node_mut(id)?.placement = placement;
        Ok(())
    }

    pub(crate) fn set_derived(&mut self, id: NodeId, derived: Derived) -> EngineResult<()> {
        self.node_mut(id)?.derived = derived;
        Ok(())
    }

    // ===== Structure =====

    /// Logical ancestors of `id`: primaries reachable upwards through the
    /// parents of the node's primary and of all its clones.
    pub fn ancestors(&self, id: NodeId) -> EngineResult<IndexSet<NodeId>> {
        let start = self.primary_of(id)?;
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for position in self.positions_of(current) {
                for &parent in self.node(position)?.parents() {
                    let parent = self.primary_of(parent)?;
                    if seen.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Primaries below `root`, `root` included, children before parents.
    ///
    /// Clones are followed to their primary and every primary appears once.
    /// Subtrees whose primary satisfies `resolved` are not entered. The walk
    /// keeps its own stack, so depth is bounded by memory only.
    pub fn post_order<F>(&self, root: NodeId, resolved: F) -> EngineResult<Vec<NodeId>>
    where
        F: Fn(NodeId) -> bool,
    {
        let root = self.primary_of(root)?;
        let mut order = Vec::new();
        if resolved(root) {
            return Ok(order);
        }
        let mut finished = HashSet::new();
        // nodes whose expansion marker is on the stack: the current path
        let mut visiting = HashSet::new();
        let mut stack = vec![(root, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                visiting.remove(&current);
                finished.insert(current);
                order.push(current);
                continue;
            }
            if finished.contains(&current) {
                continue;
            }
            if !visiting.insert(current) {
                return Err(EngineError::CycleDetected { node: current });
            }
            stack.push((current, true));
            for &child in self.node(current)?.children().iter().rev() {
                let child = self.primary_of(child)?;
                if visiting.contains(&child) {
                    return Err(EngineError::CycleDetected { node: child });
                }
                if !finished.contains(&child) && !resolved(child) {
                    stack.push((child, false));
                }
            }
        }
        Ok(order)
    }

    /// Add `child` as the last child of `parent`.
    ///
    /// Rejected when the parent is a clone or a leaf kind, when the parent
    /// already holds the child's entity (as the primary or any clone), and
    /// when `child` (or its primary) is the parent itself or one of its
    /// ancestors.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) -> EngineResult<()> {
        let parent_node = self.node(parent)?;
        self.node(child)?;
        if !parent_node.is_primary() {
            return Err(EngineError::InvalidInput(format!(
                "{} is a clone; attach children to its primary",
                parent
            )));
        }
        if !parent_node.kind().accepts_children() {
            return Err(EngineError::InvalidInput(format!(
                "{} is a {} and cannot have children",
                parent,
                parent_node.kind().name()
            )));
        }
        let child_primary = self.primary_of(child)?;
        for &existing in &parent_node.children {
            if self.primary_of(existing)? == child_primary {
                return Err(EngineError::InvalidInput(format!(
                    "{} is already a child of {} (as {})",
                    child, parent, existing
                )));
            }
        }

        if child_primary == parent || self.ancestors(parent)?.contains(&child_primary) {
            return Err(EngineError::CycleDetected { node: child });
        }

        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parents.push(parent);
        Ok(())
    }

    /// Remove the edge in both directions
    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) -> EngineResult<()> {
        self.node(child)?;
        let parent_node = self.node_mut(parent)?;
        let Some(pos) = parent_node.children.iter().position(|&c| c == child) else {
            return Err(EngineError::InvalidInput(format!(
                "{} is not a child of {}",
                child, parent
            )));
        };
        parent_node.children.remove(pos);
        self.node_mut(child)?.parents.retain(|&p| p != parent);
        Ok(())
    }

    /// Remove a node and every edge touching it. Removing a primary removes
    /// its clones too. Returns the removed ids.
    pub fn remove_node(&mut self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        let node = self.node(id)?;
        let mut doomed = Vec::new();
        if node.is_primary() {
            doomed.extend(self.clones_of(id));
        }
        doomed.push(id);

        for &victim in &doomed {
            let (parents, children) = {
                let n = self.node(victim)?;
                (n.parents.clone(), n.children.clone())
            };
            for parent in parents {
                self.detach_child(parent, victim)?;
            }
            for child in children {
                self.detach_child(victim, child)?;
            }
        }

        self.nodes.retain(|n| !doomed.contains(&n.id));
        for victim in &doomed {
            if let Some(primary) = self.clone_index.shift_remove(victim) {
                if let Some(clones) = self.clones_by_primary.get_mut(&primary) {
                    clones.retain(|c| c != victim);
                }
            }
            self.clones_by_primary.shift_remove(victim);
        }
        self.node_index.clear();
        for (idx, node) in self.nodes.iter().enumerate() {
            self.node_index.insert(node.id, idx);
        }
        Ok(doomed)
    }

    // ===== Loading =====

    /// Rebuild the node and clone indexes, parent lists and the id counter
    /// from the node list (call after deserialization).
    ///
    /// Clone chains are collapsed onto their root primary.
    pub fn rebuild_index(&mut self) -> EngineResult<()> {
        self.node_index.clear();
        self.clone_index.clear();
        self.clones_by_primary.clear();
        for (idx, node) in self.nodes.iter().enumerate() {
            if self.node_index.insert(node.id, idx).is_some() {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate node id {}",
                    node.id.0
                )));
            }
            self.ids.observe(node.id);
        }

        let mut roots = HashMap::new();
        for node in &self.nodes {
            let Some(mut current) = node.original else {
                continue;
            };
            let mut hops = 0;
            loop {
                let target = self.get(current).ok_or(EngineError::UnknownNode(current))?;
                match target.original {
                    Some(next) => current = next,
                    None => break,
                }
                hops += 1;
                if hops > self.nodes.len() {
                    return Err(EngineError::CycleDetected { node: node.id });
                }
            }
            roots.insert(node.id, current);
        }
        for node in &mut self.nodes {
            if let Some(&root) = roots.get(&node.id) {
                node.original = Some(root);
                self.clone_index.insert(node.id, root);
                self.clones_by_primary.entry(root).or_default().push(node.id);
            }
            node.parents.clear();
        }

        let edges: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .flat_map(|n| n.children.iter().map(move |&c| (n.id, c)))
            .collect();
        for (parent, child) in edges {
            self.node_mut(child)?.parents.push(parent);
        }
        Ok(())
    }

    /// Check structural integrity: attribute ranges, no children on clones
    /// or leaf kinds, and an acyclic logical structure.
    pub fn validate(&self) -> EngineResult<()> {
        let mut logical: Graph<NodeId, ()> = Graph::new();
        let mut indices: HashMap<NodeId, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            node.kind().validate()?;
            if !node.children.is_empty() {
                if !node.is_primary() {
                    return Err(EngineError::InvalidInput(format!(
                        "clone {} owns children",
                        node.id
                    )));
                }
                if !node.kind().accepts_children() {
                    return Err(EngineError::InvalidInput(format!(
                        "{} is a {} and cannot have children",
                        node.id,
                        node.kind().name()
                    )));
                }
            }
            if node.is_primary() {
                indices.insert(node.id, logical.add_node(node.id));
            }
        }

        for node in self.nodes.iter().filter(|n| n.is_primary()) {
            for &child in &node.children {
                let child = self.primary_of(child)?;
                if let (Some(&from), Some(&to)) = (indices.get(&node.id), indices.get(&child)) {
                    logical.add_edge(from, to, ());
                }
            }
        }

        match petgraph::algo::toposort(&logical, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(EngineError::CycleDetected {
                node: logical[cycle.node_id()],
            }),
        }
    }
}
