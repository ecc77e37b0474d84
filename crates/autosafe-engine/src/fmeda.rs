//! FMEDA metric aggregation
//!
//! Rolls basic-event failure rates up per safety goal and globally, and
//! compares the resulting metrics with ASIL-indexed targets.
//!
//! For each basic event:
//! - effective FIT = component FIT × fault fraction when the event names a
//!   component of the bill of materials, else the event's own FIT
//! - uncovered FIT = effective FIT × (1 − diagnostic coverage), booked as
//!   single-point for permanent faults and latent for transient ones
//!
//! Per group:
//! - `spfm = 1 − Σspf / total`, `lpfm = 1 − Σlpf / total`
//! - `dc = (total − Σ(spf + lpf)) / total`
//! - all three are `0.0` when `total == 0`
//!
//! An event contributes to every safety goal it sits under, and exactly once
//! to the global roll-up.
//!
//! PMHF is the sum of the top-event failure probabilities over the mission
//! time. Basic events turn FIT into a probability with `λ = FIT / quantity /
//! 1e9`; AND gates multiply their children's probabilities and OR gates
//! combine them as `1 − Π(1 − p)`.

use crate::asil::{AsilLevel, MetricTargets};
use crate::config::EngineConfig;
use crate::graph::{
    FaultType, FmedaAttributes, GateType, NodeGraph, NodeId, NodeKind, ProbabilityModel,
};
use crate::{EngineError, EngineResult};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Bill of materials
// ============================================================================

/// Reliability component of the bill of materials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Failure rate of one unit, in FIT
    #[serde(default)]
    pub fit: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Nested bills of materials; their FIT is multiplied by `quantity`
    #[serde(default)]
    pub sub_boms: Vec<Vec<Component>>,
}

fn default_quantity() -> u32 {
    1
}

impl Component {
    pub fn new(name: &str, fit: f64) -> Self {
        Self {
            name: name.to_string(),
            fit,
            quantity: 1,
            sub_boms: Vec::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_sub_bom(mut self, bom: Vec<Component>) -> Self {
        self.sub_boms.push(bom);
        self
    }
}

/// Aggregated FIT per component name, nested BOMs flattened.
///
/// Each entry is `fit × quantity × product of parent quantities`; entries
/// sharing a name are summed.
pub fn component_fit_map(components: &[Component]) -> IndexMap<String, f64> {
    fn add(map: &mut IndexMap<String, f64>, component: &Component, multiplier: f64) {
        let quantity = f64::from(component.quantity);
        *map.entry(component.name.clone()).or_insert(0.0) += component.fit * quantity * multiplier;
        for bom in &component.sub_boms {
            for sub in bom {
                add(map, sub, multiplier * quantity);
            }
        }
    }

    let mut map = IndexMap::new();
    for component in components {
        add(&mut map, component, 1.0);
    }
    map
}

/// Unit quantity per component name, first occurrence wins
fn component_quantity_map(components: &[Component]) -> HashMap<String, u32> {
    fn add(map: &mut HashMap<String, u32>, component: &Component) {
        map.entry(component.name.clone()).or_insert(component.quantity);
        for sub in component.sub_boms.iter().flatten() {
            add(map, sub);
        }
    }

    let mut map = HashMap::new();
    for component in components {
        add(&mut map, component);
    }
    map
}

// ============================================================================
// Safety goals
// ============================================================================

/// A safety goal with its integrity level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    pub name: String,
    pub asil: AsilLevel,
    /// Replaces the ASIL targets for this goal only
    #[serde(default)]
    pub targets: Option<MetricTargets>,
}

impl GoalSpec {
    pub fn new(name: &str, asil: AsilLevel) -> Self {
        Self {
            name: name.to_string(),
            asil,
            targets: None,
        }
    }

    pub fn with_targets(mut self, targets: MetricTargets) -> Self {
        self.targets = Some(targets);
        self
    }
}

/// Safety goals keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalGrouping {
    pub goals: IndexMap<String, GoalSpec>,
}

impl GoalGrouping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a goal
    pub fn insert(&mut self, goal: GoalSpec) {
        self.goals.insert(goal.name.clone(), goal);
    }

    /// Goals named by top events. A goal's ASIL is the highest effective
    /// ASIL of the top events naming it.
    pub fn from_top_events(graph: &NodeGraph) -> EngineResult<Self> {
        let mut grouping = Self::new();
        for id in graph.top_events() {
            let NodeKind::TopEvent(top) = graph.node(id)?.kind() else {
                continue;
            };
            let Some(goal) = &top.safety_goal else {
                continue;
            };
            let asil = top.effective_asil()?;
            grouping
                .goals
                .entry(goal.clone())
                .and_modify(|spec| spec.asil = spec.asil.max(asil))
                .or_insert_with(|| GoalSpec::new(goal, asil));
        }
        Ok(grouping)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Gap in meeting a metric target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGap {
    /// Metric name
    pub metric: String,
    pub current: f64,
    pub target: f64,
    pub shortfall: f64,
}

/// FIT totals and metrics of one group of events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalMetrics {
    pub goal: String,
    pub asil: AsilLevel,
    pub targets: MetricTargets,
    pub event_count: usize,
    /// Σ effective FIT
    pub total_fit: f64,
    /// Σ uncovered FIT of permanent faults
    pub spf_fit: f64,
    /// Σ uncovered FIT of transient faults
    pub lpf_fit: f64,
    pub dc: f64,
    pub spfm: f64,
    pub lpfm: f64,
    pub ok_dc: bool,
    pub ok_spfm: bool,
    pub ok_lpfm: bool,
}

impl GoalMetrics {
    fn empty(goal: &str, asil: AsilLevel, targets: MetricTargets) -> Self {
        Self {
            goal: goal.to_string(),
            asil,
            targets,
            event_count: 0,
            total_fit: 0.0,
            spf_fit: 0.0,
            lpf_fit: 0.0,
            dc: 0.0,
            spfm: 0.0,
            lpfm: 0.0,
            ok_dc: false,
            ok_spfm: false,
            ok_lpfm: false,
        }
    }

    fn book(&mut self, contribution: &EventContribution) {
        self.event_count += 1;
        self.total_fit += contribution.fit;
        self.spf_fit += contribution.spf_fit;
        self.lpf_fit += contribution.lpf_fit;
    }

    /// Derive the metrics from the booked totals and check them
    fn finish(&mut self) {
        let total = self.total_fit;
        if total > 0.0 {
            self.dc = (total - (self.spf_fit + self.lpf_fit)) / total;
            self.spfm = 1.0 - self.spf_fit / total;
            self.lpfm = 1.0 - self.lpf_fit / total;
        } else {
            self.dc = 0.0;
            self.spfm = 0.0;
            self.lpfm = 0.0;
        }
        self.ok_dc = self.dc >= self.targets.dc;
        self.ok_spfm = self.spfm >= self.targets.spfm;
        self.ok_lpfm = self.lpfm >= self.targets.lpfm;
    }

    /// All three metrics meet their targets
    pub fn passed(&self) -> bool {
        self.ok_dc && self.ok_spfm && self.ok_lpfm
    }

    /// Get gaps for reaching the targets
    pub fn gaps(&self) -> Vec<MetricGap> {
        [
            ("DC", self.dc, self.targets.dc, self.ok_dc),
            ("SPFM", self.spfm, self.targets.spfm, self.ok_spfm),
            ("LPFM", self.lpfm, self.targets.lpfm, self.ok_lpfm),
        ]
        .into_iter()
        .filter(|(_, _, _, ok)| !ok)
        .map(|(metric, current, target, _)| MetricGap {
            metric: metric.to_string(),
            current,
            target,
            shortfall: target - current,
        })
        .collect()
    }
}

/// Non-fatal findings of a roll-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FmedaWarning {
    /// Normalized fault fractions of a component do not sum to 1.0
    FractionSum { component: String, sum: f64 },
    /// Event sits under no safety goal; counted in the global roll-up only
    UnassignedEvent { event: NodeId },
    /// Event names a component missing from the bill of materials
    MissingComponent { event: NodeId, component: String },
    /// Goal not present in the grouping; QM targets applied
    UnknownGoal { goal: String },
}

/// Failure probability of one top event against its PMHF target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEventProbability {
    pub node: NodeId,
    pub name: String,
    pub asil: AsilLevel,
    pub probability: f64,
    pub target: f64,
    pub ok: bool,
}

/// Probabilistic metric for random hardware failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmhfSummary {
    pub top_events: Vec<TopEventProbability>,
    /// Σ top-event probabilities
    pub total: f64,
}

impl PmhfSummary {
    /// Every top event meets its target
    pub fn passed(&self) -> bool {
        self.top_events.iter().all(|t| t.ok)
    }
}

/// Per-goal and global FMEDA figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmedaReport {
    pub goals: IndexMap<String, GoalMetrics>,
    /// All events once, checked against the highest goal ASIL
    pub global: GoalMetrics,
    pub pmhf: PmhfSummary,
    pub warnings: Vec<FmedaWarning>,
}

impl FmedaReport {
    /// Global, per-goal and PMHF checks all passed
    pub fn passed(&self) -> bool {
        self.global.passed()
            && self.goals.values().all(GoalMetrics::passed)
            && self.pmhf.passed()
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidInput(format!("FMEDA report export failed: {}", e)))
    }
}

// ============================================================================
// Roll-up
// ============================================================================

struct EventContribution {
    fit: f64,
    spf_fit: f64,
    lpf_fit: f64,
}

/// Share of the component FIT; values above 1.0 are percentages
fn normalized_fraction(fraction: f64) -> f64 {
    if fraction > 1.0 {
        fraction / 100.0
    } else {
        fraction
    }
}

/// Effective FIT of an event, and whether its component (if any) was found
/// in the bill of materials
fn effective_fit(fmeda: &FmedaAttributes, component_fit: &IndexMap<String, f64>) -> (f64, bool) {
    match &fmeda.component {
        Some(component) => match component_fit.get(component) {
            Some(fit) => (fit * normalized_fraction(fmeda.fault_fraction), true),
            None => (fmeda.fit_rate, false),
        },
        None => (fmeda.fit_rate, true),
    }
}

/// Failure probability over `mission_time` hours for an event with
/// effective FIT `fit`, with `λ = fit / quantity / 1e9`
pub fn failure_probability(
    fmeda: &FmedaAttributes,
    fit: f64,
    quantity: u32,
    mission_time: f64,
) -> f64 {
    let lambda = fit / f64::from(quantity.max(1)) / 1e9;
    match fmeda.prob_model {
        ProbabilityModel::Constant => fmeda.failure_prob,
        _ if fit <= 0.0 => 0.0,
        ProbabilityModel::Linear => lambda * mission_time,
        ProbabilityModel::Exponential => 1.0 - (-lambda * mission_time).exp(),
    }
}

/// Safety goals of the top events above each primary, one top-down sweep
/// per top event naming a goal
fn goal_membership(graph: &NodeGraph) -> EngineResult<HashMap<NodeId, IndexSet<String>>> {
    let mut membership: HashMap<NodeId, IndexSet<String>> = HashMap::new();
    for top in graph.top_events() {
        let NodeKind::TopEvent(attrs) = graph.node(top)?.kind() else {
            continue;
        };
        let Some(goal) = &attrs.safety_goal else {
            continue;
        };
        for below in graph.post_order(top, |_| false)? {
            if below != top {
                membership.entry(below).or_default().insert(goal.clone());
            }
        }
    }
    Ok(membership)
}

/// Safety goals of an event: those of the top events above it, else its
/// own goal attribute
fn goals_of(
    membership: &HashMap<NodeId, IndexSet<String>>,
    event: NodeId,
    own: Option<&String>,
) -> IndexSet<String> {
    let mut goals = membership.get(&event).cloned().unwrap_or_default();
    if goals.is_empty() {
        if let Some(goal) = own.filter(|g| !g.is_empty()) {
            goals.insert(goal.clone());
        }
    }
    goals
}

/// Probability of one primary whose children are all in `memo`. Leaf inputs
/// and gates without any basic event below carry none.
fn node_probability(
    graph: &NodeGraph,
    memo: &HashMap<NodeId, Option<f64>>,
    primary: NodeId,
    component_fit: &IndexMap<String, f64>,
    quantities: &HashMap<String, u32>,
    mission_time: f64,
) -> EngineResult<Option<f64>> {
    let node = graph.node(primary)?;
    if let Some(fmeda) = node.kind().fmeda() {
        let (fit, _) = effective_fit(fmeda, component_fit);
        let quantity = fmeda
            .component
            .as_ref()
            .and_then(|c| quantities.get(c))
            .copied()
            .unwrap_or(1);
        return Ok(Some(failure_probability(fmeda, fit, quantity, mission_time)));
    }

    let mut probabilities = Vec::with_capacity(node.children().len());
    for &child in node.children() {
        let child = graph.primary_of(child)?;
        if let Some(p) = memo.get(&child).copied().flatten() {
            probabilities.push(p);
        }
    }
    if probabilities.is_empty() {
        return Ok(None);
    }
    let probability = match node.kind().gate_type().unwrap_or_default() {
        GateType::And => probabilities.iter().product::<f64>(),
        GateType::Or => 1.0 - probabilities.iter().map(|p| 1.0 - p).product::<f64>(),
    };
    Ok(Some(probability))
}

/// Failure probability of every primary top event, checked against the
/// PMHF target of its effective ASIL
fn pmhf_summary(
    graph: &NodeGraph,
    components: &[Component],
    component_fit: &IndexMap<String, f64>,
    mission_time: f64,
) -> EngineResult<PmhfSummary> {
    let quantities = component_quantity_map(components);
    let mut memo: HashMap<NodeId, Option<f64>> = HashMap::new();
    let mut summary = PmhfSummary::default();

    for top in graph.top_events() {
        let order = graph.post_order(top, |primary| memo.contains_key(&primary))?;
        for primary in order {
            let probability = node_probability(
                graph,
                &memo,
                primary,
                component_fit,
                &quantities,
                mission_time,
            )?;
            memo.insert(primary, probability);
        }

        let node = graph.node(top)?;
        let NodeKind::TopEvent(attrs) = node.kind() else {
            continue;
        };
        let asil = attrs.effective_asil()?;
        let probability = memo.get(&top).copied().flatten().unwrap_or(0.0);
        let target = asil.pmhf_target();
        summary.total += probability;
        summary.top_events.push(TopEventProbability {
            node: top,
            name: node.name().to_string(),
            asil,
            probability,
            target,
            ok: probability <= target,
        });
    }
    Ok(summary)
}

/// Roll up `events` with the default configuration
pub fn fmeda_rollup(
    graph: &NodeGraph,
    events: &[NodeId],
    grouping: &GoalGrouping,
    components: &[Component],
) -> EngineResult<FmedaReport> {
    fmeda_rollup_with(graph, events, grouping, components, &EngineConfig::default())
}

/// Roll up the FMEDA figures of `events` per safety goal and globally.
///
/// Clones are resolved to their primary and every event counts once. Events
/// that are not basic events are rejected.
pub fn fmeda_rollup_with(
    graph: &NodeGraph,
    events: &[NodeId],
    grouping: &GoalGrouping,
    components: &[Component],
    config: &EngineConfig,
) -> EngineResult<FmedaReport> {
    let component_fit = component_fit_map(components);
    let membership = goal_membership(graph)?;
    let mut warnings = Vec::new();
    let mut goals: IndexMap<String, GoalMetrics> = IndexMap::new();
    let mut fraction_sums: IndexMap<String, f64> = IndexMap::new();
    let mut global_events = Vec::new();

    let mut seen = IndexSet::new();
    for &id in events {
        let primary = graph.primary_of(id)?;
        if !seen.insert(primary) {
            continue;
        }
        let node = graph.node(primary)?;
        let Some(fmeda) = node.kind().fmeda() else {
            return Err(EngineError::InvalidInput(format!(
                "{} is a {}, not a basic event",
                primary,
                node.kind().name()
            )));
        };

        let (fit, found) = effective_fit(fmeda, &component_fit);
        if let Some(component) = &fmeda.component {
            *fraction_sums.entry(component.clone()).or_insert(0.0) +=
                normalized_fraction(fmeda.fault_fraction);
            if !found {
                warnings.push(FmedaWarning::MissingComponent {
                    event: primary,
                    component: component.clone(),
                });
            }
        }
        let uncovered = fit * (1.0 - fmeda.diag_coverage);
        let contribution = match fmeda.fault_type {
            FaultType::Permanent => EventContribution {
                fit,
                spf_fit: uncovered,
                lpf_fit: 0.0,
            },
            FaultType::Transient => EventContribution {
                fit,
                spf_fit: 0.0,
                lpf_fit: uncovered,
            },
        };

        let event_goals = goals_of(&membership, primary, fmeda.safety_goal.as_ref());
        if event_goals.is_empty() {
            log::warn!("{} is not assigned to any safety goal", primary);
            warnings.push(FmedaWarning::UnassignedEvent { event: primary });
        }
        for goal in event_goals {
            let metrics = goals
                .entry(goal.clone())
                .or_insert_with(|| match grouping.goals.get(&goal) {
                    Some(spec) => GoalMetrics::empty(
                        &goal,
                        spec.asil,
                        spec.targets.unwrap_or_else(|| config.targets_for(spec.asil)),
                    ),
                    None => {
                        warnings.push(FmedaWarning::UnknownGoal { goal: goal.clone() });
                        GoalMetrics::empty(&goal, AsilLevel::QM, config.targets_for(AsilLevel::QM))
                    }
                });
            metrics.book(&contribution);
        }
        global_events.push(contribution);
    }

    for (component, sum) in fraction_sums {
        if (sum - 1.0).abs() > config.fraction_tolerance {
            log::warn!(
                "Fault fractions of component '{}' sum to {:.3}, expected 1.0",
                component,
                sum
            );
            warnings.push(FmedaWarning::FractionSum { component, sum });
        }
    }

    for metrics in goals.values_mut() {
        metrics.finish();
    }

    let global_asil = goals
        .values()
        .map(|m| m.asil)
        .max()
        .unwrap_or(AsilLevel::QM);
    let mut global = GoalMetrics::empty("global", global_asil, config.targets_for(global_asil));
    for contribution in &global_events {
        global.book(contribution);
    }
    global.finish();

    let pmhf = pmhf_summary(graph, components, &component_fit, config.mission_time)?;

    log::info!(
        "FMEDA roll-up: {} events, {} goals, total {:.2} FIT, SPFM {:.4}, LPFM {:.4}",
        global.event_count,
        goals.len(),
        global.total_fit,
        global.spfm,
        global.lpfm
    );
    log::info!(
        "PMHF over {} top events: {:.2e} ({})",
        pmhf.top_events.len(),
        pmhf.total,
        if pmhf.passed() { "met" } else { "missed" }
    );

    Ok(FmedaReport {
        goals,
        global,
        pmhf,
        warnings,
    })
}
