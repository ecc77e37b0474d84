//! Integration tests for the assurance, cut-set and FMEDA entry points

use autosafe_engine::assurance::evaluate_levels_with;
use autosafe_engine::config;
use autosafe_engine::fmeda::{fmeda_rollup_with, GoalGrouping};
use autosafe_engine::fta::{minimize, CutSet};
use autosafe_engine::graph::{
    FaultType, FmedaAttributes, InputKind, NodeAttributes, TopEventAttributes,
};
use autosafe_engine::{
    cut_sets, evaluate_levels, fmeda_rollup, AsilLevel, Component, CutSetAnalysis, EngineError,
    GateType, Node, NodeGraph, NodeId, NodeKind, SeverityScope,
};
use std::io::Write;

/// Brake-by-wire model: one safety goal over a redundant sensor path
struct BrakeModel {
    graph: NodeGraph,
    top: NodeId,
    sensor_a: NodeId,
    sensor_b: NodeId,
    ecu: NodeId,
    confidence: NodeId,
    robustness: NodeId,
}

fn brake_model() -> BrakeModel {
    let mut graph = NodeGraph::new();
    let top = graph
        .create_named(
            "Loss of braking",
            NodeKind::TopEvent(TopEventAttributes {
                gate_type: GateType::Or,
                severity: 3,
                controllability: 3,
                exposure: 4,
                safety_goal: Some("SG-BRAKE".to_string()),
                ..TopEventAttributes::default()
            }),
        )
        .unwrap();

    let sensors = graph
        .create_named("Both wheel sensors fail", NodeKind::gate(GateType::And))
        .unwrap();
    let fmeda = |fraction: f64, dc: f64, fault_type: FaultType| {
        NodeKind::BasicEvent(FmedaAttributes {
            component: Some("WSS".to_string()),
            fault_fraction: fraction,
            diag_coverage: dc,
            fault_type,
            ..FmedaAttributes::default()
        })
    };
    let sensor_a = graph
        .create_named("Sensor A open", fmeda(0.5, 0.99, FaultType::Permanent))
        .unwrap();
    let sensor_b = graph
        .create_named("Sensor B drift", fmeda(0.5, 0.9, FaultType::Transient))
        .unwrap();
    let ecu = graph
        .create_named(
            "ECU lockup",
            NodeKind::BasicEvent(FmedaAttributes {
                fit_rate: 20.0,
                diag_coverage: 0.999,
                fault_type: FaultType::Permanent,
                ..FmedaAttributes::default()
            }),
        )
        .unwrap();
    graph.attach_child(sensors, sensor_a).unwrap();
    graph.attach_child(sensors, sensor_b).unwrap();
    graph.attach_child(top, sensors).unwrap();
    graph.attach_child(top, ecu).unwrap();

    let assurance = graph
        .create_named("Prototype assurance", NodeKind::gate(GateType::And))
        .unwrap();
    let confidence = graph
        .create(NodeKind::leaf_input(2.0, InputKind::Confidence))
        .unwrap();
    let robustness = graph
        .create(NodeKind::leaf_input(4.0, InputKind::Robustness))
        .unwrap();
    graph.attach_child(assurance, confidence).unwrap();
    graph.attach_child(assurance, robustness).unwrap();
    graph.attach_child(top, assurance).unwrap();

    BrakeModel {
        graph,
        top,
        sensor_a,
        sensor_b,
        ecu,
        confidence,
        robustness,
    }
}

#[test]
fn test_levels_for_brake_model() {
    let mut model = brake_model();
    let report = evaluate_levels(&mut model.graph).unwrap();

    assert!(report.is_complete());
    // AND(2, 4) = 3; the OR over one rated child keeps 3; (3 + 3) / 2
    assert_eq!(report.get(model.top).unwrap().level, 3.0);
    assert_eq!(report.pal(model.top), Some(3));
    assert!(report.unrated.contains(&model.ecu));
    assert_eq!(model.graph.node(model.top).unwrap().derived().pal, Some(3));
}

#[test]
fn test_cut_sets_for_brake_model() {
    let model = brake_model();
    let family = cut_sets(&model.graph, model.top).unwrap();

    let analysis = CutSetAnalysis::from_family(&model.graph, &family).unwrap();
    assert!(analysis
        .single_point_failures
        .iter()
        .any(|cs| cs.event_names == vec!["ECU lockup"]));
    let pair: CutSet = [model.sensor_a, model.sensor_b].into_iter().collect();
    assert!(family.contains(&pair));
    assert_eq!(minimize(&family), family);
    // the assurance gate contributes its two leaf inputs as one AND set
    let ratings: CutSet = [model.confidence, model.robustness].into_iter().collect();
    assert!(family.contains(&ratings));
}

#[test]
fn test_fmeda_for_brake_model() {
    let model = brake_model();
    let grouping = GoalGrouping::from_top_events(&model.graph).unwrap();
    let components = [Component::new("WSS", 100.0)];
    let events = model.graph.basic_events();

    let report = fmeda_rollup(&model.graph, &events, &grouping, &components).unwrap();
    let goal = &report.goals["SG-BRAKE"];
    assert_eq!(goal.asil, AsilLevel::D);
    assert_eq!(goal.event_count, 3);
    assert!((goal.total_fit - 120.0).abs() < 1e-9);
    // 50 * 0.01 + 20 * 0.001 single-point, 50 * 0.1 latent
    assert!((goal.spf_fit - 0.52).abs() < 1e-9);
    assert!((goal.lpf_fit - 5.0).abs() < 1e-9);
    assert!(goal.ok_spfm);
    assert!(goal.ok_lpfm);
    // (120 - 5.52) / 120 misses the 0.99 DC target
    assert!(!goal.ok_dc);
    assert!(!report.passed());
    assert!(report.warnings.is_empty());

    // the ECU alone contributes 20 FIT over one hour, above the 1e-8 target
    let top = &report.pmhf.top_events[0];
    assert_eq!(top.node, model.top);
    assert!(top.probability > 2e-8 - 1e-15);
    assert!(!report.pmhf.passed());
}

#[test]
fn test_clone_sync_is_visible_to_evaluation() {
    let mut model = brake_model();
    let clone = model.graph.clone_of(model.confidence).unwrap();
    let extra = model.graph.create(NodeKind::gate(GateType::Or)).unwrap();
    model.graph.attach_child(extra, clone).unwrap();

    model.graph.set_quant_value(model.confidence, 5.0).unwrap();
    model.graph.sync_from_primary(model.confidence).unwrap();
    assert_eq!(model.graph.node(clone).unwrap().quant_value(), Some(5.0));

    let report = evaluate_levels(&mut model.graph).unwrap();
    assert_eq!(report.get(extra).unwrap().level, 5.0);
}

#[test]
fn test_attach_rejects_self_descendant() {
    let mut model = brake_model();
    let sensors = model.graph.node(model.sensor_a).unwrap().parents()[0];
    let result = model.graph.attach_child(sensors, model.top);
    assert_eq!(result, Err(EngineError::CycleDetected { node: model.top }));
}

#[test]
fn test_config_from_file_drives_passes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        severity_scope = "hazard"
        fraction_tolerance = 0.05

        [asil_targets.d]
        dc = 0.9
        spfm = 0.9
        lpfm = 0.9
        "#
    )
    .unwrap();

    let config = config::from_path(file.path()).unwrap();
    assert_eq!(config.severity_scope, SeverityScope::Hazard);

    let mut model = brake_model();
    let report = evaluate_levels_with(&mut model.graph, &config).unwrap();
    // top event has no hazard, so the parent rule still applies
    assert_eq!(report.pal(model.top), Some(3));

    let grouping = GoalGrouping::from_top_events(&model.graph).unwrap();
    let events = model.graph.basic_events();
    let report = fmeda_rollup_with(
        &model.graph,
        &events,
        &grouping,
        &[Component::new("WSS", 100.0)],
        &config,
    )
    .unwrap();
    assert!(report.goals["SG-BRAKE"].passed());
}

#[test]
fn test_config_file_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "fraction_tolerance = \"loose\"").unwrap();
    assert!(matches!(
        config::from_path(file.path()),
        Err(autosafe_engine::ConfigError::Parse(_))
    ));
}

#[test]
fn test_reset_starts_new_model() {
    let mut model = brake_model();
    model.graph.reset();
    assert!(model.graph.is_empty());
    let id = model
        .graph
        .create(NodeKind::leaf_input(1.0, InputKind::Confidence))
        .unwrap();
    assert_eq!(id, NodeId(1));
}

#[test]
fn test_deep_restored_chain_is_evaluated() {
    // Top of the chain first, the order a host reload delivers
    let depth = 10_000u64;
    let mut nodes: Vec<Node> = (1..depth)
        .map(|n| {
            Node::restored(
                NodeId(n),
                NodeAttributes::new(NodeKind::gate(GateType::Or)),
                None,
                vec![NodeId(n + 1)],
            )
        })
        .collect();
    nodes.push(Node::restored(
        NodeId(depth),
        NodeAttributes::new(NodeKind::leaf_input(4.0, InputKind::Robustness)),
        None,
        vec![],
    ));
    let mut graph = NodeGraph::from_nodes(nodes).unwrap();

    let report = evaluate_levels(&mut graph).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.get(NodeId(1)).unwrap().level, 4.0);
    assert_eq!(report.levels.len(), depth as usize);

    let family = cut_sets(&graph, NodeId(1)).unwrap();
    let leaf: CutSet = [NodeId(depth)].into_iter().collect();
    assert_eq!(family.into_iter().collect::<Vec<_>>(), vec![leaf]);
}
