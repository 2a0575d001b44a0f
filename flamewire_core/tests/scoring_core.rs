use std::time::Duration;

use flamewire_core::*;

fn window(miner: &str, node: &str, region: Region, passed: usize, total: usize, latency_ms: u64, verified: Option<bool>) -> NodeWindow {
    let mut w = NodeWindow::new(miner, node, region);
    for i in 0..total {
        let mut o = if i < passed {
            ProbeOutcome::healthy(node, region, Duration::from_millis(latency_ms))
        } else {
            ProbeOutcome::unhealthy(node, region)
        };
        if i == 0 {
            if let Some(v) = verified {
                o = o.with_correctness(v);
            }
        }
        w.push(o);
    }
    w
}

fn ns(miner: &str, node: &str, region: Region, combined: f64) -> NodeCycleScore {
    NodeCycleScore {
        key: NodeKey::new(miner, node),
        region,
        correctness: 1.0,
        uptime: 1.0,
        latency_score: 1.0,
        combined,
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn node_scores_follow_40_30_30_weights() {
    let windows = vec![
        window("miner_a", "a_us", Region::Us, 9, 10, 100, Some(true)),
        window("miner_a", "a_eu", Region::Eu, 10, 10, 150, Some(false)),
        window("miner_b", "b_us", Region::Us, 8, 10, 200, Some(true)),
    ];
    let scores: Vec<NodeCycleScore> = score_nodes(&windows, &CohortMinMax, UnverifiedPolicy::Fail)
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(close(scores[0].combined, 0.97));
    assert!(close(scores[1].combined, 0.45));
    assert!(close(scores[2].combined, 0.64));
    assert_eq!(scores[1].correctness, 0.0);
}

#[test]
fn empty_window_is_excluded_not_zeroed() {
    let windows = vec![
        window("m", "fast", Region::Us, 4, 4, 100, Some(true)),
        NodeWindow::new("m", "silent", Region::Us),
        window("m", "slow", Region::Us, 4, 4, 300, Some(true)),
    ];
    let scores = score_nodes(&windows, &CohortMinMax, UnverifiedPolicy::Fail);
    assert!(matches!(scores[1], Err(NodeScoreError::NoProbes(_))));
    // The silent node is not part of the cohort: fast and slow keep the full spread.
    assert_eq!(scores[0].as_ref().unwrap().latency_score, 1.0);
    assert_eq!(scores[2].as_ref().unwrap().latency_score, 0.0);
}

fn mixed_miners() -> Vec<NodeCycleScore> {
    vec![
        ns("miner_a", "a_eu", Region::Eu, 0.9),
        ns("miner_a", "a_us", Region::Us, 0.8),
        ns("miner_a", "a_as", Region::As, 0.7),
        ns("miner_b", "b_eu_1", Region::Eu, 0.6),
        ns("miner_b", "b_eu_2", Region::Eu, 0.6),
        ns("miner_b", "b_us", Region::Us, 0.4),
        ns("miner_c", "c_as", Region::As, 0.5),
    ]
}

#[test]
fn miner_scores_apply_multiplier_diminishing_and_diversity() {
    let nodes = mixed_miners();
    // Census: Eu 3, Us 2, As 2.
    let census = RegionCensus::from_regions(nodes.iter().map(|n| n.region));
    let out = aggregate_all(&nodes, &census, &RegionPolicy::default());

    let a = out["miner_a"].as_ref().unwrap();
    let b = out["miner_b"].as_ref().unwrap();
    let c = out["miner_c"].as_ref().unwrap();

    // miner_a owns 1 of 3 Eu nodes and 1 of 2 Us nodes.
    assert!(close(a.region_multipliers[&Region::Eu], 1.0));
    assert!(close(a.region_multipliers[&Region::Us], 2.0 / 3.0));
    // miner_b owns 2 of 3 Eu nodes: multiplier floors at 0.5.
    assert!(close(b.region_multipliers[&Region::Eu], 0.5));
    assert!(close(b.region_base_scores[&Region::Eu], 0.9));
    assert!(close(b.regional_scores[&Region::Eu], 0.45));

    assert_eq!((a.regions_covered, b.regions_covered, c.regions_covered), (3, 2, 1));
    assert_eq!((a.diversity_bonus, b.diversity_bonus, c.diversity_bonus), (1.2, 1.1, 1.0));

    assert!(close(a.total, 2.28));
    assert!(close(b.total, (0.45 + 0.4 * 2.0 / 3.0) * 1.1));
    assert!(close(c.total, 1.0 / 3.0));
}

#[test]
fn network_share_basis_scales_by_region_share_of_network() {
    let nodes = mixed_miners();
    let census = RegionCensus::from_regions(nodes.iter().map(|n| n.region));
    let policy = RegionPolicy {
        share_basis: ShareBasis::Network,
        ..RegionPolicy::default()
    };
    let out = aggregate_all(&nodes, &census, &policy);

    let a = out["miner_a"].as_ref().unwrap();
    let b = out["miner_b"].as_ref().unwrap();
    let c = out["miner_c"].as_ref().unwrap();

    assert!(close(a.region_multipliers[&Region::Eu], 7.0 / 9.0));
    assert!(close(a.region_multipliers[&Region::Us], 7.0 / 6.0));
    assert!(close(b.regional_scores[&Region::Eu], 0.7));

    assert!(close(a.total, 2.94));
    assert!(close(b.total, 1.2833333333333334));
    assert!(close(c.total, 0.5833333333333334));
}

#[test]
fn regional_multiplier_bounds_are_clamped() {
    let mut nodes: Vec<NodeCycleScore> = (0..10)
        .map(|i| ns("miner_eu", &format!("eu_{i}"), Region::Eu, 1.0))
        .collect();
    nodes.push(ns("miner_us", "us_0", Region::Us, 1.0));
    nodes.push(ns("miner_as", "as_0", Region::As, 1.0));

    let census = RegionCensus::new()
        .with(Region::Us, 10)
        .with(Region::Eu, 10)
        .with(Region::As, 10);
    let out = aggregate_all(&nodes, &census, &RegionPolicy::default());

    assert_eq!(out["miner_eu"].as_ref().unwrap().region_multipliers[&Region::Eu], 0.5);
    assert_eq!(out["miner_us"].as_ref().unwrap().region_multipliers[&Region::Us], 2.0);
    assert_eq!(out["miner_as"].as_ref().unwrap().region_multipliers[&Region::As], 2.0);
}

#[test]
fn spreading_across_regions_beats_concentration() {
    let census = RegionCensus::new()
        .with(Region::Us, 10)
        .with(Region::Eu, 10)
        .with(Region::As, 10);
    let nodes = vec![
        ns("solo", "s1", Region::Us, 0.8),
        ns("spread", "p1", Region::Us, 0.4),
        ns("spread", "p2", Region::Eu, 0.4),
    ];
    let out = aggregate_all(&nodes, &census, &RegionPolicy::default());
    let solo = out["solo"].as_ref().unwrap();
    let spread = out["spread"].as_ref().unwrap();

    assert_eq!(solo.diversity_bonus, 1.0);
    assert_eq!(spread.diversity_bonus, 1.1);
    assert!(spread.total > solo.total);
}

#[test]
fn windows_to_weights() {
    let windows = vec![
        window("a", "a1", Region::Us, 8, 8, 90, Some(true)),
        window("a", "a2", Region::Eu, 6, 8, 120, Some(true)),
        window("b", "b1", Region::As, 8, 8, 200, None),
    ];
    let scores: Vec<NodeCycleScore> = score_nodes(&windows, &CohortMinMax, UnverifiedPolicy::Fail)
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    let census = RegionCensus::from_regions(windows.iter().map(|w| w.region));
    let raw: std::collections::BTreeMap<String, f64> = aggregate_all(&scores, &census, &RegionPolicy::default())
        .into_iter()
        .filter_map(|(k, r)| r.ok().map(|b| (k, b.total)))
        .collect();

    let mut book = EmaBook::new();
    book.apply_cycle(&raw, 0.1);
    let w = publish_weights(book.iter(), 1.0).unwrap();

    assert!(close(w.sum(), 1.0));
    assert!(w.entries.values().all(|v| *v >= 0.0));
    assert!(w.get("a") > w.get("b"));
}
