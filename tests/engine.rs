//! End-to-end engine scenarios driven entirely through the public
//! `Tree`/`Node` API against a real temp directory.
//!
//! Run with: cargo test

use std::collections::HashMap;

use ceres_core::Tree;
use tempfile::tempdir;

fn tree_with_node(time_step: u32) -> (tempfile::TempDir, Tree) {
    let dir = tempdir().unwrap();
    let mut tree = Tree::create(dir.path(), HashMap::new()).unwrap();
    let mut props = HashMap::new();
    props.insert("timeStep".to_string(), time_step.to_string());
    tree.create_node("metric", props).unwrap();
    (dir, tree)
}

#[test]
fn simple_append_round_trip() {
    let (_dir, mut tree) = tree_with_node(60);
    tree.store("metric", &[(60, Some(1.0)), (120, Some(2.0)), (180, Some(3.0))])
        .unwrap();

    let series = tree.fetch("metric", 60, 240).unwrap();
    assert_eq!(series.start_time, 60);
    assert_eq!(series.end_time, 240);
    assert_eq!(series.time_step, 60);
    assert_eq!(series.values, vec![Some(1.0), Some(2.0), Some(3.0)]);

    let node = tree.get_node("metric").unwrap();
    let slices = node.slices().unwrap();
    assert_eq!(slices.len(), 1);
    assert_eq!(std::fs::metadata(slices[0].fs_path()).unwrap().len(), 24);
}

#[test]
fn gap_within_slice_is_nan_padded() {
    let (_dir, mut tree) = tree_with_node(60);
    tree.store("metric", &[(60, Some(1.0))]).unwrap();
    tree.store("metric", &[(600, Some(2.0))]).unwrap();

    let series = tree.fetch("metric", 60, 660).unwrap();
    let expected = {
        let mut v = vec![None; 10];
        v[0] = Some(1.0);
        v[9] = Some(2.0);
        v
    };
    assert_eq!(series.values, expected);
    assert_eq!(tree.get_node("metric").unwrap().slices().unwrap().len(), 1);
}

#[test]
fn oversize_gap_starts_new_slice() {
    let (_dir, mut tree) = tree_with_node(60);
    tree.store("metric", &[(60, Some(1.0))]).unwrap();
    tree.store("metric", &[(60 + 81 * 60, Some(2.0))]).unwrap();

    let mut slices = tree.get_node("metric").unwrap().slices().unwrap();
    slices.sort_by_key(|s| s.start_time());
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].start_time(), 60);
    assert_eq!(slices[1].start_time(), 60 + 81 * 60);
}

#[test]
fn write_straddling_existing_slice_splits_sequence() {
    let (_dir, mut tree) = tree_with_node(60);
    tree.store("metric", &[(600, Some(99.0))]).unwrap(); // seeds a slice starting at 600
    tree.store(
        "metric",
        &[(480, Some(1.0)), (540, Some(2.0)), (600, Some(3.0)), (660, Some(4.0))],
    )
    .unwrap();

    let mut slices = tree.get_node("metric").unwrap().slices().unwrap();
    slices.sort_by_key(|s| s.start_time());
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].start_time(), 480);
    assert_eq!(slices[1].start_time(), 600);

    let series = tree.fetch("metric", 480, 720).unwrap();
    assert_eq!(series.values, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
}

#[test]
fn read_across_mixed_steps_downsamples_the_finer_slice() {
    let (_dir, mut tree) = tree_with_node(60);

    // an older slice at the node's original step, spanning [0, 600).
    let old_points: Vec<(i64, Option<f64>)> = (0..10).map(|i| (i * 60, Some(1.0))).collect();
    tree.store("metric", &old_points).unwrap();

    // the node's step changes -- a history artifact, not a design choice;
    // the old step-60 slice stays on disk alongside the new one.
    {
        let node = tree.get_node("metric").unwrap();
        let mut metadata = node.read_metadata().unwrap();
        metadata.time_step = 300;
        node.write_metadata(&metadata).unwrap();
    }

    tree.store(
        "metric",
        &[(600, Some(10.0)), (900, Some(20.0)), (1200, Some(30.0)), (1500, Some(40.0))],
    )
    .unwrap();

    let mut slices = tree.get_node("metric").unwrap().slices().unwrap();
    slices.sort_by_key(|s| s.start_time());
    assert_eq!(slices.len(), 2);
    assert_eq!((slices[0].start_time(), slices[0].time_step()), (0, 60));
    assert_eq!((slices[1].start_time(), slices[1].time_step()), (600, 300));

    let series = tree.fetch("metric", 0, 1800).unwrap();
    assert_eq!(series.time_step, 300);
    assert_eq!(series.values.len(), 6);
    assert_eq!(series.values[0], Some(1.0)); // mean of five 1.0 samples, downsampled 60 -> 300
    assert_eq!(&series.values[2..], &[Some(10.0), Some(20.0), Some(30.0), Some(40.0)]);
}

#[test]
fn read_predating_all_slices_falls_back_to_node_step() {
    let (_dir, mut tree) = tree_with_node(60);
    tree.store("metric", &[(1000, Some(1.0))]).unwrap();

    let series = tree.fetch("metric", 100, 400).unwrap();
    assert_eq!(series.start_time, 100);
    assert_eq!(series.end_time, 400);
    assert_eq!(series.values.len(), 5);
    assert!(series.values.iter().all(|v| v.is_none()));
}

#[test]
fn node_not_found_surfaces_as_typed_error() {
    let (_dir, mut tree) = tree_with_node(60);
    let err = tree.fetch("does.not.exist", 0, 60).unwrap_err();
    assert!(matches!(err, ceres_core::CeresError::NodeNotFound(_)));
}

#[test]
fn find_matches_a_wildcard_component() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::create(dir.path(), HashMap::new()).unwrap();
    tree.create_node("servers.web1.cpu", HashMap::new()).unwrap();
    tree.create_node("servers.web2.cpu", HashMap::new()).unwrap();

    let mut matches = tree.find("servers.*.cpu", None, None).unwrap();
    matches.sort();
    assert_eq!(matches, vec!["servers.web1.cpu", "servers.web2.cpu"]);
}
