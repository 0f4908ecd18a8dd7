//! Supervisor lifecycle: reload, per-source isolation, teardown and handle leaks.

mod common;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use common::{enabled, fast_timing, target, wait_for, Plan, ScriptedOpener, Step};
use tuyere_capture::{CaptureState, CaptureSupervisor, SourceDescriptor, MAX_SOURCES};

fn all_disabled() -> BTreeMap<usize, SourceDescriptor> {
    (0..MAX_SOURCES)
        .map(|i| (i, SourceDescriptor::disabled(i)))
        .collect()
}

fn all_enabled() -> BTreeMap<usize, SourceDescriptor> {
    (0..MAX_SOURCES).map(|i| (i, enabled(i))).collect()
}

#[test]
fn disabled_sources_have_no_loops() {
    let opener = ScriptedOpener::new();
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());

    let report = sup.reload(&all_disabled());

    assert!(report.started.is_empty());
    assert_eq!(report.disabled.len(), MAX_SOURCES);
    assert_eq!(sup.active_count(), 0);
    for index in 0..MAX_SOURCES {
        assert!(!sup.is_connected(index));
        assert_eq!(sup.state(index), CaptureState::Disabled);
        assert!(sup.get_frame(index).is_none());
    }
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn all_48_sources_run_independently() {
    let opener = ScriptedOpener::new();
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());

    sup.reload(&all_disabled());
    let report = sup.reload(&all_enabled());

    assert_eq!(report.started.len(), MAX_SOURCES);
    assert_eq!(sup.active_count(), MAX_SOURCES);
    assert!(wait_for(Duration::from_secs(10), || {
        sup.connected_count() == MAX_SOURCES
    }));

    for index in 0..MAX_SOURCES {
        assert_eq!(opener.open_calls(&target(index)), 1);
        let frame = sup.get_frame(index).expect("frame for connected source");
        assert!(
            frame.pixels().iter().all(|&b| b == index as u8),
            "source {} received another source's frame",
            index
        );
    }

    sup.stop_all();
    assert_eq!(sup.active_count(), 0);
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn stop_all_releases_every_handle() {
    let opener = ScriptedOpener::new();
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());
    let configs: BTreeMap<usize, SourceDescriptor> = (0..8).map(|i| (i, enabled(i))).collect();

    sup.reload(&configs);
    assert!(wait_for(Duration::from_secs(5), || opener.open_handles() == 8));

    sup.stop_all();
    assert_eq!(opener.open_handles(), 0);
    for index in 0..8 {
        assert!(!sup.is_connected(index));
    }
}

#[test]
fn dropping_the_supervisor_stops_its_loops() {
    let opener = ScriptedOpener::new();
    {
        let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());
        sup.reload(&[(0, enabled(0)), (1, enabled(1))].into_iter().collect());
        assert!(wait_for(Duration::from_secs(5), || sup.connected_count() == 2));
    }
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn unopenable_source_stays_disconnected_until_reload() {
    let opener = ScriptedOpener::new();
    let bad = SourceDescriptor::network("rtsp://bad-host/stream", "Bad");
    opener.set_plan(&bad.target, Plan::unopenable());
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());

    let configs: BTreeMap<usize, SourceDescriptor> = [(7, bad.clone())].into_iter().collect();
    sup.reload(&configs);

    assert!(wait_for(Duration::from_secs(5), || {
        sup.state(7) == CaptureState::Failed
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!sup.is_connected(7));
    assert!(sup.get_frame(7).is_none());
    assert_eq!(opener.open_calls(&bad.target), 1, "open must not be retried");

    // Only a reload tries again.
    opener.set_plan(&bad.target, Plan::healthy());
    sup.reload(&configs);
    assert!(wait_for(Duration::from_secs(5), || sup.is_connected(7)));
    assert_eq!(opener.open_calls(&bad.target), 2);
}

#[test]
fn failing_source_does_not_affect_siblings() {
    let opener = ScriptedOpener::new();
    opener.set_plan(&target(2), Plan::script(vec![Step::Frame], Step::Empty));
    opener.set_plan(&target(3), Plan::unopenable());
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());

    let configs: BTreeMap<usize, SourceDescriptor> = (0..4).map(|i| (i, enabled(i))).collect();
    sup.reload(&configs);

    assert!(wait_for(Duration::from_secs(5), || {
        sup.state(2) == CaptureState::Failed && sup.state(3) == CaptureState::Failed
    }));
    assert!(sup.is_connected(0));
    assert!(sup.is_connected(1));
    assert!(sup.get_frame(0).is_some());
}

#[test]
fn accessors_do_not_block_on_a_stalled_producer() {
    let opener = ScriptedOpener::new();
    opener.set_plan(
        &target(0),
        Plan::script(vec![Step::Frame], Step::Block(Duration::from_millis(400))),
    );
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());
    sup.reload(&[(0, enabled(0))].into_iter().collect());
    assert!(wait_for(Duration::from_secs(5), || sup.is_connected(0)));
    // Let the worker enter its blocking read.
    std::thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    for _ in 0..100 {
        assert!(sup.is_connected(0));
        assert!(sup.get_frame(0).is_some());
    }
    assert!(started.elapsed() < Duration::from_millis(100));

    sup.stop_all();
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn reload_replaces_running_loops() {
    let opener = ScriptedOpener::new();
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());
    let configs: BTreeMap<usize, SourceDescriptor> = [(5, enabled(5))].into_iter().collect();

    sup.reload(&configs);
    assert!(wait_for(Duration::from_secs(5), || sup.is_connected(5)));
    sup.reload(&configs);
    assert!(wait_for(Duration::from_secs(5), || sup.is_connected(5)));

    assert_eq!(opener.open_calls(&target(5)), 2);
    assert_eq!(opener.open_handles(), 1);
    assert_eq!(sup.active_count(), 1);

    // Disabling the source removes its loop.
    sup.reload(&[(5, SourceDescriptor::disabled(5))].into_iter().collect());
    assert_eq!(sup.active_count(), 0);
    assert_eq!(opener.open_handles(), 0);
}

#[test]
fn snapshot_reports_each_loop() {
    let opener = ScriptedOpener::new();
    let mut sup = CaptureSupervisor::new(opener.clone(), fast_timing());
    sup.reload(&[(9, enabled(9)), (1, enabled(1))].into_iter().collect());
    assert!(wait_for(Duration::from_secs(5), || sup.connected_count() == 2));

    let snapshot = sup.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].index, 1);
    assert_eq!(snapshot[1].index, 9);
    assert_eq!(snapshot[1].name, "Camera 10");
    assert!(snapshot.iter().all(|s| s.connected && s.frames_captured > 0));
}
