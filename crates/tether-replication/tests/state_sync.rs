//! State replication end to end: threshold suppression, interest cutoff,
//! and dead-reckoned remote state queries.

mod common;

use common::*;
use glam::Vec3;
use tether_topology::LinkConfig;

#[test]
fn test_sub_threshold_updates_send_nothing_until_a_jump() {
    let link = LinkConfig {
        latency: 0.01,
        ..LinkConfig::default()
    };
    let mut pair = pair(31, link);
    establish(&mut pair);
    let notices = collect_notices(&mut pair.b);
    let shared = schema();
    let a_handle = pair.a.local_handle();

    // Initial state flows once.
    pair.a
        .set_state(position_state(&shared, Vec3::ZERO, 0.0))
        .unwrap();
    run(&mut pair, 1.0, 0.05);
    let baseline = state_updates(&notices);
    assert!(baseline >= 1, "initial state should have arrived");

    // Ten ticks of drift under the 0.01 threshold: zero packets.
    for i in 1..=10 {
        let x = i as f32 * 0.001;
        pair.a
            .set_state(position_state(&shared, Vec3::new(x, 0.0, 0.0), 0.0))
            .unwrap();
        tick(&mut pair, 0.05);
    }
    run(&mut pair, 0.3, 0.05);
    assert_eq!(
        state_updates(&notices),
        baseline,
        "sub-threshold updates must not transmit"
    );

    // A full-unit jump: exactly one packet on the next scheduled send.
    pair.a
        .set_state(position_state(&shared, Vec3::new(1.01, 0.0, 0.0), 0.0))
        .unwrap();
    run(&mut pair, 0.5, 0.05);
    assert_eq!(state_updates(&notices), baseline + 1);

    // And the receiving proxy reflects the new value.
    let state = pair
        .b
        .proxy(a_handle)
        .unwrap()
        .state_at(pair.b.network_time(), 0.5)
        .expect("state should be queryable");
    assert!(
        (state.vec3(0).unwrap().x - 1.01).abs() < 1e-3,
        "receiver should hold the jumped position, got {}",
        state.vec3(0).unwrap().x
    );
}

#[test]
fn test_no_state_flows_beyond_the_furthest_band() {
    let mut pair = pair(32, LinkConfig::default());
    establish(&mut pair);
    let notices = collect_notices(&mut pair.b);
    let shared = schema();
    let b_handle = pair.b.local_handle();

    // B's avatar sits a kilometer away; default furthest band is 300.
    pair.a
        .proxy_mut(b_handle)
        .unwrap()
        .set_origin(Vec3::new(1000.0, 0.0, 0.0));
    pair.a
        .set_state(position_state(&shared, Vec3::ZERO, 0.0))
        .unwrap();
    run(&mut pair, 2.0, 0.05);

    assert_eq!(state_updates(&notices), 0);
}

#[test]
fn test_remote_state_is_dead_reckoned_between_packets() {
    let link = LinkConfig {
        latency: 0.02,
        ..LinkConfig::default()
    };
    let mut pair = pair(33, link);
    establish(&mut pair);
    let shared = schema();
    let a_handle = pair.a.local_handle();

    // A moves along x at 10 units/s, publishing every tick.
    let speed = 10.0f32;
    let dt = 0.02;
    for _ in 0..150 {
        let t = pair.a.network_time() as f32;
        pair.a
            .set_state(position_state(&shared, Vec3::new(speed * t, 0.0, 0.0), 0.0))
            .unwrap();
        tick(&mut pair, dt);
    }

    // B queries "now": extrapolation should bridge the transport delay and
    // land close to where A actually is.
    let query_time = pair.b.network_time();
    let state = pair
        .b
        .proxy(a_handle)
        .unwrap()
        .state_at(query_time, 0.5)
        .expect("state should be queryable");
    let expected = speed * pair.a.network_time() as f32;
    let got = state.vec3(0).unwrap().x;
    assert!(
        (got - expected).abs() < 1.0,
        "dead-reckoned x {got} should be near the true {expected}"
    );
}

#[test]
fn test_filtered_state_blends_toward_the_prediction() {
    let link = LinkConfig {
        latency: 0.02,
        ..LinkConfig::default()
    };
    let mut pair = pair(34, link);
    establish(&mut pair);
    let shared = schema();
    let a_handle = pair.a.local_handle();

    pair.a
        .set_state(position_state(&shared, Vec3::new(10.0, 0.0, 0.0), 0.0))
        .unwrap();
    run(&mut pair, 1.0, 0.05);

    let displayed = position_state(&shared, Vec3::ZERO, 0.0);
    let blended = pair
        .b
        .proxy(a_handle)
        .unwrap()
        .filtered_state_at(pair.b.network_time(), 0.5, &displayed, 0.25)
        .expect("filtered state should be queryable");

    // A quarter of the way from the displayed 0 toward the replicated 10.
    assert!((blended.vec3(0).unwrap().x - 2.5).abs() < 0.1);
}

#[test]
fn test_loopback_state_roundtrips_through_the_codecs() {
    let mut pair = pair(35, LinkConfig::default());
    let shared = schema();
    let state = position_state(&shared, Vec3::new(1.5, -2.0, 3.25), 0.75);
    pair.a.set_state(state.clone()).unwrap();
    assert_eq!(pair.a.loopback_state().unwrap(), state);
}
