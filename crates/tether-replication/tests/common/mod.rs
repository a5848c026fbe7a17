//! Shared fixtures: two coordinators joined through an in-memory hub.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use tether_replication::{Coordinator, EventRegistry, PeerNotice, ReplicationConfig};
use tether_state::{Float32Codec, Schema, SchemaBuilder, State, Value, Vec3Codec};
use tether_topology::{LinkConfig, MemoryHub};

/// Chatty test event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
}

/// Numbered test event for ordering assertions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Impulse {
    pub id: u32,
}

pub fn registry() -> EventRegistry {
    let mut r = EventRegistry::new();
    r.register::<Chat>("chat").unwrap();
    r.register::<Impulse>("impulse").unwrap();
    r
}

/// Position + heading, the schema both ends declare.
pub fn schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .slot(Vec3Codec::new(0.01))
            .slot(Float32Codec::new(0.1))
            .build()
            .unwrap(),
    )
}

pub fn position_state(schema: &Schema, pos: Vec3, heading: f32) -> State {
    schema
        .state_from_values(vec![Value::Vec3(pos), Value::Float(heading)])
        .unwrap()
}

pub struct Pair {
    pub hub: MemoryHub,
    pub a: Coordinator,
    pub b: Coordinator,
}

pub fn pair(seed: u64, link: LinkConfig) -> Pair {
    pair_with_config(seed, link, ReplicationConfig::default())
}

pub fn pair_with_config(seed: u64, link: LinkConfig, config: ReplicationConfig) -> Pair {
    let hub = MemoryHub::with_link(seed, link);
    let shared = schema();
    let a = Coordinator::new(
        Box::new(hub.join("alpha")),
        config.clone(),
        registry(),
        Some(Arc::clone(&shared)),
    )
    .unwrap();
    let b = Coordinator::new(Box::new(hub.join("beta")), config, registry(), Some(shared)).unwrap();
    Pair { hub, a, b }
}

pub fn tick(pair: &mut Pair, dt: f64) {
    pair.a.update(dt);
    pair.b.update(dt);
}

pub fn run(pair: &mut Pair, seconds: f64, dt: f64) {
    let steps = (seconds / dt).round() as usize;
    for _ in 0..steps {
        tick(pair, dt);
    }
}

/// Ticks until both sides report the other established.
pub fn establish(pair: &mut Pair) {
    let a_handle = pair.a.local_handle();
    let b_handle = pair.b.local_handle();
    for _ in 0..300 {
        tick(pair, 0.05);
        let a_sees = pair.a.proxy(b_handle).is_some_and(|p| p.is_established());
        let b_sees = pair.b.proxy(a_handle).is_some_and(|p| p.is_established());
        if a_sees && b_sees {
            return;
        }
    }
    panic!("peers failed to establish");
}

/// Registers an [`Impulse`] listener collecting ids in arrival order.
pub fn collect_impulses(c: &mut Coordinator) -> Rc<RefCell<Vec<u32>>> {
    let sink: Rc<RefCell<Vec<u32>>> = Rc::default();
    let out = Rc::clone(&sink);
    c.on_event::<Impulse, _>(move |_ctx, e| out.borrow_mut().push(e.id))
        .unwrap();
    sink
}

/// Registers a peer listener collecting every notice.
pub fn collect_notices(c: &mut Coordinator) -> Rc<RefCell<Vec<PeerNotice>>> {
    let sink: Rc<RefCell<Vec<PeerNotice>>> = Rc::default();
    let out = Rc::clone(&sink);
    c.on_peer_event(move |notice| out.borrow_mut().push(*notice));
    sink
}

/// Counts `StateUpdated` notices for the given collector.
pub fn state_updates(notices: &Rc<RefCell<Vec<PeerNotice>>>) -> usize {
    notices
        .borrow()
        .iter()
        .filter(|n| matches!(n, PeerNotice::StateUpdated { .. }))
        .count()
}
