//! Deterministic in-process topology for tests and simulation.
//!
//! A [`MemoryHub`] connects any number of [`MemoryTopology`] endpoints in one
//! thread. Links apply a configurable one-way latency with jitter, random
//! loss and random duplication, all driven by a seeded RNG so runs are
//! reproducible. Each endpoint advances its own logical clock through
//! `poll(dt)`; packets become deliverable once the receiver's clock passes
//! their arrival time, which also yields natural reordering under jitter.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::{MAX_PAYLOAD, NetworkTopology, NodeHandle, SendError, TopologyEvent};

/// Link behavior applied to every packet crossing the hub.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Base one-way latency in seconds.
    pub latency: f64,
    /// Jitter as a fraction of the base latency (0.0–1.0).
    pub jitter_fraction: f64,
    /// Probability a packet is silently dropped.
    pub loss_rate: f64,
    /// Probability a packet is delivered twice (with independent jitter).
    pub duplicate_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency: 0.0,
            jitter_fraction: 0.0,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

struct InFlight {
    deliver_at: f64,
    /// Send order; ties on `deliver_at` deliver in send order.
    seq: u64,
    from: NodeHandle,
    payload: Vec<u8>,
}

struct Node {
    name: String,
    /// Logical clock, advanced by this endpoint's `poll(dt)`.
    time: f64,
    /// Connect/disconnect notices queued for the next poll.
    notices: Vec<TopologyEvent>,
    /// Packets addressed to this node, unordered; drained by arrival time.
    mailbox: Vec<InFlight>,
}

struct HubInner {
    nodes: HashMap<u64, Node>,
    next_handle: u64,
    next_packet_seq: u64,
    primary: NodeHandle,
    link: LinkConfig,
    rng: StdRng,
}

impl HubInner {
    fn sample_latency(&mut self) -> f64 {
        let base = self.link.latency;
        if self.link.jitter_fraction <= 0.0 || base <= 0.0 {
            return base;
        }
        let spread = base * self.link.jitter_fraction;
        base + self.rng.random_range(-spread..spread)
    }
}

// ---------------------------------------------------------------------------
// MemoryHub
// ---------------------------------------------------------------------------

/// Shared fabric joining [`MemoryTopology`] endpoints.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Rc<RefCell<HubInner>>,
}

impl MemoryHub {
    /// Creates a hub with a perfect (zero-latency, lossless) link.
    pub fn new(seed: u64) -> Self {
        Self::with_link(seed, LinkConfig::default())
    }

    /// Creates a hub with the given link behavior.
    pub fn with_link(seed: u64, link: LinkConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HubInner {
                nodes: HashMap::new(),
                next_handle: 1,
                next_packet_seq: 0,
                primary: NodeHandle::INVALID,
                link,
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// Replaces the link behavior for all subsequent sends.
    pub fn set_link(&self, link: LinkConfig) {
        self.inner.borrow_mut().link = link;
    }

    /// Joins a new endpoint. Existing endpoints observe a
    /// [`TopologyEvent::PeerConnected`] on their next poll, and the new
    /// endpoint observes one for each existing peer. The first endpoint to
    /// join becomes the primary.
    pub fn join(&self, name: &str) -> MemoryTopology {
        let mut hub = self.inner.borrow_mut();
        let handle = NodeHandle(hub.next_handle);
        hub.next_handle += 1;

        let mut notices = Vec::new();
        for (&other, node) in hub.nodes.iter_mut() {
            node.notices.push(TopologyEvent::PeerConnected {
                node: handle,
                name: name.to_string(),
            });
            notices.push(TopologyEvent::PeerConnected {
                node: NodeHandle(other),
                name: node.name.clone(),
            });
        }

        hub.nodes.insert(
            handle.0,
            Node {
                name: name.to_string(),
                time: 0.0,
                notices,
                mailbox: Vec::new(),
            },
        );
        if !hub.primary.is_valid() {
            hub.primary = handle;
        }

        MemoryTopology {
            hub: Rc::clone(&self.inner),
            handle,
        }
    }

    /// Removes an endpoint, as if its process vanished. Remaining endpoints
    /// observe a [`TopologyEvent::PeerDisconnected`] on their next poll.
    pub fn kick(&self, handle: NodeHandle) {
        let mut hub = self.inner.borrow_mut();
        if hub.nodes.remove(&handle.0).is_none() {
            return;
        }
        for node in hub.nodes.values_mut() {
            node.notices
                .push(TopologyEvent::PeerDisconnected { node: handle });
        }
        if hub.primary == handle {
            hub.primary = NodeHandle::INVALID;
        }
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    /// Returns `true` if no endpoint is joined.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// MemoryTopology
// ---------------------------------------------------------------------------

/// One endpoint on a [`MemoryHub`].
pub struct MemoryTopology {
    hub: Rc<RefCell<HubInner>>,
    handle: NodeHandle,
}

impl NetworkTopology for MemoryTopology {
    fn local_handle(&self) -> NodeHandle {
        self.handle
    }

    fn poll(&mut self, dt: f64, events: &mut Vec<TopologyEvent>) {
        let mut hub = self.hub.borrow_mut();
        let Some(node) = hub.nodes.get_mut(&self.handle.0) else {
            return;
        };
        node.time += dt;
        let now = node.time;

        events.append(&mut node.notices);

        // Drain everything due, oldest arrival first.
        let mut due: Vec<InFlight> = Vec::new();
        let mut i = 0;
        while i < node.mailbox.len() {
            if node.mailbox[i].deliver_at <= now {
                due.push(node.mailbox.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by(|a, b| a.deliver_at.total_cmp(&b.deliver_at).then(a.seq.cmp(&b.seq)));
        for packet in due {
            events.push(TopologyEvent::Datagram {
                from: packet.from,
                payload: packet.payload,
            });
        }
    }

    fn send(&mut self, to: NodeHandle, payload: &[u8]) -> Result<(), SendError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(SendError::PayloadTooLarge {
                size: payload.len(),
            });
        }

        let mut hub = self.hub.borrow_mut();
        if !hub.nodes.contains_key(&to.0) {
            return Err(SendError::UnknownNode(to));
        }
        let sent_at = hub
            .nodes
            .get(&self.handle.0)
            .map(|n| n.time)
            .unwrap_or_default();

        if hub.rng.random::<f64>() < hub.link.loss_rate {
            trace!(from = self.handle.0, to = to.0, "packet lost");
            return Ok(());
        }
        let copies = if hub.rng.random::<f64>() < hub.link.duplicate_rate {
            2
        } else {
            1
        };

        for _ in 0..copies {
            let deliver_at = sent_at + hub.sample_latency();
            let seq = hub.next_packet_seq;
            hub.next_packet_seq += 1;
            let target = hub.nodes.get_mut(&to.0).expect("checked above");
            target.mailbox.push(InFlight {
                deliver_at,
                seq,
                from: self.handle,
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    fn set_primary(&mut self, node: NodeHandle) -> bool {
        let mut hub = self.hub.borrow_mut();
        if hub.nodes.contains_key(&node.0) {
            hub.primary = node;
            true
        } else {
            false
        }
    }

    fn primary(&self) -> NodeHandle {
        self.hub.borrow().primary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(topology: &mut MemoryTopology, dt: f64) -> Vec<TopologyEvent> {
        let mut events = Vec::new();
        topology.poll(dt, &mut events);
        events
    }

    #[test]
    fn test_join_surfaces_connect_events_both_ways() {
        let hub = MemoryHub::new(1);
        let mut a = hub.join("alpha");
        let mut b = hub.join("beta");

        let a_events = drain(&mut a, 0.0);
        assert_eq!(
            a_events,
            vec![TopologyEvent::PeerConnected {
                node: b.local_handle(),
                name: "beta".into()
            }]
        );
        let b_events = drain(&mut b, 0.0);
        assert_eq!(
            b_events,
            vec![TopologyEvent::PeerConnected {
                node: a.local_handle(),
                name: "alpha".into()
            }]
        );
    }

    #[test]
    fn test_datagram_arrives_after_latency() {
        let hub = MemoryHub::with_link(
            7,
            LinkConfig {
                latency: 0.1,
                ..LinkConfig::default()
            },
        );
        let mut a = hub.join("a");
        let mut b = hub.join("b");
        drain(&mut a, 0.0);
        drain(&mut b, 0.0);

        a.send(b.local_handle(), &[1, 2, 3]).unwrap();

        // Not yet due.
        assert!(drain(&mut b, 0.05).is_empty());
        // Due now.
        let events = drain(&mut b, 0.1);
        assert_eq!(
            events,
            vec![TopologyEvent::Datagram {
                from: a.local_handle(),
                payload: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let hub = MemoryHub::new(2);
        let mut a = hub.join("a");
        let b = hub.join("b");
        let err = a.send(b.local_handle(), &[0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert_eq!(
            err,
            SendError::PayloadTooLarge {
                size: MAX_PAYLOAD + 1
            }
        );
    }

    #[test]
    fn test_full_loss_drops_everything_silently() {
        let hub = MemoryHub::with_link(
            3,
            LinkConfig {
                loss_rate: 1.0,
                ..LinkConfig::default()
            },
        );
        let mut a = hub.join("a");
        let mut b = hub.join("b");
        drain(&mut a, 0.0);
        drain(&mut b, 0.0);

        for _ in 0..20 {
            a.send(b.local_handle(), &[9]).unwrap();
        }
        assert!(drain(&mut b, 1.0).is_empty());
    }

    #[test]
    fn test_duplication_delivers_twice() {
        let hub = MemoryHub::with_link(
            4,
            LinkConfig {
                duplicate_rate: 1.0,
                ..LinkConfig::default()
            },
        );
        let mut a = hub.join("a");
        let mut b = hub.join("b");
        drain(&mut a, 0.0);
        drain(&mut b, 0.0);

        a.send(b.local_handle(), &[5]).unwrap();
        let events = drain(&mut b, 0.1);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_kick_surfaces_disconnect_and_invalidates_sends() {
        let hub = MemoryHub::new(5);
        let mut a = hub.join("a");
        let b = hub.join("b");
        drain(&mut a, 0.0);

        let b_handle = b.local_handle();
        hub.kick(b_handle);

        assert_eq!(
            drain(&mut a, 0.0),
            vec![TopologyEvent::PeerDisconnected { node: b_handle }]
        );
        assert_eq!(
            a.send(b_handle, &[1]).unwrap_err(),
            SendError::UnknownNode(b_handle)
        );
    }

    #[test]
    fn test_first_joiner_is_primary_and_promotion_is_explicit() {
        let hub = MemoryHub::new(6);
        let mut a = hub.join("a");
        let b = hub.join("b");

        assert_eq!(a.primary(), a.local_handle());
        assert!(a.set_primary(b.local_handle()));
        assert_eq!(a.primary(), b.local_handle());
        assert!(!a.set_primary(NodeHandle(999)));
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = |seed: u64| -> Vec<usize> {
            let hub = MemoryHub::with_link(
                seed,
                LinkConfig {
                    latency: 0.05,
                    jitter_fraction: 0.5,
                    loss_rate: 0.3,
                    duplicate_rate: 0.2,
                },
            );
            let mut a = hub.join("a");
            let mut b = hub.join("b");
            drain(&mut a, 0.0);
            drain(&mut b, 0.0);

            let mut deliveries = Vec::new();
            for tick in 0..50u8 {
                a.send(b.local_handle(), &[tick]).unwrap();
                deliveries.push(drain(&mut b, 0.02).len());
            }
            deliveries
        };

        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }
}
