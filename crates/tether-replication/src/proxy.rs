//! Per-remote-peer session state.
//!
//! A [`PeerProxy`] is created when the topology reports a new peer and
//! destroyed on disconnect; it is never reused. It tracks the connection
//! state machine, the three-deep shadow-state history used for dead
//! reckoning, outgoing event bookkeeping (bounded queue, resends, acks),
//! inbound dedup/ordering, and rolling latency statistics. The coordinator
//! owns every proxy and drives it from the tick thread; nothing here touches
//! the wire directly.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use glam::Vec3;

use tether_state::{Schema, State, UnpackError};
use tether_topology::NodeHandle;

use crate::clock::LatencyTracker;
use crate::config::ReplicationConfig;
use crate::message::Delivery;
use crate::window::{Window, seq_less_than};

/// Unanswered pings after which the peer counts as unresponsive.
pub(crate) const MAX_PENDING_PINGS: u32 = 16;

/// Gap between a new sample's stamp and the newest shadow stamp past which
/// the older samples are discarded: velocity estimated across a long silence
/// says nothing about current motion.
const SHADOW_RESET_GAP: f64 = 0.5;

/// Recently-seen sequence window size. Well under half the 256-value
/// sequence space, so an old duplicate cannot be mistaken for a wrapped
/// new sequence.
const DEDUP_WINDOW: usize = 64;

/// Connection lifecycle. Disconnection is terminal and destroys the proxy,
/// so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Proxy exists but no handshake has been exchanged yet.
    Connecting,
    /// Pings, state and events flow.
    Established,
}

#[derive(Debug, Clone)]
struct ShadowSample {
    state: State,
    time: f64,
}

#[derive(Debug)]
pub(crate) struct OutgoingEvent {
    pub sequence: u8,
    pub delivery: Delivery,
    pub type_index: u8,
    pub payload: Vec<u8>,
    pub sends: u32,
    pub last_sent: f64,
}

struct PendingEvent {
    time: f64,
    type_index: u8,
    payload: Vec<u8>,
}

/// An inbound event that cleared dedup and ordering, awaiting dispatch.
pub(crate) struct ReadyEvent {
    pub time: f64,
    pub type_index: u8,
    pub payload: Vec<u8>,
}

/// Outcome of handing an inbound event to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventReceipt {
    /// Fresh; queued for dispatch (possibly after ordering).
    Accepted,
    /// Already seen; dropped.
    Duplicate,
    /// Behind the ordered cursor; dropped.
    Stale,
}

/// Why an inbound state payload was not stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StateDrop {
    /// No schema is configured, so the payload cannot be decoded.
    NoSchema,
    /// Older than every retained shadow sample.
    TooOld,
    /// The payload did not decode.
    Undecodable(UnpackError),
}

/// The outgoing event queue is at its configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueFull;

fn class_index(delivery: Delivery) -> usize {
    match delivery {
        Delivery::BestEffort => 0,
        Delivery::ReliableOrdered => 1,
    }
}

// ---------------------------------------------------------------------------
// PeerProxy
// ---------------------------------------------------------------------------

/// Local stand-in for one remote peer.
pub struct PeerProxy {
    handle: NodeHandle,
    name: String,
    object: Option<Box<dyn Any>>,
    connection: ConnectionState,
    remote_status: u8,
    origin: Vec3,
    schema: Option<Arc<Schema>>,
    max_extrapolation: f64,

    shadow: [Option<ShadowSample>; 3],
    /// Network time the newest shadow sample arrived at.
    received_time: f64,

    /// Our state as last actually transmitted to this peer, slot-accurate.
    pub(crate) last_sent: Option<State>,
    pub(crate) states_sent: u32,

    pub(crate) time_until_ping: f64,
    pub(crate) time_until_state: f64,
    pub(crate) time_until_handshake: f64,

    tx_events: VecDeque<OutgoingEvent>,
    tx_cap: usize,
    next_tx_seq: [u8; 2],
    seen_rx: [Window<u8, DEDUP_WINDOW>; 2],
    ordered_pending: Box<[Option<PendingEvent>; 256]>,
    next_expected: u8,
    ready: Vec<ReadyEvent>,

    pub(crate) tracker: LatencyTracker,
    pub(crate) pending_pings: u32,
    /// Raw local time anything was last received from this peer.
    pub(crate) last_receive: f64,
}

impl PeerProxy {
    pub(crate) fn new(
        handle: NodeHandle,
        name: String,
        schema: Option<Arc<Schema>>,
        config: &ReplicationConfig,
        now_raw: f64,
    ) -> Self {
        Self {
            handle,
            name,
            object: None,
            connection: ConnectionState::Connecting,
            remote_status: 0,
            origin: Vec3::ZERO,
            schema,
            max_extrapolation: config.max_extrapolation,
            shadow: [None, None, None],
            received_time: 0.0,
            last_sent: None,
            states_sent: 0,
            time_until_ping: 0.0,
            time_until_state: 0.0,
            time_until_handshake: 0.0,
            tx_events: VecDeque::new(),
            tx_cap: config.max_in_flight_events,
            next_tx_seq: [0, 0],
            seen_rx: [Window::new(), Window::new()],
            ordered_pending: Box::new(std::array::from_fn(|_| None)),
            next_expected: 0,
            ready: Vec::new(),
            tracker: LatencyTracker::new(),
            pending_pings: 0,
            last_receive: now_raw,
        }
    }

    // -- identity ----------------------------------------------------------

    /// The peer's network handle.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// The peer's display name, as reported by the topology.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Returns `true` once the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.connection == ConnectionState::Established
    }

    /// The peer's last reported status byte.
    pub fn status(&self) -> u8 {
        self.remote_status
    }

    pub(crate) fn set_remote_status(&mut self, status: u8) {
        self.remote_status = status;
    }

    /// The peer's spatial origin used for interest management.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Sets the peer's spatial origin.
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    /// Application object attached to this peer, if any.
    pub fn object(&self) -> Option<&dyn Any> {
        self.object.as_deref()
    }

    /// Mutable access to the attached application object.
    pub fn object_mut(&mut self) -> Option<&mut dyn Any> {
        self.object.as_deref_mut()
    }

    /// Attaches an application object, replacing any previous one.
    pub fn set_object(&mut self, object: Box<dyn Any>) {
        self.object = Some(object);
    }

    /// Detaches and returns the application object.
    pub fn take_object(&mut self) -> Option<Box<dyn Any>> {
        self.object.take()
    }

    // -- latency -----------------------------------------------------------

    /// Estimated one-way latency to the peer, seconds.
    pub fn latency(&self) -> f64 {
        self.tracker.latency()
    }

    /// Standard deviation of the latency estimate.
    pub fn latency_spread(&self) -> f64 {
        self.tracker.spread()
    }

    /// The peer's own latency estimate toward us.
    pub fn reverse_latency(&self) -> f64 {
        self.tracker.reverse_latency()
    }

    /// Spread of the peer's reverse estimate.
    pub fn reverse_latency_spread(&self) -> f64 {
        self.tracker.reverse_spread()
    }

    /// Returns `true` once the round-trip window is full.
    pub fn is_latency_reliable(&self) -> bool {
        self.tracker.is_reliable()
    }

    /// Rate of the remote clock relative to ours.
    pub fn time_rate(&self) -> f64 {
        self.tracker.time_rate()
    }

    /// Discards all latency statistics.
    pub fn reset_latencies(&mut self) {
        self.tracker.reset();
    }

    // -- shadow state ------------------------------------------------------

    /// The remote peer's state at `time`.
    ///
    /// Returns the newest shadow sample directly when `time` is at or before
    /// it; extrapolates through the schema otherwise. `staleness_limit`
    /// bounds how much arrival delay is honored before sample times are
    /// shifted toward the present. Returns `None` with no samples, no
    /// schema, or a query past the extrapolation horizon.
    pub fn state_at(&self, time: f64, staleness_limit: f64) -> Option<State> {
        let schema = self.schema.as_ref()?;
        let s0 = self.shadow[0].as_ref()?;

        let offset = ((self.received_time - s0.time) - staleness_limit).max(0.0);
        let t0 = s0.time + offset;
        if time <= t0 {
            return Some(s0.state.clone());
        }
        if time - t0 > self.max_extrapolation {
            return None;
        }

        let prev = self.shadow[1].as_ref().map(|s| (&s.state, s.time + offset));
        let oldest = self.shadow[2].as_ref().map(|s| (&s.state, s.time + offset));
        Some(schema.extrapolate((&s0.state, t0), prev, oldest, time))
    }

    /// Like [`PeerProxy::state_at`], blended toward `current` (the caller's
    /// displayed state) by `coeff` to avoid visible snapping.
    pub fn filtered_state_at(
        &self,
        time: f64,
        staleness_limit: f64,
        current: &State,
        coeff: f32,
    ) -> Option<State> {
        let target = self.state_at(time, staleness_limit)?;
        let schema = self.schema.as_ref()?;
        match schema.blend(current, &target, coeff) {
            Ok(blended) => Some(blended),
            // A foreign `current` cannot be blended; the prediction stands.
            Err(_) => Some(target),
        }
    }

    pub(crate) fn record_state(
        &mut self,
        state_time: f64,
        payload: &[u8],
        now_network: f64,
    ) -> Result<(), StateDrop> {
        let Some(schema) = self.schema.clone() else {
            return Err(StateDrop::NoSchema);
        };
        let base = self.shadow[0].as_ref().map(|s| &s.state);
        let state = schema.unpack(payload, base).map_err(StateDrop::Undecodable)?;
        let sample = ShadowSample {
            state,
            time: state_time,
        };

        match self.shadow[0].as_ref().map(|s| s.time) {
            None => {
                self.shadow[0] = Some(sample);
                self.received_time = now_network;
            }
            Some(t0) if state_time >= t0 => {
                if state_time - t0 > SHADOW_RESET_GAP {
                    self.shadow = [Some(sample), None, None];
                } else {
                    self.shadow[2] = self.shadow[1].take();
                    self.shadow[1] = self.shadow[0].take();
                    self.shadow[0] = Some(sample);
                }
                self.received_time = now_network;
            }
            Some(_) => {
                // Late arrival: slot it into the older positions.
                match self.shadow[1].as_ref().map(|s| s.time) {
                    None => self.shadow[1] = Some(sample),
                    Some(t1) if state_time >= t1 => {
                        self.shadow[2] = self.shadow[1].take();
                        self.shadow[1] = Some(sample);
                    }
                    Some(_) => match self.shadow[2].as_ref().map(|s| s.time) {
                        None => self.shadow[2] = Some(sample),
                        Some(t2) if state_time >= t2 => self.shadow[2] = Some(sample),
                        Some(_) => return Err(StateDrop::TooOld),
                    },
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if any shadow sample is held.
    pub fn has_state(&self) -> bool {
        self.shadow[0].is_some()
    }

    // -- outgoing events ---------------------------------------------------

    pub(crate) fn enqueue_event(
        &mut self,
        delivery: Delivery,
        type_index: u8,
        payload: Vec<u8>,
    ) -> Result<u8, QueueFull> {
        if self.tx_events.len() >= self.tx_cap {
            return Err(QueueFull);
        }
        let class = class_index(delivery);
        let sequence = self.next_tx_seq[class];
        self.next_tx_seq[class] = sequence.wrapping_add(1);
        self.tx_events.push_back(OutgoingEvent {
            sequence,
            delivery,
            type_index,
            payload,
            sends: 0,
            last_sent: 0.0,
        });
        Ok(sequence)
    }

    /// Collects events due for (re)transmission and drops the expired.
    ///
    /// First sends go out immediately. Best-effort events leave the queue
    /// after their single send; reliable events stay until acknowledged,
    /// resending every `resend_interval`, and are dropped after
    /// `max_resends` attempts. Returns the wire work plus the expired count.
    pub(crate) fn due_events(
        &mut self,
        now_raw: f64,
        resend_interval: f64,
        max_resends: u32,
    ) -> (Vec<(u8, Delivery, u8, Vec<u8>)>, u32) {
        let mut to_send = Vec::new();
        let mut expired = 0;
        self.tx_events.retain_mut(|e| {
            let due = e.sends == 0
                || (e.delivery == Delivery::ReliableOrdered
                    && now_raw - e.last_sent >= resend_interval);
            if !due {
                return true;
            }
            if e.delivery == Delivery::ReliableOrdered && e.sends >= max_resends {
                expired += 1;
                return false;
            }
            e.sends += 1;
            e.last_sent = now_raw;
            to_send.push((e.sequence, e.delivery, e.type_index, e.payload.clone()));
            e.delivery == Delivery::ReliableOrdered
        });
        (to_send, expired)
    }

    /// Removes the reliable event matching an acknowledged sequence.
    pub(crate) fn acknowledge(&mut self, sequence: u8) -> bool {
        if let Some(pos) = self
            .tx_events
            .iter()
            .position(|e| e.delivery == Delivery::ReliableOrdered && e.sequence == sequence)
        {
            self.tx_events.remove(pos);
            true
        } else {
            false
        }
    }

    /// Outgoing events not yet acknowledged or flushed.
    pub fn queued_events(&self) -> usize {
        self.tx_events.len()
    }

    // -- inbound events ----------------------------------------------------

    pub(crate) fn record_event(
        &mut self,
        sequence: u8,
        delivery: Delivery,
        type_index: u8,
        payload: Vec<u8>,
        time: f64,
    ) -> EventReceipt {
        let class = class_index(delivery);
        if self.seen_rx[class].contains(sequence) {
            return EventReceipt::Duplicate;
        }
        match delivery {
            Delivery::BestEffort => {
                self.seen_rx[class].push(sequence);
                self.ready.push(ReadyEvent {
                    time,
                    type_index,
                    payload,
                });
            }
            Delivery::ReliableOrdered => {
                // A sequence behind the cursor is an old duplicate that aged
                // out of the dedup window; accepting it would poison a slot
                // for the next wrap.
                if sequence != self.next_expected && seq_less_than(sequence, self.next_expected) {
                    return EventReceipt::Stale;
                }
                self.seen_rx[class].push(sequence);
                self.ordered_pending[usize::from(sequence)] = Some(PendingEvent {
                    time,
                    type_index,
                    payload,
                });
                // Release the contiguous run starting at the cursor.
                while let Some(pending) =
                    self.ordered_pending[usize::from(self.next_expected)].take()
                {
                    self.ready.push(ReadyEvent {
                        time: pending.time,
                        type_index: pending.type_index,
                        payload: pending.payload,
                    });
                    self.next_expected = self.next_expected.wrapping_add(1);
                }
            }
        }
        EventReceipt::Accepted
    }

    pub(crate) fn take_ready(&mut self) -> Vec<ReadyEvent> {
        std::mem::take(&mut self.ready)
    }

    // -- lifecycle ---------------------------------------------------------

    pub(crate) fn establish(&mut self) {
        self.connection = ConnectionState::Established;
    }

    pub(crate) fn note_received(&mut self, now_raw: f64) {
        self.last_receive = now_raw;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
