//! The per-node replication coordinator.
//!
//! Owns the topology capability, the peer proxies, the event registry and
//! listener registries, and the network clock. `update(dt)` is the single
//! mutation point: it pumps the topology, runs the per-peer connection state
//! machines and cadence timers, transmits pings / state deltas / queued
//! events, and dispatches inbound events and lifecycle notices to listeners —
//! all synchronously, on the calling thread, once per simulation tick.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use tether_state::{Schema, SchemaError, State};
use tether_topology::{NetworkTopology, NodeHandle, TopologyEvent};

use crate::clock::NetworkClock;
use crate::config::{ConfigError, ReplicationConfig};
use crate::event::{EventContext, EventError, EventListeners, EventRegistry, ReplicatedEvent};
use crate::message::{
    Delivery, HandshakeKind, MAX_STATE_PAYLOAD, Message, time_to_wire, wire_to_time,
};
use crate::proxy::{
    ConnectionState, EventReceipt, MAX_PENDING_PINGS, PeerProxy, ReadyEvent, StateDrop,
};

/// Why a peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The topology reported the peer gone, or it said goodbye.
    Remote,
    /// The peer stopped answering.
    Timeout,
    /// The peer declared a different schema or event-type order.
    Incompatible,
    /// We disconnected it.
    Local,
}

/// Lifecycle and state notifications delivered to peer listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerNotice {
    /// Handshake completed; the peer is live.
    Connected {
        /// The established peer.
        node: NodeHandle,
    },
    /// The peer is gone; its proxy has been destroyed.
    Disconnected {
        /// The departed peer.
        node: NodeHandle,
        /// Why.
        reason: DisconnectReason,
    },
    /// A fresh state sample was stored for the peer.
    StateUpdated {
        /// The peer whose shadow state advanced.
        node: NodeHandle,
    },
}

/// Drop and anomaly counters. None of these are errors; they exist so an
/// operator can see what an unreliable link is doing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    /// Datagrams that failed to decode, and events with unknown type tags.
    pub malformed_messages: u64,
    /// Valid messages from peers not yet (or no longer) established.
    pub premature_messages: u64,
    /// Events dropped by the dedup window.
    pub duplicate_events: u64,
    /// Ordered events behind the delivery cursor.
    pub stale_events: u64,
    /// Reliable events dropped after exhausting their resends.
    pub expired_events: u64,
    /// State payloads dropped (undecodable, too old, or no schema).
    pub dropped_states: u64,
    /// Pongs with no matching outstanding ping.
    pub unsolicited_pongs: u64,
    /// Sends the topology refused; treated as packet loss.
    pub send_failures: u64,
}

/// Errors from [`Coordinator::new`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinatorError {
    /// The configuration is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The schema's packed bound cannot fit a state message.
    #[error("schema payload bound of {required} byte(s) exceeds the {budget}-byte state budget")]
    SchemaTooLarge {
        /// The schema's worst-case payload.
        required: usize,
        /// Room in a state message.
        budget: usize,
    },
}

/// Errors from [`Coordinator::set_state`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SetStateError {
    /// The coordinator was built without a schema.
    #[error("no schema configured")]
    NoSchema,

    /// The state does not match the schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors from sending an event to a peer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SendEventError {
    /// No proxy exists for the handle.
    #[error("unknown peer {0:?}")]
    UnknownPeer(NodeHandle),

    /// The peer has not completed its handshake.
    #[error("peer {0:?} is not established")]
    NotEstablished(NodeHandle),

    /// The peer's outgoing queue is at its cap; try again after a tick.
    #[error("outgoing event queue for peer {0:?} is full")]
    QueueFull(NodeHandle),

    /// The event could not be encoded.
    #[error(transparent)]
    Event(#[from] EventError),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The per-node orchestrator of peer state replication.
pub struct Coordinator {
    topology: Box<dyn NetworkTopology>,
    config: ReplicationConfig,
    registry: EventRegistry,
    schema: Option<Arc<Schema>>,
    clock: NetworkClock,

    state: Option<State>,
    status: u8,
    origin: Vec3,

    proxies: HashMap<NodeHandle, PeerProxy>,
    event_listeners: EventListeners,
    peer_listeners: Vec<Box<dyn FnMut(&PeerNotice)>>,
    pending_notices: Vec<PeerNotice>,
    diagnostics: Diagnostics,
    scratch: Vec<TopologyEvent>,
}

impl Coordinator {
    /// Creates a coordinator over `topology`.
    ///
    /// The event registry and schema are fixed from here on: both are part
    /// of the wire contract the handshake digest checks, and every peer must
    /// declare them identically.
    pub fn new(
        topology: Box<dyn NetworkTopology>,
        config: ReplicationConfig,
        registry: EventRegistry,
        schema: Option<Arc<Schema>>,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        if let Some(schema) = &schema {
            let required = schema.max_packed_len();
            if required > MAX_STATE_PAYLOAD {
                return Err(CoordinatorError::SchemaTooLarge {
                    required,
                    budget: MAX_STATE_PAYLOAD,
                });
            }
        }
        let clock = NetworkClock::new(&config);
        Ok(Self {
            topology,
            config,
            registry,
            schema,
            clock,
            state: None,
            status: 0,
            origin: Vec3::ZERO,
            proxies: HashMap::new(),
            event_listeners: EventListeners::default(),
            peer_listeners: Vec::new(),
            pending_notices: Vec::new(),
            diagnostics: Diagnostics::default(),
            scratch: Vec::new(),
        })
    }

    // -- local node --------------------------------------------------------

    /// Our handle on the topology.
    pub fn local_handle(&self) -> NodeHandle {
        self.topology.local_handle()
    }

    /// Replaces our outgoing state for subsequent transmissions.
    pub fn set_state(&mut self, state: State) -> Result<(), SetStateError> {
        let schema = self.schema.as_ref().ok_or(SetStateError::NoSchema)?;
        schema.validate_state(&state)?;
        self.state = Some(state);
        Ok(())
    }

    /// Our status byte, carried in outgoing pings.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Sets our status byte.
    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    /// Our spatial origin for interest management.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Sets our spatial origin.
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    /// Packs and immediately unpacks our own state, exercising the same
    /// codec path remote peers will see.
    pub fn loopback_state(&self) -> Option<State> {
        let schema = self.schema.as_ref()?;
        let state = self.state.as_ref()?;
        let packed = schema.pack(state, None, true).ok()??;
        schema.unpack(&packed.bytes, None).ok()
    }

    // -- time --------------------------------------------------------------

    /// Raw local elapsed time, seconds.
    pub fn raw_time(&self) -> f64 {
        self.clock.raw_time()
    }

    /// Smoothed network time, seconds.
    pub fn network_time(&self) -> f64 {
        self.clock.network_time()
    }

    /// Whether the smoothed clock has converged across peers.
    pub fn is_time_synchronized(&self) -> bool {
        self.clock.is_synchronized()
    }

    /// Variance of the recent network-time errors.
    pub fn time_variance(&self) -> f64 {
        self.clock.time_variance()
    }

    // -- peers -------------------------------------------------------------

    /// The proxy for `handle`, if one exists.
    pub fn proxy(&self, handle: NodeHandle) -> Option<&PeerProxy> {
        self.proxies.get(&handle)
    }

    /// Mutable access to the proxy for `handle`.
    pub fn proxy_mut(&mut self, handle: NodeHandle) -> Option<&mut PeerProxy> {
        self.proxies.get_mut(&handle)
    }

    /// Iterates all live proxies.
    pub fn peers(&self) -> impl Iterator<Item = &PeerProxy> {
        self.proxies.values()
    }

    /// Number of live proxies, connecting or established.
    pub fn peer_count(&self) -> usize {
        self.proxies.len()
    }

    /// Promotes `node` (a peer or our own handle) to primary.
    pub fn set_primary(&mut self, node: NodeHandle) -> bool {
        self.topology.set_primary(node)
    }

    /// The current primary designation.
    pub fn primary(&self) -> NodeHandle {
        self.topology.primary()
    }

    /// Whether we hold the primary designation.
    pub fn is_primary(&self) -> bool {
        self.topology.primary() == self.topology.local_handle()
    }

    /// Disconnects a peer: says goodbye, destroys its proxy, notifies
    /// listeners. Returns `false` for an unknown handle.
    pub fn disconnect(&mut self, handle: NodeHandle) -> bool {
        if !self.proxies.contains_key(&handle) {
            return false;
        }
        self.send_message(handle, &Message::Bye);
        self.remove_proxy(handle, DisconnectReason::Local);
        true
    }

    /// Says goodbye to every peer and drops all session state. The
    /// coordinator can keep running; peers may reconnect through the
    /// topology.
    pub fn shutdown(&mut self) {
        let handles: Vec<NodeHandle> = self.proxies.keys().copied().collect();
        for handle in handles {
            self.send_message(handle, &Message::Bye);
        }
        self.proxies.clear();
        self.pending_notices.clear();
    }

    /// Drop and anomaly counters.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    // -- listeners ---------------------------------------------------------

    /// Registers a listener for peer lifecycle and state notices.
    pub fn on_peer_event(&mut self, listener: impl FnMut(&PeerNotice) + 'static) {
        self.peer_listeners.push(Box::new(listener));
    }

    /// Registers a typed listener for a registered event type.
    pub fn on_event<T, F>(&mut self, listener: F) -> Result<(), EventError>
    where
        T: ReplicatedEvent,
        F: FnMut(&EventContext, &T) + 'static,
    {
        if !self.registry.contains(TypeId::of::<T>()) {
            return Err(EventError::UnregisteredType);
        }
        self.event_listeners.register::<T, F>(listener);
        Ok(())
    }

    // -- events ------------------------------------------------------------

    /// Queues an event for one established peer.
    pub fn send_event<T: ReplicatedEvent>(
        &mut self,
        to: NodeHandle,
        event: &T,
        delivery: Delivery,
    ) -> Result<(), SendEventError> {
        let (type_index, payload) = self.registry.encode(event)?;
        let proxy = self
            .proxies
            .get_mut(&to)
            .ok_or(SendEventError::UnknownPeer(to))?;
        if !proxy.is_established() {
            return Err(SendEventError::NotEstablished(to));
        }
        proxy
            .enqueue_event(delivery, type_index, payload)
            .map_err(|_| SendEventError::QueueFull(to))?;
        Ok(())
    }

    /// Queues an event for every established peer. Peers whose queue is full
    /// are skipped (and counted); returns how many peers got it.
    pub fn broadcast_event<T: ReplicatedEvent>(
        &mut self,
        event: &T,
        delivery: Delivery,
    ) -> Result<usize, SendEventError> {
        let (type_index, payload) = self.registry.encode(event)?;
        let mut queued = 0;
        for proxy in self.proxies.values_mut() {
            if !proxy.is_established() {
                continue;
            }
            match proxy.enqueue_event(delivery, type_index, payload.clone()) {
                Ok(_) => queued += 1,
                Err(_) => {
                    warn!(peer = ?proxy.handle(), "broadcast skipped peer with full event queue");
                }
            }
        }
        Ok(queued)
    }

    // -- the tick ----------------------------------------------------------

    /// Runs one tick: pumps the topology, drives every peer's timers and
    /// queues, and dispatches listeners. The only place state mutates from
    /// network input.
    pub fn update(&mut self, dt: f64) {
        self.clock.advance(dt);

        let mut events = std::mem::take(&mut self.scratch);
        events.clear();
        self.topology.poll(dt, &mut events);
        for event in events.drain(..) {
            match event {
                TopologyEvent::PeerConnected { node, name } => self.on_peer_connected(node, name),
                TopologyEvent::PeerDisconnected { node } => {
                    debug!(?node, "topology reported peer gone");
                    self.remove_proxy(node, DisconnectReason::Remote);
                }
                TopologyEvent::Datagram { from, payload } => self.on_datagram(from, &payload),
            }
        }
        self.scratch = events;

        self.drive_proxies(dt);
        self.dispatch_ready_events();
        self.dispatch_notices();
    }

    fn on_peer_connected(&mut self, node: NodeHandle, name: String) {
        debug!(?node, name, "peer connected, handshaking");
        let proxy = PeerProxy::new(
            node,
            name,
            self.schema.clone(),
            &self.config,
            self.clock.raw_time(),
        );
        self.proxies.insert(node, proxy);
        let handshake = self.handshake(HandshakeKind::Announce);
        self.send_message(node, &handshake);
        if let Some(proxy) = self.proxies.get_mut(&node) {
            proxy.time_until_handshake = self.config.handshake_interval;
        }
    }

    fn handshake(&self, kind: HandshakeKind) -> Message {
        Message::Handshake {
            kind,
            schema_digest: self.schema.as_ref().map_or(0, |s| s.layout_digest()),
            event_digest: self.registry.digest(),
        }
    }

    fn on_datagram(&mut self, from: NodeHandle, payload: &[u8]) {
        let (message, msg_time) = match Message::decode(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.diagnostics.malformed_messages += 1;
                trace!(?from, %err, "malformed datagram dropped");
                return;
            }
        };

        let now_raw = self.clock.raw_time();
        let network_now = self.clock.network_time();
        let our_schema_digest = self.schema.as_ref().map_or(0, |s| s.layout_digest());
        let our_event_digest = self.registry.digest();

        let mut reply: Option<Message> = None;
        let mut remove: Option<DisconnectReason> = None;

        {
            let Some(proxy) = self.proxies.get_mut(&from) else {
                self.diagnostics.premature_messages += 1;
                trace!(?from, "datagram from unknown peer dropped");
                return;
            };

            match message {
                Message::Handshake {
                    kind,
                    schema_digest,
                    event_digest,
                } => {
                    if schema_digest != our_schema_digest || event_digest != our_event_digest {
                        warn!(
                            ?from,
                            schema_digest,
                            event_digest,
                            "peer declares incompatible schema or event order"
                        );
                        remove = Some(DisconnectReason::Incompatible);
                    } else {
                        proxy.note_received(now_raw);
                        if !proxy.is_established() {
                            info!(?from, "peer established");
                            proxy.establish();
                            proxy.time_until_ping = 0.0;
                            proxy.time_until_state = 0.0;
                            self.pending_notices.push(PeerNotice::Connected { node: from });
                        }
                        if kind == HandshakeKind::Announce {
                            reply = Some(Message::Handshake {
                                kind: HandshakeKind::Reply,
                                schema_digest: our_schema_digest,
                                event_digest: our_event_digest,
                            });
                        }
                    }
                }

                Message::Ping { echo_time, status } => {
                    if proxy.is_established() {
                        proxy.note_received(now_raw);
                        proxy.set_remote_status(status);
                        if proxy.tracker.has_samples() {
                            let one_way = proxy.tracker.one_way_estimate();
                            self.clock.observe(msg_time, one_way);
                        }
                        reply = Some(Message::Pong {
                            echo_time,
                            latency: time_to_wire(proxy.latency()),
                            latency_spread: time_to_wire(proxy.latency_spread()),
                        });
                    } else {
                        self.diagnostics.premature_messages += 1;
                    }
                }

                Message::Pong {
                    echo_time,
                    latency,
                    latency_spread,
                } => {
                    if !proxy.is_established() {
                        self.diagnostics.premature_messages += 1;
                    } else if proxy.pending_pings == 0 {
                        self.diagnostics.unsolicited_pongs += 1;
                        trace!(?from, "pong without outstanding ping");
                    } else {
                        proxy.pending_pings -= 1;
                        proxy.note_received(now_raw);
                        let round_trip = (now_raw - wire_to_time(echo_time)).max(0.0);
                        proxy.tracker.record_round_trip(round_trip);
                        proxy
                            .tracker
                            .record_reverse(wire_to_time(latency), wire_to_time(latency_spread));
                        proxy.tracker.record_remote_time(now_raw, msg_time);
                        let one_way = proxy.tracker.one_way_estimate();
                        self.clock.observe(msg_time, one_way);
                    }
                }

                Message::State { payload } => {
                    if proxy.is_established() {
                        proxy.note_received(now_raw);
                        match proxy.record_state(msg_time, &payload, network_now) {
                            Ok(()) => {
                                self.pending_notices
                                    .push(PeerNotice::StateUpdated { node: from });
                            }
                            Err(drop) => {
                                self.diagnostics.dropped_states += 1;
                                if let StateDrop::Undecodable(err) = drop {
                                    trace!(?from, %err, "state payload dropped");
                                }
                            }
                        }
                        if proxy.tracker.has_samples() {
                            let one_way = proxy.tracker.one_way_estimate();
                            self.clock.observe(msg_time, one_way);
                        }
                    } else {
                        self.diagnostics.premature_messages += 1;
                    }
                }

                Message::Event {
                    sequence,
                    delivery,
                    type_index,
                    payload,
                } => {
                    if proxy.is_established() {
                        proxy.note_received(now_raw);
                        // Ack before dedup: the peer resends until it hears
                        // us, so duplicates must be re-acknowledged too.
                        if delivery == Delivery::ReliableOrdered {
                            reply = Some(Message::EventAck { sequence });
                        }
                        match proxy.record_event(sequence, delivery, type_index, payload, msg_time)
                        {
                            EventReceipt::Accepted => {}
                            EventReceipt::Duplicate => self.diagnostics.duplicate_events += 1,
                            EventReceipt::Stale => self.diagnostics.stale_events += 1,
                        }
                        if proxy.tracker.has_samples() {
                            let one_way = proxy.tracker.one_way_estimate();
                            self.clock.observe(msg_time, one_way);
                        }
                    } else {
                        self.diagnostics.premature_messages += 1;
                    }
                }

                Message::EventAck { sequence } => {
                    if proxy.is_established() {
                        proxy.note_received(now_raw);
                        proxy.acknowledge(sequence);
                    } else {
                        self.diagnostics.premature_messages += 1;
                    }
                }

                Message::Bye => {
                    debug!(?from, "peer said goodbye");
                    remove = Some(DisconnectReason::Remote);
                }
            }
        }

        if let Some(message) = reply {
            self.send_message(from, &message);
        }
        if let Some(reason) = remove {
            self.remove_proxy(from, reason);
        }
    }

    fn drive_proxies(&mut self, dt: f64) {
        let now_raw = self.clock.raw_time();
        let handles: Vec<NodeHandle> = self.proxies.keys().copied().collect();

        for handle in handles {
            let mut outgoing: Vec<Message> = Vec::new();
            let mut remove: Option<DisconnectReason> = None;
            let mut expired = 0u32;

            {
                let Some(proxy) = self.proxies.get_mut(&handle) else {
                    continue;
                };

                let silent_for = now_raw - proxy.last_receive;
                if silent_for > self.config.peer_timeout || proxy.pending_pings > MAX_PENDING_PINGS
                {
                    warn!(?handle, silent_for, "peer timed out");
                    remove = Some(DisconnectReason::Timeout);
                } else {
                    match proxy.connection_state() {
                        ConnectionState::Connecting => {
                            proxy.time_until_handshake -= dt;
                            if proxy.time_until_handshake <= 0.0 {
                                outgoing.push(Message::Handshake {
                                    kind: HandshakeKind::Announce,
                                    schema_digest: self
                                        .schema
                                        .as_ref()
                                        .map_or(0, |s| s.layout_digest()),
                                    event_digest: self.registry.digest(),
                                });
                                proxy.time_until_handshake = self.config.handshake_interval;
                            }
                        }
                        ConnectionState::Established => {
                            proxy.time_until_ping -= dt;
                            if proxy.time_until_ping <= 0.0 {
                                outgoing.push(Message::Ping {
                                    echo_time: time_to_wire(now_raw),
                                    status: self.status,
                                });
                                proxy.pending_pings += 1;
                                proxy.time_until_ping = self.config.ping_interval;
                            }

                            proxy.time_until_state -= dt;
                            if proxy.time_until_state <= 0.0 {
                                let distance = (proxy.origin() - self.origin).length();
                                if distance <= self.config.furthest_distance
                                    && let (Some(schema), Some(state)) = (&self.schema, &self.state)
                                {
                                    let force_full = proxy.last_sent.is_none()
                                        || proxy.states_sent % self.config.full_state_interval == 0;
                                    match schema.pack(state, proxy.last_sent.as_ref(), force_full) {
                                        Ok(Some(packed)) => {
                                            outgoing.push(Message::State {
                                                payload: packed.bytes,
                                            });
                                            let advanced = match proxy.last_sent.take() {
                                                Some(last) => {
                                                    schema.apply_mask(&last, state, packed.mask)
                                                }
                                                None => state.clone(),
                                            };
                                            proxy.last_sent = Some(advanced);
                                            proxy.states_sent += 1;
                                        }
                                        Ok(None) => {}
                                        Err(err) => {
                                            warn!(?handle, %err, "own state does not match schema");
                                        }
                                    }
                                }

                                // Re-evaluate the interest band and reset.
                                let band = ((distance - self.config.near_distance)
                                    / (self.config.far_distance - self.config.near_distance))
                                    .clamp(0.0, 1.0)
                                    as f64;
                                proxy.time_until_state = self.config.near_state_interval
                                    + (self.config.far_state_interval
                                        - self.config.near_state_interval)
                                        * band;
                            }

                            let resend_interval = self
                                .config
                                .min_resend_interval
                                .max(self.config.resend_rtt_multiplier * proxy.latency() * 2.0);
                            let (due, dropped) = proxy.due_events(
                                now_raw,
                                resend_interval,
                                self.config.max_event_resends,
                            );
                            expired = dropped;
                            for (sequence, delivery, type_index, payload) in due {
                                outgoing.push(Message::Event {
                                    sequence,
                                    delivery,
                                    type_index,
                                    payload,
                                });
                            }
                        }
                    }
                }
            }

            if expired > 0 {
                self.diagnostics.expired_events += u64::from(expired);
                warn!(?handle, expired, "reliable events undeliverable, dropped");
            }
            for message in outgoing {
                self.send_message(handle, &message);
            }
            if let Some(reason) = remove {
                self.send_message(handle, &Message::Bye);
                self.remove_proxy(handle, reason);
            }
        }
    }

    fn dispatch_ready_events(&mut self) {
        let mut batch: Vec<(NodeHandle, ReadyEvent)> = Vec::new();
        for (&handle, proxy) in self.proxies.iter_mut() {
            for event in proxy.take_ready() {
                batch.push((handle, event));
            }
        }
        if batch.is_empty() {
            return;
        }

        let mut listeners = std::mem::take(&mut self.event_listeners);
        for (peer, event) in batch {
            match self.registry.decode(event.type_index, &event.payload) {
                Some((type_id, boxed)) => {
                    let ctx = EventContext {
                        peer,
                        time: event.time,
                    };
                    listeners.dispatch(type_id, &ctx, boxed.as_ref());
                }
                None => {
                    self.diagnostics.malformed_messages += 1;
                    trace!(?peer, type_index = event.type_index, "undecodable event dropped");
                }
            }
        }
        self.event_listeners = listeners;
    }

    fn dispatch_notices(&mut self) {
        if self.pending_notices.is_empty() {
            return;
        }
        let notices = std::mem::take(&mut self.pending_notices);
        let mut listeners = std::mem::take(&mut self.peer_listeners);
        for notice in &notices {
            for listener in listeners.iter_mut() {
                listener(notice);
            }
        }
        self.peer_listeners = listeners;
    }

    fn remove_proxy(&mut self, handle: NodeHandle, reason: DisconnectReason) {
        if let Some(proxy) = self.proxies.remove(&handle) {
            if proxy.is_established() || reason == DisconnectReason::Incompatible {
                self.pending_notices.push(PeerNotice::Disconnected {
                    node: handle,
                    reason,
                });
            } else {
                trace!(?handle, ?reason, "connecting peer discarded");
            }
        }
    }

    fn send_message(&mut self, to: NodeHandle, message: &Message) {
        let bytes = match message.encode(self.clock.network_time()) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Payload bounds are enforced upstream; hitting this means a
                // bookkeeping bug, not a wire condition.
                warn!(?to, %err, "message encode failed");
                self.diagnostics.send_failures += 1;
                return;
            }
        };
        if let Err(err) = self.topology.send(to, &bytes) {
            // Transient by contract: the cadence and retry machinery absorb it.
            self.diagnostics.send_failures += 1;
            trace!(?to, %err, "send failed");
        }
    }
}
