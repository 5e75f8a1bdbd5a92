//! The session: single writer of all replicated state.
//!
//! Background loops feed an unbounded queue; [`NetSession::tick`] drains it,
//! dispatches every message, enforces the connection timeouts and, on the
//! authority, runs change detection for every entity. Nothing else mutates
//! the registry, the reconciliation state or the connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::event::NetEvent;
use super::inbound::{Inbound, InboundSender};
use super::peers::PeerTable;
use super::reconcile::Reconciliation;
use crate::core::{
    Clock, ConnectionError, NetConfig, NetError, NetworkId, NetworkIdAllocator, PeerId, Result,
    SystemClock, Transport, WorldError,
};
use crate::sync::ComponentUpdate;
use crate::transport::{
    ConnectionManager, ConnectionPhase, Fragmenter, Message, MissingObject, PeerRequest,
    RemoveObject, SceneObject, SceneSnapshot, SpawnObject,
};
use crate::world::{Constructed, EntityFactory, EntityRegistry, NetEntity, NetworkObject};

/// Scene used by the authority until the host picks one.
pub const DEFAULT_SCENE_ID: &str = "main";

/// Role of this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The authority.
    Server,
    /// A replica talking to the authority at `server`.
    Client {
        /// Authority peer.
        server: PeerId,
    },
}

/// Builder for [`NetSession`].
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    factory: EntityFactory,
    config: NetConfig,
    scene_id: String,
}

impl SessionBuilder {
    /// Use a specific clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Entity constructors. Must match on every peer.
    pub fn factory(mut self, factory: EntityFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Session configuration.
    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial scene of the authority.
    pub fn scene(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = scene_id.into();
        self
    }

    /// Build the authority.
    pub fn server(self) -> Result<NetSession> {
        self.build(Role::Server)
    }

    /// Build a client of the authority at `server`.
    pub fn client(self, server: PeerId) -> Result<NetSession> {
        self.build(Role::Client { server })
    }

    fn build(self, role: Role) -> Result<NetSession> {
        self.config.validate()?;
        if !self.transport.init() {
            return Err(NetError::TransportInit);
        }

        let local = self.transport.local_peer_id();
        let max_datagram = self
            .config
            .max_datagram_size
            .min(self.transport.max_datagram_size());
        let fragmenter =
            Fragmenter::for_datagram(max_datagram, self.config.fragment_header_reserve)?;
        let now = self.clock.now();
        let connection = match role {
            Role::Server => ConnectionManager::server(local, &self.config, now),
            Role::Client { .. } => ConnectionManager::client(local, &self.config, now),
        };
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        info!(peer = %local, role = ?role, "session started");
        Ok(NetSession {
            role,
            local,
            max_datagram,
            reconcile: Reconciliation::new(&self.config),
            peers: PeerTable::new(self.config.disconnect_timeout),
            config: self.config,
            transport: self.transport,
            clock: self.clock,
            inbound_tx,
            inbound_rx,
            retry_queued: Arc::new(AtomicBool::new(false)),
            connection,
            fragmenter,
            registry: EntityRegistry::new(),
            factory: self.factory,
            ids: NetworkIdAllocator::new(),
            scene_id: self.scene_id,
            events: VecDeque::new(),
            last_tick: now,
        })
    }
}

/// One endpoint of a replicated session.
pub struct NetSession {
    role: Role,
    local: PeerId,
    config: NetConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    inbound_tx: InboundSender,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    retry_queued: Arc<AtomicBool>,
    connection: ConnectionManager,
    fragmenter: Fragmenter,
    max_datagram: usize,
    registry: EntityRegistry,
    factory: EntityFactory,
    ids: NetworkIdAllocator,
    scene_id: String,
    reconcile: Reconciliation,
    peers: PeerTable,
    events: VecDeque<NetEvent>,
    last_tick: f64,
}

impl std::fmt::Debug for NetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetSession")
            .field("role", &self.role)
            .field("local", &self.local)
            .field("phase", &self.connection.phase())
            .field("scene_id", &self.scene_id)
            .field("entities", &self.registry.len())
            .finish()
    }
}

impl NetSession {
    /// Start building a session on `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder {
            transport,
            clock: Arc::new(SystemClock::new()),
            factory: EntityFactory::new(),
            config: NetConfig::default(),
            scene_id: DEFAULT_SCENE_ID.to_string(),
        }
    }

    // ----- accessors ---------------------------------------------------------

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if this endpoint is the authority.
    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Local peer id.
    pub fn local_peer_id(&self) -> PeerId {
        self.local
    }

    /// Session configuration.
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Shared transport handle.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Shared clock handle.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Producer handle for background loops.
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound_tx.clone()
    }

    /// Connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    /// Smoothed one-way latency in seconds.
    pub fn latency(&self) -> f64 {
        self.connection.latency()
    }

    /// Connection state machine.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Active scene.
    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    /// Live entities.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Reconciliation state.
    pub fn reconciliation(&self) -> &Reconciliation {
        &self.reconcile
    }

    /// Known clients (authority only).
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Look up an entity.
    pub fn entity(&self, id: NetworkId) -> Option<&dyn NetworkObject> {
        self.registry.lookup(id)
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, id: NetworkId) -> Option<&mut (dyn NetworkObject + 'static)> {
        self.registry.lookup_mut(id)
    }

    /// State of a [`NetEntity<S>`].
    pub fn entity_state<S: Send + 'static>(&self, id: NetworkId) -> Option<&S> {
        self.registry
            .lookup(id)?
            .as_any()
            .downcast_ref::<NetEntity<S>>()
            .map(NetEntity::state)
    }

    /// Mutable state of a [`NetEntity<S>`].
    pub fn entity_state_mut<S: Send + 'static>(&mut self, id: NetworkId) -> Option<&mut S> {
        self.registry
            .lookup_mut(id)?
            .as_any_mut()
            .downcast_mut::<NetEntity<S>>()
            .map(NetEntity::state_mut)
    }

    /// Take the oldest pending event.
    pub fn poll_event(&mut self) -> Option<NetEvent> {
        self.events.pop_front()
    }

    /// Take every pending event.
    pub fn drain_events(&mut self) -> Vec<NetEvent> {
        self.events.drain(..).collect()
    }

    /// Items queued for the next tick.
    pub fn pending_inbound(&self) -> usize {
        self.inbound_rx.len()
    }

    /// Set while a retry notification waits in the queue.
    pub(crate) fn retry_queued(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.retry_queued)
    }

    /// Enqueue an item as if a background loop had produced it.
    pub fn enqueue(&self, item: Inbound) {
        // The receiver lives in `self`, so the queue cannot be closed here.
        let _ = self.inbound_tx.send(item);
    }

    // ----- tick --------------------------------------------------------------

    /// Apply everything queued since the last tick and advance timers.
    ///
    /// Soft failures are logged and skipped. A connection timeout is
    /// returned once, after the session moved to `Disconnected`.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        let dt = Duration::try_from_secs_f64(now - self.last_tick).unwrap_or(Duration::ZERO);
        self.last_tick = now;

        while let Ok(item) = self.inbound_rx.try_recv() {
            if let Err(e) = self.dispatch(item, now) {
                warn!(error = %e, "failed to handle inbound item");
            }
        }

        if let Err(reason) = self.connection.check(now) {
            self.on_disconnected(reason.clone());
            return Err(reason.into());
        }

        match self.role {
            Role::Server => {
                self.poll_sync(dt)?;
                for peer in self.peers.expire(now) {
                    self.transport.forget_peer(peer);
                    self.events.push_back(NetEvent::PeerTimedOut(peer));
                }
            }
            Role::Client { .. } => {
                if self.connection.is_connected() && self.reconcile.scene_sync_due(now) {
                    debug!("scene sync unanswered, requesting again");
                    self.request_scene_sync()?;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, item: Inbound, now: f64) -> Result<()> {
        match (item, self.role) {
            (Inbound::Message { from, message }, Role::Server) => {
                self.on_server_message(from, message, now)
            }
            (Inbound::Message { from, message }, Role::Client { server }) => {
                if from != server {
                    trace!(peer = %from, kind = message.kind(), "ignoring non-authority message");
                    return Ok(());
                }
                self.on_client_message(message, now)
            }
            (Inbound::PeerJoined(peer), Role::Server) => {
                if self.peers.join(peer, now) {
                    self.events.push_back(NetEvent::PeerJoined(peer));
                }
                Ok(())
            }
            (Inbound::PeerLeft(peer), Role::Server) => {
                self.transport.forget_peer(peer);
                if self.peers.leave(peer) {
                    self.events.push_back(NetEvent::PeerLeft(peer));
                }
                Ok(())
            }
            (Inbound::PeerLeft(peer), Role::Client { server }) if peer == server => {
                if self.connection.disconnect() {
                    self.on_disconnected(ConnectionError::Closed);
                }
                Ok(())
            }
            (Inbound::RetryDue, Role::Client { .. }) => {
                self.retry_queued.store(false, Ordering::SeqCst);
                self.retry_missing_objects().map(|_| ())
            }
            _ => Ok(()),
        }
    }

    fn on_disconnected(&mut self, reason: ConnectionError) {
        info!(reason = %reason, "disconnected");
        self.reconcile.clear_missing();
        self.events.push_back(NetEvent::Disconnected { reason });
    }

    // ----- authority ---------------------------------------------------------

    fn on_server_message(&mut self, from: PeerId, message: Message, now: f64) -> Result<()> {
        if self.peers.touch(from, now) {
            self.events.push_back(NetEvent::PeerJoined(from));
        }

        match message {
            Message::PingRequest(ping) => {
                let echo = self.connection.on_ping_request(&ping);
                self.send_to(from, &echo)
            }
            Message::RequestSceneSync(_) => self.send_scene_snapshot(from),
            Message::SceneSyncComplete(_) => {
                self.peers.mark_synced(from);
                let sent = self.force_broadcast_all()?;
                debug!(peer = %from, updates = sent, "client synced, baseline broadcast");
                self.events.push_back(NetEvent::ClientSynced(from));
                Ok(())
            }
            Message::RequestMissingObject(request) => self.answer_missing(from, request),
            Message::Unknown { kind } => {
                trace!(peer = %from, kind = %kind, "ignoring unknown message");
                Ok(())
            }
            other => {
                debug!(peer = %from, kind = other.kind(), "ignoring client message");
                Ok(())
            }
        }
    }

    fn send_scene_snapshot(&mut self, to: PeerId) -> Result<()> {
        let objects: Vec<SceneObject> = self
            .registry
            .iter()
            .map(|entity| SceneObject {
                class_name: entity.type_name().to_string(),
                network_id: entity.network_id(),
                owner_id: entity.owner_id(),
            })
            .collect();
        debug!(peer = %to, objects = objects.len(), "sending scene snapshot");
        let snapshot = Message::SceneSync(SceneSnapshot {
            scene_id: self.scene_id.clone(),
            objects,
        });
        self.send_to(to, &snapshot)
    }

    fn answer_missing(&mut self, to: PeerId, request: MissingObject) -> Result<()> {
        let Some(entity) = self.registry.lookup(request.network_id) else {
            debug!(peer = %to, id = %request.network_id, "requested object is gone");
            let remove = Message::RemoveObject(RemoveObject {
                network_id: request.network_id,
            });
            return self.send_to(to, &remove);
        };

        let spawn = Message::SpawnObject(SpawnObject {
            network_id: entity.network_id(),
            owner_id: entity.owner_id(),
            class_name: entity.type_name().to_string(),
        });
        let current = entity.snapshot();

        self.send_to(to, &spawn)?;
        for update in current {
            self.send_to(to, &Message::ComponentUpdate(update))?;
        }
        Ok(())
    }

    fn poll_sync(&mut self, dt: Duration) -> Result<usize> {
        let mut updates: Vec<ComponentUpdate> = Vec::new();
        for id in self.registry.ids() {
            if let Some(entity) = self.registry.lookup_mut(id) {
                updates.extend(entity.poll_sync(dt));
            }
        }
        for update in &updates {
            self.broadcast(&Message::ComponentUpdate(update.clone()))?;
        }
        Ok(updates.len())
    }

    fn create_entity(&self, type_name: &str, owner: PeerId, id: NetworkId) -> Constructed {
        let mut entity = self.factory.create(type_name, owner, id)?;
        entity.set_default_sync_interval(self.config.default_sync_interval);
        Ok(entity)
    }

    fn require_server(&self) -> Result<()> {
        if self.is_server() {
            Ok(())
        } else {
            Err(WorldError::NotAuthority.into())
        }
    }

    /// Create an entity and announce it to every peer.
    pub fn spawn(&mut self, type_name: &str, owner: PeerId) -> Result<NetworkId> {
        self.require_server()?;
        let id = self.ids.allocate();
        let entity = self.create_entity(type_name, owner, id)?;
        self.registry.register(entity)?;

        self.events.push_back(NetEvent::EntitySpawned {
            network_id: id,
            type_name: type_name.to_string(),
            owner_id: owner,
        });
        self.broadcast(&Message::SpawnObject(SpawnObject {
            network_id: id,
            owner_id: owner,
            class_name: type_name.to_string(),
        }))?;
        Ok(id)
    }

    /// Remove an entity everywhere. Unknown ids are a no-op returning `false`.
    pub fn despawn(&mut self, id: NetworkId) -> Result<bool> {
        self.require_server()?;
        if self.registry.unregister(id).is_none() {
            return Ok(false);
        }
        self.events.push_back(NetEvent::EntityRemoved { network_id: id });
        self.broadcast(&Message::RemoveObject(RemoveObject { network_id: id }))?;
        Ok(true)
    }

    /// Switch the authority's active scene.
    ///
    /// Entities are left alone; clients pick the new id up at their next
    /// reconciliation.
    pub fn set_scene(&mut self, scene_id: impl Into<String>) -> Result<()> {
        self.require_server()?;
        self.scene_id = scene_id.into();
        Ok(())
    }

    /// Broadcast every field of every component.
    ///
    /// Returns the number of updates sent.
    pub fn force_broadcast_all(&mut self) -> Result<usize> {
        self.require_server()?;
        let mut updates = Vec::new();
        for id in self.registry.ids() {
            if let Some(entity) = self.registry.lookup_mut(id) {
                updates.extend(entity.force_sync());
            }
        }
        for update in &updates {
            self.broadcast(&Message::ComponentUpdate(update.clone()))?;
        }
        Ok(updates.len())
    }

    /// Tell every client the session is over.
    pub fn shutdown_server(&mut self) -> Result<usize> {
        self.require_server()?;
        let sent = self.broadcast(&Message::ServerShutdown)?;
        info!(peers = sent, "server shut down");
        self.peers.clear();
        self.connection.disconnect();
        Ok(sent)
    }

    // ----- client ------------------------------------------------------------

    fn server_peer(&self) -> Result<PeerId> {
        match self.role {
            Role::Client { server } => Ok(server),
            Role::Server => Err(NetError::WrongRole("client")),
        }
    }

    fn on_client_message(&mut self, message: Message, now: f64) -> Result<()> {
        if self.connection.phase() == ConnectionPhase::Disconnected {
            trace!(kind = message.kind(), "ignoring message after disconnect");
            return Ok(());
        }
        self.connection.touch(now);

        match message {
            Message::PingResponse(ping) => {
                let Some(sample) = self.connection.on_ping_response(&ping, now) else {
                    return Ok(());
                };
                self.events.push_back(NetEvent::LatencyUpdated {
                    rtt: sample.rtt,
                    latency: sample.latency,
                });
                if sample.connected {
                    self.events.push_back(NetEvent::Connected);
                    self.request_scene_sync()?;
                }
                Ok(())
            }
            Message::SpawnObject(spawn) => {
                self.spawn_remote(spawn);
                Ok(())
            }
            Message::RemoveObject(remove) => {
                self.remove_remote(remove.network_id);
                Ok(())
            }
            Message::SceneSync(snapshot) => self.apply_scene_snapshot(snapshot),
            Message::ComponentUpdate(update) => self.apply_update(update, now),
            Message::ServerShutdown => {
                if self.connection.disconnect() {
                    self.on_disconnected(ConnectionError::ServerShutdown);
                }
                Ok(())
            }
            Message::Unknown { kind } => {
                trace!(kind = %kind, "ignoring unknown message");
                Ok(())
            }
            other => {
                debug!(kind = other.kind(), "ignoring authority-bound message");
                Ok(())
            }
        }
    }

    fn spawn_remote(&mut self, spawn: SpawnObject) -> bool {
        let id = spawn.network_id;
        if self.registry.contains(id) {
            debug!(id = %id, "spawn for existing entity ignored");
            return false;
        }
        // Ids are never reused, so a spawn arriving after its remove is stale
        if self.reconcile.was_removed(id) {
            debug!(id = %id, "spawn for removed entity ignored");
            return false;
        }
        let entity = match self.create_entity(&spawn.class_name, spawn.owner_id, id) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(id = %id, class_name = %spawn.class_name, error = %e, "cannot create entity");
                return false;
            }
        };
        if let Err(e) = self.registry.register(entity) {
            warn!(id = %id, error = %e, "cannot register entity");
            return false;
        }
        self.reconcile.resolve(id);
        self.events.push_back(NetEvent::EntitySpawned {
            network_id: id,
            type_name: spawn.class_name,
            owner_id: spawn.owner_id,
        });
        true
    }

    fn remove_remote(&mut self, id: NetworkId) {
        self.reconcile.forget(id);
        if self.registry.unregister(id).is_some() {
            self.events.push_back(NetEvent::EntityRemoved { network_id: id });
        }
    }

    fn apply_scene_snapshot(&mut self, snapshot: SceneSnapshot) -> Result<()> {
        if snapshot.scene_id != self.scene_id {
            info!(scene_id = %snapshot.scene_id, "switching scene");
            self.scene_id = snapshot.scene_id.clone();
            self.events.push_back(NetEvent::SceneChanged {
                scene_id: snapshot.scene_id,
            });
        }

        for entity in self.registry.clear() {
            self.events.push_back(NetEvent::EntityRemoved {
                network_id: entity.network_id(),
            });
        }

        let mut created = 0;
        for object in snapshot.objects {
            if self.spawn_remote(object.into()) {
                created += 1;
            }
        }

        self.reconcile.mark_complete();
        info!(entities = created, "reconciliation complete");
        self.events.push_back(NetEvent::ReconciliationComplete { entities: created });

        let server = self.server_peer()?;
        self.send_to(
            server,
            &Message::SceneSyncComplete(PeerRequest {
                sender_id: self.local,
            }),
        )
    }

    fn apply_update(&mut self, update: ComponentUpdate, now: f64) -> Result<()> {
        let id = update.network_id;
        if let Some(entity) = self.registry.lookup_mut(id) {
            if entity.apply_sync(&update).is_none() {
                debug!(id = %id, sync_type = %update.sync_type, "entity has no such component");
            }
            return Ok(());
        }

        if self.reconcile.note_missing(id, now) {
            self.send_missing_request(id)?;
        } else {
            trace!(id = %id, sync_type = %update.sync_type, "update for unknown entity ignored");
        }
        Ok(())
    }

    fn send_missing_request(&self, id: NetworkId) -> Result<()> {
        let server = self.server_peer()?;
        self.send_to(
            server,
            &Message::RequestMissingObject(MissingObject {
                network_id: id,
                sender_id: self.local,
            }),
        )
    }

    /// Send a heartbeat to the authority now.
    pub fn send_ping(&self) -> Result<()> {
        let server = self.server_peer()?;
        let ping = self.connection.ping_request(self.clock.now());
        self.send_to(server, &ping)
    }

    /// Ask the authority for a full scene listing.
    pub fn request_scene_sync(&mut self) -> Result<()> {
        let server = self.server_peer()?;
        self.reconcile.mark_requested(self.clock.now());
        self.send_to(
            server,
            &Message::RequestSceneSync(PeerRequest {
                sender_id: self.local,
            }),
        )
    }

    /// Re-send missing-object requests whose retry interval elapsed.
    ///
    /// Returns the number of requests sent.
    pub fn retry_missing_objects(&mut self) -> Result<usize> {
        self.server_peer()?;
        if self.connection.phase() == ConnectionPhase::Disconnected {
            return Ok(0);
        }
        let batch = self.reconcile.due_retries(self.clock.now());
        for (network_id, attempts) in batch.abandoned {
            self.events.push_back(NetEvent::MissingObjectAbandoned {
                network_id,
                attempts,
            });
        }
        for id in &batch.resend {
            self.send_missing_request(*id)?;
        }
        Ok(batch.resend.len())
    }

    // ----- sending -----------------------------------------------------------

    /// Send a message to one peer, fragmenting it if needed.
    pub fn send_to(&self, peer: PeerId, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        if bytes.len() > self.max_datagram {
            self.fragmenter.send_large(self.transport.as_ref(), peer, message)?;
            return Ok(());
        }
        if !self.transport.send(peer, &bytes) {
            return Err(NetError::SendFailed(peer));
        }
        Ok(())
    }

    /// Send a message to every other peer in the directory.
    ///
    /// Oversized messages are fragmented once and the same fragments go to
    /// every peer. Refusals are logged. Returns the number of peers reached.
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        let bytes = message.encode()?;
        let datagrams = if bytes.len() > self.max_datagram {
            self.fragmenter
                .split(&bytes)
                .into_iter()
                .map(|fragment| Message::Fragment(fragment).encode())
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            vec![bytes]
        };

        let mut reached = 0;
        for peer in self.transport.current_peers() {
            if peer == self.local {
                continue;
            }
            if datagrams.iter().all(|datagram| self.transport.send(peer, datagram)) {
                reached += 1;
            } else {
                warn!(peer = %peer, kind = message.kind(), "broadcast refused");
            }
        }
        trace!(kind = message.kind(), peers = reached, "broadcast");
        Ok(reached)
    }
}
