//! End-to-end session behaviour over the in-memory network.
//!
//! Sessions are driven by hand: each step pumps a peer's datagrams into its
//! queue and ticks it, with a manual clock standing in for time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use netweave::core::{
    ConnectionError, ManualClock, NetConfig, NetError, NetworkId, PeerId, Transport, WorldError,
};
use netweave::session::{InboundPump, NetEvent, NetSession, SceneSyncState};
use netweave::sync::{ComponentUpdate, FieldMap, SyncEngine};
use netweave::transport::{
    ConnectionPhase, MemoryNetwork, Message, RemoveObject, SceneObject, SceneSnapshot, SpawnObject,
};
use netweave::world::{EntityFactory, NetEntity};
use serde_json::json;

const SERVER: PeerId = PeerId(1);
const CLIENT: PeerId = PeerId(2);

#[derive(Debug, Default, Clone, PartialEq)]
struct Food {
    value: u32,
    x: f64,
}

fn factory() -> EntityFactory {
    EntityFactory::new()
        .with("Food", |owner, id| {
            let engine = SyncEngine::builder("food_update")
                .interval(Duration::from_millis(50))
                .bind("value", |f: &Food| f.value, |f: &mut Food, v| f.value = v)
                .bind("x", |f: &Food| f.x, |f: &mut Food, v| f.x = v)
                .build()?;
            Ok(NetEntity::new("Food", owner, id, Food::default()).with_engine(engine).boxed())
        })
        .with("Beacon", |owner, id| {
            // No interval declared: runs at the session default
            let engine = SyncEngine::builder("beacon_update")
                .bind("value", |f: &Food| f.value, |f: &mut Food, v| f.value = v)
                .build()?;
            Ok(NetEntity::new("Beacon", owner, id, Food::default()).with_engine(engine).boxed())
        })
}

fn config() -> NetConfig {
    NetConfig::builder()
        .missing_object_max_attempts(Some(3))
        .build()
        .unwrap()
}

fn transport(network: &MemoryNetwork, peer: PeerId) -> Arc<dyn Transport> {
    Arc::new(network.endpoint(peer))
}

struct Node {
    session: NetSession,
    pump: InboundPump,
}

impl Node {
    fn new(
        transport: Arc<dyn Transport>,
        clock: &ManualClock,
        config: NetConfig,
        server: Option<PeerId>,
    ) -> Self {
        let builder = NetSession::builder(Arc::clone(&transport))
            .clock(Arc::new(clock.clone()))
            .factory(factory())
            .config(config);
        let session = match server {
            Some(server) => builder.client(server).unwrap(),
            None => builder.server().unwrap(),
        };
        let pump = InboundPump::new(transport, session.config(), session.inbound_sender());
        Self { session, pump }
    }

    fn step(&mut self) -> Result<(), NetError> {
        self.pump.poll_once(Instant::now())?;
        self.session.tick()
    }
}

struct World {
    network: MemoryNetwork,
    clock: ManualClock,
    server: Node,
    client: Node,
}

impl World {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: NetConfig) -> Self {
        let network = MemoryNetwork::new(1200);
        let clock = ManualClock::new(100.0);
        let server = Node::new(transport(&network, SERVER), &clock, config.clone(), None);
        let client = Node::new(transport(&network, CLIENT), &clock, config, Some(SERVER));
        Self {
            network,
            clock,
            server,
            client,
        }
    }

    /// Run both peers until no datagram is left in flight.
    fn settle(&mut self) {
        for _ in 0..20 {
            self.server.step().unwrap();
            self.client.step().unwrap();
            if self.network.pending(SERVER) == 0 && self.network.pending(CLIENT) == 0 {
                self.server.step().unwrap();
                self.client.step().unwrap();
                return;
            }
        }
        panic!("network did not settle");
    }

    fn connect(&mut self) {
        self.client.session.send_ping().unwrap();
        self.clock.advance(0.040);
        self.settle();
        assert_eq!(self.client.session.phase(), ConnectionPhase::Connected);
        assert!(self.client.session.reconciliation().is_complete());
    }

    fn spawn_foods(&mut self, count: usize) -> Vec<NetworkId> {
        (0..count)
            .map(|_| self.server.session.spawn("Food", SERVER).unwrap())
            .collect()
    }
}

fn update(id: NetworkId, value: u32) -> Message {
    let mut fields = FieldMap::new();
    fields.insert("value".into(), json!(value));
    Message::ComponentUpdate(ComponentUpdate::new("food_update", id, fields))
}

#[test]
fn test_connect_measures_latency() {
    let mut world = World::new();
    world.connect();

    let latency = world.client.session.latency();
    assert!((latency - 0.020).abs() < 1e-9, "latency {latency}");

    let events = world.client.session.drain_events();
    assert!(events.contains(&NetEvent::Connected));
    assert!(matches!(events[0], NetEvent::LatencyUpdated { .. }));
}

#[test]
fn test_late_joiner_receives_live_values() {
    let mut world = World::new();
    let ids = world.spawn_foods(3);
    world.server.session.entity_state_mut::<Food>(ids[1]).unwrap().value = 9;

    world.connect();

    for id in &ids {
        assert!(world.client.session.entity(*id).is_some());
    }
    let food = world.client.session.entity_state::<Food>(ids[1]).unwrap();
    assert_eq!(food.value, 9);

    let server_events = world.server.session.drain_events();
    assert!(server_events.contains(&NetEvent::ClientSynced(CLIENT)));
    assert!(world.server.session.peers().get(CLIENT).unwrap().synced);
}

#[test]
fn test_large_scene_is_fragmented() {
    let mut world = World::new();
    let ids = world.spawn_foods(120);
    world.connect();

    assert_eq!(world.client.session.registry().len(), 120);
    assert_eq!(world.client.session.registry().ids(), ids);
    let events = world.client.session.drain_events();
    assert!(events.contains(&NetEvent::ReconciliationComplete { entities: 120 }));
}

#[test]
fn test_delta_updates_replicate() {
    let mut world = World::new();
    let ids = world.spawn_foods(1);
    world.connect();

    world.server.session.entity_state_mut::<Food>(ids[0]).unwrap().x = 4.5;
    world.clock.advance(0.060);
    world.settle();

    let food = world.client.session.entity_state::<Food>(ids[0]).unwrap();
    assert_eq!(food.x, 4.5);
    assert_eq!(food.value, 0);
}

#[test]
fn test_remove_then_stray_update_ignored() {
    let mut world = World::new();
    let ids = world.spawn_foods(7);
    let seven = NetworkId(7);
    assert_eq!(ids[6], seven);
    world.connect();
    assert!(world.client.session.entity(seven).is_some());

    assert!(world.server.session.despawn(seven).unwrap());
    world.settle();
    assert!(world.server.session.entity(seven).is_none());
    assert!(world.client.session.entity(seven).is_none());

    // Stray update arriving after the removal
    let server_side = world.network.endpoint(SERVER);
    server_side.send(CLIENT, &update(seven, 5).encode().unwrap());
    world.client.step().unwrap();

    assert!(world.client.session.entity(seven).is_none());
    assert_eq!(world.client.session.reconciliation().pending_missing(), 0);
    assert_eq!(world.network.pending(SERVER), 0);

    // Removing an unknown id is a no-op
    assert!(!world.server.session.despawn(seven).unwrap());
}

#[test]
fn test_missing_object_recovered() {
    let mut world = World::new();
    world.connect();

    // Lose the spawn broadcast
    world
        .network
        .retain(|_, _, bytes| !String::from_utf8_lossy(bytes).contains("spawn_object"));
    let id = world.spawn_foods(1)[0];
    world.settle();
    assert!(world.client.session.entity(id).is_none());
    world.network.clear_filter();

    world.server.session.entity_state_mut::<Food>(id).unwrap().value = 11;
    world.clock.advance(0.060);
    world.settle();

    let food = world.client.session.entity_state::<Food>(id).unwrap();
    assert_eq!(food.value, 11);
    assert_eq!(world.client.session.reconciliation().pending_missing(), 0);
}

#[test]
fn test_missing_object_retries_until_abandoned() {
    let mut world = World::new();
    world.connect();

    let unknown = NetworkId(40);
    let server_side = world.network.endpoint(SERVER);
    server_side.send(CLIENT, &update(unknown, 1).encode().unwrap());
    world.client.step().unwrap();
    // Swallow the requests instead of answering them
    while server_side.try_receive(1200).is_some() {}

    let request = *world.client.session.reconciliation().missing(unknown).unwrap();
    assert_eq!(request.attempt_count, 1);

    world.clock.advance(0.5);
    assert_eq!(world.client.session.retry_missing_objects().unwrap(), 0);

    world.clock.advance(0.6);
    assert_eq!(world.client.session.retry_missing_objects().unwrap(), 1);
    world.clock.advance(1.1);
    assert_eq!(world.client.session.retry_missing_objects().unwrap(), 1);
    let request = *world.client.session.reconciliation().missing(unknown).unwrap();
    assert_eq!(request.attempt_count, 3);

    world.clock.advance(1.1);
    assert_eq!(world.client.session.retry_missing_objects().unwrap(), 0);
    assert!(world.client.session.reconciliation().missing(unknown).is_none());
    let events = world.client.session.drain_events();
    assert!(events.contains(&NetEvent::MissingObjectAbandoned {
        network_id: unknown,
        attempts: 3,
    }));
}

#[test]
fn test_unknown_update_ignored_before_reconciliation() {
    let mut world = World::new();
    let server_side = world.network.endpoint(SERVER);
    server_side.send(CLIENT, &update(NetworkId(3), 1).encode().unwrap());
    world.client.step().unwrap();

    assert_eq!(world.client.session.reconciliation().pending_missing(), 0);
    assert_eq!(world.network.pending(SERVER), 0);
}

#[test]
fn test_unknown_message_kind_ignored() {
    let mut world = World::new();
    world.connect();
    let server_side = world.network.endpoint(SERVER);
    server_side.send(CLIENT, br#"{"type": "player_input", "keys": ["w"]}"#);
    server_side.send(CLIENT, b"garbage");
    world.client.step().unwrap();
    assert_eq!(world.client.session.phase(), ConnectionPhase::Connected);
}

#[test]
fn test_scene_sync_request_retried() {
    let mut world = World::new();
    world.spawn_foods(2);

    world
        .network
        .retain(|_, _, bytes| !String::from_utf8_lossy(bytes).contains("request_scene_sync"));
    world.client.session.send_ping().unwrap();
    world.settle();
    assert_eq!(world.client.session.phase(), ConnectionPhase::Connected);
    assert!(matches!(
        world.client.session.reconciliation().scene_state(),
        SceneSyncState::Requested { .. }
    ));

    world.network.clear_filter();
    world.clock.advance(3.0);
    world.client.session.send_ping().unwrap();
    world.settle();
    assert!(world.client.session.reconciliation().is_complete());
    assert_eq!(world.client.session.registry().len(), 2);
}

#[test]
fn test_handshake_timeout_reported() {
    let mut world = World::new();
    world.clock.advance(19.0);
    world.client.step().unwrap();

    world.clock.advance(1.0);
    let err = world.client.step().unwrap_err();
    assert!(matches!(err, NetError::Connection(ConnectionError::HandshakeTimeout { .. })));
    assert_eq!(world.client.session.phase(), ConnectionPhase::Disconnected);

    // Reported once
    world.clock.advance(1.0);
    world.client.step().unwrap();
}

#[test]
fn test_silence_disconnects_client() {
    let mut world = World::new();
    world.connect();

    world.clock.advance(10.5);
    let err = world.client.step().unwrap_err();
    assert!(matches!(err, NetError::Connection(ConnectionError::TimedOut { .. })));
    let events = world.client.session.drain_events();
    assert!(matches!(
        events.last(),
        Some(NetEvent::Disconnected { reason: ConnectionError::TimedOut { .. } })
    ));
}

#[test]
fn test_server_times_out_silent_peer() {
    let mut world = World::new();
    world.connect();
    assert!(world.server.session.peers().contains(CLIENT));

    world.clock.advance(10.5);
    world.server.step().unwrap();
    assert!(!world.server.session.peers().contains(CLIENT));
    let events = world.server.session.drain_events();
    assert!(events.contains(&NetEvent::PeerTimedOut(CLIENT)));
}

#[test]
fn test_server_shutdown_disconnects_clients() {
    let mut world = World::new();
    world.connect();

    assert_eq!(world.server.session.shutdown_server().unwrap(), 1);
    world.client.step().unwrap();

    assert_eq!(world.client.session.phase(), ConnectionPhase::Disconnected);
    let events = world.client.session.drain_events();
    assert!(events.contains(&NetEvent::Disconnected {
        reason: ConnectionError::ServerShutdown,
    }));
}

#[test]
fn test_only_authority_spawns() {
    let mut world = World::new();
    let err = world.client.session.spawn("Food", CLIENT).unwrap_err();
    assert!(matches!(err, NetError::World(WorldError::NotAuthority)));
    let err = world.client.session.despawn(NetworkId(1)).unwrap_err();
    assert!(matches!(err, NetError::World(WorldError::NotAuthority)));

    let err = world.server.session.request_scene_sync().unwrap_err();
    assert!(matches!(err, NetError::WrongRole("client")));
}

#[test]
fn test_unknown_type_is_soft_failure() {
    let mut world = World::new();
    world.connect();

    let err = world.server.session.spawn("Dragon", SERVER).unwrap_err();
    assert!(matches!(err, NetError::World(WorldError::UnknownType(_))));

    let server_side = world.network.endpoint(SERVER);
    let spawn = Message::SpawnObject(SpawnObject {
        network_id: NetworkId(50),
        owner_id: SERVER,
        class_name: "Dragon".into(),
    });
    server_side.send(CLIENT, &spawn.encode().unwrap());
    world.client.step().unwrap();
    assert!(world.client.session.entity(NetworkId(50)).is_none());
}

#[test]
fn test_remove_for_unknown_id_is_noop() {
    let mut world = World::new();
    world.connect();
    let server_side = world.network.endpoint(SERVER);
    let remove = Message::RemoveObject(RemoveObject { network_id: NetworkId(99) });
    server_side.send(CLIENT, &remove.encode().unwrap());
    world.client.step().unwrap();
    assert!(world.client.session.registry().is_empty());
}

fn food_spawn(id: NetworkId) -> Message {
    Message::SpawnObject(SpawnObject {
        network_id: id,
        owner_id: SERVER,
        class_name: "Food".into(),
    })
}

#[test]
fn test_spawn_after_remove_is_stale() {
    let mut world = World::new();
    world.connect();

    let seven = NetworkId(7);
    let server_side = world.network.endpoint(SERVER);
    let remove = Message::RemoveObject(RemoveObject { network_id: seven });
    server_side.send(CLIENT, &remove.encode().unwrap());
    server_side.send(CLIENT, &food_spawn(seven).encode().unwrap());
    world.client.step().unwrap();

    assert!(world.client.session.entity(seven).is_none());
    assert!(world.client.session.reconciliation().was_removed(seven));

    // A late scene listing still naming the removed id
    let stale = Message::SceneSync(SceneSnapshot {
        scene_id: "main".into(),
        objects: vec![SceneObject {
            class_name: "Food".into(),
            network_id: seven,
            owner_id: SERVER,
        }],
    });
    server_side.send(CLIENT, &stale.encode().unwrap());
    world.client.step().unwrap();
    assert!(world.client.session.entity(seven).is_none());
}

#[test]
fn test_reordered_delivery_converges() {
    let mut world = World::new();
    world.connect();

    // Spawn and the first diff arrive newest first
    world.network.reverse(true);
    let id = world.spawn_foods(1)[0];
    world.server.session.entity_state_mut::<Food>(id).unwrap().value = 6;
    world.clock.advance(0.060);
    world.server.step().unwrap();
    assert_eq!(world.network.pending(CLIENT), 2);

    world.client.step().unwrap();
    world.network.reverse(false);
    assert!(world.client.session.entity(id).is_some());
    assert_eq!(world.client.session.reconciliation().pending_missing(), 0);
    assert_eq!(world.client.session.entity_state::<Food>(id).unwrap().value, 0);
    assert_eq!(world.network.pending(SERVER), 1);

    // The recovery request raced the spawn; its answer restores live values
    world.settle();
    let food = world.client.session.entity_state::<Food>(id).unwrap();
    assert_eq!(food.value, 6);
}

#[test]
fn test_late_snapshot_after_unknown_update() {
    let mut world = World::new();
    world.connect();

    // Lose the spawn, then see its update before a fresh scene listing
    world
        .network
        .retain(|_, _, bytes| !String::from_utf8_lossy(bytes).contains("spawn_object"));
    let id = world.spawn_foods(1)[0];
    world.network.clear_filter();
    world.server.session.entity_state_mut::<Food>(id).unwrap().value = 2;
    world.clock.advance(0.060);
    world.server.step().unwrap();
    world
        .network
        .retain(|_, _, bytes| !String::from_utf8_lossy(bytes).contains("request_missing_object"));
    world.client.step().unwrap();
    assert_eq!(world.client.session.reconciliation().pending_missing(), 1);
    world.network.clear_filter();

    world.client.session.request_scene_sync().unwrap();
    world.settle();

    assert_eq!(world.client.session.reconciliation().pending_missing(), 0);
    let food = world.client.session.entity_state::<Food>(id).unwrap();
    assert_eq!(food.value, 2);
}

#[test]
fn test_default_sync_interval_from_config() {
    let config = NetConfig::builder()
        .missing_object_max_attempts(Some(3))
        .default_sync_interval(Duration::from_secs(5))
        .build()
        .unwrap();
    let mut world = World::with_config(config);
    let beacon = world.server.session.spawn("Beacon", SERVER).unwrap();
    let food = world.spawn_foods(1)[0];
    world.connect();

    world.server.session.entity_state_mut::<Food>(beacon).unwrap().value = 8;
    world.server.session.entity_state_mut::<Food>(food).unwrap().value = 8;
    world.clock.advance(0.060);
    world.settle();

    // Declared interval still applies; the inherited one holds the beacon back
    assert_eq!(world.client.session.entity_state::<Food>(food).unwrap().value, 8);
    assert_eq!(world.client.session.entity_state::<Food>(beacon).unwrap().value, 0);

    world.clock.advance(5.0);
    world.settle();
    assert_eq!(world.client.session.entity_state::<Food>(beacon).unwrap().value, 8);
}

#[cfg(feature = "udp")]
#[tokio::test]
async fn test_udp_directory_pruned_on_peer_timeout() {
    use netweave::transport::{Ping, UdpTransport};

    let server_udp = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let client_udp = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let clock = ManualClock::new(100.0);
    let mut server = Node::new(Arc::new(server_udp.clone()), &clock, config(), None);

    let server_id = client_udp.add_peer(server_udp.local_addr());
    let ping = Message::PingRequest(Ping {
        time: 100.0,
        sender_id: client_udp.local_peer_id(),
    });
    assert!(client_udp.send(server_id, &ping.encode().unwrap()));

    let mut received = 0;
    for _ in 0..200 {
        received += server.pump.poll_once(Instant::now()).unwrap();
        if received > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    server.session.tick().unwrap();
    let client_id = client_udp.local_peer_id();
    assert!(server.session.peers().contains(client_id));
    assert!(server_udp.current_peers().contains(&client_id));

    clock.advance(10.5);
    server.session.tick().unwrap();
    assert!(!server.session.peers().contains(client_id));
    assert!(!server_udp.current_peers().contains(&client_id));
}
