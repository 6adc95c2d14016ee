//! Integration tests for admission and the room directory together.

use meshroom_protocol::{ControlMessage, InitPayload, PeerId, RoomKey, SignalPayload};
use meshroom_room::{
    Admission, Joined, Placement, RoomConfig, RoomDirectory, RoomError,
    StaticPrivateRooms,
};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};

// =========================================================================
// Helpers
// =========================================================================

struct TestPeer {
    joined: Joined,
    rx: UnboundedReceiver<ControlMessage>,
}

impl TestPeer {
    fn drain(&mut self) -> Vec<ControlMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

fn join(dir: &mut RoomDirectory, placement: Placement) -> TestPeer {
    let (tx, rx) = mpsc::unbounded_channel();
    let joined = dir.join(placement, tx).expect("join should succeed");
    TestPeer { joined, rx }
}

fn tower(instance: u32) -> Placement {
    Placement::Public(RoomKey::new("tower", instance))
}

// =========================================================================
// Lobby sharding
// =========================================================================

#[test]
fn test_lobby_all_full_creates_next_instance() {
    let mut dir = RoomDirectory::new(RoomConfig {
        lobby_capacity: 2,
        ..RoomConfig::default()
    });
    let _peers: Vec<TestPeer> = (0..6).map(|_| join(&mut dir, Placement::Lobby)).collect();

    let next = join(&mut dir, Placement::Lobby);
    assert_eq!(next.joined.room, RoomKey::new("Menu", 4));
}

#[test]
fn test_lobby_picks_lowest_under_capacity_instance() {
    let mut dir = RoomDirectory::new(RoomConfig {
        lobby_capacity: 2,
        ..RoomConfig::default()
    });
    let peers: Vec<TestPeer> = (0..6).map(|_| join(&mut dir, Placement::Lobby)).collect();

    // Free one slot in instance 2 and one in instance 3.
    dir.leave(&peers[5].joined.room, &peers[5].joined.peer).unwrap();
    dir.leave(&peers[2].joined.room, &peers[2].joined.peer).unwrap();

    let next = join(&mut dir, Placement::Lobby);
    assert_eq!(next.joined.room, RoomKey::new("Menu", 2));
}

#[test]
fn test_explicit_lobby_instance_respects_lobby_capacity() {
    let mut dir = RoomDirectory::new(RoomConfig {
        lobby_capacity: 1,
        ..RoomConfig::default()
    });
    let key = RoomKey::new("Menu", 1);
    let _first = join(&mut dir, Placement::Public(key.clone()));
    let (tx, _rx) = mpsc::unbounded_channel();
    assert_eq!(
        dir.join(Placement::Public(key.clone()), tx),
        Err(RoomError::RoomFull(key))
    );
}

// =========================================================================
// Membership messages
// =========================================================================

#[test]
fn test_three_members_see_each_other() {
    let mut dir = RoomDirectory::default();
    let mut a = join(&mut dir, tower(1));
    let mut b = join(&mut dir, tower(1));
    let mut c = join(&mut dir, tower(1));

    let (ida, idb, idc) = (
        a.joined.peer.clone(),
        b.joined.peer.clone(),
        c.joined.peer.clone(),
    );

    assert_eq!(
        a.drain(),
        vec![
            ControlMessage::Init(InitPayload { peers: vec![], state: None }),
            ControlMessage::Join(idb.clone()),
            ControlMessage::Join(idc.clone()),
        ]
    );
    assert_eq!(
        b.drain(),
        vec![
            ControlMessage::Init(InitPayload { peers: vec![ida.clone()], state: None }),
            ControlMessage::Join(idc),
        ]
    );
    assert_eq!(
        c.drain(),
        vec![ControlMessage::Init(InitPayload { peers: vec![ida, idb], state: None })]
    );
}

#[test]
fn test_leave_reaches_every_remaining_member_once() {
    let mut dir = RoomDirectory::default();
    let mut a = join(&mut dir, tower(1));
    let mut b = join(&mut dir, tower(1));
    let c = join(&mut dir, tower(1));
    a.drain();
    b.drain();

    let key = c.joined.room.clone();
    dir.leave(&key, &c.joined.peer).unwrap();

    let leave = ControlMessage::Leave(c.joined.peer.clone());
    assert_eq!(a.drain(), vec![leave.clone()]);
    assert_eq!(b.drain(), vec![leave]);
    assert_eq!(dir.member_count(&key), 2);
}

#[test]
fn test_rooms_are_isolated() {
    let mut dir = RoomDirectory::default();
    let mut a = join(&mut dir, tower(1));
    let _b = join(&mut dir, tower(2));
    assert_eq!(a.drain().len(), 1, "only INIT, no JOIN from another instance");
}

// =========================================================================
// Signal relay
// =========================================================================

#[test]
fn test_signal_is_relayed_verbatim_with_sender_id() {
    let mut dir = RoomDirectory::default();
    let a = join(&mut dir, tower(1));
    let mut b = join(&mut dir, tower(1));
    b.drain();

    let blob = r#"{"type":"offer","sdp":"v=0\r\n"}"#.to_string();
    let delivered = dir.relay_signal(
        &a.joined.room,
        &a.joined.peer,
        SignalPayload { peer: b.joined.peer.clone(), signal: blob.clone() },
    );

    assert!(delivered);
    assert_eq!(
        b.drain(),
        vec![ControlMessage::Signal(SignalPayload { peer: a.joined.peer.clone(), signal: blob })]
    );
}

#[test]
fn test_signal_to_other_room_is_dropped() {
    let mut dir = RoomDirectory::default();
    let a = join(&mut dir, tower(1));
    let mut b = join(&mut dir, tower(2));
    b.drain();

    let delivered = dir.relay_signal(
        &a.joined.room,
        &a.joined.peer,
        SignalPayload { peer: b.joined.peer.clone(), signal: "{}".into() },
    );
    assert!(!delivered);
    assert!(b.drain().is_empty());
}

#[test]
fn test_signal_to_departed_peer_is_dropped() {
    let mut dir = RoomDirectory::default();
    let a = join(&mut dir, tower(1));
    let b = join(&mut dir, tower(1));
    dir.leave(&b.joined.room, &b.joined.peer).unwrap();

    assert!(!dir.relay_signal(
        &a.joined.room,
        &a.joined.peer,
        SignalPayload { peer: b.joined.peer.clone(), signal: "{}".into() },
    ));
}

// =========================================================================
// Room state
// =========================================================================

#[test]
fn test_state_patch_reaches_others_and_late_joiners() {
    let mut dir = RoomDirectory::default();
    let a = join(&mut dir, tower(1));
    let mut b = join(&mut dir, tower(1));
    b.drain();

    dir.update_state(&a.joined.room, &a.joined.peer, json!({ "switch": true }))
        .unwrap();
    assert_eq!(b.drain(), vec![ControlMessage::Update(json!({ "switch": true }))]);

    let mut c = join(&mut dir, tower(1));
    match c.drain().first() {
        Some(ControlMessage::Init(init)) => {
            assert_eq!(init.state, Some(json!({ "switch": true })));
        }
        other => panic!("expected INIT, got {other:?}"),
    }
}

#[test]
fn test_state_from_non_member_is_rejected() {
    let mut dir = RoomDirectory::default();
    let a = join(&mut dir, tower(1));
    let stranger = PeerId::from("stranger");
    assert_eq!(
        dir.update_state(&a.joined.room, &stranger, json!(1)),
        Err(RoomError::NotInRoom(stranger, a.joined.room.clone()))
    );
}

// =========================================================================
// Admission + directory
// =========================================================================

#[tokio::test]
async fn test_private_room_is_unlisted() {
    let config = RoomConfig::default();
    let admission =
        Admission::new(&config).with_allowed_rooms(Some(vec!["tower".into()]));
    let codes = StaticPrivateRooms::new(["k3y"]);
    let mut dir = RoomDirectory::new(config);

    let placement = admission.resolve(None, "/k3y-1", &codes).await.unwrap();
    let _member = join(&mut dir, placement);
    let _public = join(&mut dir, tower(1));

    let listing = dir.listing();
    assert_eq!(listing.keys().collect::<Vec<_>>(), vec!["tower-1"]);
    assert!(dir.room(&RoomKey::new("k3y", 1)).unwrap().is_private());
}

#[tokio::test]
async fn test_rejected_admission_never_touches_directory() {
    let config = RoomConfig::default();
    let admission =
        Admission::new(&config).with_allowed_rooms(Some(vec!["tower".into()]));
    let dir = RoomDirectory::new(config);

    let result = admission
        .resolve(None, "/casino-1", &StaticPrivateRooms::default())
        .await;
    assert_eq!(result, Err(RoomError::RoomNotAllowed));
    assert_eq!(dir.room_count(), 0);
}
