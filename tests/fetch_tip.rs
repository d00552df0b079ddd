//! End-to-end scenarios driving `fetch_tip` against a scripted in-process
//! TCP peer that plays the relay's side of the wire protocol by hand (this
//! crate has no responder-side state machines to reuse, since it only ever
//! plays the initiator role).

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ouroboros_ntn::bearer::Header;
use ouroboros_ntn::miniprotocols::chainsync::Tip;
use ouroboros_ntn::miniprotocols::handshake::n2n::VersionData;
use ouroboros_ntn::miniprotocols::handshake::{Message as HandshakeMessage, RefuseReason};
use ouroboros_ntn::miniprotocols::chainsync::Message as ChainSyncMessage;
use ouroboros_ntn::miniprotocols::peersharing::{Message as PeerSharingMessage, PeerAddress};
use ouroboros_ntn::miniprotocols::{Point, PROTOCOL_N2N_CHAIN_SYNC, PROTOCOL_N2N_HANDSHAKE, PROTOCOL_N2N_PEER_SHARING};
use ouroboros_ntn::{fetch_tip, Endpoint, Error, Options};

fn segment(protocol: u16, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        protocol,
        timestamp: 0,
        payload_len: payload.len() as u16,
    };

    let bytes: [u8; 8] = header.into();
    let mut out = bytes.to_vec();
    out.extend_from_slice(payload);
    out
}

fn responder(mpid: u16) -> u16 {
    mpid | 0x8000
}

async fn bind_loopback() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new("127.0.0.1", port))
}

/// Drains and discards whatever the client writes for a given mini-protocol
/// next; we don't need to assert on outbound bytes in most scenarios.
async fn skip_one_segment(sock: &mut TcpStream) {
    let mut header = [0u8; 8];
    sock.read_exact(&mut header).await.unwrap();
    let len = u16::from_be_bytes([header[6], header[7]]) as usize;
    let mut payload = vec![0u8; len];
    sock.read_exact(&mut payload).await.unwrap();
}

#[tokio::test]
async fn handshake_success_tip_via_empty_intersect() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let accept: HandshakeMessage<VersionData> =
            HandshakeMessage::Accept(14, VersionData::new(764824073, false, 0, false));
        let mut payload = Vec::new();
        minicbor::encode(&accept, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        skip_one_segment(&mut sock).await; // find intersect

        let tip = Tip(Point::Specific(142857142, vec![0u8; 32]), 9999999);
        let msg = ChainSyncMessage::IntersectNotFound(tip);
        let mut payload = Vec::new();
        minicbor::encode(&msg, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_CHAIN_SYNC), &payload))
            .await
            .unwrap();
    });

    let options = Options {
        want_peer_sharing: false,
        session_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_secs(1),
        ..Options::default()
    };

    let report = fetch_tip(endpoint, options).await.unwrap();

    assert_eq!(report.negotiated_version, 14);
    assert_eq!(report.tip.slot, 142857142);
    assert_eq!(report.tip.block_no, 9999999);
    assert_eq!(report.tip.hash_hex, "00".repeat(32));
    assert!(report.peers_discovered.is_empty());

    relay.await.unwrap();
}

#[tokio::test]
async fn handshake_refuse_is_fatal() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let refuse: HandshakeMessage<VersionData> =
            HandshakeMessage::Refuse(RefuseReason::VersionMismatch(vec![15, 14]));
        let mut payload = Vec::new();
        minicbor::encode(&refuse, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        // no further bytes should ever be requested from us.
        let mut probe = [0u8; 1];
        let saw_more = tokio::time::timeout(Duration::from_millis(200), sock.read_exact(&mut probe))
            .await;
        assert!(saw_more.is_err(), "client must not speak after a refusal");
    });

    let options = Options {
        session_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_secs(1),
        ..Options::default()
    };

    let result = fetch_tip(endpoint, options).await;

    assert!(matches!(result, Err(Error::HandshakeRefused(_))));

    relay.await.unwrap();
}

#[tokio::test]
async fn peer_sharing_populated() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let accept: HandshakeMessage<VersionData> =
            HandshakeMessage::Accept(15, VersionData::new(764824073, false, 1, false));
        let mut payload = Vec::new();
        minicbor::encode(&accept, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        skip_one_segment(&mut sock).await; // share request
        skip_one_segment(&mut sock).await; // find intersect

        let addresses = vec![
            PeerAddress::V4(Ipv4Addr::new(1, 2, 3, 10), 3001),
            PeerAddress::V6([0x2001_0DB8, 0, 0, 1], 3001),
        ];
        let msg = PeerSharingMessage::SharePeers(addresses);
        let mut payload = Vec::new();
        minicbor::encode(&msg, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_PEER_SHARING), &payload))
            .await
            .unwrap();

        let tip = Tip(Point::Specific(1, vec![1u8; 32]), 1);
        let msg = ChainSyncMessage::IntersectNotFound(tip);
        let mut payload = Vec::new();
        minicbor::encode(&msg, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_CHAIN_SYNC), &payload))
            .await
            .unwrap();
    });

    let options = Options {
        want_peer_sharing: true,
        session_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_secs(1),
        ..Options::default()
    };

    let report = fetch_tip(endpoint, options).await.unwrap();

    assert_eq!(report.peers_discovered.len(), 2);
    assert_eq!(report.peers_discovered[0].ip, "1.2.3.10");
    assert_eq!(report.peers_discovered[0].port, 3001);
    assert!(report.peers_discovered[1].ip.ends_with(":0001"));
    assert_eq!(report.peers_discovered[1].port, 3001);

    relay.await.unwrap();
}

#[tokio::test]
async fn tip_delivered_before_peers_still_succeeds() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let accept: HandshakeMessage<VersionData> =
            HandshakeMessage::Accept(15, VersionData::new(764824073, false, 1, false));
        let mut payload = Vec::new();
        minicbor::encode(&accept, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        skip_one_segment(&mut sock).await; // share request
        skip_one_segment(&mut sock).await; // find intersect

        let tip = Tip(Point::Specific(2, vec![2u8; 32]), 2);
        let msg = ChainSyncMessage::IntersectNotFound(tip);
        let mut payload = Vec::new();
        minicbor::encode(&msg, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_CHAIN_SYNC), &payload))
            .await
            .unwrap();

        // peer sharing reply never arrives within the protocol deadline.
    });

    let options = Options {
        want_peer_sharing: true,
        session_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_millis(300),
        ..Options::default()
    };

    let report = fetch_tip(endpoint, options).await.unwrap();

    assert_eq!(report.tip.block_no, 2);
    assert!(report.peers_discovered.is_empty());

    relay.await.unwrap();
}

#[tokio::test]
async fn session_timeout_fires_when_peer_goes_silent() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let accept: HandshakeMessage<VersionData> =
            HandshakeMessage::Accept(14, VersionData::new(764824073, false, 0, false));
        let mut payload = Vec::new();
        minicbor::encode(&accept, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        // then goes silent forever (from this test's point of view).
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let options = Options {
        want_peer_sharing: false,
        session_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_secs(5),
        ..Options::default()
    };

    let result = fetch_tip(endpoint, options).await;

    assert!(matches!(result, Err(Error::Timeout { scope: "session" })));

    relay.abort();
}

#[tokio::test]
async fn per_protocol_timeout_fires_before_a_shorter_session_deadline_would() {
    let (listener, endpoint) = bind_loopback().await;

    let relay = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        skip_one_segment(&mut sock).await; // handshake propose

        let accept: HandshakeMessage<VersionData> =
            HandshakeMessage::Accept(14, VersionData::new(764824073, false, 0, false));
        let mut payload = Vec::new();
        minicbor::encode(&accept, &mut payload).unwrap();
        sock.write_all(&segment(responder(PROTOCOL_N2N_HANDSHAKE), &payload))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let options = Options {
        want_peer_sharing: false,
        session_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
        protocol_timeout: Duration::from_millis(200),
        ..Options::default()
    };

    let result = fetch_tip(endpoint, options).await;

    assert!(matches!(result, Err(Error::Timeout { scope: "chainsync" })));

    relay.abort();
}
