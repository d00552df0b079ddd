//! Sequences a full run against one relay: connect, negotiate the
//! handshake, then race a ChainSync intersect query against an optional
//! PeerSharing request, returning as soon as the tip arrives.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::net::ToSocketAddrs;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::bearer::Bearer;
use crate::miniprotocols::chainsync;
use crate::miniprotocols::handshake::{self, n2n, Confirmation};
use crate::miniprotocols::peersharing;
use crate::miniprotocols::{
    PROTOCOL_N2N_CHAIN_SYNC, PROTOCOL_N2N_HANDSHAKE, PROTOCOL_N2N_PEER_SHARING,
};
use crate::plexer::{Plexer, RunningPlexer};

/// Default session-wide deadline: aborts the whole run if no tip has been
/// produced by then.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 15_000;

/// Default per-mini-protocol deadline.
pub const DEFAULT_PROTOCOL_TIMEOUT_MS: u64 = 12_000;

/// Default TCP connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Conventional NtN relay port.
pub const DEFAULT_PORT: u16 = 3001;

/// How many peer addresses to ask for when peer sharing is requested.
pub const DEFAULT_PEER_SHARING_AMOUNT: u8 = 10;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to peer")]
    Connect(#[from] crate::bearer::ConnectError),

    #[error("handshake protocol error")]
    Handshake(#[from] handshake::Error),

    #[error("handshake refused: {0:?}")]
    HandshakeRefused(handshake::RefuseReason),

    #[error("handshake responder sent a query reply instead of negotiating a version")]
    HandshakeUnexpected,

    #[error("chainsync protocol error")]
    ChainSync(#[from] chainsync::ClientError),

    #[error("{scope} timed out")]
    Timeout { scope: &'static str },
}

/// A `(host, port)` pair identifying the relay to contact. Produced by the
/// caller (or the peer-registry collaborator this crate treats as an
/// external input) and echoed back unchanged in [`FetchTipReport`].
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The producer's tip as reported back to callers: this client's
/// `chainsync::Tip` always decodes the 3-element array form, so there is no
/// opaque/raw-passthrough variant to carry here (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipReport {
    pub slot: u64,
    pub hash_hex: String,
    pub block_no: u64,
}

impl From<chainsync::Tip> for TipReport {
    fn from(tip: chainsync::Tip) -> Self {
        let chainsync::Tip(point, block_no) = tip;

        match point {
            crate::miniprotocols::Point::Origin => TipReport {
                slot: 0,
                hash_hex: String::new(),
                block_no,
            },
            crate::miniprotocols::Point::Specific(slot, hash) => TipReport {
                slot,
                hash_hex: hex::encode(hash),
                block_no,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerAddressReport {
    pub ip: String,
    pub port: u16,
}

impl From<peersharing::PeerAddress> for PeerAddressReport {
    fn from(addr: peersharing::PeerAddress) -> Self {
        PeerAddressReport {
            ip: addr.ip_string(),
            port: addr.port(),
        }
    }
}

/// The single output record this crate produces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTipReport {
    pub peer: Endpoint,
    pub negotiated_version: u64,
    pub tip: TipReport,
    pub peers_discovered: Vec<PeerAddressReport>,
}

/// Knobs a caller can tune away from the defaults above.
#[derive(Debug, Clone)]
pub struct Options {
    pub network_magic: u64,
    pub want_peer_sharing: bool,
    pub session_timeout: Duration,
    pub connect_timeout: Duration,
    pub protocol_timeout: Duration,
    pub peer_sharing_amount: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            network_magic: crate::miniprotocols::MAINNET_MAGIC,
            want_peer_sharing: true,
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            protocol_timeout: Duration::from_millis(DEFAULT_PROTOCOL_TIMEOUT_MS),
            peer_sharing_amount: DEFAULT_PEER_SHARING_AMOUNT,
        }
    }
}

/// A connected, handshaken relay. No mini-protocol other than Handshake may
/// exchange messages until this exists.
pub struct PeerClient {
    plexer: RunningPlexer,
    pub chainsync: chainsync::Client,
    pub peersharing: peersharing::Client,
    pub negotiated_version: u64,
}

impl PeerClient {
    /// Connects, proposes versions 14/15, and blocks until the responder's
    /// single reply is in. Fails the whole connection on refusal or an
    /// unexpected query reply.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        magic: u64,
        want_peer_sharing: bool,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let bearer = Bearer::connect(addr, connect_timeout).await?;
        let mut plexer = Plexer::new(bearer);

        let hs_channel = plexer.subscribe_client(PROTOCOL_N2N_HANDSHAKE);
        let cs_channel = plexer.subscribe_client(PROTOCOL_N2N_CHAIN_SYNC);
        let ps_channel = plexer.subscribe_client(PROTOCOL_N2N_PEER_SHARING);

        let plexer = plexer.spawn();

        let mut handshake = handshake::N2NClient::new(hs_channel);
        let versions = n2n::VersionTable::v14_and_15(magic, want_peer_sharing);

        let confirmation = match handshake.handshake(versions).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                plexer.abort().await;
                return Err(err.into());
            }
        };

        let negotiated_version = match confirmation {
            Confirmation::Accepted(version, _data) => version,
            Confirmation::Rejected(reason) => {
                error!(?reason, "handshake refused");
                plexer.abort().await;
                return Err(Error::HandshakeRefused(reason));
            }
            Confirmation::QueryReply(_) => {
                plexer.abort().await;
                return Err(Error::HandshakeUnexpected);
            }
        };

        Ok(Self {
            plexer,
            chainsync: chainsync::Client::new(cs_channel),
            peersharing: peersharing::Client::new(ps_channel),
            negotiated_version,
        })
    }

    pub async fn close(self) {
        self.plexer.abort().await
    }
}

/// Runs the full sequence against one endpoint: connect, handshake, then
/// race ChainSync's `FindIntersect` against an optional PeerSharing
/// request, returning as soon as the tip is in. The whole call is bounded
/// by `options.session_timeout`.
pub async fn fetch_tip(endpoint: Endpoint, options: Options) -> Result<FetchTipReport, Error> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);

    match timeout(options.session_timeout, run(addr, &options)).await {
        Ok(result) => result.map(|(negotiated_version, tip, peers)| FetchTipReport {
            peer: endpoint,
            negotiated_version,
            tip,
            peers_discovered: peers,
        }),
        Err(_) => Err(Error::Timeout { scope: "session" }),
    }
}

async fn run(
    addr: String,
    options: &Options,
) -> Result<(u64, TipReport, Vec<PeerAddressReport>), Error> {
    let client = PeerClient::connect(
        addr,
        options.network_magic,
        options.want_peer_sharing,
        options.connect_timeout,
    )
    .await?;

    let PeerClient {
        plexer,
        mut chainsync,
        mut peersharing,
        negotiated_version,
    } = client;

    let protocol_timeout = options.protocol_timeout;
    let want_peer_sharing = options.want_peer_sharing;
    let peer_sharing_amount = options.peer_sharing_amount;

    // Peer sharing runs on its own task so the tip can be returned the
    // moment ChainSync settles, without waiting out peer sharing's own
    // timeout for a reply that may never come.
    let peersharing_handle = tokio::spawn(async move {
        if !want_peer_sharing {
            return Vec::new();
        }

        match timeout(protocol_timeout, peersharing.request_peers(peer_sharing_amount)).await {
            Ok(Ok(addresses)) => addresses,
            Ok(Err(err)) => {
                warn!(error = %err, "peer sharing failed, continuing without peers");
                Vec::new()
            }
            Err(_) => {
                warn!("peer sharing timed out, continuing without peers");
                Vec::new()
            }
        }
    });

    let chainsync_result = timeout(protocol_timeout, chainsync.find_intersect(Vec::new())).await;

    let tip = match chainsync_result {
        Ok(Ok((_point, tip))) => tip,
        Ok(Err(err)) => {
            peersharing_handle.abort();
            plexer.abort().await;
            return Err(err.into());
        }
        Err(_) => {
            peersharing_handle.abort();
            plexer.abort().await;
            return Err(Error::Timeout { scope: "chainsync" });
        }
    };

    // Take whatever peers have already arrived; don't wait for more.
    let peers = if peersharing_handle.is_finished() {
        peersharing_handle.await.unwrap_or_default()
    } else {
        peersharing_handle.abort();
        Vec::new()
    };

    plexer.abort().await;

    let peers = peers.into_iter().map(PeerAddressReport::from).collect();

    Ok((negotiated_version, TipReport::from(tip), peers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miniprotocols::Point;

    #[test]
    fn tip_report_hex_encodes_a_non_origin_point() {
        let tip = chainsync::Tip(Point::Specific(142857142, vec![0u8; 32]), 9999999);
        let report = TipReport::from(tip);

        assert_eq!(report.slot, 142857142);
        assert_eq!(report.block_no, 9999999);
        assert_eq!(report.hash_hex, "00".repeat(32));
        assert_eq!(report.hash_hex.len(), 64);
    }

    #[test]
    fn endpoint_displays_as_host_colon_port() {
        let endpoint = Endpoint::new("relay.example.com", 3001);
        assert_eq!(endpoint.to_string(), "relay.example.com:3001");
    }

    #[test]
    fn options_default_to_the_documented_timeouts() {
        let options = Options::default();

        assert_eq!(options.session_timeout, Duration::from_secs(15));
        assert_eq!(options.protocol_timeout, Duration::from_secs(12));
        assert!(options.want_peer_sharing);
    }
}
