//! Wire types and per-protocol state machines shared by every mini-protocol
//! client: chain `Point`s, the well-known protocol ids, and network magic
//! constants.

use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

pub mod chainsync;
pub mod handshake;
pub mod peersharing;

/// Well-known magic for mainnet.
pub const MAINNET_MAGIC: u64 = 764824073;

/// Well-known magic for preview.
pub const PREVIEW_MAGIC: u64 = 2;

/// Well-known magic for preprod.
pub const PREPROD_MAGIC: u64 = 1;

/// Mini-protocol channel number for node-to-node handshakes.
pub const PROTOCOL_N2N_HANDSHAKE: u16 = 0;

/// Mini-protocol channel number for node-to-node chain-sync.
pub const PROTOCOL_N2N_CHAIN_SYNC: u16 = 2;

/// Mini-protocol channel number for node-to-node peer-sharing.
pub const PROTOCOL_N2N_PEER_SHARING: u16 = 10;

/// A point within a chain: either the origin, or a specific slot and header
/// hash.
#[derive(Clone, Eq, PartialEq, Hash)]
pub enum Point {
    Origin,
    Specific(u64, Vec<u8>),
}

impl Point {
    pub fn slot_or_default(&self) -> u64 {
        match self {
            Point::Origin => 0,
            Point::Specific(slot, _) => *slot,
        }
    }
}

impl std::fmt::Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Origin => write!(f, "Origin"),
            Self::Specific(slot, hash) => write!(f, "({}, {})", slot, hex::encode(hash)),
        }
    }
}

impl Encode<()> for Point {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Point::Origin => e.array(0)?,
            Point::Specific(slot, hash) => e.array(2)?.u64(*slot)?.bytes(hash)?,
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Point {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        let size = d.array()?;

        match size {
            Some(0) => Ok(Point::Origin),
            Some(2) => {
                let slot = d.u64()?;
                let hash = d.bytes()?;
                Ok(Point::Specific(slot, Vec::from(hash)))
            }
            _ => Err(decode::Error::message(
                "can't decode Point from array of this size",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_round_trips() {
        let mut buf = Vec::new();
        minicbor::encode(Point::Origin, &mut buf).unwrap();

        assert_eq!(buf, vec![0x80]);

        let decoded: Point = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, Point::Origin);
    }

    #[test]
    fn specific_point_round_trips() {
        let point = Point::Specific(142857142, vec![0u8; 32]);

        let mut buf = Vec::new();
        minicbor::encode(&point, &mut buf).unwrap();

        let decoded: Point = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, point);
    }
}
