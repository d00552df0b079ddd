//! Node-to-node version data: this client only ever proposes versions 14 and
//! 15, both of which always carry the full 4-tuple `(magic, diffusionMode,
//! peerSharing, query)` — unlike older versions, there is no conditional
//! 2-element form to support here.

use std::collections::HashMap;

use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

pub type VersionTable = super::protocol::VersionTable<VersionData>;

const PROTOCOL_V14: u64 = 14;
const PROTOCOL_V15: u64 = 15;

impl VersionTable {
    /// Proposes versions 14 and 15 with `diffusionMode=false`
    /// (initiator+responder) and the given peer-sharing willingness.
    pub fn v14_and_15(network_magic: u64, want_peer_sharing: bool) -> VersionTable {
        let peer_sharing = if want_peer_sharing { 1 } else { 0 };

        let values = [
            (
                PROTOCOL_V14,
                VersionData::new(network_magic, false, peer_sharing, false),
            ),
            (
                PROTOCOL_V15,
                VersionData::new(network_magic, false, peer_sharing, false),
            ),
        ]
        .into_iter()
        .collect::<HashMap<u64, VersionData>>();

        VersionTable { values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionData {
    network_magic: u64,
    initiator_and_responder_diffusion_mode: bool,
    peer_sharing: u8,
    query: bool,
}

impl VersionData {
    pub fn new(
        network_magic: u64,
        initiator_and_responder_diffusion_mode: bool,
        peer_sharing: u8,
        query: bool,
    ) -> Self {
        VersionData {
            network_magic,
            initiator_and_responder_diffusion_mode,
            peer_sharing,
            query,
        }
    }

    pub fn network_magic(&self) -> u64 {
        self.network_magic
    }

    pub fn peer_sharing_enabled(&self) -> bool {
        self.peer_sharing != 0
    }
}

impl Encode<()> for VersionData {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.array(4)?
            .u64(self.network_magic)?
            .bool(self.initiator_and_responder_diffusion_mode)?
            .u8(self.peer_sharing)?
            .bool(self.query)?;

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for VersionData {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;

        let network_magic = d.u64()?;
        let initiator_and_responder_diffusion_mode = d.bool()?;
        let peer_sharing = d.u8()?;
        let query = d.bool()?;

        Ok(Self {
            network_magic,
            initiator_and_responder_diffusion_mode,
            peer_sharing,
            query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_version_data_encodes_to_a_definite_four_element_array() {
        let data = VersionData::new(764824073, false, 1, false);

        let mut buf = Vec::new();
        minicbor::encode(&data, &mut buf).unwrap();

        assert_eq!(buf[0], 0x84);
        assert_eq!(&buf[1..6], &[0x1A, 0x2D, 0x96, 0x4A, 0x09]);
        assert_eq!(buf[6], 0xF4); // diffusionMode = false
        assert_eq!(buf[7], 0x01); // peerSharing = 1
        assert_eq!(buf[8], 0xF4); // query = false
    }

    #[test]
    fn v14_and_15_table_has_exactly_two_entries() {
        let table = VersionTable::v14_and_15(764824073, true);

        assert_eq!(table.values.len(), 2);
        assert!(table.values.contains_key(&14));
        assert!(table.values.contains_key(&15));
        assert!(table.values[&14].peer_sharing_enabled());
    }
}
