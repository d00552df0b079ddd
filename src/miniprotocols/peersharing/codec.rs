use std::net::Ipv4Addr;

use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

use super::{Message, PeerAddress};

impl Encode<()> for PeerAddress {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            PeerAddress::V4(addr, port) => {
                e.array(3)?.u16(0)?;
                e.u32(u32::from(*addr))?;
                e.u16(*port)?;
            }
            PeerAddress::V6(words, port) => {
                e.array(6)?.u16(1)?;
                for word in words {
                    e.u32(*word)?;
                }
                e.u16(*port)?;
            }
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for PeerAddress {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let label = d.u16()?;

        match label {
            0 => {
                let addr = Ipv4Addr::from(d.u32()?);
                let port = d.u16()?;
                Ok(PeerAddress::V4(addr, port))
            }
            1 => {
                let words = [d.u32()?, d.u32()?, d.u32()?, d.u32()?];
                let port = d.u16()?;
                Ok(PeerAddress::V6(words, port))
            }
            _ => Err(decode::Error::message("can't decode PeerAddress")),
        }
    }
}

impl Encode<()> for Message {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Message::ShareRequest(amount) => {
                e.array(2)?.u16(0)?;
                e.u8(*amount)?;
            }
            Message::SharePeers(addresses) => {
                e.array(2)?.u16(1)?;
                e.array(addresses.len() as u64)?;
                for address in addresses {
                    e.encode(address)?;
                }
            }
            Message::Done => {
                e.array(1)?.u16(2)?;
            }
        };

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Message {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let label = d.u16()?;

        match label {
            0 => Ok(Message::ShareRequest(d.u8()?)),
            1 => Ok(Message::SharePeers(d.decode()?)),
            2 => Ok(Message::Done),
            _ => Err(decode::Error::message("can't decode Message")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_entry_round_trips_to_dotted_quad() {
        let addr = PeerAddress::V4(Ipv4Addr::new(1, 2, 3, 10), 3001);

        let mut buf = Vec::new();
        minicbor::encode(&addr, &mut buf).unwrap();

        let decoded: PeerAddress = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(decoded.ip_string(), "1.2.3.10");
        assert_eq!(decoded.port(), 3001);
    }

    #[test]
    fn ipv6_entry_has_no_flow_info_or_scope_id() {
        let addr = PeerAddress::V6([0x2001_0DB8, 0, 0, 1], 3001);

        let mut buf = Vec::new();
        minicbor::encode(&addr, &mut buf).unwrap();

        // array(6) tag=1 + four u32 words + port == 6 wire elements total
        assert_eq!(buf[0], 0x86);

        let decoded: PeerAddress = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert!(decoded.ip_string().ends_with(":0001"));
    }

    #[test]
    fn share_peers_uses_definite_length_array() {
        let msg = Message::SharePeers(vec![PeerAddress::V4(Ipv4Addr::new(1, 2, 3, 10), 3001)]);

        let mut buf = Vec::new();
        minicbor::encode(&msg, &mut buf).unwrap();

        for indefinite_marker in [0x9F, 0xBF] {
            assert!(!buf.contains(&indefinite_marker));
        }
    }
}
