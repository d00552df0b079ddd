use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

use super::{Message, Tip};

impl Encode<()> for Tip {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        e.array(2)?;
        e.encode(&self.0)?;
        e.u64(self.1)?;

        Ok(())
    }
}

impl<'b> Decode<'b, ()> for Tip {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut ()) -> Result<Self, decode::Error> {
        d.array()?;
        let point = d.decode()?;
        let block_no = d.u64()?;

        Ok(Tip(point, block_no))
    }
}

impl Encode<()> for Message {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut (),
    ) -> Result<(), encode::Error<W::Error>> {
        match self {
            Message::FindIntersect(points) => {
                e.array(2)?.u16(4)?;
                e.array(points.len() as u64)?;
                for point in points.iter() {
                    e.encode(point)?;
                }
            }
            Message::IntersectFound(point, tip) => {
                e.array(3)?.u16(5)?;
                e.encode(point)?;
                e.encode(tip)?;
            }
            Message::IntersectNotFound(tip) => {
                e.array(2)?.u16(6)?;
                e.encode(tip)?;
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
            4 => {
                let points = d.decode()?;
                Ok(Message::FindIntersect(points))
            }
            5 => {
                let point = d.decode()?;
                let tip = d.decode()?;
                Ok(Message::IntersectFound(point, tip))
            }
            6 => {
                let tip = d.decode()?;
                Ok(Message::IntersectNotFound(tip))
            }
            _ => Err(decode::Error::message(
                "unknown variant for chainsync message",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miniprotocols::Point;

    #[test]
    fn find_intersect_with_empty_points_encodes_to_definite_length_bytes() {
        let msg = Message::FindIntersect(vec![]);

        let mut buf = Vec::new();
        minicbor::encode(&msg, &mut buf).unwrap();

        assert_eq!(buf, vec![0x82, 0x04, 0x80]);
    }

    #[test]
    fn intersect_not_found_round_trips() {
        let tip = Tip(Point::Specific(142857142, vec![0u8; 32]), 9999999);
        let msg = Message::IntersectNotFound(tip.clone());

        let mut buf = Vec::new();
        minicbor::encode(&msg, &mut buf).unwrap();

        let decoded: Message = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, Message::IntersectNotFound(tip));
    }

    #[test]
    fn intersect_found_round_trips() {
        let point = Point::Specific(100, vec![1u8; 32]);
        let tip = Tip(Point::Specific(200, vec![2u8; 32]), 42);
        let msg = Message::IntersectFound(point.clone(), tip.clone());

        let mut buf = Vec::new();
        minicbor::encode(&msg, &mut buf).unwrap();

        let decoded: Message = minicbor::decode(&buf).unwrap();
        assert_eq!(decoded, Message::IntersectFound(point, tip));
    }
}
