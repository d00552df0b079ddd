use crate::miniprotocols::Point;

/// The producer's chain head at the moment of a reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Tip(pub Point, pub u64);

pub type IntersectResponse = (Option<Point>, Tip);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Idle,
    Intersect,
    Done,
}

/// Only the one-shot intersect-query slice of the full ChainSync grammar:
/// this client never sends `RequestNext` and so never needs to decode
/// `RollForward`/`RollBackward`/`AwaitReply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    FindIntersect(Vec<Point>),
    IntersectFound(Point, Tip),
    IntersectNotFound(Tip),
}
