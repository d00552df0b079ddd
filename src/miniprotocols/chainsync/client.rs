use thiserror::Error;
use tracing::debug;

use super::{IntersectResponse, Message, State};
use crate::miniprotocols::Point;
use crate::plexer;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("attempted to receive message while agency is ours")]
    AgencyIsOurs,

    #[error("attempted to send message while agency is theirs")]
    AgencyIsTheirs,

    #[error("inbound message is not valid for current state")]
    InvalidInbound,

    #[error("outbound message is not valid for current state")]
    InvalidOutbound,

    #[error("error while sending or receiving data through the channel")]
    Plexer(#[from] plexer::Error),
}

pub struct Client(State, plexer::ChannelBuffer);

impl Client {
    pub fn new(channel: plexer::AgentChannel) -> Self {
        Self(State::Idle, plexer::ChannelBuffer::new(channel))
    }

    pub fn state(&self) -> State {
        self.0
    }

    pub fn has_agency(&self) -> bool {
        matches!(self.0, State::Idle)
    }

    fn assert_outbound_state(&self, msg: &Message) -> Result<(), ClientError> {
        match (self.0, msg) {
            (State::Idle, Message::FindIntersect(_)) => Ok(()),
            _ => Err(ClientError::InvalidOutbound),
        }
    }

    fn assert_inbound_state(&self, msg: &Message) -> Result<(), ClientError> {
        match (self.0, msg) {
            (State::Intersect, Message::IntersectFound(..)) => Ok(()),
            (State::Intersect, Message::IntersectNotFound(..)) => Ok(()),
            _ => Err(ClientError::InvalidInbound),
        }
    }

    async fn send_message(&mut self, msg: &Message) -> Result<(), ClientError> {
        if !self.has_agency() {
            return Err(ClientError::AgencyIsTheirs);
        }
        self.assert_outbound_state(msg)?;

        self.1.send_msg_chunks(msg).await?;

        Ok(())
    }

    async fn recv_message(&mut self) -> Result<Message, ClientError> {
        if self.has_agency() {
            return Err(ClientError::AgencyIsOurs);
        }

        let msg = self.1.recv_full_msg().await?;
        self.assert_inbound_state(&msg)?;

        Ok(msg)
    }

    /// Sends `FindIntersect(points)` and waits for the single reply,
    /// extracting whichever point (if any) the responder found plus its
    /// current tip.
    pub async fn find_intersect(
        &mut self,
        points: Vec<Point>,
    ) -> Result<IntersectResponse, ClientError> {
        let msg = Message::FindIntersect(points);
        self.send_message(&msg).await?;
        self.0 = State::Intersect;

        debug!("sent find intersect");

        match self.recv_message().await? {
            Message::IntersectFound(point, tip) => {
                self.0 = State::Done;
                Ok((Some(point), tip))
            }
            Message::IntersectNotFound(tip) => {
                self.0 = State::Done;
                Ok((None, tip))
            }
            Message::FindIntersect(_) => Err(ClientError::InvalidInbound),
        }
    }
}
