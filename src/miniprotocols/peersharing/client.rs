use thiserror::Error;
use tracing::debug;

use super::{Amount, Message, PeerAddress, State};
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
            (State::Idle, Message::ShareRequest(..)) => Ok(()),
            (State::Idle, Message::Done) => Ok(()),
            _ => Err(ClientError::InvalidOutbound),
        }
    }

    fn assert_inbound_state(&self, msg: &Message) -> Result<(), ClientError> {
        match (self.0, msg) {
            (State::Busy, Message::SharePeers(..)) => Ok(()),
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

    /// Best-effort request for `amount` peer addresses. The reply may never
    /// arrive if the responder doesn't support peer sharing; callers are
    /// expected to race this against a deadline and tolerate failure.
    pub async fn request_peers(&mut self, amount: Amount) -> Result<Vec<PeerAddress>, ClientError> {
        let msg = Message::ShareRequest(amount);
        self.send_message(&msg).await?;
        self.0 = State::Busy;

        debug!(amount, "sent share request");

        match self.recv_message().await? {
            Message::SharePeers(addresses) => {
                self.0 = State::Idle;
                debug!(count = addresses.len(), "received peer addresses");
                Ok(addresses)
            }
            _ => unreachable!("assert_inbound_state only admits SharePeers at State::Busy"),
        }
    }
}
