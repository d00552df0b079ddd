use std::fmt::Debug;
use tracing::debug;

use super::{Confirmation, Message, State, VersionTable};
use crate::plexer::{self, Fragment};

/// Handshake initiator. Drives mini-protocol 0 from `Propose` through
/// `Confirm` to `Done`, unblocking every other mini-protocol once
/// [`Client::handshake`] resolves.
pub struct Client<D>(State, plexer::ChannelBuffer, std::marker::PhantomData<D>)
where
    D: Debug + Clone;

impl<D> Client<D>
where
    D: Debug + Clone,
    Message<D>: Fragment,
{
    pub fn new(channel: plexer::AgentChannel) -> Self {
        Self(State::Propose, plexer::ChannelBuffer::new(channel), std::marker::PhantomData)
    }

    pub fn state(&self) -> State {
        self.0
    }

    pub fn is_done(&self) -> bool {
        self.0 == State::Done
    }

    fn has_agency(&self) -> bool {
        match self.0 {
            State::Propose => true,
            State::Confirm => false,
            State::Done => true,
        }
    }

    async fn send_propose(&mut self, versions: VersionTable<D>) -> Result<(), super::Error> {
        if !self.has_agency() {
            return Err(super::Error::AgencyIsTheirs);
        }

        let msg = Message::Propose(versions);
        self.1.send_msg_chunks(&msg).await?;
        self.0 = State::Confirm;

        debug!("version proposed");

        Ok(())
    }

    async fn recv_confirmation(&mut self) -> Result<Confirmation<D>, super::Error> {
        if self.has_agency() {
            return Err(super::Error::AgencyIsOurs);
        }

        let msg: Message<D> = self.1.recv_full_msg().await?;
        self.0 = State::Done;

        let confirmation = match msg {
            Message::Accept(version, data) => Confirmation::Accepted(version, data),
            Message::Refuse(reason) => Confirmation::Rejected(reason),
            Message::QueryReply(table) => Confirmation::QueryReply(table),
            Message::Propose(_) => return Err(super::Error::InvalidInbound),
        };

        debug!(?confirmation, "version confirmed");

        Ok(confirmation)
    }

    /// Proposes `versions` and waits for the responder's single reply.
    pub async fn handshake(
        &mut self,
        versions: VersionTable<D>,
    ) -> Result<Confirmation<D>, super::Error> {
        self.send_propose(versions).await?;
        self.recv_confirmation().await
    }
}

pub type N2NClient = Client<super::n2n::VersionData>;
