//! Outbound messages the state machine asks the runner to deliver.

use byzcoin_types::{
    BlockProposal, CatchUpRequest, ClientTransaction, CommitMessage, Refusal, SignatureShare,
    ViewChangeCertificate, ViewChangeRequest,
};

/// A message addressed to other roster members.
///
/// The transport is out of scope; runners map these onto whatever carrier
/// they own (in-memory queues in simulation, sockets in production).
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Proposal(Box<BlockProposal>),
    Share(SignatureShare),
    Refusal(Refusal),
    Commit(Box<CommitMessage>),
    ViewChangeRequest(ViewChangeRequest),
    ViewChangeCertificate(ViewChangeCertificate),
    CatchUpRequest(CatchUpRequest),
    /// A follower relays a client transaction to the current leader.
    SubmitForward(ClientTransaction),
}
