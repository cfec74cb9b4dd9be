use meridian_core::AccountId;

use crate::receiver::CcpReceiver;
use crate::sender::CcpSender;

/// A connected account we exchange routes with.
///
/// Only exists when at least one direction is enabled; each direction owns
/// its own state machine and any scheduled work.
#[derive(Debug)]
pub struct Peer {
    account: AccountId,
    /// Distinguishes this instance from earlier peers for the same account.
    session: u64,
    sender: Option<CcpSender>,
    receiver: Option<CcpReceiver>,
}

impl Peer {
    /// Create a peer, or `None` if neither direction is enabled.
    pub fn new(account: AccountId, session: u64, send_routes: bool, receive_routes: bool) -> Option<Self> {
        if !send_routes && !receive_routes {
            return None;
        }
        Some(Self {
            sender: send_routes.then(|| CcpSender::new(account.clone())),
            receiver: receive_routes.then(|| CcpReceiver::new(account.clone())),
            account,
            session,
        })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn sender(&self) -> Option<&CcpSender> {
        self.sender.as_ref()
    }

    pub fn sender_mut(&mut self) -> Option<&mut CcpSender> {
        self.sender.as_mut()
    }

    pub fn receiver(&self) -> Option<&CcpReceiver> {
        self.receiver.as_ref()
    }

    pub fn receiver_mut(&mut self) -> Option<&mut CcpReceiver> {
        self.receiver.as_mut()
    }

    /// Cancel every timer owned by this peer. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.as_mut() {
            sender.stop();
        }
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.cancel_retry();
        }
    }
}
