use crate::transport::{AccessoryTransport, Notifier};
use crate::types::{DeliveryStatus, PeerFeatures, PeerHandle, TransactionId};
use crate::{MexError, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Notice shown when the peer cannot receive messages.
pub const UNSUPPORTED_NOTICE: &str = "Message feature is not supported by the Peer";

/// Outstanding transactions remembered for status correlation.
const MAX_PENDING: usize = 64;

/// Fire-and-forget message delivery to the bound peer.
///
/// Transactions are remembered only so their later delivery status can be
/// logged with a latency. Nothing is retried or awaited.
#[derive(Debug, Default)]
pub struct DeliveryChannel {
    pending: VecDeque<(TransactionId, Instant)>,
}

impl DeliveryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send one frame to `peer`.
    ///
    /// A peer without the message feature gets exactly one notice on `notifier`
    /// and no transaction.
    pub fn send(
        &mut self,
        transport: &mut dyn AccessoryTransport,
        notifier: &mut dyn Notifier,
        peer: Option<&PeerHandle>,
        frame: &[u8],
        secure: bool,
    ) -> Result<TransactionId> {
        let peer = peer.ok_or(MexError::NoPeer)?;

        if !transport.peer_features(peer).contains(PeerFeatures::MESSAGE) {
            log::debug!("Message exchange is not supported by the peer framework");
            notifier.show_transient_notice(UNSUPPORTED_NOTICE);
            return Err(MexError::CapabilityUnsupported);
        }

        let result = transport.send_data(peer, frame, secure);
        if result <= 0 {
            log::debug!("Error in sending message data, result {}", result);
            return Err(MexError::SendRejected(result));
        }

        let transaction = TransactionId(result);
        if self.pending.len() == MAX_PENDING {
            if let Some((dropped, _)) = self.pending.pop_front() {
                log::trace!("Forgetting transaction {} without status", dropped);
            }
        }
        self.pending.push_back((transaction, Instant::now()));
        log::trace!("Sent {} bytes as transaction {}", frame.len(), transaction);
        Ok(transaction)
    }

    /// Record a delivery status. Returns how long the transaction was in flight,
    /// if it was still known.
    pub fn on_delivery_status(
        &mut self,
        transaction: TransactionId,
        status: DeliveryStatus,
    ) -> Option<Duration> {
        let elapsed = self
            .pending
            .iter()
            .position(|(id, _)| *id == transaction)
            .and_then(|i| self.pending.remove(i))
            .map(|(_, sent_at)| sent_at.elapsed());

        match (status, elapsed) {
            (DeliveryStatus::Delivered, Some(t)) => {
                log::debug!("Transaction {} delivered in {:?}", transaction, t)
            }
            (_, Some(t)) => {
                log::debug!("Transaction {} status {:?} after {:?}", transaction, status, t)
            }
            (_, None) => log::debug!(
                "Status {:?} for unknown transaction {}",
                status,
                transaction
            ),
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;

    #[test]
    fn test_send_returns_transaction_and_tracks_it() {
        let mut transport = FakeTransport::default();
        let mut notices = transport.clone();
        let mut channel = DeliveryChannel::new();
        let peer = PeerHandle::new(1);

        let txn = channel
            .send(&mut transport, &mut notices, Some(&peer), b"abc", false)
            .unwrap();
        assert_eq!(txn, TransactionId(1));
        assert_eq!(channel.pending_count(), 1);
        assert!(channel.on_delivery_status(txn, DeliveryStatus::Delivered).is_some());
        assert_eq!(channel.pending_count(), 0);
        assert!(channel.on_delivery_status(txn, DeliveryStatus::Delivered).is_none());
    }

    #[test]
    fn test_missing_capability_shows_one_notice() {
        let mut transport = FakeTransport::default();
        transport.record.lock().unwrap().no_message_peers.push(2);
        let mut notices = transport.clone();
        let mut channel = DeliveryChannel::new();
        let peer = PeerHandle::new(2);

        let err = channel
            .send(&mut transport, &mut notices, Some(&peer), b"abc", false)
            .unwrap_err();
        assert!(matches!(err, MexError::CapabilityUnsupported));
        let rec = transport.record.lock().unwrap();
        assert_eq!(rec.notices, vec![UNSUPPORTED_NOTICE.to_string()]);
        assert!(rec.sent.is_empty());
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_non_positive_result_is_rejected() {
        let mut transport = FakeTransport::default();
        transport.record.lock().unwrap().send_result = Some(0);
        let mut notices = transport.clone();
        let mut channel = DeliveryChannel::new();
        let peer = PeerHandle::new(1);

        let err = channel
            .send(&mut transport, &mut notices, Some(&peer), b"abc", true)
            .unwrap_err();
        assert!(matches!(err, MexError::SendRejected(0)));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_send_without_peer() {
        let mut transport = FakeTransport::default();
        let mut notices = transport.clone();
        let mut channel = DeliveryChannel::new();
        let err = channel
            .send(&mut transport, &mut notices, None, b"abc", false)
            .unwrap_err();
        assert!(matches!(err, MexError::NoPeer));
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut transport = FakeTransport::default();
        let mut notices = transport.clone();
        let mut channel = DeliveryChannel::new();
        let peer = PeerHandle::new(1);
        for _ in 0..MAX_PENDING + 5 {
            channel
                .send(&mut transport, &mut notices, Some(&peer), b"x", false)
                .unwrap();
        }
        assert_eq!(channel.pending_count(), MAX_PENDING);
        assert!(channel
            .on_delivery_status(TransactionId(1), DeliveryStatus::Failed)
            .is_none());
    }
}
