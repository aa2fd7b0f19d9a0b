//! The byte-level seam between the polling protocol and the BLE stack.

use futures_util::Stream;
use std::future::Future;

/// Failures of the underlying characteristic link. These are fatal to the
/// sweep that hits them; accumulated telemetry is left as-is.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Writing a command frame to the command characteristic failed.
    #[error("failed to write command frame")]
    Write(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Subscribing to the telemetry characteristic failed.
    #[error("failed to subscribe to notifications")]
    Subscribe(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The notification stream ended while a sweep was still running.
    #[error("notification stream closed")]
    SubscriptionClosed,
}

/// Byte-level access to the two characteristics the battery exposes.
///
/// Implementations write 8-byte command frames and deliver raw notification
/// buffers as they arrive. Dropping the stream returned by
/// [`Transport::subscribe`] unsubscribes.
pub trait Transport {
    /// Write one command frame to the command characteristic.
    fn write_command(
        &self,
        frame: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribe to raw response frames from the telemetry characteristic.
    fn subscribe(
        &self,
    ) -> impl Future<
        Output = Result<impl Stream<Item = Vec<u8>> + Unpin + Send + '_, TransportError>,
    > + Send;
}
