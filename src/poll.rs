//! The register-polling protocol: command pacing, response correlation and
//! sweep orchestration.

use crate::message::read_command;
use crate::registers::{CATALOG, CELL_PAYLOAD_LEN, FIRST_CELL_REGISTER, LAST_CELL_REGISTER};
use crate::sample::{BatterySample, SampleAccumulator};
use crate::transport::{Transport, TransportError};
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// How long to keep draining notifications after each command before the
/// next one goes out. The device answers within this window on a healthy
/// link; the protocol has no acknowledgment to pace by instead.
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Issues register queries over a [`Transport`] and folds the asynchronous
/// responses into per-register state.
///
/// Responses carry no sequence numbers and arrive in no guaranteed order;
/// correlation is purely by register id, relying on the settle interval to
/// keep a single command in flight at a time. A device slower than the
/// interval can get a response attributed to the following command; that
/// is a property of the wire protocol, not of this implementation.
///
/// One session owns one accumulator, so sweeps are serialized through
/// `&mut self`. Cancelling a sweep mid-flight leaves the accumulated state
/// valid and partially updated; the next sweep overwrites stale entries.
pub struct PollSession<T> {
    transport: T,
    accumulator: SampleAccumulator,
    settle_interval: Duration,
}

impl<T: Transport> PollSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            accumulator: SampleAccumulator::default(),
            settle_interval: SETTLE_INTERVAL,
        }
    }

    /// Override the pause between commands. A longer interval helps slow
    /// links at the cost of a slower sweep.
    pub fn set_settle_interval(&mut self, interval: Duration) {
        self.settle_interval = interval;
    }

    /// Query every named register once and return a snapshot of all
    /// telemetry gathered so far.
    ///
    /// A register that does not answer in time keeps the value it reported
    /// in an earlier sweep, and stays absent from the sample if it has
    /// never answered.
    pub async fn fetch(&mut self) -> Result<BatterySample, TransportError> {
        let commands: Vec<(u8, u8)> = CATALOG
            .iter()
            .map(|descriptor| (descriptor.id, descriptor.payload_len))
            .collect();
        self.sweep(&commands).await?;
        Ok(self.accumulator.snapshot())
    }

    /// Query the 15 per-cell voltage registers (highest id first, the order
    /// the device expects) and return the slots in ascending register
    /// order. `None` marks a cell that has never answered.
    pub async fn fetch_voltages(&mut self) -> Result<Vec<Option<u16>>, TransportError> {
        let commands: Vec<(u8, u8)> = (FIRST_CELL_REGISTER..=LAST_CELL_REGISTER)
            .rev()
            .map(|register| (register, CELL_PAYLOAD_LEN))
            .collect();
        self.sweep(&commands).await?;
        Ok(self.accumulator.cell_voltages())
    }

    /// Send one command per entry, draining whatever notifications arrive
    /// during each settle window into the accumulator.
    async fn sweep(&mut self, commands: &[(u8, u8)]) -> Result<(), TransportError> {
        let mut notifications = self.transport.subscribe().await?;
        for &(register, payload_len) in commands {
            let frame = read_command(register, payload_len);
            log::debug!("tx frame {}", hex::encode(&frame));
            self.transport.write_command(&frame).await?;
            Self::drain(&mut notifications, &mut self.accumulator, self.settle_interval).await?;
        }
        Ok(())
    }

    async fn drain<S>(
        notifications: &mut S,
        accumulator: &mut SampleAccumulator,
        settle: Duration,
    ) -> Result<(), TransportError>
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        let deadline = Instant::now() + settle;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match timeout(remaining, notifications.next()).await {
                // Settle window spent; move on to the next command.
                Err(_) => return Ok(()),
                Ok(None) => return Err(TransportError::SubscriptionClosed),
                Ok(Some(raw)) => {
                    log::debug!("rx frame {}", hex::encode(&raw));
                    accumulator.apply(&raw);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_integer, RESPONSE_TAIL};
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted transport double: records written frames and plays back one
    /// fixed set of notification buffers per subscription.
    struct MockTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        scripts: Mutex<VecDeque<Vec<Vec<u8>>>>,
        fail_writes: bool,
    }

    impl MockTransport {
        fn scripted(scripts: Vec<Vec<Vec<u8>>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                sent: Arc::clone(&sent),
                scripts: Mutex::new(scripts.into()),
                fail_writes: false,
            };
            (transport, sent)
        }

        fn failing() -> Self {
            Self {
                sent: Arc::default(),
                scripts: Mutex::default(),
                fail_writes: true,
            }
        }
    }

    impl Transport for MockTransport {
        async fn write_command(&self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::Write("link down".into()));
            }
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        async fn subscribe(
            &self,
        ) -> Result<impl Stream<Item = Vec<u8>> + Unpin + Send + '_, TransportError> {
            let responses = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(stream::iter(responses).chain(stream::pending()))
        }
    }

    fn response(register: u8, value: u64) -> Vec<u8> {
        let mut raw = vec![0x32, 0x4B, 0x5D, 0x35];
        raw.extend_from_slice(&encode_integer(u64::from(register)));
        raw.extend_from_slice(&encode_integer(value));
        raw.extend_from_slice(&RESPONSE_TAIL);
        raw
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_sweeps_catalog_in_order_with_pacing() {
        let (transport, sent) = MockTransport::scripted(vec![Vec::new()]);
        let mut session = PollSession::new(transport);

        let started = Instant::now();
        session.fetch().await.unwrap();

        let expected: Vec<Vec<u8>> = CATALOG
            .iter()
            .map(|descriptor| read_command(descriptor.id, descriptor.payload_len))
            .collect();
        assert_eq!(*sent.lock().unwrap(), expected);
        // One settle window per command, even after the last one.
        assert!(started.elapsed() >= SETTLE_INTERVAL * 7);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_responses_all_land() {
        let responses = vec![
            response(24, 2000),
            response(23, 42),
            response(15, 1800),
            response(13, 89),
            response(10, 150),
            response(9, 13277),
            response(8, 3000),
        ];
        let (transport, _) = MockTransport::scripted(vec![responses]);
        let mut session = PollSession::new(transport);

        let sample = session.fetch().await.unwrap();

        assert_eq!(sample.value("mos_temperature"), Some(26.85));
        assert_eq!(sample.value("voltage"), Some(13.277));
        assert_eq!(sample.value("current"), Some(1.5));
        assert_eq!(sample.value("soc"), Some(89.0));
        assert_eq!(sample.value("cycle_capacity"), Some(18.0));
        assert_eq!(sample.value("num_cycles"), Some(42.0));
        assert_eq!(sample.value("capacity"), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_register_is_absent_then_stale() {
        let (transport, _) = MockTransport::scripted(vec![
            vec![response(9, 13277), response(13, 89)],
            vec![response(13, 90)],
        ]);
        let mut session = PollSession::new(transport);

        let first = session.fetch().await.unwrap();
        assert_eq!(first.value("voltage"), Some(13.277));
        assert_eq!(first.value("soc"), Some(89.0));
        assert_eq!(first.value("mos_temperature"), None);

        // Voltage misses the second sweep: its previous reading survives.
        let second = session.fetch().await.unwrap();
        assert_eq!(second.value("voltage"), Some(13.277));
        assert_eq!(second.value("soc"), Some(90.0));
    }

    #[tokio::test(start_paused = true)]
    async fn voltage_sweep_queries_descending_and_returns_ascending() {
        let responses: Vec<Vec<u8>> = (FIRST_CELL_REGISTER..=LAST_CELL_REGISTER)
            .map(|register| response(register, 3000 + u64::from(register)))
            .collect();
        let (transport, sent) = MockTransport::scripted(vec![responses]);
        let mut session = PollSession::new(transport);

        let voltages = session.fetch_voltages().await.unwrap();

        let expected_commands: Vec<Vec<u8>> = (FIRST_CELL_REGISTER..=LAST_CELL_REGISTER)
            .rev()
            .map(|register| read_command(register, CELL_PAYLOAD_LEN))
            .collect();
        assert_eq!(*sent.lock().unwrap(), expected_commands);
        for (slot, voltage) in voltages.iter().enumerate() {
            let register = FIRST_CELL_REGISTER + slot as u8;
            assert_eq!(*voltage, Some(3000 + u16::from(register)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gaps_are_reported_not_zero_filled() {
        let (transport, _) = MockTransport::scripted(vec![vec![
            response(63, 3312),
            response(49, 3298),
        ]]);
        let mut session = PollSession::new(transport);

        let voltages = session.fetch_voltages().await.unwrap();

        assert_eq!(voltages[0], Some(3298));
        assert_eq!(voltages[14], Some(3312));
        assert!(voltages[1..14].iter().all(Option::is_none));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_aborts_the_sweep() {
        let mut session = PollSession::new(MockTransport::failing());
        let err = session.fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_surfaces_as_transport_error() {
        struct ClosingTransport;

        impl Transport for ClosingTransport {
            async fn write_command(&self, _frame: &[u8]) -> Result<(), TransportError> {
                Ok(())
            }

            async fn subscribe(
                &self,
            ) -> Result<impl Stream<Item = Vec<u8>> + Unpin + Send + '_, TransportError>
            {
                Ok(stream::empty())
            }
        }

        let mut session = PollSession::new(ClosingTransport);
        let err = session.fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::SubscriptionClosed));
    }
}
