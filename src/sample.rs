//! Accumulation of decoded telemetry and the immutable samples cut from it.

use crate::message::Frame;
use crate::registers::{self, CELL_REGISTER_COUNT, FIRST_CELL_REGISTER};
use std::collections::BTreeMap;

/// One point-in-time view of the battery's telemetry.
///
/// A sample holds every named register observed at least once since the
/// session started, plus the per-cell voltages. A register the battery has
/// never answered is simply absent; one that missed the latest sweep keeps
/// its previous reading.
#[derive(Debug, Clone, PartialEq)]
pub struct BatterySample {
    values: BTreeMap<&'static str, f64>,
    cell_voltage_mv: [Option<u16>; CELL_REGISTER_COUNT],
}

impl BatterySample {
    /// The physical value last reported under `name`, if any.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Iterate over all named readings.
    pub fn values(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().map(|(&name, &value)| (name, value))
    }

    /// Per-cell voltages in mv, ascending by register. `None` marks a cell
    /// that has never answered.
    pub fn cell_voltage_mv(&self) -> &[Option<u16>; CELL_REGISTER_COUNT] {
        &self.cell_voltage_mv
    }
}

/// Mutable telemetry state for one battery connection.
///
/// The last write per register wins, so duplicated or reordered
/// notifications within a sweep are harmless.
#[derive(Debug, Default)]
pub(crate) struct SampleAccumulator {
    values: BTreeMap<&'static str, f64>,
    cell_voltage_mv: [Option<u16>; CELL_REGISTER_COUNT],
}

impl SampleAccumulator {
    /// Decode one raw notification buffer and fold it in.
    ///
    /// Malformed or unrecognized frames are logged and dropped without
    /// touching any state; a sweep never aborts over a bad frame.
    pub(crate) fn apply(&mut self, raw: &[u8]) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("dropping undecodable frame {}: {err}", hex::encode(raw));
                return;
            }
        };
        if !frame.is_valid() {
            log::debug!("dropping frame with bad trailer {}", hex::encode(raw));
            return;
        }
        if registers::is_cell_register(frame.register) {
            let slot = usize::from(frame.register - FIRST_CELL_REGISTER);
            let millivolts = frame.value as u16;
            log::debug!("cell #{slot}: {millivolts}mv");
            self.cell_voltage_mv[slot] = Some(millivolts);
        } else {
            match registers::lookup(frame.register) {
                Ok(descriptor) => {
                    if frame.payload_len != usize::from(descriptor.payload_len) {
                        log::debug!(
                            "{} answered {} packed bytes where {} were asked for",
                            descriptor.name,
                            frame.payload_len,
                            descriptor.payload_len
                        );
                    }
                    let physical = (descriptor.transform)(frame.value);
                    log::debug!(
                        "{} (#{}) raw {} -> {physical}",
                        descriptor.name,
                        frame.register,
                        frame.value
                    );
                    self.values.insert(descriptor.name, physical);
                }
                Err(err) => log::debug!("dropping frame: {err}"),
            }
        }
    }

    /// Cut an immutable sample from the current state.
    pub(crate) fn snapshot(&self) -> BatterySample {
        BatterySample {
            values: self.values.clone(),
            cell_voltage_mv: self.cell_voltage_mv,
        }
    }

    /// The cell-voltage slots in ascending register order.
    pub(crate) fn cell_voltages(&self) -> Vec<Option<u16>> {
        self.cell_voltage_mv.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_integer, RESPONSE_TAIL};

    fn response(register: u8, value: u64) -> Vec<u8> {
        let mut raw = vec![0x32, 0x4B, 0x5D, 0x35];
        raw.extend_from_slice(&encode_integer(u64::from(register)));
        raw.extend_from_slice(&encode_integer(value));
        raw.extend_from_slice(&RESPONSE_TAIL);
        raw
    }

    #[test]
    fn named_register_lands_under_its_name() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&hex::decode("324b5d35295d2c201413").unwrap());
        assert_eq!(accumulator.snapshot().value("soc"), Some(89.0));
    }

    #[test]
    fn bad_trailer_does_not_update() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&hex::decode("324b5d35295d2c201414").unwrap());
        assert_eq!(accumulator.snapshot().value("soc"), None);
    }

    #[test]
    fn unknown_register_is_skipped() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&response(11, 89));
        assert_eq!(accumulator.snapshot().values().count(), 0);
    }

    #[test]
    fn garbage_is_skipped_without_panicking() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&[0xFF; 10]);
        accumulator.apply(&[0x32]);
        accumulator.apply(&[]);
        assert_eq!(accumulator.snapshot().values().count(), 0);
    }

    #[test]
    fn cell_response_fills_its_slot() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&response(49, 3300));
        let slots = accumulator.cell_voltages();
        assert_eq!(slots[0], Some(3300));
        assert!(slots[1..].iter().all(Option::is_none));
    }

    #[test]
    fn last_write_wins_per_register() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&response(13, 89));
        accumulator.apply(&response(13, 90));
        assert_eq!(accumulator.snapshot().value("soc"), Some(90.0));
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let mut accumulator = SampleAccumulator::default();
        accumulator.apply(&response(13, 89));
        let sample = accumulator.snapshot();
        accumulator.apply(&response(13, 90));
        assert_eq!(sample.value("soc"), Some(89.0));
    }
}
