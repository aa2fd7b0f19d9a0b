//! The register catalog: which registers the battery reports, how long
//! their values are, and how raw readings map to physical units.

/// Lowest id of the per-cell voltage pseudo-registers.
pub const FIRST_CELL_REGISTER: u8 = 49;

/// Highest cell-voltage register id; cells are queried from here downwards.
pub const LAST_CELL_REGISTER: u8 = 63;

/// Number of cell-voltage slots (registers 49 through 63).
pub const CELL_REGISTER_COUNT: usize = 15;

/// Packed payload length commanded for every cell-voltage register.
pub const CELL_PAYLOAD_LEN: u8 = 2;

/// Lookup failure for a register id outside the catalog.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("register #{0} is not in the catalog")]
pub struct UnknownRegister(pub u8);

/// One catalog entry: a named register and its unit conversion.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    /// Register id on the wire.
    pub id: u8,
    /// Name the decoded value is reported under.
    pub name: &'static str,
    /// Packed value bytes the register answers with when asked.
    pub payload_len: u8,
    /// Conversion from the raw register value to a physical unit.
    pub transform: fn(u64) -> f64,
}

/// Every named register the battery reports, in sweep order.
pub static CATALOG: [RegisterDescriptor; 7] = [
    RegisterDescriptor {
        id: 8,
        name: "mos_temperature",
        payload_len: 2,
        transform: decikelvin_to_celsius,
    },
    RegisterDescriptor {
        id: 9,
        name: "voltage",
        payload_len: 2,
        transform: millivolts_to_volts,
    },
    RegisterDescriptor {
        id: 10,
        name: "current",
        payload_len: 3,
        transform: centiamps_to_amps,
    },
    RegisterDescriptor {
        id: 13,
        name: "soc",
        payload_len: 1,
        transform: unscaled,
    },
    RegisterDescriptor {
        id: 15,
        name: "cycle_capacity",
        payload_len: 3,
        transform: centiamp_hours,
    },
    RegisterDescriptor {
        id: 23,
        name: "num_cycles",
        payload_len: 2,
        transform: unscaled,
    },
    RegisterDescriptor {
        id: 24,
        name: "capacity",
        payload_len: 3,
        transform: centiamp_hours,
    },
];

/// Find the descriptor for a named register id.
pub fn lookup(id: u8) -> Result<&'static RegisterDescriptor, UnknownRegister> {
    CATALOG
        .iter()
        .find(|descriptor| descriptor.id == id)
        .ok_or(UnknownRegister(id))
}

/// Whether `id` addresses one of the per-cell voltage pseudo-registers.
pub fn is_cell_register(id: u8) -> bool {
    (FIRST_CELL_REGISTER..=LAST_CELL_REGISTER).contains(&id)
}

fn decikelvin_to_celsius(raw: u64) -> f64 {
    // Tenths of kelvin. Rounding at two decimals clears the float noise so
    // 3000 reads as exactly 26.85.
    ((raw as f64 * 0.1 - 273.15) * 100.0).round() / 100.0
}

fn millivolts_to_volts(raw: u64) -> f64 {
    raw as f64 / 1000.0
}

// Readings of 32768 and above fold a negative current, offset by 65535.
// Not two's complement.
fn centiamps_to_amps(raw: u64) -> f64 {
    let field = raw & 0xFFFF;
    if field < 32768 {
        field as f64 / 100.0
    } else {
        (field as f64 - 65535.0) / 100.0
    }
}

fn centiamp_hours(raw: u64) -> f64 {
    (raw & 0xFFFF) as f64 * 0.01
}

fn unscaled(raw: u64) -> f64 {
    raw as f64
}

#[test]
fn test_catalog_sweep_order() {
    let ids: Vec<u8> = CATALOG.iter().map(|descriptor| descriptor.id).collect();
    assert_eq!(ids, [8, 9, 10, 13, 15, 23, 24]);
}

#[test]
fn test_temperature_transform() {
    assert_eq!((lookup(8).unwrap().transform)(3000), 26.85);
}

#[test]
fn test_voltage_transform() {
    assert_eq!((lookup(9).unwrap().transform)(3300), 3.3);
    assert_eq!((lookup(9).unwrap().transform)(13277), 13.277);
}

#[test]
fn test_current_transform_folds_sign() {
    let current = lookup(10).unwrap().transform;
    assert_eq!(current(150), 1.5);
    assert_eq!(current(65400), -1.35);
    assert_eq!(current(65516), -0.19);
    // Only the low 16 bits carry the reading; the third byte is ignored.
    assert_eq!(current(0x0A0103), 2.59);
}

#[test]
fn test_capacity_transform_uses_low_16_bits() {
    let capacity = lookup(24).unwrap().transform;
    assert_eq!(capacity(2000), 20.0);
    assert_eq!(capacity(0x0A0000 | 1800), 18.0);
}

#[test]
fn test_lookup_unknown_register() {
    assert_eq!(lookup(11).unwrap_err(), UnknownRegister(11));
}

#[test]
fn test_cell_register_range() {
    assert!(!is_cell_register(48));
    assert!(is_cell_register(FIRST_CELL_REGISTER));
    assert!(is_cell_register(LAST_CELL_REGISTER));
    assert!(!is_cell_register(64));
}
