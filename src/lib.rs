//! Read telemetry from Offgridtec LiFePo4 Smart Pro batteries over Bluetooth Low Energy
//!
//! The battery has a BLE interface exposing a proprietary register protocol
//! on a pair of GATT characteristics: commands go out on one, responses
//! come back as notifications on the other, and every encoded byte is
//! obfuscated through a fixed 4-bit substitution cipher. This crate
//! implements the codec for that wire format, the catalog mapping raw
//! register readings to physical units, and the polling protocol that
//! sweeps the registers and assembles the answers into a sample.
//!
//! Works with batteries whose serial number starts with "B"; other serials
//! scramble with a different substitution table.
//!
//! Currently the following data can be accessed:
//!
//! - MOS temperature (°C)
//! - Battery voltage (V)
//! - Current (A)
//! - State of charge (%)
//! - Cycle capacity (Ah)
//! - Cycles (count)
//! - Capacity (Ah)
//! - Cell voltages (mV), up to 15 cells
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let mut battery_client = ogtread::BatteryClient::new("SmartPro-B01234").await.unwrap();
//!     loop {
//!         let sample = battery_client.fetch().await.unwrap();
//!         println!("{sample:?}");
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!     }
//! # }
//! ```

mod battery_client;
pub mod message;
mod poll;
pub mod registers;
mod sample;
mod transport;

pub use battery_client::BatteryClient;
pub use poll::{PollSession, SETTLE_INTERVAL};
pub use sample::BatterySample;
pub use transport::{Transport, TransportError};
