//! Poll a battery and print its telemetry until interrupted.

use anyhow::Context;
use flexi_logger::Logger;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _logger = Logger::try_with_env_or_str("info")
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    let name = std::env::args()
        .nth(1)
        .context("Usage: ogtread <ble-device-name>")?;
    let mut battery_client = ogtread::BatteryClient::new(&name)
        .await
        .with_context(|| format!("Cannot connect to battery {name:?}"))?;

    loop {
        let sample = battery_client
            .fetch()
            .await
            .context("Cannot fetch sample")?;
        for (name, value) in sample.values() {
            println!("{name}: {value}");
        }

        let voltages = battery_client
            .fetch_voltages()
            .await
            .context("Cannot fetch cell voltages")?;
        for (cell, voltage) in voltages.iter().enumerate() {
            match voltage {
                Some(millivolts) => println!("cell {cell}: {millivolts}mv"),
                None => println!("cell {cell}: no reading"),
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
