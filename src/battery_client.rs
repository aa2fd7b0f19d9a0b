//! BLE client for the battery: discovery, connection and the polling API.

use crate::poll::PollSession;
use crate::sample::BatterySample;
use crate::transport::{Transport, TransportError};
use anyhow::anyhow;
use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::future::ready;
use futures_util::Stream;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

/// Client for one battery.
///
/// Owns the BLE connection and a [`PollSession`] over it. Create with
/// [`BatteryClient::new`], read with [`BatteryClient::fetch`] and
/// [`BatteryClient::fetch_voltages`], release with [`BatteryClient::stop`].
pub struct BatteryClient {
    adapter: Adapter,
    device: Device,
    session: PollSession<GattTransport>,
}

impl BatteryClient {
    const NOTIFY_CHARACTERISTIC_ID: &'static str = "0000fff4-0000-1000-8000-00805f9b34fb";
    const WRITE_CHARACTERISTIC_ID: &'static str = "0000fff6-0000-1000-8000-00805f9b34fb";

    /// Create a new `BatteryClient`, which includes attempting to discover
    /// the device by its advertised name.
    pub async fn new(ble_device_name: &str) -> anyhow::Result<Self> {
        let adapter = bluest::Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        let device = timeout(
            Duration::from_secs(30),
            Self::discover_device(ble_device_name, &adapter),
        )
        .await
        .map_err(|_| anyhow!("Device not found"))??
        .device;

        adapter.connect_device(&device).await?;

        let mut write = None;
        let mut notify = None;
        for service in device.discover_services().await? {
            if write.is_none() {
                write = service
                    .discover_characteristics_with_uuid(Self::write_characteristic_id())
                    .await?
                    .first()
                    .cloned();
            }
            if notify.is_none() {
                notify = service
                    .discover_characteristics_with_uuid(Self::notify_characteristic_id())
                    .await?
                    .first()
                    .cloned();
            }
        }
        let write = write.ok_or(anyhow!(
            "The specified device does not expose the command characteristic."
        ))?;
        let notify = notify.ok_or(anyhow!(
            "The specified device does not expose the telemetry characteristic."
        ))?;

        Ok(Self {
            adapter: adapter.clone(),
            device,
            session: PollSession::new(GattTransport { write, notify }),
        })
    }

    /// Read a fresh telemetry sample from the battery.
    pub async fn fetch(&mut self) -> anyhow::Result<BatterySample> {
        self.try_connect().await?;
        Ok(self.session.fetch().await?)
    }

    /// Read the per-cell voltages in mv, ascending by cell.
    pub async fn fetch_voltages(&mut self) -> anyhow::Result<Vec<Option<u16>>> {
        self.try_connect().await?;
        Ok(self.session.fetch_voltages().await?)
    }

    /// Override the pause between register queries.
    pub fn set_settle_interval(&mut self, interval: Duration) {
        self.session.set_settle_interval(interval);
    }

    /// Disconnect from the battery.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> anyhow::Result<AdvertisingDevice> {
        let mut adapter_events = adapter.scan(&[]).await?;
        while let Some(device) = timeout(Duration::from_secs(30), adapter_events.next())
            .await
            .map_err(|_| anyhow!("Device not found"))?
        {
            let device_name = device.device.name_async().await?;
            if device_name == name {
                return Ok(device);
            }
        }

        Err(anyhow!("Device not found"))
    }

    async fn try_connect(&self) -> anyhow::Result<()> {
        if !self.device.is_connected().await {
            let mut retries = 2;
            loop {
                match self.adapter.connect_device(&self.device).await {
                    Ok(()) => return Ok(()),
                    Err(err) if retries > 0 => {
                        log::warn!("failed to connect: {err}");
                        retries -= 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }

    fn notify_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::NOTIFY_CHARACTERISTIC_ID).unwrap()
    }

    fn write_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::WRITE_CHARACTERISTIC_ID).unwrap()
    }
}

/// [`Transport`] over the battery's two GATT characteristics.
struct GattTransport {
    write: Characteristic,
    notify: Characteristic,
}

impl Transport for GattTransport {
    async fn write_command(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.write
            .write(frame)
            .await
            .map_err(|err| TransportError::Write(err.into()))
    }

    async fn subscribe(
        &self,
    ) -> Result<impl Stream<Item = Vec<u8>> + Unpin + Send + '_, TransportError> {
        let notifications = self
            .notify
            .notify()
            .await
            .map_err(|err| TransportError::Subscribe(err.into()))?;
        // Notification-level errors are not fatal to a sweep; the frames
        // they would have carried just never arrive.
        Ok(notifications.filter_map(|notification| {
            ready(match notification {
                Ok(data) => Some(data),
                Err(err) => {
                    log::warn!("notification error: {err}");
                    None
                }
            })
        }))
    }
}
