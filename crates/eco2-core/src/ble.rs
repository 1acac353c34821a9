//! Bluetooth Low Energy transport built on btleplug.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use eco2_types::BleAddress;

use crate::config::SessionConfig;
use crate::error::{Access, DeviceNotFoundReason, Error, Result};
use crate::transport::{LinkEvent, LinkObserver, Transport};
use crate::util::{address_matches, format_peripheral_id};

/// How often the adapter's peripheral list is checked while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// [`Transport`] over the host's first Bluetooth adapter.
///
/// The peripheral is located by hardware address, first among peripherals
/// the adapter already knows, then by scanning for up to
/// [`SessionConfig::scan_timeout`]. Characteristics are cached per
/// `(service, characteristic)` after service discovery.
///
/// # Cleanup
///
/// Link events are delivered by a background task that lives until
/// [`close_link`](Transport::close_link) or drop.
pub struct BleTransport {
    config: SessionConfig,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<(Uuid, Uuid), Characteristic>,
    observer: Arc<RwLock<Option<LinkObserver>>>,
    event_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field(
                "peripheral",
                &self.peripheral.as_ref().map(|p| format_peripheral_id(&p.id())),
            )
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl BleTransport {
    /// Create a transport using the given timeouts. No Bluetooth calls are
    /// made until [`open_link`](Transport::open_link).
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            adapter: None,
            peripheral: None,
            characteristics: HashMap::new(),
            observer: Arc::new(RwLock::new(None)),
            event_task: None,
        }
    }

    /// Create a transport bound to a specific adapter.
    pub fn with_adapter(adapter: Adapter, config: SessionConfig) -> Self {
        let mut transport = Self::new(config);
        transport.adapter = Some(adapter);
        transport
    }

    /// The transport's timeouts.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = get_adapter().await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<(&Peripheral, &Characteristic)> {
        let peripheral = self.peripheral.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = self
            .characteristics
            .get(&(service, uuid))
            .ok_or_else(|| Error::characteristic_not_found(service, uuid))?;
        Ok((peripheral, characteristic))
    }

    async fn watch_link(&mut self, adapter: &Adapter, peripheral: &Peripheral) -> Result<()> {
        self.stop_watching();

        let mut events = adapter.events().await?;
        let id = peripheral.id();
        let observer = Arc::clone(&self.observer);

        self.event_task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let link_event = match event {
                    CentralEvent::DeviceConnected(event_id) if event_id == id => LinkEvent::Up,
                    CentralEvent::DeviceDisconnected(event_id) if event_id == id => {
                        LinkEvent::Down
                    }
                    _ => continue,
                };
                debug!("Link event {:?} for {}", link_event, format_peripheral_id(&id));

                let callback = observer.read().ok().and_then(|guard| guard.clone());
                if let Some(callback) = callback {
                    callback(link_event);
                }
            }
        }));
        Ok(())
    }

    fn stop_watching(&mut self) {
        if let Some(handle) = self.event_task.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    #[tracing::instrument(level = "info", skip(self), fields(address = %address))]
    async fn open_link(&mut self, address: &BleAddress) -> Result<()> {
        let adapter = self.adapter().await?;
        let peripheral = find_peripheral(&adapter, address, self.config.scan_timeout).await?;

        self.watch_link(&adapter, &peripheral).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            info!("Connecting to device...");
            timeout(self.config.connection_timeout, peripheral.connect())
                .await
                .map_err(|_| Error::timeout("connect to device", self.config.connection_timeout))??;
            info!("Connected!");
        }

        let discovered = timeout(self.config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))
            .and_then(|result| result.map_err(Error::from));
        if discovered.is_err() {
            self.stop_watching();
        }
        release_on_error(discovered, || peripheral.disconnect()).await?;

        self.characteristics.clear();
        for service in peripheral.services() {
            debug!("  Service: {}", service.uuid);
            for characteristic in service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
                self.characteristics
                    .insert((service.uuid, characteristic.uuid), characteristic);
            }
        }
        debug!("Cached {} characteristics", self.characteristics.len());

        self.peripheral = Some(peripheral);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn close_link(&mut self) -> Result<()> {
        self.stop_watching();
        self.characteristics.clear();

        if let Some(peripheral) = &self.peripheral {
            info!("Disconnecting from device...");
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn is_link_up(&self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn read_characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self.characteristic(service, uuid)?;
        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Err(Error::AccessDenied {
                uuid,
                access: Access::Read,
            });
        }

        let data = timeout(self.config.read_timeout, peripheral.read(characteristic))
            .await
            .map_err(|_| {
                Error::timeout(format!("read characteristic {}", uuid), self.config.read_timeout)
            })??;
        debug!("Read {} bytes from {}", data.len(), uuid);
        Ok(data)
    }

    async fn write_characteristic(&self, service: Uuid, uuid: Uuid, value: &[u8]) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(service, uuid)?;
        if !characteristic.properties.contains(CharPropFlags::WRITE) {
            return Err(Error::AccessDenied {
                uuid,
                access: Access::Write,
            });
        }

        timeout(
            self.config.write_timeout,
            peripheral.write(characteristic, value, WriteType::WithResponse),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!("write characteristic {}", uuid), self.config.write_timeout)
        })??;
        Ok(())
    }

    fn set_link_observer(&mut self, observer: LinkObserver) {
        match self.observer.write() {
            Ok(mut guard) => *guard = Some(observer),
            Err(poisoned) => *poisoned.into_inner() = Some(observer),
        }
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

/// Run `release` if `result` is an error, keeping the original error.
///
/// A link that came up but could not be made usable is torn down here,
/// since the transport never takes ownership of it.
async fn release_on_error<T, F, Fut>(result: Result<T>, release: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<(), btleplug::Error>>,
{
    if let Err(e) = &result {
        warn!("Releasing link after failed setup: {}", e);
        if let Err(release_err) = release().await {
            warn!("Failed to release link: {}", release_err);
        }
    }
    result
}

/// Find the peripheral with `address`, scanning if the adapter has not seen it.
#[tracing::instrument(level = "debug", skip(adapter), fields(address = %address))]
async fn find_peripheral(
    adapter: &Adapter,
    address: &BleAddress,
    scan_timeout: Duration,
) -> Result<Peripheral> {
    if let Some(peripheral) = known_peripheral(adapter, address).await? {
        debug!("Found device in cache (no scan needed)");
        return Ok(peripheral);
    }

    info!("Scanning for {} ({:?})...", address, scan_timeout);
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = Instant::now() + scan_timeout;
    let found = loop {
        if let Some(peripheral) = known_peripheral(adapter, address).await? {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        sleep(SCAN_POLL_INTERVAL).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    found.ok_or_else(|| {
        warn!("Device not found: {}", address);
        Error::DeviceNotFound(DeviceNotFoundReason::NotFound {
            address: address.to_string(),
            scanned: scan_timeout,
        })
    })
}

/// Search the adapter's known peripherals for `address`.
async fn known_peripheral(adapter: &Adapter, address: &BleAddress) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await
            && address_matches(&props.address.to_string(), address)
        {
            return Ok(Some(peripheral));
        }

        // macOS hides hardware addresses; its peripheral IDs are UUIDs.
        if address_matches(&format_peripheral_id(&peripheral.id()), address) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}
