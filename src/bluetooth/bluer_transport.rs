/// BlueZ-backed GATT transport for the Smart Gadget
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::bluetooth::transport::{GattSession, GattTransport, NotifyCallback};
use crate::error::TransportError;

const SERVICE_RESOLVE_TIMEOUT_SECS: u64 = 10; // BlueZ resolves services shortly after connect
const SERVICE_RESOLVE_POLL_MS: u64 = 200;

pub struct BluerTransport {
    _session: bluer::Session,
    adapter: Adapter,
    discovery_timeout: Duration,
}

impl BluerTransport {
    /// Open a BlueZ session on the named adapter (or the default one) and power it on
    pub async fn new(
        adapter_name: Option<&str>,
        discovery_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let session = bluer::Session::new().await?;

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };

        adapter.set_powered(true).await?;
        info!("Using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            discovery_timeout,
        })
    }

    /// Make sure BlueZ knows about `address`, scanning for it if necessary
    async fn ensure_discovered(&self, address: Address) -> Result<(), TransportError> {
        if self.adapter.device_addresses().await?.contains(&address) {
            return Ok(());
        }

        let filter = bluer::DiscoveryFilter {
            transport: bluer::DiscoveryTransport::Le,
            duplicate_data: false,
            ..Default::default()
        };
        if let Err(e) = self.adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        debug!("Scanning for {}", address);
        let events = self.adapter.discover_devices().await?;
        let mut events = Box::pin(events);

        let found = timeout(self.discovery_timeout, async {
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(added) = event {
                    if added == address {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if found {
            Ok(())
        } else {
            Err(TransportError::DeviceNotFound(address.to_string()))
        }
    }
}

#[async_trait]
impl GattTransport for BluerTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattSession>, TransportError> {
        let address: Address = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;

        self.ensure_discovered(address).await?;
        let device = self.adapter.device(address)?;

        match open_link(&device).await {
            Ok(characteristics) => Ok(Box::new(BluerSession {
                device,
                characteristics,
                notify_tasks: HashMap::new(),
                closed: false,
            })),
            Err(e) => {
                // The link may be half up; don't leave it behind
                if let Err(de) = device.disconnect().await {
                    debug!("Disconnect after failed connect: {}", de);
                }
                Err(e)
            }
        }
    }
}

/// Connect, wait for service resolution and index every characteristic by UUID
async fn open_link(device: &Device) -> Result<HashMap<Uuid, Characteristic>, TransportError> {
    if !device.is_connected().await? {
        device.connect().await?;
    }

    let polls = SERVICE_RESOLVE_TIMEOUT_SECS * 1000 / SERVICE_RESOLVE_POLL_MS;
    for _ in 0..polls {
        if device.is_services_resolved().await? {
            break;
        }
        sleep(Duration::from_millis(SERVICE_RESOLVE_POLL_MS)).await;
    }

    let mut characteristics = HashMap::new();
    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            characteristics.insert(characteristic.uuid().await?, characteristic);
        }
    }
    debug!(
        "Resolved {} characteristics on {}",
        characteristics.len(),
        device.address()
    );

    Ok(characteristics)
}

struct BluerSession {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    notify_tasks: HashMap<Uuid, JoinHandle<()>>,
    closed: bool,
}

impl BluerSession {
    fn characteristic(&self, id: Uuid) -> Result<&Characteristic, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.characteristics
            .get(&id)
            .ok_or(TransportError::CharacteristicNotFound(id))
    }
}

#[async_trait]
impl GattSession for BluerSession {
    async fn read_characteristic(&mut self, id: Uuid) -> Result<Vec<u8>, TransportError> {
        Ok(self.characteristic(id)?.read().await?)
    }

    async fn write_characteristic(&mut self, id: Uuid, value: &[u8]) -> Result<(), TransportError> {
        Ok(self.characteristic(id)?.write(value).await?)
    }

    async fn subscribe(&mut self, id: Uuid, on_notify: NotifyCallback) -> Result<(), TransportError> {
        let stream = self.characteristic(id)?.notify().await?;

        // Notifications are delivered on their own task, independent of the caller
        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                on_notify(value);
            }
        });

        if let Some(previous) = self.notify_tasks.insert(id, handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, id: Uuid) -> Result<(), TransportError> {
        // Dropping the notify stream makes BlueZ stop notifications
        if let Some(handle) = self.notify_tasks.remove(&id) {
            handle.abort();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for (_, handle) in self.notify_tasks.drain() {
            handle.abort();
        }

        if self.device.is_connected().await.unwrap_or(true) {
            self.device.disconnect().await?;
        }
        debug!("Disconnected from {}", self.device.address());
        Ok(())
    }
}
