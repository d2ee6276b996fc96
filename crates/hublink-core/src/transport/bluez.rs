//! BlueZ transport backed by `bluer`.
//!
//! Commands are issued from the session synchronously and carried out on
//! spawned tasks; their results come back through the attached sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::{Adapter, AdapterEvent, Address};
use futures::{pin_mut, StreamExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BluetoothConfig;
use crate::dispatcher::EventSink;
use crate::transport::{TransportAdapter, TransportError, TransportEvent};
use crate::types::{Peripheral, PeripheralAddress, PeripheralFilter};

#[derive(Default)]
struct Shared {
    sink: Option<EventSink>,
    scan: Option<JoinHandle<()>>,
    pending: HashMap<PeripheralAddress, JoinHandle<()>>,
    connected: HashMap<PeripheralAddress, Peripheral>,
}

impl Shared {
    fn deliver(&self, event: TransportEvent) {
        if let Some(sink) = &self.sink {
            sink.send(event);
        }
    }
}

/// [`TransportAdapter`] for a local BlueZ adapter.
pub struct BluezTransport {
    adapter: Adapter,
    filter: PeripheralFilter,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
}

impl BluezTransport {
    /// Opens the configured adapter, powers it on and records devices that
    /// are already connected and pass the name filter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the Bluetooth daemon is unreachable, the adapter
    /// does not exist or cannot be powered on.
    pub async fn new(config: &BluetoothConfig) -> Result<Self, TransportError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| TransportError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .adapter(&config.adapter_name)
            .map_err(|_| TransportError::AdapterNotFound {
                name: config.adapter_name.clone(),
            })?;
        adapter
            .set_powered(true)
            .await
            .map_err(|_| TransportError::AdapterPoweredOff {
                name: config.adapter_name.clone(),
            })?;
        info!(adapter = %config.adapter_name, "using Bluetooth adapter");

        let filter = match &config.name_pattern {
            Some(pattern) => {
                PeripheralFilter::with_pattern(pattern).map_err(|e| TransportError::Backend {
                    message: format!("invalid name pattern: {e}"),
                })?
            }
            None => PeripheralFilter::any(),
        };

        let transport = Self {
            adapter,
            filter,
            runtime: Handle::current(),
            shared: Arc::new(Mutex::new(Shared::default())),
        };
        transport.load_connected().await?;
        Ok(transport)
    }

    async fn load_connected(&self) -> Result<(), TransportError> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| TransportError::Backend {
                message: e.to_string(),
            })?;

        for addr in addresses {
            let Some(peripheral) = describe(&self.adapter, addr).await else {
                continue;
            };
            let Ok(device) = self.adapter.device(addr) else {
                continue;
            };
            if device.is_connected().await == Ok(true) && self.filter.matches(&peripheral) {
                debug!(address = %peripheral.address, "found connected controller");
                lock(&self.shared).connected.insert(peripheral.address, peripheral);
            }
        }
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_bluer(address: PeripheralAddress) -> Address {
    Address::new(address.octets())
}

fn from_bluer(address: Address) -> PeripheralAddress {
    PeripheralAddress::new(address.0)
}

async fn describe(adapter: &Adapter, addr: Address) -> Option<Peripheral> {
    let device = adapter.device(addr).ok()?;
    let name = device.name().await.ok().flatten();
    Some(Peripheral {
        address: from_bluer(addr),
        name,
    })
}

impl TransportAdapter for BluezTransport {
    fn attach(&self, sink: EventSink) {
        lock(&self.shared).sink = Some(sink);
    }

    fn detach(&self) {
        lock(&self.shared).sink = None;
    }

    fn start_scan(&self) {
        let mut shared = lock(&self.shared);
        if shared.scan.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let adapter = self.adapter.clone();
        let filter = self.filter.clone();
        let state = Arc::clone(&self.shared);
        shared.scan = Some(self.runtime.spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "failed to start discovery");
                    lock(&state).deliver(TransportEvent::TransportLost(e.to_string()));
                    return;
                }
            };
            pin_mut!(events);
            debug!("scan started");

            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(addr) = event else {
                    continue;
                };
                let Some(peripheral) = describe(&adapter, addr).await else {
                    continue;
                };
                if filter.matches(&peripheral) {
                    debug!(address = %peripheral.address, name = ?peripheral.name, "candidate discovered");
                    lock(&state).deliver(TransportEvent::CandidateDiscovered(peripheral));
                }
            }

            lock(&state).deliver(TransportEvent::TransportLost(
                "adapter event stream ended".into(),
            ));
        }));
    }

    fn stop_scan(&self) {
        if let Some(task) = lock(&self.shared).scan.take() {
            task.abort();
            debug!("scan stopped");
        }
    }

    fn connect(&self, peripheral: &Peripheral) {
        let device = match self.adapter.device(to_bluer(peripheral.address)) {
            Ok(device) => device,
            Err(e) => {
                lock(&self.shared).deliver(TransportEvent::ConnectFailed {
                    address: peripheral.address,
                    error: e.to_string(),
                });
                return;
            }
        };

        let target = peripheral.clone();
        let state = Arc::clone(&self.shared);
        let mut shared = lock(&self.shared);
        let task = self.runtime.spawn(async move {
            let result = device.connect().await;
            let mut shared = lock(&state);
            shared.pending.remove(&target.address);
            match result {
                Ok(()) => {
                    shared.connected.insert(target.address, target.clone());
                    shared.deliver(TransportEvent::ConnectSucceeded(target.address));
                }
                Err(e) => shared.deliver(TransportEvent::ConnectFailed {
                    address: target.address,
                    error: e.to_string(),
                }),
            }
        });

        if let Some(previous) = shared.pending.insert(peripheral.address, task) {
            previous.abort();
        }
    }

    fn disconnect(&self, peripheral: &Peripheral) {
        let mut shared = lock(&self.shared);
        if let Some(task) = shared.pending.remove(&peripheral.address) {
            task.abort();
        }
        shared.connected.remove(&peripheral.address);
        drop(shared);

        let Ok(device) = self.adapter.device(to_bluer(peripheral.address)) else {
            return;
        };
        let address = peripheral.address;
        self.runtime.spawn(async move {
            if let Err(e) = device.disconnect().await {
                debug!(%address, error = %e, "disconnect failed");
            }
        });
    }

    fn connected_peripherals(&self) -> Vec<Peripheral> {
        lock(&self.shared).connected.values().cloned().collect()
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if let Some(task) = shared.scan.take() {
            task.abort();
        }
        for (_, task) in shared.pending.drain() {
            task.abort();
        }
    }
}
