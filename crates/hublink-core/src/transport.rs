//! Radio stack abstraction consumed by the discovery session.
//!
//! Every operation is fire-and-forget: scan results and connection
//! outcomes come back as [`TransportEvent`]s through the [`EventSink`] the
//! session attached, never as return values.
//!
//! - [`mock`] - scripted, call-recording adapter for tests and simulation
//! - `bluez` - BlueZ adapter via `bluer` (feature `bluetooth`)

use thiserror::Error;

use crate::dispatcher::EventSink;
use crate::types::{Peripheral, PeripheralAddress};

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod mock;

/// Notification produced by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device passing the configured filter was seen while scanning.
    CandidateDiscovered(Peripheral),
    /// The link-layer connection to `address` is up.
    ConnectSucceeded(PeripheralAddress),
    /// Connecting to `address` failed.
    ConnectFailed {
        /// The device the attempt was for.
        address: PeripheralAddress,
        /// Human-readable failure description.
        error: String,
    },
    /// The adapter stopped producing events (removed, powered off, stream ended).
    TransportLost(String),
}

/// Errors raised while setting up a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No adapter with the configured name exists.
    #[error("Bluetooth adapter '{name}' not found. Ensure Bluetooth hardware is present and drivers are loaded.")]
    AdapterNotFound {
        /// Adapter name that was requested.
        name: String,
    },

    /// The adapter exists but could not be powered on.
    #[error("Bluetooth adapter '{name}' is powered off. Run 'bluetoothctl power on' to enable.")]
    AdapterPoweredOff {
        /// Adapter name.
        name: String,
    },

    /// The connection to the Bluetooth daemon could not be established.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Backend error text.
        message: String,
    },

    /// Any other backend failure.
    #[error("Bluetooth backend error: {message}")]
    Backend {
        /// Backend error text.
        message: String,
    },
}

/// The radio stack as seen by a discovery session.
///
/// An adapter is a singleton hardware resource: at most one session is
/// attached at a time and only that session issues commands.
pub trait TransportAdapter: Send + Sync {
    /// Routes all further events to `sink`, replacing any previous sink.
    fn attach(&self, sink: EventSink);

    /// Stops routing events. Events produced afterwards are dropped.
    fn detach(&self);

    /// Starts scanning. No-op while already scanning.
    fn start_scan(&self);

    /// Stops scanning. No-op while not scanning.
    fn stop_scan(&self);

    /// Begins connecting to `peripheral`; the result arrives as an event.
    fn connect(&self, peripheral: &Peripheral);

    /// Tears down any connection or pending attempt to `peripheral`.
    fn disconnect(&self, peripheral: &Peripheral);

    /// Peripherals the adapter currently holds a connection to.
    fn connected_peripherals(&self) -> Vec<Peripheral>;

    /// Connection-state accessor for a single device.
    fn is_connected(&self, address: &PeripheralAddress) -> bool {
        self.connected_peripherals()
            .iter()
            .any(|p| p.address == *address)
    }
}
