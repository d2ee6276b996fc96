//! # hublink-core
//!
//! Pairs a home-automation hub with a single Bluetooth LE controller.
//!
//! A discovery run scans for advertising controllers, tries to connect to the
//! first acceptable one, and on failure goes back to scanning until one
//! connects, the discovery deadline expires, or the run is canceled.
//!
//! ## Architecture
//!
//! - [`types`] - Device addresses, peripherals, name filter and run outcomes
//! - [`transport`] - Radio stack abstraction, scripted mock and BlueZ backend
//! - [`dispatcher`] - Single event queue that serializes all session input
//! - [`timer`] - Cancellable one-shot deadlines on the Tokio runtime
//! - [`session`] - The discover/connect state machine
//! - [`discovery`] - Public entry point that spawns and awaits runs
//! - [`config`] - Layered configuration loading and validation
//! - [`storage`] - Persistent record of the last paired controller
//! - [`error`] - Unified error type for the crate
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hublink_core::transport::mock::{ConnectScript, MockTransport};
//! use hublink_core::{Discovery, DiscoverySettings, Peripheral, PeripheralAddress};
//!
//! # tokio_test::block_on(async {
//! let nuimo = Peripheral::named(PeripheralAddress::new([0xC4, 0, 0, 0, 0, 1]), "Nuimo");
//! let transport = Arc::new(
//!     MockTransport::new()
//!         .with_scan_results([nuimo.clone()])
//!         .with_connect_script(nuimo.address, ConnectScript::Succeed),
//! );
//! let discovery = Discovery::new(transport, DiscoverySettings::default());
//! let address = discovery
//!     .discover_and_connect(Some(Duration::from_secs(30)))
//!     .await
//!     .unwrap();
//! assert_eq!(address, nuimo.address);
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod storage;
pub mod timer;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    default_config_path, BluetoothConfig, Config, ConfigError, ConfigResult, DiscoveryConfig,
};
pub use discovery::{
    Canceller, Discovery, DiscoveryError, DiscoveryRun, DiscoverySettings,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use dispatcher::{EventDispatcher, EventSink, SessionEvent, WeakEventSink};
pub use error::{HublinkError, Result};
pub use session::{Phase, Session};
pub use storage::{default_data_dir, PairingRecord, PairingStore, StorageError, StorageResult};
pub use timer::{TimerHandle, TimerService};
#[cfg(feature = "bluetooth")]
pub use transport::bluez::BluezTransport;
pub use transport::{TransportAdapter, TransportError, TransportEvent};
pub use types::{
    is_valid_mac_address, AddressParseError, Outcome, Peripheral, PeripheralAddress,
    PeripheralFilter,
};
