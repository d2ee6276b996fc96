//! Unified error type for the hublink core library.
//!
//! Each module keeps its own error enum ([`ConfigError`], [`TransportError`],
//! [`StorageError`], [`DiscoveryError`]); [`HublinkError`] folds them into one
//! type for callers that do not care which layer failed.
//!
//! # Example
//!
//! ```rust
//! use hublink_core::error::{HublinkError, Result};
//! use hublink_core::DiscoveryError;
//!
//! fn pair() -> Result<()> {
//!     Err(DiscoveryError::Canceled.into())
//! }
//!
//! let err = pair().unwrap_err();
//! assert_eq!(err.error_code(), "DISCOVERY_CANCELED");
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::storage::StorageError;
use crate::transport::TransportError;
use crate::types::AddressParseError;

/// The unified error type for all hublink operations.
#[derive(Debug, Error)]
pub enum HublinkError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// The configured adapter does not exist.
    #[error("Bluetooth adapter '{0}' not found. Ensure Bluetooth hardware is present and drivers are loaded.")]
    AdapterNotFound(String),

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter '{0}' is powered off. Run 'bluetoothctl power on' to enable.")]
    AdapterPoweredOff(String),

    /// The Bluetooth backend failed.
    #[error("Bluetooth error: {0}")]
    Transport(String),

    /// A device address could not be parsed.
    #[error("Invalid Bluetooth address: '{0}'. Expected format 'AA:BB:CC:DD:EE:FF'.")]
    InvalidAddress(String),

    // =========================================================================
    // DISCOVERY ERRORS
    // =========================================================================
    /// No controller connected before the discovery deadline.
    #[error("No controller connected within {}s. Ensure the controller is awake and nearby.", .0.as_secs())]
    DiscoveryTimedOut(Duration),

    /// The transport stopped before any controller connected.
    #[error("No controller found: the Bluetooth transport stopped delivering events")]
    NoPeripheralFound,

    /// The run was canceled.
    #[error("Discovery was canceled")]
    DiscoveryCanceled,

    /// Another run holds the adapter.
    #[error("A discovery run is already in progress on this adapter")]
    DiscoveryBusy,

    /// The run task ended abnormally.
    #[error("Discovery run was interrupted: {0}")]
    DiscoveryInterrupted(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found.
    #[error("Configuration file not found at: {0}")]
    ConfigNotFound(String),

    /// The configuration could not be parsed or rendered.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration holds invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// Reading or writing persisted state failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for hublink operations.
pub type Result<T> = std::result::Result<T, HublinkError>;

impl HublinkError {
    /// Returns `true` if this error is related to the Bluetooth stack.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound(_)
                | Self::AdapterPoweredOff(_)
                | Self::Transport(_)
                | Self::InvalidAddress(_)
        )
    }

    /// Returns `true` if this error is the terminal result of a discovery run.
    #[inline]
    #[must_use]
    pub const fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimedOut(_)
                | Self::NoPeripheralFound
                | Self::DiscoveryCanceled
                | Self::DiscoveryBusy
                | Self::DiscoveryInterrupted(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if simply running discovery again may succeed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimedOut(_) | Self::NoPeripheralFound | Self::DiscoveryBusy
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound(_) => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::AdapterPoweredOff(_) => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::Transport(_) => "BLUETOOTH_ERROR",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::DiscoveryTimedOut(_) => "DISCOVERY_TIMED_OUT",
            Self::NoPeripheralFound => "NO_PERIPHERAL_FOUND",
            Self::DiscoveryCanceled => "DISCOVERY_CANCELED",
            Self::DiscoveryBusy => "DISCOVERY_BUSY",
            Self::DiscoveryInterrupted(_) => "DISCOVERY_INTERRUPTED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    /// Process exit status for command-line front-ends.
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            // 2: no controller, try again
            Self::DiscoveryTimedOut(_) | Self::NoPeripheralFound => 2,

            // 3: interrupted by the user or another run
            Self::DiscoveryCanceled | Self::DiscoveryBusy | Self::DiscoveryInterrupted(_) => 3,

            // 4: Bluetooth stack unusable
            Self::AdapterNotFound(_)
            | Self::AdapterPoweredOff(_)
            | Self::Transport(_)
            | Self::InvalidAddress(_) => 4,

            // 78: EX_CONFIG
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_) => {
                78
            }

            // 74: EX_IOERR
            Self::PersistenceError(_) | Self::IoError(_) => 74,
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for HublinkError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::NoConfigDir => {
                Self::PersistenceError("Cannot determine configuration directory".into())
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<TransportError> for HublinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AdapterNotFound { name } => Self::AdapterNotFound(name),
            TransportError::AdapterPoweredOff { name } => Self::AdapterPoweredOff(name),
            TransportError::SessionInitFailed { message } | TransportError::Backend { message } => {
                Self::Transport(message)
            }
        }
    }
}

impl From<StorageError> for HublinkError {
    fn from(err: StorageError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl From<DiscoveryError> for HublinkError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::TimedOut { after } => Self::DiscoveryTimedOut(after),
            DiscoveryError::NoPeripheralFound => Self::NoPeripheralFound,
            DiscoveryError::Canceled => Self::DiscoveryCanceled,
            DiscoveryError::Busy => Self::DiscoveryBusy,
            DiscoveryError::Interrupted { message } => Self::DiscoveryInterrupted(message),
        }
    }
}

impl From<AddressParseError> for HublinkError {
    fn from(err: AddressParseError) -> Self {
        Self::InvalidAddress(err.input)
    }
}
