//! Public entry point: discover one controller and connect to it.
//!
//! [`Discovery::discover_and_connect`] suspends the caller until the run
//! reaches a terminal outcome. [`Discovery::start`] spawns the same run and
//! hands back a [`DiscoveryRun`] that can be canceled and awaited.
//! Dropping the handle, or the `discover_and_connect` future, cancels the
//! run so the adapter is released.
//!
//! Intermediate connect failures never surface here: they are logged and
//! retried by re-scanning. Without a discovery timeout a run can last
//! forever, so callers normally pass one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::dispatcher::{EventDispatcher, EventSink, SessionEvent, WeakEventSink};
use crate::session::Session;
use crate::timer::TimerService;
use crate::transport::{TransportAdapter, TransportEvent};
use crate::types::{Outcome, PeripheralAddress};

/// Per-attempt budget used unless configured otherwise.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Why a run ended without a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The discovery deadline expired.
    #[error("No controller connected within {}s", .after.as_secs())]
    TimedOut {
        /// The discovery timeout that expired.
        after: Duration,
    },

    /// The transport stopped before any peripheral connected.
    #[error("No controller found: the Bluetooth transport stopped delivering events")]
    NoPeripheralFound,

    /// The run was canceled by its owner.
    #[error("Discovery was canceled")]
    Canceled,

    /// Another run is already active on this adapter.
    #[error("A discovery run is already in progress on this adapter")]
    Busy,

    /// The run task ended abnormally.
    #[error("Discovery run was interrupted: {message}")]
    Interrupted {
        /// Description of the task failure.
        message: String,
    },
}

/// Tunables of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Budget for one connection attempt before it counts as failed.
    pub connect_timeout: Duration,
    /// Finish immediately if the adapter already holds a connection.
    pub reuse_connected: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reuse_connected: false,
        }
    }
}

/// Discovers and connects controllers through one transport adapter.
///
/// Only one run may be active at a time, because the adapter is a single
/// hardware resource.
pub struct Discovery {
    transport: Arc<dyn TransportAdapter>,
    settings: DiscoverySettings,
    running: Arc<AtomicBool>,
}

impl Discovery {
    /// Creates a discovery front-end for `transport`.
    pub fn new(transport: Arc<dyn TransportAdapter>, settings: DiscoverySettings) -> Self {
        Self {
            transport,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Settings applied to every run.
    #[must_use]
    pub const fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs discovery until a controller is connected, the timeout expires or
    /// the transport goes away.
    ///
    /// `timeout` of `None` (or zero) means no discovery deadline; the
    /// per-attempt connect deadline still applies to every candidate.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::TimedOut`] when the deadline expired,
    /// [`DiscoveryError::NoPeripheralFound`] when the transport was lost and
    /// [`DiscoveryError::Busy`] when another run is active.
    pub async fn discover_and_connect(
        &self,
        timeout: Option<Duration>,
    ) -> Result<PeripheralAddress, DiscoveryError> {
        self.start(timeout)?.outcome().await
    }

    /// Spawns a run on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Busy`] if a run is already active.
    pub fn start(&self, timeout: Option<Duration>) -> Result<DiscoveryRun, DiscoveryError> {
        let guard = RunGuard::acquire(&self.running).ok_or(DiscoveryError::Busy)?;
        let (sink, dispatcher) = EventDispatcher::channel();
        let canceller = Canceller {
            sink: sink.downgrade(),
        };
        let transport = Arc::clone(&self.transport);
        let settings = self.settings;
        let span = tracing::info_span!("discover_and_connect", ?timeout);

        let task = tokio::spawn(
            async move {
                let _guard = guard;
                run(transport, settings, timeout, sink, dispatcher).await
            }
            .instrument(span),
        );

        Ok(DiscoveryRun {
            task,
            canceller,
            timeout,
        })
    }
}

async fn run(
    transport: Arc<dyn TransportAdapter>,
    settings: DiscoverySettings,
    timeout: Option<Duration>,
    sink: EventSink,
    dispatcher: EventDispatcher,
) -> Outcome {
    let mut session = Session::new(
        Arc::clone(&transport),
        TimerService::current(),
        &sink,
        settings.connect_timeout,
    );

    if settings.reuse_connected {
        if let Some(peripheral) = transport.connected_peripherals().into_iter().next() {
            if let Some(outcome) = session.adopt_connected(peripheral) {
                return outcome;
            }
        }
    }

    // From here on the transport owns the only strong sink, so the queue
    // closes when it drops it.
    transport.attach(sink);
    session.start(timeout);
    info!("discovery started");

    let finished = dispatcher.run(|event| session.handle(event)).await;
    let outcome = finished.unwrap_or_else(|| {
        warn!("event channel closed before a terminal outcome");
        let lost = TransportEvent::TransportLost("event channel closed".into());
        session
            .handle(SessionEvent::Transport(lost))
            .unwrap_or(Outcome::TransportLost)
    });
    transport.detach();
    info!(?outcome, "discovery finished");
    outcome
}

/// Handle to a spawned discovery run.
///
/// Dropping the handle before the run finished cancels it.
#[derive(Debug)]
pub struct DiscoveryRun {
    task: JoinHandle<Outcome>,
    canceller: Canceller,
    timeout: Option<Duration>,
}

impl DiscoveryRun {
    /// Asks the run to stop. Has no effect once it finished.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// A detached handle that can cancel this run from elsewhere.
    #[must_use]
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Waits for the terminal outcome.
    ///
    /// # Errors
    ///
    /// See [`Discovery::discover_and_connect`]; additionally
    /// [`DiscoveryError::Canceled`] after [`DiscoveryRun::cancel`] and
    /// [`DiscoveryError::Interrupted`] if the run task panicked.
    pub async fn outcome(mut self) -> Result<PeripheralAddress, DiscoveryError> {
        let outcome = (&mut self.task)
            .await
            .map_err(|e| DiscoveryError::Interrupted {
                message: e.to_string(),
            })?;
        match outcome {
            Outcome::Connected(address) => Ok(address),
            Outcome::TimedOut => Err(DiscoveryError::TimedOut {
                after: self.timeout.unwrap_or_default(),
            }),
            Outcome::Canceled => Err(DiscoveryError::Canceled),
            Outcome::TransportLost => Err(DiscoveryError::NoPeripheralFound),
        }
    }
}

impl Drop for DiscoveryRun {
    fn drop(&mut self) {
        if !self.task.is_finished() && self.canceller.cancel() {
            info!("run handle dropped, canceling discovery");
        }
    }
}

/// Cancels a run from any task.
#[derive(Debug, Clone)]
pub struct Canceller {
    sink: WeakEventSink,
}

impl Canceller {
    /// Posts a cancel request. Returns `false` if the run already ended.
    pub fn cancel(&self) -> bool {
        self.sink.post(SessionEvent::Cancel)
    }
}

/// Clears the running flag when the run task finishes or is dropped.
struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                running: Arc::clone(running),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ConnectScript, MockTransport, TransportCall};
    use crate::types::Peripheral;

    fn peripheral(last: u8) -> Peripheral {
        Peripheral::named(PeripheralAddress::new([0xC4, 0, 0, 0, 0, last]), "Nuimo")
    }

    #[test]
    fn test_default_settings_use_twenty_second_connect_budget() {
        let settings = DiscoverySettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(20));
        assert!(!settings.reuse_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_guard_is_exclusive_and_released_on_drop() {
        let running = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::acquire(&running).unwrap();
        assert!(RunGuard::acquire(&running).is_none());
        drop(guard);
        assert!(RunGuard::acquire(&running).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_run_connects_first_matching_peripheral() {
        let p1 = peripheral(1);
        let mock = Arc::new(
            MockTransport::new()
                .with_scan_results([p1.clone()])
                .with_connect_script(p1.address, ConnectScript::Succeed),
        );
        let discovery = Discovery::new(mock.clone(), DiscoverySettings::default());

        let result = discovery.discover_and_connect(Some(Duration::from_secs(10))).await;

        assert_eq!(result, Ok(p1.address));
        assert!(!discovery.is_running());
        assert!(!mock.is_attached());
        assert_eq!(mock.calls().first(), Some(&TransportCall::Attach));
        assert_eq!(mock.calls().last(), Some(&TransportCall::Detach));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_carries_duration() {
        let mock = Arc::new(MockTransport::new());
        let discovery = Discovery::new(mock, DiscoverySettings::default());
        let result = discovery.discover_and_connect(Some(Duration::from_secs(5))).await;
        assert_eq!(
            result,
            Err(DiscoveryError::TimedOut {
                after: Duration::from_secs(5)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_handle_cancels_run() {
        let mock = Arc::new(MockTransport::new());
        let discovery = Discovery::new(mock.clone(), DiscoverySettings::default());
        let run = discovery.start(None).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(mock.is_scanning());
        drop(run);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!mock.is_scanning());
        assert!(!mock.is_attached());
        assert!(!discovery.is_running());
    }

    #[test]
    fn test_error_messages() {
        let err = DiscoveryError::TimedOut {
            after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30s"));
        assert!(DiscoveryError::Busy.to_string().contains("already in progress"));
    }
}
