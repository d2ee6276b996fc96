//! In-memory transport that records calls and plays back a script.
//!
//! Tests use it to inject events at chosen moments and to assert exactly
//! which adapter commands a session issued. The setup binary uses the same
//! scripting to simulate a pairing run without radio hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::dispatcher::EventSink;
use crate::transport::{TransportAdapter, TransportEvent};
use crate::types::{Peripheral, PeripheralAddress, PeripheralFilter};

/// One recorded adapter command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TransportCall {
    Attach,
    Detach,
    StartScan,
    StopScan,
    Connect(PeripheralAddress),
    Disconnect(PeripheralAddress),
}

/// How the mock answers a connect request for a given address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectScript {
    /// Reply with `ConnectSucceeded`.
    Succeed,
    /// Reply with `ConnectFailed` carrying the message.
    Fail(String),
    /// Never reply.
    #[default]
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    sink: Option<EventSink>,
    pending: Vec<TransportEvent>,
    calls: Vec<TransportCall>,
    scanning: bool,
    scan_results: VecDeque<Peripheral>,
    connect_scripts: HashMap<PeripheralAddress, ConnectScript>,
    connected: Vec<Peripheral>,
    filter: PeripheralFilter,
}

impl MockState {
    fn deliver(&mut self, event: TransportEvent) {
        match &self.sink {
            Some(sink) => {
                sink.send(event);
            }
            None => self.pending.push(event),
        }
    }
}

/// Scriptable [`TransportAdapter`].
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates a mock with no script: scans find nothing, connects hang.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Peripherals reported by successive scan starts, one per `start_scan`.
    #[must_use]
    pub fn with_scan_results(self, peripherals: impl IntoIterator<Item = Peripheral>) -> Self {
        self.lock().scan_results.extend(peripherals);
        self
    }

    /// Sets the reply for connect attempts to `address`.
    #[must_use]
    pub fn with_connect_script(self, address: PeripheralAddress, script: ConnectScript) -> Self {
        self.lock().connect_scripts.insert(address, script);
        self
    }

    /// Marks `peripheral` as already connected before any run starts.
    #[must_use]
    pub fn with_connected(self, peripheral: Peripheral) -> Self {
        self.lock().connected.push(peripheral);
        self
    }

    /// Only scripted scan results passing `filter` are reported.
    #[must_use]
    pub fn with_filter(self, filter: PeripheralFilter) -> Self {
        self.lock().filter = filter;
        self
    }

    /// Injects an event as if the radio stack produced it.
    ///
    /// Events emitted before a session attached are held back and delivered
    /// on attach.
    pub fn emit(&self, event: TransportEvent) {
        self.lock().deliver(event);
    }

    /// Every command issued so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded commands equal to `call`.
    #[must_use]
    pub fn count(&self, call: &TransportCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Whether a scan is currently running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Whether a session is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.lock().sink.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportAdapter for MockTransport {
    fn attach(&self, sink: EventSink) {
        let mut state = self.lock();
        state.calls.push(TransportCall::Attach);
        for event in state.pending.drain(..) {
            sink.send(event);
        }
        state.sink = Some(sink);
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.calls.push(TransportCall::Detach);
        state.sink = None;
    }

    fn start_scan(&self) {
        let mut state = self.lock();
        state.calls.push(TransportCall::StartScan);
        state.scanning = true;
        while let Some(peripheral) = state.scan_results.pop_front() {
            if state.filter.matches(&peripheral) {
                debug!(address = %peripheral.address, "mock scan reports peripheral");
                state.deliver(TransportEvent::CandidateDiscovered(peripheral));
                break;
            }
        }
    }

    fn stop_scan(&self) {
        let mut state = self.lock();
        state.calls.push(TransportCall::StopScan);
        state.scanning = false;
    }

    fn connect(&self, peripheral: &Peripheral) {
        let mut state = self.lock();
        state.calls.push(TransportCall::Connect(peripheral.address));
        let script = state
            .connect_scripts
            .get(&peripheral.address)
            .cloned()
            .unwrap_or_default();
        match script {
            ConnectScript::Succeed => {
                state.connected.push(peripheral.clone());
                state.deliver(TransportEvent::ConnectSucceeded(peripheral.address));
            }
            ConnectScript::Fail(error) => state.deliver(TransportEvent::ConnectFailed {
                address: peripheral.address,
                error,
            }),
            ConnectScript::Hang => {}
        }
    }

    fn disconnect(&self, peripheral: &Peripheral) {
        let mut state = self.lock();
        state.calls.push(TransportCall::Disconnect(peripheral.address));
        state.connected.retain(|p| p.address != peripheral.address);
    }

    fn connected_peripherals(&self) -> Vec<Peripheral> {
        self.lock().connected.clone()
    }
}
