//! The discover-and-connect state machine.
//!
//! ```text
//! Idle ──start──► Scanning ──CandidateDiscovered──► Connecting
//!                    ▲                                  │
//!                    └──── ConnectFailed / timeout ─────┤
//!                                                       │
//!   Scanning|Connecting ──DiscoveryTimeout/Cancel──► Terminated
//!   Connecting ──ConnectSucceeded──► Terminated(Connected)
//! ```
//!
//! A session only ever reacts to one event at a time (see
//! [`crate::dispatcher`]). Once `active` drops to `false` every further event
//! is ignored: no state change, no adapter command, no timer re-armed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::dispatcher::{EventSink, SessionEvent, WeakEventSink};
use crate::timer::{TimerHandle, TimerService};
use crate::transport::{TransportAdapter, TransportEvent};
use crate::types::{Outcome, Peripheral, PeripheralAddress};

/// Position of a session in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet started.
    Idle,
    /// Scanning, no connection attempt outstanding.
    Scanning,
    /// One candidate is being connected.
    Connecting,
    /// Run finished.
    Terminated(Outcome),
}

/// Run state for a single discover-and-connect call.
pub struct Session {
    transport: Arc<dyn TransportAdapter>,
    timers: TimerService,
    sink: WeakEventSink,
    connect_timeout: Duration,
    phase: Phase,
    active: bool,
    candidate: Option<Peripheral>,
    discovery_deadline: Option<TimerHandle>,
    connect_deadline: Option<TimerHandle>,
}

impl Session {
    /// Creates an idle session. Timer firings are posted into the queue
    /// behind `sink` without keeping it open.
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        timers: TimerService,
        sink: &EventSink,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            timers,
            sink: sink.downgrade(),
            connect_timeout,
            phase: Phase::Idle,
            active: false,
            candidate: None,
            discovery_deadline: None,
            connect_deadline: None,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// `true` from start until a terminal outcome.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// The peripheral currently being connected.
    #[must_use]
    pub const fn candidate(&self) -> Option<&Peripheral> {
        self.candidate.as_ref()
    }

    /// Whether the discovery deadline is armed.
    #[must_use]
    pub const fn has_discovery_deadline(&self) -> bool {
        self.discovery_deadline.is_some()
    }

    /// Whether a per-attempt deadline is armed.
    #[must_use]
    pub const fn has_connect_deadline(&self) -> bool {
        self.connect_deadline.is_some()
    }

    /// Leaves `Idle` and starts scanning.
    ///
    /// A zero or absent `timeout` arms no discovery deadline. Calling this on
    /// a session that already left `Idle` does nothing.
    pub fn start(&mut self, timeout: Option<Duration>) {
        if self.phase != Phase::Idle {
            debug!(phase = ?self.phase, "session already started");
            return;
        }
        self.active = true;
        self.candidate = None;
        self.phase = Phase::Scanning;

        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            let sink = self.sink.clone();
            let deadline = self.timers.schedule(timeout, move || {
                sink.post(SessionEvent::DiscoveryTimeout);
            });
            debug!(after = ?deadline.duration(), "discovery deadline armed");
            self.discovery_deadline = Some(deadline);
        }
        debug!(?timeout, "starting discovery");
        self.transport.start_scan();
    }

    /// Ends the run immediately with `peripheral` as the connected device.
    ///
    /// Used when the adapter already holds a suitable connection at start.
    /// Returns `None` unless the session is still `Idle`.
    pub fn adopt_connected(&mut self, peripheral: Peripheral) -> Option<Outcome> {
        if self.phase != Phase::Idle {
            return None;
        }
        info!(address = %peripheral.address, "reusing already connected peripheral");
        self.active = true;
        let address = peripheral.address;
        self.candidate = Some(peripheral);
        Some(self.terminate(Outcome::Connected(address)))
    }

    /// Applies one event. Returns the outcome when it ended the run.
    pub fn handle(&mut self, event: SessionEvent) -> Option<Outcome> {
        if !self.active {
            debug!(?event, "ignoring stale event, session not active");
            return None;
        }
        match event {
            SessionEvent::Transport(TransportEvent::CandidateDiscovered(peripheral)) => {
                self.on_candidate_discovered(peripheral);
                None
            }
            SessionEvent::Transport(TransportEvent::ConnectSucceeded(address)) => {
                self.on_connect_succeeded(address)
            }
            SessionEvent::Transport(TransportEvent::ConnectFailed { address, error }) => {
                self.on_connect_failed(address, &error);
                None
            }
            SessionEvent::Transport(TransportEvent::TransportLost(reason)) => {
                info!(%reason, "transport lost, ending discovery");
                Some(self.shut_down(Outcome::TransportLost))
            }
            SessionEvent::ConnectTimeout(address) => {
                self.on_connect_timeout(address);
                None
            }
            SessionEvent::DiscoveryTimeout => {
                info!("discovery timed out, stopping now");
                Some(self.shut_down(Outcome::TimedOut))
            }
            SessionEvent::Cancel => {
                info!("discovery canceled, stopping now");
                Some(self.shut_down(Outcome::Canceled))
            }
        }
    }

    fn on_candidate_discovered(&mut self, peripheral: Peripheral) {
        if let Some(current) = &self.candidate {
            debug!(
                address = %peripheral.address,
                current = %current.address,
                "discovered but ignored, already connecting to another one"
            );
            return;
        }
        debug!(
            address = %peripheral.address,
            name = ?peripheral.name,
            "discovered, trying to connect"
        );
        if let Some(stale) = self.connect_deadline.take() {
            stale.cancel();
        }
        let sink = self.sink.clone();
        let address = peripheral.address;
        self.connect_deadline = Some(self.timers.schedule(self.connect_timeout, move || {
            sink.post(SessionEvent::ConnectTimeout(address));
        }));
        self.phase = Phase::Connecting;
        self.candidate = Some(peripheral.clone());
        self.transport.connect(&peripheral);
    }

    fn on_connect_succeeded(&mut self, address: PeripheralAddress) -> Option<Outcome> {
        if !self.is_candidate(address) {
            debug!(%address, "ignoring connect success for non-current peripheral");
            return None;
        }
        info!(%address, "successfully connected, stopping now");
        if let Some(deadline) = self.connect_deadline.take() {
            deadline.cancel();
        }
        self.transport.stop_scan();
        Some(self.terminate(Outcome::Connected(address)))
    }

    fn on_connect_failed(&mut self, address: PeripheralAddress, error: &str) {
        if !self.is_candidate(address) {
            debug!(%address, %error, "ignoring connect failure for non-current peripheral");
            return;
        }
        debug!(%address, %error, "connection failed");
        if let Some(deadline) = self.connect_deadline.take() {
            deadline.cancel();
        }
        if let Some(failed) = self.candidate.take() {
            self.transport.disconnect(&failed);
        }
        self.phase = Phase::Scanning;
        if self.active {
            debug!("restarting discovery");
            self.transport.start_scan();
        }
    }

    fn on_connect_timeout(&mut self, address: PeripheralAddress) {
        if !self.is_candidate(address) {
            debug!(%address, "ignoring connect timeout for non-current peripheral");
            return;
        }
        self.on_connect_failed(address, "connection attempt timed out");
    }

    /// Common path for timeout, cancel and transport loss.
    fn shut_down(&mut self, outcome: Outcome) -> Outcome {
        if let Some(deadline) = self.connect_deadline.take() {
            deadline.cancel();
        }
        if let Some(candidate) = self.candidate.take() {
            self.transport.disconnect(&candidate);
        }
        self.transport.stop_scan();
        self.terminate(outcome)
    }

    fn terminate(&mut self, outcome: Outcome) -> Outcome {
        self.active = false;
        if let Some(deadline) = self.discovery_deadline.take() {
            deadline.cancel();
        }
        if let Some(deadline) = self.connect_deadline.take() {
            deadline.cancel();
        }
        self.phase = Phase::Terminated(outcome);
        debug!(?outcome, "stopped");
        outcome
    }

    fn is_candidate(&self, address: PeripheralAddress) -> bool {
        self.candidate.as_ref().is_some_and(|c| c.address == address)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.active {
            debug!("session dropped while active, stopping scan");
            self.shut_down(Outcome::Canceled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::EventDispatcher;
    use crate::transport::mock::{MockTransport, TransportCall};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    fn peripheral(last: u8) -> Peripheral {
        Peripheral::named(PeripheralAddress::new([0xC4, 0, 0, 0, 0, last]), "Nuimo")
    }

    fn discovered(p: &Peripheral) -> SessionEvent {
        SessionEvent::Transport(TransportEvent::CandidateDiscovered(p.clone()))
    }

    fn failed(p: &Peripheral) -> SessionEvent {
        SessionEvent::Transport(TransportEvent::ConnectFailed {
            address: p.address,
            error: "le-connection-abort-by-local".into(),
        })
    }

    fn succeeded(p: &Peripheral) -> SessionEvent {
        SessionEvent::Transport(TransportEvent::ConnectSucceeded(p.address))
    }

    /// The returned sink stands in for the transport's and keeps the queue open.
    fn session() -> (Session, Arc<MockTransport>, (EventSink, EventDispatcher)) {
        let mock = Arc::new(MockTransport::new());
        let (sink, dispatcher) = EventDispatcher::channel();
        let transport: Arc<dyn TransportAdapter> = mock.clone();
        let session = Session::new(transport, TimerService::current(), &sink, CONNECT_TIMEOUT);
        (session, mock, (sink, dispatcher))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_arms_discovery_deadline_and_scans() {
        let (mut s, mock, _d) = session();
        s.start(Some(Duration::from_secs(5)));

        assert_eq!(s.phase(), Phase::Scanning);
        assert!(s.is_active());
        assert!(s.has_discovery_deadline());
        assert_eq!(mock.calls(), vec![TransportCall::StartScan]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_or_absent_timeout_arms_no_deadline() {
        let (mut s, _mock, _d) = session();
        s.start(Some(Duration::ZERO));
        assert!(!s.has_discovery_deadline());

        let (mut s, _mock, _d) = session();
        s.start(None);
        assert!(!s.has_discovery_deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_moves_to_connecting_and_connects() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(None);

        assert_eq!(s.handle(discovered(&p1)), None);
        assert_eq!(s.phase(), Phase::Connecting);
        assert_eq!(s.candidate(), Some(&p1));
        assert!(s.has_connect_deadline());
        assert_eq!(mock.count(&TransportCall::Connect(p1.address)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_discovery_while_connecting_is_ignored() {
        let (mut s, mock, _d) = session();
        let (p1, p2) = (peripheral(1), peripheral(2));
        s.start(None);
        s.handle(discovered(&p1));
        s.handle(discovered(&p2));

        assert_eq!(s.candidate(), Some(&p1));
        assert_eq!(mock.count(&TransportCall::Connect(p2.address)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_disconnects_and_rescans() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(None);
        s.handle(discovered(&p1));

        assert_eq!(s.handle(failed(&p1)), None);
        assert_eq!(s.phase(), Phase::Scanning);
        assert_eq!(s.candidate(), None);
        assert!(!s.has_connect_deadline());
        assert_eq!(
            mock.calls(),
            vec![
                TransportCall::StartScan,
                TransportCall::Connect(p1.address),
                TransportCall::Disconnect(p1.address),
                TransportCall::StartScan,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_from_detached_candidate_is_ignored() {
        let (mut s, mock, _d) = session();
        let (p1, p2) = (peripheral(1), peripheral(2));
        s.start(None);
        s.handle(discovered(&p1));
        s.handle(failed(&p1));
        s.handle(discovered(&p2));
        let before = mock.calls();

        assert_eq!(s.handle(failed(&p1)), None);
        assert_eq!(s.handle(succeeded(&p1)), None);
        assert_eq!(s.candidate(), Some(&p2));
        assert_eq!(mock.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success_terminates_connected() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(Some(Duration::from_secs(30)));
        s.handle(discovered(&p1));

        assert_eq!(s.handle(succeeded(&p1)), Some(Outcome::Connected(p1.address)));
        assert!(!s.is_active());
        assert!(!s.has_connect_deadline());
        assert!(!s.has_discovery_deadline());
        assert_eq!(s.phase(), Phase::Terminated(Outcome::Connected(p1.address)));
        assert_eq!(mock.count(&TransportCall::StopScan), 1);
        assert_eq!(mock.count(&TransportCall::Disconnect(p1.address)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_treated_as_failure() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(None);
        s.handle(discovered(&p1));

        assert_eq!(s.handle(SessionEvent::ConnectTimeout(p1.address)), None);
        assert_eq!(s.candidate(), None);
        assert_eq!(mock.count(&TransportCall::Disconnect(p1.address)), 1);
        assert_eq!(mock.count(&TransportCall::StartScan), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_for_previous_candidate_is_ignored() {
        let (mut s, mock, _d) = session();
        let (p1, p2) = (peripheral(1), peripheral(2));
        s.start(None);
        s.handle(discovered(&p1));
        s.handle(failed(&p1));
        s.handle(discovered(&p2));

        s.handle(SessionEvent::ConnectTimeout(p1.address));
        assert_eq!(s.candidate(), Some(&p2));
        assert_eq!(mock.count(&TransportCall::Disconnect(p2.address)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_connect_timeout_after_success_keeps_connection() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(None);
        s.handle(discovered(&p1));

        let first = s.handle(succeeded(&p1));
        let second = s.handle(SessionEvent::ConnectTimeout(p1.address));

        assert_eq!(first, Some(Outcome::Connected(p1.address)));
        assert_eq!(second, None);
        assert_eq!(s.phase(), Phase::Terminated(Outcome::Connected(p1.address)));
        assert_eq!(mock.count(&TransportCall::Disconnect(p1.address)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout_disconnects_candidate_and_stops() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(Some(Duration::from_secs(5)));
        s.handle(discovered(&p1));

        assert_eq!(s.handle(SessionEvent::DiscoveryTimeout), Some(Outcome::TimedOut));
        assert_eq!(s.candidate(), None);
        assert!(!s.has_connect_deadline());
        assert_eq!(mock.count(&TransportCall::Disconnect(p1.address)), 1);
        assert_eq!(mock.count(&TransportCall::StopScan), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_symmetric_with_timeout() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        s.start(None);
        s.handle(discovered(&p1));

        assert_eq!(s.handle(SessionEvent::Cancel), Some(Outcome::Canceled));
        assert_eq!(mock.count(&TransportCall::Disconnect(p1.address)), 1);
        assert_eq!(mock.count(&TransportCall::StopScan), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_lost_terminates() {
        let (mut s, _mock, _d) = session();
        s.start(None);
        let lost = SessionEvent::Transport(TransportEvent::TransportLost("adapter removed".into()));
        assert_eq!(s.handle(lost), Some(Outcome::TransportLost));
        assert!(!s.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_termination_change_nothing() {
        let (mut s, mock, _d) = session();
        let (p1, p2) = (peripheral(1), peripheral(2));
        s.start(Some(Duration::from_secs(5)));
        s.handle(SessionEvent::DiscoveryTimeout);
        let calls = mock.calls();
        let phase = s.phase();

        let late = [
            discovered(&p2),
            succeeded(&p1),
            failed(&p1),
            SessionEvent::ConnectTimeout(p1.address),
            SessionEvent::DiscoveryTimeout,
            SessionEvent::Cancel,
            SessionEvent::Transport(TransportEvent::TransportLost("gone".into())),
        ];
        for event in late {
            assert_eq!(s.handle(event), None);
        }

        assert_eq!(mock.calls(), calls);
        assert_eq!(s.phase(), phase);
        assert_eq!(s.candidate(), None);
        assert!(!s.has_connect_deadline());
        assert!(!s.has_discovery_deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_before_start_are_ignored() {
        let (mut s, mock, _d) = session();
        assert_eq!(s.handle(discovered(&peripheral(1))), None);
        assert_eq!(s.phase(), Phase::Idle);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopt_connected_terminates_without_scanning() {
        let (mut s, mock, _d) = session();
        let p1 = peripheral(1);
        assert_eq!(s.adopt_connected(p1.clone()), Some(Outcome::Connected(p1.address)));
        assert!(!s.is_active());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_deadlines_post_into_the_queue() {
        let (mut s, _mock, (_sink, dispatcher)) = session();
        let p1 = peripheral(1);
        s.start(Some(Duration::from_secs(30)));
        s.handle(discovered(&p1));

        let outcome = dispatcher.run(|event| s.handle(event)).await;

        // Connect deadline at 20s sends it back to scanning, discovery
        // deadline at 30s ends the run.
        assert_eq!(outcome, Some(Outcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopt_connected_after_start_is_refused() {
        let (mut s, _mock, _d) = session();
        s.start(None);
        assert_eq!(s.adopt_connected(peripheral(1)), None);
        assert_eq!(s.phase(), Phase::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_while_active_stops_scanning() {
        let (mut s, mock, _d) = session();
        s.start(None);
        drop(s);
        assert_eq!(mock.count(&TransportCall::StopScan), 1);
    }
}
