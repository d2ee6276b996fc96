//! Single-flight event delivery into a discovery session.
//!
//! Every producer (the transport's scan/connect notifications, the two
//! deadline timers, an explicit cancel) posts into one unbounded channel
//! through an [`EventSink`]. The [`EventDispatcher`] drains that channel and
//! hands events to the session one at a time; the next event is not taken
//! off the queue until the handler returned for the current one.
//!
//! Only the transport holds a strong [`EventSink`]. The session, its timers
//! and cancellers post through a [`WeakEventSink`], so the queue closes as
//! soon as the transport lets go of its sink.

use tokio::sync::mpsc;
use tracing::trace;

use crate::transport::TransportEvent;
use crate::types::{Outcome, PeripheralAddress};

/// Everything a session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Notification from the radio stack.
    Transport(TransportEvent),
    /// The overall discovery deadline fired.
    DiscoveryTimeout,
    /// The per-attempt deadline for the given candidate fired.
    ConnectTimeout(PeripheralAddress),
    /// The run owner asked to stop.
    Cancel,
}

/// Cloneable producer handle onto a dispatcher queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Delivers a transport notification.
    ///
    /// Returns `false` if the run that owned this sink has already ended.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.post(SessionEvent::Transport(event))
    }

    /// Queues any session event.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Returns `true` once the dispatcher side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle that can post without keeping the queue open.
    #[must_use]
    pub fn downgrade(&self) -> WeakEventSink {
        WeakEventSink {
            tx: self.tx.downgrade(),
        }
    }
}

/// Producer handle that does not keep the queue alive.
#[derive(Debug, Clone)]
pub struct WeakEventSink {
    tx: mpsc::WeakUnboundedSender<SessionEvent>,
}

impl WeakEventSink {
    /// Queues an event. Returns `false` once the queue is closed.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.upgrade().is_some_and(|tx| tx.send(event).is_ok())
    }
}

/// Consumer side of the session queue.
#[derive(Debug)]
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventDispatcher {
    /// Creates a dispatcher together with its first sink.
    #[must_use]
    pub fn channel() -> (EventSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, Self { rx })
    }

    /// Feeds queued events to `handler` until it reports a terminal outcome.
    ///
    /// Returns `None` if every strong sink was dropped before that happened. Events
    /// still queued after the terminal one are dropped with the dispatcher.
    pub async fn run<F>(mut self, mut handler: F) -> Option<Outcome>
    where
        F: FnMut(SessionEvent) -> Option<Outcome>,
    {
        while let Some(event) = self.rx.recv().await {
            trace!(?event, "dispatching");
            if let Some(outcome) = handler(event) {
                return Some(outcome);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> PeripheralAddress {
        PeripheralAddress::new([0, 0, 0, 0, 0, last])
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_post_order() {
        let (sink, dispatcher) = EventDispatcher::channel();
        sink.post(SessionEvent::ConnectTimeout(addr(1)));
        sink.send(TransportEvent::ConnectSucceeded(addr(2)));
        sink.post(SessionEvent::DiscoveryTimeout);

        let mut seen = Vec::new();
        let outcome = dispatcher
            .run(|event| {
                seen.push(event.clone());
                (event == SessionEvent::DiscoveryTimeout).then_some(Outcome::TimedOut)
            })
            .await;

        assert_eq!(outcome, Some(Outcome::TimedOut));
        assert_eq!(
            seen,
            vec![
                SessionEvent::ConnectTimeout(addr(1)),
                SessionEvent::Transport(TransportEvent::ConnectSucceeded(addr(2))),
                SessionEvent::DiscoveryTimeout,
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_at_first_terminal_outcome() {
        let (sink, dispatcher) = EventDispatcher::channel();
        sink.post(SessionEvent::Cancel);
        sink.post(SessionEvent::DiscoveryTimeout);

        let mut handled = 0;
        let outcome = dispatcher
            .run(|_| {
                handled += 1;
                Some(Outcome::Canceled)
            })
            .await;

        assert_eq!(outcome, Some(Outcome::Canceled));
        assert_eq!(handled, 1);
    }

    #[tokio::test]
    async fn test_run_returns_none_when_all_sinks_dropped() {
        let (sink, dispatcher) = EventDispatcher::channel();
        sink.post(SessionEvent::ConnectTimeout(addr(3)));
        drop(sink);

        let outcome = dispatcher.run(|_| None).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_weak_sinks_do_not_keep_queue_open() {
        let (sink, dispatcher) = EventDispatcher::channel();
        let weak = sink.downgrade();
        assert!(weak.post(SessionEvent::ConnectTimeout(addr(4))));
        drop(sink);

        let mut seen = Vec::new();
        let outcome = dispatcher
            .run(|event| {
                seen.push(event);
                None
            })
            .await;

        assert_eq!(outcome, None);
        assert_eq!(seen, vec![SessionEvent::ConnectTimeout(addr(4))]);
        assert!(!weak.post(SessionEvent::Cancel));
    }

    #[tokio::test]
    async fn test_sink_reports_closed_after_dispatcher_drop() {
        let (sink, dispatcher) = EventDispatcher::channel();
        drop(dispatcher);
        assert!(sink.is_closed());
        assert!(!sink.post(SessionEvent::Cancel));
    }
}
