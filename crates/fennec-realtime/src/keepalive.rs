//! Client-side ping/pong bookkeeping for the receive loop.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    /// Send a ping now.
    Ping,
    /// An outstanding ping went unanswered for longer than the timeout.
    TimedOut,
}

/// Tracks when to ping and whether the peer is still answering.
///
/// Any inbound frame counts as proof of life, not just pongs.
#[derive(Debug)]
pub(crate) struct Keepalive {
    interval: Option<Duration>,
    timeout: Duration,
    next_ping: Option<Instant>,
    awaiting_since: Option<Instant>,
}

impl Keepalive {
    pub(crate) fn new(interval: Option<Duration>, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            next_ping: interval.map(|i| now + i),
            awaiting_since: None,
        }
    }

    /// When the loop should next wake up, or `None` if pings are disabled.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        match (self.next_ping, self.awaiting_since) {
            (None, _) => None,
            (Some(next), None) => Some(next),
            (Some(next), Some(sent)) => Some(next.min(sent + self.timeout)),
        }
    }

    pub(crate) fn record_activity(&mut self) {
        self.awaiting_since = None;
    }

    /// Decides what to do at `now`; schedules the following ping when one is due.
    pub(crate) fn poll(&mut self, now: Instant) -> Option<KeepaliveAction> {
        let interval = self.interval?;
        if let Some(sent) = self.awaiting_since {
            if now.duration_since(sent) >= self.timeout {
                return Some(KeepaliveAction::TimedOut);
            }
        }
        match self.next_ping {
            Some(next) if now >= next => {
                self.next_ping = Some(now + interval);
                if self.awaiting_since.is_none() {
                    self.awaiting_since = Some(now);
                }
                Some(KeepaliveAction::Ping)
            }
            _ => None,
        }
    }

    /// Completes at [`deadline`](Self::deadline); never completes when pings are disabled.
    pub(crate) async fn wait(&self) {
        match self.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn disabled_never_fires() {
        let start = Instant::now();
        let mut ka = Keepalive::new(None, SEC * 30, start);
        assert_eq!(ka.deadline(), None);
        assert_eq!(ka.poll(start + SEC * 3600), None);
    }

    #[test]
    fn pings_on_interval() {
        let start = Instant::now();
        let mut ka = Keepalive::new(Some(SEC * 20), SEC * 30, start);
        assert_eq!(ka.deadline(), Some(start + SEC * 20));
        assert_eq!(ka.poll(start + SEC * 10), None);
        assert_eq!(ka.poll(start + SEC * 20), Some(KeepaliveAction::Ping));
        assert_eq!(ka.deadline(), Some(start + SEC * 40));
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let start = Instant::now();
        let mut ka = Keepalive::new(Some(SEC * 20), SEC * 30, start);
        assert_eq!(ka.poll(start + SEC * 20), Some(KeepaliveAction::Ping));
        ka.record_activity();
        assert_eq!(ka.poll(start + SEC * 40), Some(KeepaliveAction::Ping));
        ka.record_activity();
        assert_eq!(ka.poll(start + SEC * 59), None);
    }

    #[test]
    fn unanswered_ping_times_out() {
        let start = Instant::now();
        let mut ka = Keepalive::new(Some(SEC * 20), SEC * 5, start);
        assert_eq!(ka.poll(start + SEC * 20), Some(KeepaliveAction::Ping));
        assert_eq!(ka.deadline(), Some(start + SEC * 25));
        assert_eq!(ka.poll(start + SEC * 24), None);
        assert_eq!(ka.poll(start + SEC * 25), Some(KeepaliveAction::TimedOut));
    }

    #[test]
    fn timeout_measured_from_first_unanswered_ping() {
        let start = Instant::now();
        let mut ka = Keepalive::new(Some(SEC * 2), SEC * 5, start);
        assert_eq!(ka.poll(start + SEC * 2), Some(KeepaliveAction::Ping));
        assert_eq!(ka.poll(start + SEC * 4), Some(KeepaliveAction::Ping));
        assert_eq!(ka.poll(start + SEC * 6), Some(KeepaliveAction::Ping));
        assert_eq!(ka.poll(start + SEC * 7), Some(KeepaliveAction::TimedOut));
    }
}
