//! Liveness: a rolling read deadline plus a periodic ping ticker.
//!
//! The read loop waits on [`ReadDeadline::read`]; any inbound frame (data,
//! ping or pong) pushes the deadline out by `pong_wait`. The write loop pings
//! every `ping_interval`, which is strictly shorter than `pong_wait`, so a
//! live peer's pong always lands before the deadline.

use std::time::Duration;

use relay_core::TransportError;
use relay_settings::HeartbeatSettings;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::transport::{Frame, FrameReader};

/// Heartbeat timing for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Silence tolerated before the connection is declared dead.
    pub pong_wait: Duration,
    /// Period between outbound pings.
    pub ping_interval: Duration,
}

impl HeartbeatConfig {
    /// Derive the ping period as 9/10 of `pong_wait` (at least 1 ms).
    pub fn from_pong_wait(pong_wait: Duration) -> Self {
        let ping_interval = (pong_wait * 9 / 10).max(Duration::from_millis(1));
        Self {
            pong_wait,
            ping_interval,
        }
    }

    /// Ticker for the write loop. The first tick fires one interval from now.
    pub fn ping_ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from(&HeartbeatSettings::default())
    }
}

impl From<&HeartbeatSettings> for HeartbeatConfig {
    fn from(settings: &HeartbeatSettings) -> Self {
        Self::from_pong_wait(settings.pong_wait())
    }
}

/// Rolling deadline for the next inbound frame.
#[derive(Debug)]
pub struct ReadDeadline {
    pong_wait: Duration,
    deadline: Instant,
}

impl ReadDeadline {
    /// Arm the deadline `pong_wait` from now.
    pub fn start(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            deadline: Instant::now() + pong_wait,
        }
    }

    /// Push the deadline out to `pong_wait` from now.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.pong_wait;
    }

    /// Current deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Read one frame, failing with [`TransportError::Timeout`] once the
    /// deadline passes. Does not reset the deadline.
    pub async fn read<R: FrameReader + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Option<Result<Frame, TransportError>> {
        match time::timeout_at(self.deadline, reader.read_frame()).await {
            Ok(frame) => frame,
            Err(_) => Some(Err(TransportError::Timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::transport::memory;
    use assert_matches::assert_matches;

    #[test]
    fn ping_interval_is_nine_tenths_of_pong_wait() {
        let cfg = HeartbeatConfig::from_pong_wait(Duration::from_secs(10));
        assert_eq!(cfg.ping_interval, Duration::from_secs(9));
        assert!(cfg.ping_interval < cfg.pong_wait);
    }

    #[test]
    fn ping_interval_never_zero() {
        let cfg = HeartbeatConfig::from_pong_wait(Duration::from_nanos(5));
        assert_eq!(cfg.ping_interval, Duration::from_millis(1));
    }

    #[test]
    fn default_follows_settings() {
        let cfg = HeartbeatConfig::default();
        assert_eq!(cfg.pong_wait, Duration::from_secs(10));
        assert_eq!(cfg.ping_interval, Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_skips_immediate_tick() {
        let cfg = HeartbeatConfig::from_pong_wait(Duration::from_secs(10));
        let start = Instant::now();
        let mut ticker = cfg.ping_ticker();
        let _ = ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_on_silence() {
        let (mut reader, _writer, _peer) = memory::pair();
        let deadline = ReadDeadline::start(Duration::from_secs(10));
        let start = Instant::now();
        assert_matches!(deadline.read(&mut reader).await, Some(Err(TransportError::Timeout)));
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn read_returns_frame_before_deadline() {
        let (mut reader, _writer, peer) = memory::pair();
        let deadline = ReadDeadline::start(Duration::from_secs(10));
        peer.inbound.send(Frame::Pong(vec![])).unwrap();
        assert_matches!(deadline.read(&mut reader).await, Some(Ok(Frame::Pong(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_extends_deadline() {
        let mut deadline = ReadDeadline::start(Duration::from_secs(10));
        let first = deadline.deadline();
        time::advance(Duration::from_secs(5)).await;
        deadline.reset();
        assert_eq!(deadline.deadline() - first, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_reader_yields_none() {
        let (mut reader, _writer, peer) = memory::pair();
        drop(peer);
        let deadline = ReadDeadline::start(Duration::from_secs(10));
        assert!(deadline.read(&mut reader).await.is_none());
    }
}
