//! Per-client RTP scheduler.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::runtime::{Action, Task, event};
use crate::rtp::stream::RtpStream;

/// Playback state of one client's `RtpSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// SETUP has completed but PLAY/RECORD has not arrived yet.
    Ready,
    Playing,
    Paused,
}

struct Inner {
    streams: Vec<Arc<RtpStream>>,
    state: PlaybackState,
}

/// Drives outbound transmission for every `RtpStream` set up by one
/// client session. One `RtpSession::run` call holds the session lock
/// for its whole invocation, so session-wide state always has a single
/// writer.
pub struct RtpSession {
    pub session_id: u64,
    inner: Mutex<Inner>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RtpSession {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            inner: Mutex::new(Inner {
                streams: Vec::new(),
                state: PlaybackState::Ready,
            }),
        }
    }

    pub fn add_stream(&self, stream: Arc<RtpStream>) {
        self.inner.lock().streams.push(stream);
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.inner.lock().state = state;
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// Every stream set up on this session, for TEARDOWN cleanup.
    pub fn streams(&self) -> Vec<Arc<RtpStream>> {
        self.inner.lock().streams.clone()
    }
}

impl Task for RtpSession {
    /// Invoked on START/READABLE/IDLE/TIMEOUT or a self-scheduled
    /// wakeup; for each stream drains ready packets,
    /// rewrites headers, transmits, and emits a paced RTCP SR.
    fn run(&self, events: u8) -> Action {
        if events & event::KILL != 0 {
            // TEARDOWN: nothing left to drain, drop this task for good.
            return Action::DeleteSelf;
        }
        let inner = self.inner.lock();
        if inner.state != PlaybackState::Playing {
            // PAUSE: sleep until the next explicit signal.
            return Action::SleepForever;
        }

        let now = now_ms();
        let mut flow_controlled = false;
        let mut needs_tick = false;
        for stream in &inner.streams {
            needs_tick |= stream.needs_retransmit_tick();
            match stream.pump() {
                Ok(outcome) => flow_controlled |= outcome.flow_controlled,
                Err(err) => {
                    tracing::warn!(track_id = stream.track_id, %err, "rtp stream transmit error");
                }
            }
            if let Err(err) = stream.retransmit_overdue() {
                tracing::warn!(track_id = stream.track_id, %err, "rtp retransmit error");
            }
            if let Some(reflector_stream) = stream.output().reflector_stream() {
                if let Err(err) = stream.maybe_send_sender_report(now, &reflector_stream) {
                    tracing::warn!(track_id = stream.track_id, %err, "rtcp sender report error");
                }
            }
        }

        if flow_controlled {
            // Retry shortly rather than parking until the next signal;
            // a real writable-readiness notification isn't available
            // without kernel-level registration (see runtime module).
            Action::SleepMillis(20)
        } else if needs_tick {
            // A reliable-UDP track needs to notice overdue
            // retransmits even with no new packets arriving.
            Action::SleepMillis(50)
        } else {
            Action::SleepForever
        }
    }

    fn name(&self) -> &str {
        "rtp-session"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_ready_and_sleeps_until_playing() {
        let session = RtpSession::new(1);
        assert_eq!(session.state(), PlaybackState::Ready);
        assert_eq!(session.run(crate::runtime::event::START), Action::SleepForever);
    }

    #[test]
    fn pause_sleeps_forever_even_with_streams() {
        let session = RtpSession::new(1);
        session.set_state(PlaybackState::Playing);
        session.set_state(PlaybackState::Paused);
        assert_eq!(session.run(crate::runtime::event::TIMEOUT), Action::SleepForever);
    }
}
