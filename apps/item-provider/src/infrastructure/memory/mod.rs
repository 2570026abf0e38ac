//! In-Memory Channel
//!
//! A [`Channel`] that keeps submitted frames in memory and republishes them
//! on a tokio broadcast channel. Used by tests to inspect what the provider
//! wrote and by the binary as a loopback consumer.
//!
//! Failure injection (refused buffers, failing submits, inactive
//! connection) lets callers exercise the provider's delivery error paths.

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::application::ports::{Channel, SubmitStatus, TransportBuffer, WireCodec};
use crate::domain::message::ResponseMsg;
use crate::domain::types::{ConnectionId, StreamId};
use crate::infrastructure::codec::JsonCodec;

/// Login stream id assigned by [`MemoryChannel::new`].
pub const DEFAULT_LOGIN_STREAM: StreamId = 1;

const TAP_CAPACITY: usize = 1_024;

#[derive(Debug)]
struct ChannelState {
    active: bool,
    deny_buffers: bool,
    submit_status: SubmitStatus,
    submits: usize,
    scheduled_failure: Option<(usize, SubmitStatus)>,
    frames: Vec<Vec<u8>>,
}

/// Loopback channel.
#[derive(Debug)]
pub struct MemoryChannel {
    id: ConnectionId,
    login_stream_id: Option<StreamId>,
    retain: bool,
    state: Mutex<ChannelState>,
    tap: broadcast::Sender<Vec<u8>>,
}

impl MemoryChannel {
    /// Logged-in channel on [`DEFAULT_LOGIN_STREAM`].
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self::build(id, Some(DEFAULT_LOGIN_STREAM))
    }

    /// Channel whose consumer has not logged in.
    #[must_use]
    pub fn without_login(id: ConnectionId) -> Self {
        Self::build(id, None)
    }

    /// Stop keeping frames; they are only published to subscribers.
    #[must_use]
    pub const fn without_retention(mut self) -> Self {
        self.retain = false;
        self
    }

    fn build(id: ConnectionId, login_stream_id: Option<StreamId>) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);

        Self {
            id,
            login_stream_id,
            retain: true,
            state: Mutex::new(ChannelState {
                active: true,
                deny_buffers: false,
                submit_status: SubmitStatus::Success,
                submits: 0,
                scheduled_failure: None,
                frames: Vec::new(),
            }),
            tap,
        }
    }

    /// Receive every frame submitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.tap.subscribe()
    }

    /// Raw frames submitted so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    /// Submitted frames decoded as JSON responses.
    ///
    /// Frames that do not decode are skipped.
    #[must_use]
    pub fn messages(&self) -> Vec<ResponseMsg> {
        self.state
            .lock()
            .frames
            .iter()
            .filter_map(|frame| JsonCodec.decode(frame).ok())
            .collect()
    }

    /// Forget the frames submitted so far.
    pub fn clear(&self) {
        self.state.lock().frames.clear();
    }

    /// Make every later submit return `status`.
    pub fn fail_submits(&self, status: SubmitStatus) {
        self.state.lock().submit_status = status;
    }

    /// Make only the `nth` submit from now on (1-based) return `status`.
    pub fn fail_submit_at(&self, nth: usize, status: SubmitStatus) {
        let mut state = self.state.lock();
        let at = state.submits + nth.max(1);
        state.scheduled_failure = Some((at, status));
    }

    /// Make every later buffer request fail.
    pub fn deny_buffers(&self) {
        self.state.lock().deny_buffers = true;
    }

    /// Mark the connection as no longer writable.
    pub fn deactivate(&self) {
        self.state.lock().active = false;
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn login_stream_id(&self) -> Option<StreamId> {
        self.login_stream_id
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn get_buffer(&self, size: usize) -> Option<TransportBuffer> {
        let state = self.state.lock();
        (state.active && !state.deny_buffers).then(|| TransportBuffer::with_capacity(size))
    }

    fn submit(&self, buffer: TransportBuffer) -> SubmitStatus {
        let mut state = self.state.lock();
        state.submits += 1;
        if state.submit_status != SubmitStatus::Success {
            return state.submit_status;
        }
        if let Some((at, status)) = state.scheduled_failure {
            if at == state.submits {
                state.scheduled_failure = None;
                return status;
            }
        }

        let frame = buffer.into_bytes();
        if self.retain {
            state.frames.push(frame.clone());
        }
        drop(state);

        // No subscribers is fine.
        let _ = self.tap.send(frame);
        SubmitStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(bytes: &[u8]) -> TransportBuffer {
        let mut buffer = TransportBuffer::with_capacity(bytes.len());
        assert!(buffer.fill(bytes));
        buffer
    }

    #[test]
    fn submitted_frames_are_kept() {
        let channel = MemoryChannel::new(3);

        assert_eq!(channel.submit(buffer(b"abc")), SubmitStatus::Success);

        assert_eq!(channel.frames(), vec![b"abc".to_vec()]);
        assert_eq!(channel.login_stream_id(), Some(DEFAULT_LOGIN_STREAM));
    }

    #[test]
    fn failing_submit_drops_frame() {
        let channel = MemoryChannel::new(3);
        channel.fail_submits(SubmitStatus::Retryable);

        assert_eq!(channel.submit(buffer(b"abc")), SubmitStatus::Retryable);
        assert!(channel.frames().is_empty());
    }

    #[test]
    fn scheduled_failure_hits_one_submit() {
        let channel = MemoryChannel::new(3);
        channel.submit(buffer(b"a"));
        channel.fail_submit_at(2, SubmitStatus::Retryable);

        assert_eq!(channel.submit(buffer(b"b")), SubmitStatus::Success);
        assert_eq!(channel.submit(buffer(b"c")), SubmitStatus::Retryable);
        assert_eq!(channel.submit(buffer(b"d")), SubmitStatus::Success);

        assert_eq!(channel.frames(), vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn inactive_channel_has_no_buffers() {
        let channel = MemoryChannel::without_login(3);
        channel.deactivate();

        assert!(!channel.is_active());
        assert!(channel.get_buffer(16).is_none());
        assert!(channel.login_stream_id().is_none());
    }

    #[test]
    fn denied_buffers() {
        let channel = MemoryChannel::new(3);
        channel.deny_buffers();

        assert!(channel.get_buffer(16).is_none());
    }

    #[test]
    fn subscribers_see_frames_without_retention() {
        let channel = MemoryChannel::new(3).without_retention();
        let mut rx = channel.subscribe();

        channel.submit(buffer(b"xyz"));

        assert_eq!(rx.try_recv().unwrap(), b"xyz".to_vec());
        assert!(channel.frames().is_empty());
    }
}
