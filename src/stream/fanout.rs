//! Per-channel TS fanout: pumps bytes from a producer's stream
//! endpoint to every attached viewer and to the HLS segmenter, in
//! `7*188=1316`-byte chunks matching common MPEG-TS muxer write sizes.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::segmenter::HlsSegmenter;
use crate::time::SharedClock;

pub const FANOUT_CHUNK_PACKETS: usize = 7;
pub const FANOUT_CHUNK_SIZE: usize = FANOUT_CHUNK_PACKETS * super::ts::TS_PACKET_SIZE;

/// Bounded per-viewer queue depth. A viewer that can't keep up is dropped
/// rather than allowed to slow down the fanout for everyone else.
pub const VIEWER_QUEUE_DEPTH: usize = 64;

pub struct Fanout {
    channel_id: String,
    clock: SharedClock,
    segmenter: Arc<HlsSegmenter>,
    viewers: parking_lot::Mutex<Vec<mpsc::Sender<Bytes>>>,
}

impl Fanout {
    pub fn new(channel_id: String, clock: SharedClock, segmenter: Arc<HlsSegmenter>) -> Self {
        Self {
            channel_id,
            clock,
            segmenter,
            viewers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Attach a new raw-TS viewer, returning the receiving half of its
    /// bounded queue.
    pub fn attach_viewer(&self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_DEPTH);
        self.viewers.lock().push(tx);
        rx
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().len()
    }

    /// Drive the fanout loop: read from `source` until it closes, chunking
    /// input into `FANOUT_CHUNK_SIZE`-byte pushes to every viewer and to
    /// the segmenter. Never blocks on a slow viewer; full queues are
    /// dropped from instead of backing up the whole channel.
    pub async fn run(&self, mut source: mpsc::Receiver<Bytes>) {
        let mut buffer: Vec<u8> = Vec::with_capacity(FANOUT_CHUNK_SIZE * 2);

        while let Some(chunk) = source.recv().await {
            buffer.extend_from_slice(&chunk);

            while buffer.len() >= FANOUT_CHUNK_SIZE {
                let out: Vec<u8> = buffer.drain(0..FANOUT_CHUNK_SIZE).collect();
                self.dispatch(Bytes::from(out));
            }
        }

        if !buffer.is_empty() {
            self.dispatch(Bytes::from(buffer));
        }
        debug!(channel = %self.channel_id, "fanout source closed");
    }

    fn dispatch(&self, chunk: Bytes) {
        let now_ms = self.clock.now_utc_ms();
        self.segmenter.feed(&chunk, now_ms);

        let mut viewers = self.viewers.lock();
        viewers.retain(|tx| tx.try_send(chunk.clone()).is_ok());
    }
}
