//! HLS segmenter: feeds arbitrary byte
//! chunks, re-syncs on the TS sync byte, and finalizes fixed-duration,
//! keyframe-aligned segments into a bounded ring with a live M3U8 playlist.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::ts::{is_keyframe_packet, TsPacket, TS_PACKET_SIZE};

#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub duration_secs: f64,
    pub data: Vec<u8>,
}

struct SegmenterState {
    /// Bytes carried over between `feed()` calls that didn't align to a
    /// full 188-byte packet.
    leftover: Vec<u8>,
    seg_buffer: Vec<u8>,
    seg_start_pcr_secs: Option<f64>,
    last_pcr_secs: Option<f64>,
    seg_start_wall_ms: i64,
    segments: VecDeque<Segment>,
    media_sequence: u64,
    next_index: u64,
    playlist_ready: bool,
}

pub struct HlsSegmenter {
    target_duration_secs: f64,
    max_segments: usize,
    state: Mutex<SegmenterState>,
}

impl HlsSegmenter {
    pub fn new(target_duration_secs: f64, max_segments: usize, now_ms: i64) -> Self {
        Self {
            target_duration_secs,
            max_segments,
            state: Mutex::new(SegmenterState {
                leftover: Vec::new(),
                seg_buffer: Vec::new(),
                seg_start_pcr_secs: None,
                last_pcr_secs: None,
                seg_start_wall_ms: now_ms,
                segments: VecDeque::new(),
                media_sequence: 0,
                next_index: 0,
                playlist_ready: false,
            }),
        }
    }

    /// Feed an arbitrary chunk of TS bytes, possibly not packet-aligned.
    pub fn feed(&self, chunk: &[u8], now_ms: i64) {
        let mut state = self.state.lock();
        state.leftover.extend_from_slice(chunk);

        loop {
            let Some(offset) = find_sync(&state.leftover) else {
                state.leftover.clear();
                break;
            };
            if offset > 0 {
                state.leftover.drain(0..offset);
            }
            if state.leftover.len() < TS_PACKET_SIZE {
                break;
            }

            let packet: Vec<u8> = state.leftover.drain(0..TS_PACKET_SIZE).collect();
            self.process_packet(&mut state, &packet, now_ms);
        }
    }

    fn process_packet(&self, state: &mut SegmenterState, packet: &[u8], now_ms: i64) {
        let is_keyframe = is_keyframe_packet(packet);

        if let Some(ts) = TsPacket::parse(packet) {
            if let Some(pcr) = ts.pcr_seconds() {
                if state.seg_start_pcr_secs.is_none() {
                    state.seg_start_pcr_secs = Some(pcr);
                }
                state.last_pcr_secs = Some(pcr);
            }
        }

        let should_finalize = is_keyframe
            && !state.seg_buffer.is_empty()
            && self.current_seg_duration(state, now_ms) >= self.target_duration_secs;

        if should_finalize {
            self.finalize_segment(state, now_ms);
        }

        state.seg_buffer.extend_from_slice(packet);
    }

    fn current_seg_duration(&self, state: &SegmenterState, now_ms: i64) -> f64 {
        if let (Some(start), Some(last)) = (state.seg_start_pcr_secs, state.last_pcr_secs) {
            let delta = last - start;
            let max_plausible = (self.target_duration_secs * 10.0).max(120.0);
            if delta >= 0.0 && delta <= max_plausible {
                return delta;
            }
        }
        (now_ms - state.seg_start_wall_ms) as f64 / 1000.0
    }

    fn finalize_segment(&self, state: &mut SegmenterState, now_ms: i64) {
        let duration_secs = self.current_seg_duration(state, now_ms);
        let name = format!("seg_{:05}.ts", state.next_index);
        state.next_index += 1;

        let data = std::mem::take(&mut state.seg_buffer);
        state.segments.push_back(Segment {
            name,
            duration_secs,
            data,
        });
        state.playlist_ready = true;

        if state.segments.len() > self.max_segments {
            state.segments.pop_front();
            state.media_sequence += 1;
        }

        state.seg_start_pcr_secs = state.last_pcr_secs;
        state.seg_start_wall_ms = now_ms;
    }

    pub fn is_playlist_ready(&self) -> bool {
        self.state.lock().playlist_ready
    }

    pub fn generate_playlist(&self) -> String {
        let state = self.state.lock();
        let target = state
            .segments
            .iter()
            .map(|s| s.duration_secs)
            .fold(0.0_f64, f64::max)
            .ceil() as i64
            + 1;

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        out.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", state.media_sequence));
        for seg in &state.segments {
            out.push_str(&format!("#EXTINF:{:.3},\n{}\n", seg.duration_secs, seg.name));
        }
        out
    }

    pub fn get_segment(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().segments.iter().find(|s| s.name == name).map(|s| s.data.clone())
    }

    /// Flush whatever is buffered as a final, possibly short, segment.
    pub fn stop(&self, now_ms: i64) {
        let mut state = self.state.lock();
        if !state.seg_buffer.is_empty() {
            self.finalize_segment(&mut state, now_ms);
        }
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == super::ts::TS_SYNC_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_only_packet() -> Vec<u8> {
        let mut p = vec![0u8; TS_PACKET_SIZE];
        p[0] = 0x47;
        p
    }

    fn keyframe_packet() -> Vec<u8> {
        let mut p = sync_only_packet();
        p[3] = 0x20;
        p[4] = 1;
        p[5] = 0x40; // random_access_indicator
        p
    }

    #[test]
    fn playlist_not_ready_before_first_finalize() {
        let seg = HlsSegmenter::new(2.0, 10, 0);
        assert!(!seg.is_playlist_ready());
    }

    #[test]
    fn wall_clock_finalizes_segment_after_target_duration() {
        let seg = HlsSegmenter::new(1.0, 10, 0);
        seg.feed(&sync_only_packet(), 0);
        // Keyframe arrives after 1500ms of wall-clock time with no PCR.
        seg.feed(&keyframe_packet(), 1_500);
        assert!(seg.is_playlist_ready());
        let playlist = seg.generate_playlist();
        assert!(playlist.contains("seg_00000.ts"));
    }

    #[test]
    fn ring_eviction_increments_media_sequence() {
        let seg = HlsSegmenter::new(0.0, 1, 0);
        // target_duration 0 means every keyframe after a non-empty buffer finalizes.
        seg.feed(&sync_only_packet(), 0);
        seg.feed(&keyframe_packet(), 100);
        seg.feed(&keyframe_packet(), 200);
        let playlist = seg.generate_playlist();
        assert!(playlist.contains("EXT-X-MEDIA-SEQUENCE:1"));
    }

    #[test]
    fn leftover_bytes_carry_across_feed_calls() {
        let seg = HlsSegmenter::new(2.0, 10, 0);
        let packet = sync_only_packet();
        seg.feed(&packet[0..100], 0);
        seg.feed(&packet[100..], 0);
        // No panic, and nothing finalized yet since no keyframe arrived.
        assert!(!seg.is_playlist_ready());
    }

    #[test]
    fn get_segment_returns_none_for_unknown_name() {
        let seg = HlsSegmenter::new(2.0, 10, 0);
        assert!(seg.get_segment("seg_99999.ts").is_none());
    }
}
