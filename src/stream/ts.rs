//! Minimal MPEG-TS packet parsing: just enough to find PCR values and
//! detect keyframe boundaries.

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// `27`MHz PCR clock base in ticks-per-second, used to convert PCR deltas
/// to seconds (`pcr_base` runs at 90kHz).
pub const PCR_BASE_HZ: f64 = 90_000.0;

pub struct TsPacket<'a> {
    bytes: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// `bytes` must be exactly `TS_PACKET_SIZE` and start with the sync byte.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() != TS_PACKET_SIZE || bytes[0] != TS_SYNC_BYTE {
            return None;
        }
        Some(Self { bytes })
    }

    pub fn payload_unit_start_indicator(&self) -> bool {
        self.bytes[1] & 0x40 != 0
    }

    fn adaptation_field_control(&self) -> u8 {
        (self.bytes[3] & 0x30) >> 4
    }

    fn has_adaptation_field(&self) -> bool {
        matches!(self.adaptation_field_control(), 0b10 | 0b11)
    }

    fn has_payload(&self) -> bool {
        matches!(self.adaptation_field_control(), 0b01 | 0b11)
    }

    fn adaptation_field_length(&self) -> usize {
        if self.has_adaptation_field() {
            self.bytes[4] as usize
        } else {
            0
        }
    }

    /// `random_access_indicator` bit in the adaptation field, signaling a
    /// clean decode/keyframe start.
    pub fn random_access_indicator(&self) -> bool {
        if !self.has_adaptation_field() || self.adaptation_field_length() == 0 {
            return false;
        }
        self.bytes[5] & 0x40 != 0
    }

    /// `(pcr_base, pcr_ext)` if the adaptation field carries a PCR, in the
    /// same split representation the transport stream uses: total ticks at
    /// 90kHz are `pcr_base * 300 + pcr_ext`, i.e. the 27MHz system clock.
    pub fn pcr(&self) -> Option<(u64, u16)> {
        if !self.has_adaptation_field() || self.adaptation_field_length() < 7 {
            return None;
        }
        let flags = self.bytes[5];
        if flags & 0x10 == 0 {
            return None;
        }
        let b = &self.bytes[6..12];
        let pcr_base = ((b[0] as u64) << 25)
            | ((b[1] as u64) << 17)
            | ((b[2] as u64) << 9)
            | ((b[3] as u64) << 1)
            | ((b[4] as u64) >> 7);
        let pcr_ext = (((b[4] as u16) & 0x01) << 8) | (b[5] as u16);
        Some((pcr_base, pcr_ext))
    }

    /// PCR expressed in seconds, at 27MHz resolution collapsed to the
    /// 90kHz base clock (extension contributes at most 1/300s).
    pub fn pcr_seconds(&self) -> Option<f64> {
        self.pcr().map(|(base, ext)| base as f64 / PCR_BASE_HZ + ext as f64 / (PCR_BASE_HZ * 300.0))
    }

    pub fn payload(&self) -> &'a [u8] {
        if !self.has_payload() {
            return &[];
        }
        let offset = 4 + if self.has_adaptation_field() {
            1 + self.adaptation_field_length()
        } else {
            0
        };
        if offset >= self.bytes.len() {
            &[]
        } else {
            &self.bytes[offset..]
        }
    }
}

/// True if `packet` starts a keyframe: either the adaptation field's
/// `random_access_indicator` is set, or the packet starts a PES unit whose
/// payload begins with an H.264 IDR (NAL type 5) or SPS (NAL type 7),
/// after skipping the PES header to the first Annex-B start code.
pub fn is_keyframe_packet(packet: &[u8]) -> bool {
    let Some(ts) = TsPacket::parse(packet) else { return false };
    if ts.random_access_indicator() {
        return true;
    }
    if !ts.payload_unit_start_indicator() {
        return false;
    }
    contains_idr_or_sps_nal(ts.payload())
}

fn contains_idr_or_sps_nal(payload: &[u8]) -> bool {
    // PES header: 00 00 01 <stream_id> <pes_packet_length (2)> ... the
    // optional header follows; we don't need to parse it fully, just scan
    // for the first Annex-B start code and read the NAL type from there.
    if payload.len() < 9 || payload[0..3] != [0x00, 0x00, 0x01] {
        return false;
    }
    let mut i = 0;
    while i + 4 < payload.len() {
        if payload[i] == 0x00 && payload[i + 1] == 0x00 && payload[i + 2] == 0x01 {
            let nal_type = payload[i + 3] & 0x1F;
            if nal_type == 5 || nal_type == 7 {
                return true;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_adaptation(rai: bool, pcr: Option<(u64, u16)>) -> Vec<u8> {
        let mut buf = vec![0u8; TS_PACKET_SIZE];
        buf[0] = TS_SYNC_BYTE;
        buf[3] = 0x20; // adaptation field only, no payload
        let has_pcr = pcr.is_some();
        let adaptation_len = if has_pcr { 7 } else { 1 };
        buf[4] = adaptation_len as u8;
        let mut flags = 0u8;
        if rai {
            flags |= 0x40;
        }
        if has_pcr {
            flags |= 0x10;
        }
        buf[5] = flags;
        if let Some((base, ext)) = pcr {
            buf[6] = ((base >> 25) & 0xFF) as u8;
            buf[7] = ((base >> 17) & 0xFF) as u8;
            buf[8] = ((base >> 9) & 0xFF) as u8;
            buf[9] = ((base >> 1) & 0xFF) as u8;
            buf[10] = (((base & 1) as u8) << 7) | 0x7E | (((ext >> 8) & 1) as u8);
            buf[11] = (ext & 0xFF) as u8;
        }
        buf
    }

    #[test]
    fn random_access_indicator_detected() {
        let packet = packet_with_adaptation(true, None);
        assert!(is_keyframe_packet(&packet));
    }

    #[test]
    fn non_keyframe_adaptation_only_packet_is_not_a_keyframe() {
        let packet = packet_with_adaptation(false, None);
        assert!(!is_keyframe_packet(&packet));
    }

    #[test]
    fn pcr_round_trips_through_bit_packing() {
        let packet = packet_with_adaptation(false, Some((123_456_789, 150)));
        let ts = TsPacket::parse(&packet).unwrap();
        let (base, ext) = ts.pcr().unwrap();
        assert_eq!(base, 123_456_789);
        assert_eq!(ext, 150);
    }

    #[test]
    fn malformed_packet_without_sync_byte_fails_to_parse() {
        let mut buf = vec![0u8; TS_PACKET_SIZE];
        buf[0] = 0x00;
        assert!(TsPacket::parse(&buf).is_none());
    }
}
