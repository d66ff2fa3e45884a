//! MPEG-TS framing filter.
//!
//! Transport-stream packets are 188 bytes and start with the sync byte
//! 0x47. The producer feeds raw network bytes through this aligner so
//! segment files contain only well-formed packets: bytes before the
//! first sync and any inter-packet garbage are dropped, and a packet
//! split across reads is held back until complete.

/// MPEG-TS packet size in bytes (fixed by the standard).
pub const TS_PACKET_SIZE: usize = 188;
/// MPEG-TS sync byte.
pub const TS_SYNC_BYTE: u8 = 0x47;

#[derive(Debug, Default)]
pub struct TsAligner {
    pending: Vec<u8>,
}

impl TsAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; complete packets are appended to `out`.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);

        let mut offset = 0;
        loop {
            // Drop garbage up to the next sync byte.
            while offset < self.pending.len() && self.pending[offset] != TS_SYNC_BYTE {
                offset += 1;
            }
            if self.pending.len() - offset < TS_PACKET_SIZE {
                break;
            }
            out.extend_from_slice(&self.pending[offset..offset + TS_PACKET_SIZE]);
            offset += TS_PACKET_SIZE;
        }
        self.pending.drain(..offset);
    }

    /// Discard any partial packet (used when a resume restarts the
    /// stream from scratch).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Bytes currently held back waiting for packet completion.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(fill: u8) -> Vec<u8> {
        let mut p = vec![fill; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p
    }

    #[test]
    fn strips_leading_and_interstitial_garbage() {
        let mut input = vec![0x00, 0x01, 0x02];
        input.extend_from_slice(&packet(0xaa));
        input.extend_from_slice(&[0x03, 0x04, 0x05]);
        input.extend_from_slice(&packet(0xbb));

        let mut aligner = TsAligner::new();
        let mut out = Vec::new();
        aligner.push(&input, &mut out);

        assert_eq!(out.len(), 2 * TS_PACKET_SIZE);
        assert_eq!(out[0], TS_SYNC_BYTE);
        assert_eq!(out[TS_PACKET_SIZE], TS_SYNC_BYTE);
        assert_eq!(out[1], 0xaa);
        assert_eq!(out[TS_PACKET_SIZE + 1], 0xbb);
    }

    #[test]
    fn packet_split_across_reads_is_reassembled() {
        let p = packet(0xcc);
        let mut aligner = TsAligner::new();
        let mut out = Vec::new();

        aligner.push(&p[..100], &mut out);
        assert!(out.is_empty());
        assert_eq!(aligner.pending_len(), 100);

        aligner.push(&p[100..], &mut out);
        assert_eq!(out, p);
        assert_eq!(aligner.pending_len(), 0);
    }

    #[test]
    fn reset_discards_partial_state() {
        let p = packet(0xdd);
        let mut aligner = TsAligner::new();
        let mut out = Vec::new();
        aligner.push(&p[..50], &mut out);
        aligner.reset();
        aligner.push(&p, &mut out);
        assert_eq!(out, p);
    }

    #[test]
    fn pure_garbage_produces_nothing() {
        let mut aligner = TsAligner::new();
        let mut out = Vec::new();
        aligner.push(&[0u8; 64], &mut out);
        assert!(out.is_empty());
        // Non-sync garbage is dropped, not held back.
        assert_eq!(aligner.pending_len(), 0);
    }
}
