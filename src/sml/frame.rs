//! # SML Transport Frame Assembly
//!
//! Meters push SML files over the optical interface wrapped in the SML
//! transport protocol v1: a start sequence, the payload in 4-byte words with
//! any aligned escape word doubled, and an end sequence carrying the padding
//! count and a CRC-16 over the whole frame.
//!
//! [`FrameAssembler`] consumes arbitrarily chunked bytes and yields validated
//! [`Frame`]s. Integrity and transport faults (CRC mismatch, an unexpected
//! restart, a malformed escape, an oversized frame) are absorbed here: they
//! are counted in [`AssemblerStats`], logged through a [`LogThrottle`], and the
//! assembler resynchronises on the next start sequence.
//!
//! ```
//! use sml_gridmeter::sml::frame::{pack_frame, CrcAlgorithm, FrameAssembler};
//!
//! let wire = pack_frame(&[0x76, 0x05], CrcAlgorithm::X25);
//! let mut assembler = FrameAssembler::new(CrcAlgorithm::X25);
//! assembler.push(&wire[..5]);
//! assert!(assembler.try_next_frame().is_none());
//! assembler.push(&wire[5..]);
//! assert_eq!(assembler.try_next_frame().unwrap().payload(), &[0x76, 0x05]);
//! ```

use bytes::{Buf, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_SDLC, CRC_16_KERMIT};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::constants::{
    SML_END_MARKER, SML_ESCAPE, SML_MAX_FRAME_LEN, SML_START, SML_START_TAIL, SML_WORD_LEN,
};
use crate::error::SmlError;
use crate::util::logging::{log_frame_hex, LogThrottle};

const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
const KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// CRC-16 variant used for the transport checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrcAlgorithm {
    /// CRC-16/X-25, used by the large majority of meters
    #[default]
    X25,
    Kermit,
}

impl CrcAlgorithm {
    pub fn checksum(self, data: &[u8]) -> u16 {
        match self {
            CrcAlgorithm::X25 => X25.checksum(data),
            CrcAlgorithm::Kermit => KERMIT.checksum(data),
        }
    }
}

/// A payload whose transport CRC has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Frame { payload: payload.into() }
    }

    /// Unescaped payload with padding removed.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Where the assembler stands after the last operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Empty buffer
    Idle,
    /// Holding bytes of a frame that has not ended yet
    Accumulating,
    /// The last call emitted a frame
    Complete,
    /// The last complete frame failed its CRC
    CrcFailed,
    /// The acquisition deadline passed without a frame
    TimedOut,
}

/// Counters for monitoring link quality.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    pub frames_completed: u64,
    pub crc_errors: u64,
    /// Frames abandoned because a new start sequence arrived first
    pub aborted_frames: u64,
    pub malformed_escapes: u64,
    pub overflows: u64,
    /// Bytes dropped while searching for a start sequence
    pub discarded_bytes: u64,
}

/// Incremental SML transport decoder.
#[derive(Debug)]
pub struct FrameAssembler {
    crc: CrcAlgorithm,
    buffer: BytesMut,
    /// Unescaped payload of the frame in progress
    payload: BytesMut,
    /// True once `buffer` starts with a start sequence
    synced: bool,
    /// Offset of the next unread word in `buffer`
    scan_pos: usize,
    state: AssemblerState,
    stats: AssemblerStats,
    last_soft_error: Option<SmlError>,
    error_throttle: LogThrottle,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(CrcAlgorithm::default())
    }
}

impl FrameAssembler {
    pub fn new(crc: CrcAlgorithm) -> Self {
        Self {
            crc,
            buffer: BytesMut::with_capacity(1024),
            payload: BytesMut::with_capacity(512),
            synced: false,
            scan_pos: 0,
            state: AssemblerState::Idle,
            stats: AssemblerStats::default(),
            last_soft_error: None,
            error_throttle: LogThrottle::new(1000, 5), // 5 errors per second
        }
    }

    /// Appends a chunk read from the byte source.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(chunk);
        self.state = AssemblerState::Accumulating;
    }

    /// Scans the buffer and returns the next frame that passes its CRC.
    ///
    /// Returns `None` when more bytes are needed. Frames failing their CRC are
    /// skipped; the bytes after them stay buffered.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.synced && !self.sync_to_start() {
                self.settle();
                return None;
            }

            match self.walk_words() {
                Step::NeedMore => {
                    if self.buffer.len() > SML_MAX_FRAME_LEN {
                        self.stats.overflows += 1;
                        self.soft_failure(SmlError::MalformedFrame(format!(
                            "no end sequence within {} bytes",
                            self.buffer.len()
                        )));
                        self.buffer.clear();
                        self.restart_unsynced();
                    }
                    self.settle();
                    return None;
                }
                Step::Restart => {
                    self.stats.aborted_frames += 1;
                    self.soft_failure(SmlError::MalformedFrame(
                        "start sequence inside unfinished frame".to_string(),
                    ));
                    self.buffer.advance(self.scan_pos);
                    self.payload.clear();
                    self.scan_pos = SML_START.len();
                }
                Step::BadEscape => {
                    self.stats.malformed_escapes += 1;
                    let word = &self.buffer[self.scan_pos + SML_WORD_LEN..self.scan_pos + 8];
                    let err = SmlError::MalformedFrame(format!(
                        "unknown escape sequence {}",
                        crate::util::hex::encode_hex(word)
                    ));
                    self.soft_failure(err);
                    self.buffer.advance(self.scan_pos + 8);
                    self.restart_unsynced();
                }
                Step::End => {
                    if let Some(frame) = self.finish_frame() {
                        return Some(frame);
                    }
                }
            }
        }
    }

    /// Discards everything and returns to `Idle`.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restart_unsynced();
        self.state = AssemblerState::Idle;
    }

    /// Marks the acquisition as expired. The buffer is emptied so the next
    /// cycle starts clean.
    pub fn time_out(&mut self) {
        self.buffer.clear();
        self.restart_unsynced();
        self.state = AssemblerState::TimedOut;
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// The most recent error absorbed by the assembler, cleared on read.
    pub fn take_soft_error(&mut self) -> Option<SmlError> {
        self.last_soft_error.take()
    }

    pub fn crc_algorithm(&self) -> CrcAlgorithm {
        self.crc
    }

    /// Drops bytes up to the first start sequence. When there is none, keeps
    /// only a tail that might be the beginning of one.
    fn sync_to_start(&mut self) -> bool {
        match find_start(&self.buffer) {
            Some(pos) => {
                self.stats.discarded_bytes += pos as u64;
                self.buffer.advance(pos);
                self.synced = true;
                self.scan_pos = SML_START.len();
                self.payload.clear();
                true
            }
            None => {
                let keep = SML_START.len() - 1;
                if self.buffer.len() > keep {
                    let drop = self.buffer.len() - keep;
                    self.stats.discarded_bytes += drop as u64;
                    self.buffer.advance(drop);
                }
                false
            }
        }
    }

    fn walk_words(&mut self) -> Step {
        while self.scan_pos + SML_WORD_LEN <= self.buffer.len() {
            let word = &self.buffer[self.scan_pos..self.scan_pos + SML_WORD_LEN];
            if word != SML_ESCAPE {
                self.payload.extend_from_slice(word);
                self.scan_pos += SML_WORD_LEN;
                continue;
            }

            if self.scan_pos + 2 * SML_WORD_LEN > self.buffer.len() {
                return Step::NeedMore;
            }
            let next = &self.buffer[self.scan_pos + SML_WORD_LEN..self.scan_pos + 2 * SML_WORD_LEN];
            if next == SML_ESCAPE {
                self.payload.extend_from_slice(&SML_ESCAPE);
                self.scan_pos += 2 * SML_WORD_LEN;
            } else if next == SML_START_TAIL {
                return Step::Restart;
            } else if next[0] == SML_END_MARKER {
                return Step::End;
            } else {
                return Step::BadEscape;
            }
        }
        Step::NeedMore
    }

    /// Splits the completed frame off the buffer and checks it.
    fn finish_frame(&mut self) -> Option<Frame> {
        let frame_len = self.scan_pos + 2 * SML_WORD_LEN;
        let raw = self.buffer.split_to(frame_len).freeze();
        let mut payload = std::mem::take(&mut self.payload);
        self.restart_unsynced();

        let end = &raw[frame_len - SML_WORD_LEN..];
        let padding = usize::from(end[1]);
        let expected = u16::from_le_bytes([end[2], end[3]]);
        let calculated = self.crc.checksum(&raw[..frame_len - 2]);

        if expected != calculated {
            self.stats.crc_errors += 1;
            self.state = AssemblerState::CrcFailed;
            log_frame_hex("Frame failing CRC", &raw);
            self.soft_failure(SmlError::CrcMismatch { expected, calculated });
            return None;
        }

        if padding >= SML_WORD_LEN || padding > payload.len() {
            self.soft_failure(SmlError::MalformedFrame(format!(
                "padding count {padding} for {} payload bytes",
                payload.len()
            )));
            return None;
        }

        payload.truncate(payload.len() - padding);
        self.stats.frames_completed += 1;
        self.state = AssemblerState::Complete;
        debug!("SML frame complete: {} payload bytes", payload.len());
        Some(Frame { payload: payload.freeze() })
    }

    fn restart_unsynced(&mut self) {
        self.synced = false;
        self.scan_pos = 0;
        self.payload.clear();
    }

    /// State after a scan that produced nothing.
    fn settle(&mut self) {
        if self.state != AssemblerState::CrcFailed || !self.buffer.is_empty() {
            self.state = if self.buffer.is_empty() {
                AssemblerState::Idle
            } else {
                AssemblerState::Accumulating
            };
        }
    }

    fn soft_failure(&mut self, err: SmlError) {
        if self.error_throttle.allow() {
            let suppressed = self.error_throttle.take_suppressed();
            if suppressed > 0 {
                warn!("{err} ({suppressed} similar messages suppressed)");
            } else {
                warn!("{err}");
            }
        }
        self.last_soft_error = Some(err);
    }
}

enum Step {
    NeedMore,
    Restart,
    BadEscape,
    End,
}

fn find_start(buf: &[u8]) -> Option<usize> {
    buf.windows(SML_START.len()).position(|w| w == SML_START)
}

/// Wraps a payload into a transport frame: escapes aligned escape words, pads
/// to a word boundary and appends the end sequence with CRC.
pub fn pack_frame(payload: &[u8], crc: CrcAlgorithm) -> Vec<u8> {
    let padding = (SML_WORD_LEN - payload.len() % SML_WORD_LEN) % SML_WORD_LEN;
    let mut padded = payload.to_vec();
    padded.resize(payload.len() + padding, 0x00);

    let mut out = Vec::with_capacity(padded.len() + 16);
    out.extend_from_slice(&SML_START);
    for word in padded.chunks(SML_WORD_LEN) {
        if word == SML_ESCAPE {
            out.extend_from_slice(&SML_ESCAPE);
        }
        out.extend_from_slice(word);
    }
    out.extend_from_slice(&SML_ESCAPE);
    out.push(SML_END_MARKER);
    out.push(padding as u8);
    let checksum = crc.checksum(&out);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}
