//! HID report framing.
//!
//! Messages travel in 64-byte reports on a fixed channel:
//!
//! ```text
//! init frame:          cid(4) | cmd(1) | len_hi(1) | len_lo(1) | data(57)
//! continuation frame:  cid(4) | seq(1) | data(59)
//! ```
//!
//! `cmd` always has its top bit set; `seq` never does, which is how the two
//! frame kinds are told apart.

use crate::infra::error::{DeviceError, DeviceResult};

/// Size of every HID report.
pub const HID_REPORT_SIZE: usize = 64;

/// Channel identifier used for wallet traffic.
pub const HWW_CID: u32 = 0xff00_0000;

/// Command byte for wallet messages.
pub const HWW_CMD: u8 = 0x80 + 0x40 + 0x01;

const INIT_HEADER: usize = 7;
const CONT_HEADER: usize = 5;
const INIT_DATA: usize = HID_REPORT_SIZE - INIT_HEADER;
const CONT_DATA: usize = HID_REPORT_SIZE - CONT_HEADER;
const MAX_SEQ: usize = 0x80;

/// Largest message that fits in one init frame plus all continuation frames.
pub const MAX_MESSAGE_LENGTH: usize = INIT_DATA + MAX_SEQ * CONT_DATA;

pub type Report = [u8; HID_REPORT_SIZE];

/// Split `payload` into reports.
///
/// # Errors
///
/// Returns `InvalidInput` if the payload exceeds [`MAX_MESSAGE_LENGTH`].
pub fn encode_frames(cmd: u8, payload: &[u8]) -> DeviceResult<Vec<Report>> {
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(DeviceError::InvalidInput(format!(
            "message of {} bytes exceeds the {MAX_MESSAGE_LENGTH}-byte frame limit",
            payload.len()
        )));
    }

    let cid = HWW_CID.to_be_bytes();
    let len = payload.len() as u16;

    let continuations = payload.len().saturating_sub(INIT_DATA).div_ceil(CONT_DATA);
    let mut reports = Vec::with_capacity(1 + continuations);

    let mut init = [0u8; HID_REPORT_SIZE];
    init[..4].copy_from_slice(&cid);
    init[4] = cmd;
    init[5..7].copy_from_slice(&len.to_be_bytes());
    let first = payload.len().min(INIT_DATA);
    init[INIT_HEADER..INIT_HEADER + first].copy_from_slice(&payload[..first]);
    reports.push(init);

    for (seq, chunk) in payload[first..].chunks(CONT_DATA).enumerate() {
        let mut cont = [0u8; HID_REPORT_SIZE];
        cont[..4].copy_from_slice(&cid);
        cont[4] = seq as u8;
        cont[CONT_HEADER..CONT_HEADER + chunk.len()].copy_from_slice(chunk);
        reports.push(cont);
    }

    Ok(reports)
}

/// Reassembles a message from incoming reports.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    expected: Option<usize>,
    next_seq: u8,
    data: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one report; returns the message once all of it has arrived.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` on a short report, a foreign channel, a
    /// missing init frame or an out-of-order continuation.
    pub fn push(&mut self, report: &[u8]) -> DeviceResult<Option<Vec<u8>>> {
        if report.len() < HID_REPORT_SIZE {
            return Err(DeviceError::ProtocolError(format!(
                "short HID report: {} bytes",
                report.len()
            )));
        }
        let cid = u32::from_be_bytes([report[0], report[1], report[2], report[3]]);
        if cid != HWW_CID {
            return Err(DeviceError::ProtocolError(format!(
                "unexpected channel 0x{cid:08x}"
            )));
        }

        match self.expected {
            None => {
                if report[4] & 0x80 == 0 {
                    return Err(DeviceError::ProtocolError(
                        "continuation frame without init frame".to_string(),
                    ));
                }
                let len = usize::from(u16::from_be_bytes([report[5], report[6]]));
                let take = len.min(INIT_DATA);
                self.data.clear();
                self.data.reserve(len);
                self.data
                    .extend_from_slice(&report[INIT_HEADER..INIT_HEADER + take]);
                self.expected = Some(len);
                self.next_seq = 0;
            }
            Some(len) => {
                if report[4] != self.next_seq {
                    return Err(DeviceError::ProtocolError(format!(
                        "frame sequence {} out of order (expected {})",
                        report[4], self.next_seq
                    )));
                }
                let take = (len - self.data.len()).min(CONT_DATA);
                self.data
                    .extend_from_slice(&report[CONT_HEADER..CONT_HEADER + take]);
                self.next_seq = self.next_seq.wrapping_add(1);
            }
        }

        match self.expected {
            Some(len) if self.data.len() >= len => {
                self.expected = None;
                Ok(Some(std::mem::take(&mut self.data)))
            }
            _ => Ok(None),
        }
    }
}
