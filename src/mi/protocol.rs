use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Deserialize;

// framing marker bits carried in the leading identifier byte of a response.
// ALL_FRAMES marks the final fragment of a multi-fragment sequence,
// SINGLE_FRAME marks a response that is its only fragment.
pub const ALL_FRAMES: u8 = 0x80;
pub const SINGLE_FRAME: u8 = 0x81;

// request command words
pub const TX_REQ_INFO: u8 = 0x15;
pub const TX_REQ_DEVCONTROL: u8 = 0x51;

// telemetry poll commands; 1/2-channel devices use the legacy pair,
// 4-channel devices walk the consecutive 0x36..=0x39 sequence.
pub const CMD_CH1: u8 = 0x09;
pub const CMD_CH2: u8 = 0x11;
pub const CMD_4CH_FIRST: u8 = 0x36;
pub const CMD_4CH_LAST: u8 = 0x39;

// diagnostic / queued command words sent through the generic info request
pub const CMD_CONFIG_READBACK: u8 = 0x05;
pub const CMD_ALARM_LOG: u8 = 0x17;

// response identifiers (base command id + marker bit)
pub const RSP_STATUS_CH1: u8 = 0x88; // 0x08 + ALL_FRAMES, answers CMD_CH1
pub const RSP_STATUS_CH2: u8 = 0x92; // CMD_CH2 + SINGLE_FRAME
pub const RSP_DATA_CH1: u8 = CMD_CH1 + ALL_FRAMES; // 0x89
pub const RSP_DATA_CH2: u8 = CMD_CH2 + ALL_FRAMES; // 0x91
pub const RSP_4CH_FIRST: u8 = CMD_4CH_FIRST + ALL_FRAMES; // 0xb6
pub const RSP_4CH_LAST: u8 = CMD_4CH_LAST + ALL_FRAMES; // 0xb9
pub const RSP_INFO: u8 = TX_REQ_INFO + ALL_FRAMES; // 0x95
pub const RSP_DEVCONTROL: u8 = TX_REQ_DEVCONTROL + ALL_FRAMES; // 0xd1

// hardware/firmware info exchange sub-frame indices, in request order
pub const INFO_SUB_FRAMES: [u8; 3] = [0x00, 0x01, 0x12];

/// A response id the polling cycle is allowed to wait on. Anything else seen
/// in `tx_id` means the device answered something we never asked about this
/// cycle; the scheduler force-completes rather than stall on it.
pub fn is_expected_response(tx_id: u8) -> bool {
    matches!(
        tx_id,
        0 | RSP_INFO | RSP_DATA_CH1 | RSP_DATA_CH2 | RSP_STATUS_CH1 | RSP_STATUS_CH2
    ) || (RSP_4CH_FIRST..=RSP_4CH_LAST).contains(&tx_id)
}

pub fn is_multi_fragment_cmd(cmd: u8) -> bool {
    cmd == CMD_CH1 || cmd == CMD_CH2 || (CMD_4CH_FIRST..=CMD_4CH_LAST).contains(&cmd)
}

/// Device-control command words, echoed back in control acknowledgements.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DevControlCmd {
    TurnOn = 0,
    TurnOff = 1,
    Restart = 2,
    Lock = 3,
    Unlock = 4,
    ActivePowerLimit = 11,
    CleanStateLockAlarm = 20,
    Init = 0xff,
}

impl DevControlCmd {
    /// Restart and alarm/lock-state clearing are known not to be answered;
    /// retransmitting them only burns the retry budget.
    pub fn suppresses_retransmit(&self) -> bool {
        matches!(self, Self::Restart | Self::CleanStateLockAlarm)
    }
}

/// What the device's command queue can hold. Wire command words are derived
/// at send time so telemetry polls can follow the device type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueuedCommand {
    DataPoll,
    HardwareInfo,
    AlarmLog,
    ConfigReadback,
}

impl QueuedCommand {
    /// Expected payload length for the fallback decoder's plausibility check.
    /// `None` accepts any length (variable-size payloads).
    pub fn expected_payload_len(&self) -> Option<usize> {
        match self {
            QueuedCommand::ConfigReadback => Some(16),
            _ => None,
        }
    }
}

/// The two field revisions of the MI response format, folded into one state
/// machine. They differ in where status-only frames carry the status word,
/// whether a missing channel status earns an early same-command retry, and
/// whether a freshly issued request shields the device from the next
/// scheduler tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolRevision {
    Legacy,
    #[default]
    Current,
}

impl ProtocolRevision {
    /// Byte offset of the status word in status-only frames.
    pub fn status_offset(&self) -> usize {
        match self {
            ProtocolRevision::Legacy => 11,
            ProtocolRevision::Current => 9,
        }
    }

    /// Retry budget below which a ch1 poll with data but no status is
    /// repeated unchanged instead of escalating to ch2.
    pub fn early_status_retry(&self) -> Option<u8> {
        match self {
            ProtocolRevision::Legacy => None,
            ProtocolRevision::Current => Some(2),
        }
    }

    /// Whether issuing a request suppresses exactly one scheduler tick.
    pub fn skip_guard(&self) -> bool {
        matches!(self, ProtocolRevision::Current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_response_set() {
        for id in [0x00, 0x88, 0x89, 0x91, 0x92, 0x95, 0xb6, 0xb7, 0xb8, 0xb9] {
            assert!(is_expected_response(id), "{id:#04x} should be expected");
        }
        for id in [0x01, 0x77, 0xba, 0xd1, 0xff] {
            assert!(!is_expected_response(id), "{id:#04x} should not be expected");
        }
    }

    #[test]
    fn multi_fragment_commands() {
        assert!(is_multi_fragment_cmd(CMD_CH1));
        assert!(is_multi_fragment_cmd(CMD_CH2));
        assert!(is_multi_fragment_cmd(0x37));
        assert!(!is_multi_fragment_cmd(TX_REQ_INFO));
        assert!(!is_multi_fragment_cmd(CMD_CONFIG_READBACK));
    }
}
