use crate::prelude::*;

use serde::{Serialize, Serializer};
use std::collections::VecDeque;

use crate::mi::protocol::{self, DevControlCmd, ProtocolRevision, QueuedCommand};
use crate::mi::record::Record;

// Serial {{{
/// 6-byte radio serial, written as 12 hex digits in config and topics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial(u64);

impl Serial {
    pub fn new(value: u64) -> Self {
        Self(value & 0xffff_ffff_ffff)
    }

    pub fn default() -> Self {
        Self(0)
    }

    pub fn bytes(&self) -> [u8; 6] {
        let be = self.0.to_be_bytes();
        be[2..8].try_into().unwrap_or([0; 6])
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut be = [0u8; 8];
        be[2..8].copy_from_slice(&bytes);
        Self(u64::from_be_bytes(be))
    }

    /// The second serial byte encodes the hardware family and with it the
    /// channel count.
    pub fn device_type(&self) -> Option<DeviceType> {
        match self.bytes()[1] {
            0x21 | 0x22 => Some(DeviceType::OneChannel),
            0x41 | 0x42 => Some(DeviceType::TwoChannel),
            0x61 | 0x62 => Some(DeviceType::FourChannel),
            _ => None,
        }
    }
}

impl Serialize for Serial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::str::FromStr for Serial {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 12 {
            return Err(anyhow!("{} must be exactly 12 hex digits", s));
        }
        let value = u64::from_str_radix(s, 16)
            .map_err(|err| anyhow!("bad serial {}: {}", s, err))?;
        Ok(Self::new(value))
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.0)
    }
} // }}}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceType {
    OneChannel,
    TwoChannel,
    FourChannel,
}

impl DeviceType {
    pub fn channels(&self) -> u8 {
        match self {
            DeviceType::OneChannel => 1,
            DeviceType::TwoChannel => 2,
            DeviceType::FourChannel => 4,
        }
    }

    pub fn from_channels(channels: u8) -> Result<Self> {
        match channels {
            1 => Ok(DeviceType::OneChannel),
            2 => Ok(DeviceType::TwoChannel),
            4 => Ok(DeviceType::FourChannel),
            n => Err(anyhow!("unsupported channel count {}", n)),
        }
    }
}

/// Device model for one tracked inverter: identity, queued commands, the
/// pending device-control request, the alarm cursor and the measurement
/// record. Payload bookkeeping lives separately in `mi::payload`.
#[derive(Debug)]
pub struct Inverter {
    pub id: u8,
    pub serial: Serial,
    pub device_type: DeviceType,
    pub revision: ProtocolRevision,
    pub record: Record,
    pub alarm_index: u16,
    pub dev_control: DevControlCmd,
    pub pending_control: bool,
    pub power_limit: [u16; 2],
    max_channel_power: Vec<f64>,
    cmd_queue: VecDeque<QueuedCommand>,
}

impl Inverter {
    pub fn new(id: u8, inverter: &config::Inverter) -> Result<Self> {
        let serial = inverter
            .serial()
            .ok_or_else(|| anyhow!("inverter has no serial configured"))?;
        let device_type = match inverter.channels() {
            Some(channels) => DeviceType::from_channels(channels)?,
            None => serial
                .device_type()
                .ok_or_else(|| anyhow!("cannot derive device type from serial {}", serial))?,
        };

        Ok(Self {
            id,
            serial,
            device_type,
            revision: inverter.revision(),
            record: Record::default(),
            alarm_index: 0,
            dev_control: DevControlCmd::Init,
            pending_control: false,
            power_limit: [0, 0],
            max_channel_power: inverter.max_channel_power(device_type.channels()),
            cmd_queue: VecDeque::new(),
        })
    }

    pub fn channels(&self) -> u8 {
        self.device_type.channels()
    }

    /// Telemetry poll command for this device type; 4-channel devices start
    /// their per-channel sequence, everything else polls ch1.
    pub fn default_poll_cmd(&self) -> u8 {
        if self.device_type == DeviceType::FourChannel {
            protocol::CMD_4CH_FIRST
        } else {
            protocol::CMD_CH1
        }
    }

    /// Front of the command queue without consuming it; an empty queue means
    /// a plain telemetry poll.
    pub fn queued_cmd(&self) -> QueuedCommand {
        self.cmd_queue
            .front()
            .copied()
            .unwrap_or(QueuedCommand::DataPoll)
    }

    pub fn queued_cmd_finished(&mut self) {
        self.cmd_queue.pop_front();
    }

    pub fn has_queued_cmds(&self) -> bool {
        !self.cmd_queue.is_empty()
    }

    pub fn enqueue(&mut self, cmd: QueuedCommand) {
        if !self.cmd_queue.contains(&cmd) {
            debug!("(#{}) enqueue {:?}", self.id, cmd);
            self.cmd_queue.push_back(cmd);
        }
    }

    pub fn clear_cmd_queue(&mut self) {
        self.cmd_queue.clear();
    }

    pub fn request_control(&mut self, cmd: DevControlCmd, limit: [u16; 2]) {
        self.dev_control = cmd;
        self.power_limit = limit;
        self.pending_control = true;
    }

    pub fn clear_control_request(&mut self) {
        self.pending_control = false;
    }

    /// Irradiance estimate for a channel: DC power relative to the channel's
    /// configured module power, in percent.
    pub fn irradiation(&self, channel: u8, dc_power: f64) -> f64 {
        match self.max_channel_power.get(channel as usize - 1) {
            Some(&max) if max > 0.0 => dc_power / max * 100.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn serial_round_trip() {
        let serial = Serial::from_str("104162804632").unwrap();
        assert_eq!(serial.to_string(), "104162804632");
        assert_eq!(Serial::from_bytes(serial.bytes()), serial);
    }

    #[test]
    fn serial_derives_device_type() {
        assert_eq!(
            Serial::from_str("102162804632").unwrap().device_type(),
            Some(DeviceType::OneChannel)
        );
        assert_eq!(
            Serial::from_str("104162804632").unwrap().device_type(),
            Some(DeviceType::TwoChannel)
        );
        assert_eq!(
            Serial::from_str("106162804632").unwrap().device_type(),
            Some(DeviceType::FourChannel)
        );
        assert_eq!(Serial::from_str("10f162804632").unwrap().device_type(), None);
    }

    #[test]
    fn serial_rejects_bad_input() {
        assert!(Serial::from_str("1234").is_err());
        assert!(Serial::from_str("10416280463z").is_err());
    }
}
