use crate::prelude::*;

use bytes::Bytes;
use nom_derive::{Nom, Parse};
use serde::Serialize;

use crate::mi::protocol;

/// One received radio frame. Byte 0 is the response identifier (base command
/// id plus framing marker bit); bytes 1..=8 carry addressing; the payload
/// starts at byte 9. The final byte is the link-level check byte and never
/// part of the payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            bail!("empty frame");
        }
        Ok(Self { data: Bytes::from(data) })
    }

    pub fn id(&self) -> u8 {
        self.data[0]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn be_u16(&self, offset: usize) -> Option<u16> {
        let hi = *self.data.get(offset)? as u16;
        let lo = *self.data.get(offset + 1)? as u16;
        Some((hi << 8) | lo)
    }

    pub fn slice_from(&self, offset: usize) -> &[u8] {
        if offset >= self.data.len() {
            &[]
        } else {
            &self.data[offset..]
        }
    }

    /// The user-data portion buffered for reassembly: everything past the
    /// addressing header, minus the trailing check byte.
    pub fn payload(&self) -> Bytes {
        if self.data.len() <= 11 {
            return Bytes::new();
        }
        self.data.slice(10..self.data.len() - 1)
    }
}

// ChannelDataFragment {{{
/// Fixed-layout telemetry fragment for one channel, bytes 9..=22 of a
/// channel-data frame. All fields big-endian with fixed-point scaling.
#[derive(PartialEq, Clone, Debug, Serialize, Nom)]
#[nom(BigEndian)]
pub struct ChannelDataFragment {
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc_current: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub ac_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub ac_frequency: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc_power: f64,
    #[nom(Parse = "Utils::be_u16_div1")]
    pub yield_day: f64,
    #[nom(Parse = "Utils::be_i16_div10")]
    pub temperature: f64,
}

impl ChannelDataFragment {
    pub fn decode(frame: &Frame) -> Result<Self> {
        let input = frame.slice_from(9);
        match Self::parse(input) {
            Ok((_, fragment)) => Ok(fragment),
            Err(_) => bail!(
                "channel data frame {:#04x} too short ({} bytes)",
                frame.id(),
                frame.len()
            ),
        }
    }

    /// Channel slot addressed by a channel-data response id.
    pub fn slot(frame_id: u8) -> u8 {
        match frame_id {
            protocol::RSP_DATA_CH1 | protocol::RSP_4CH_FIRST => 1,
            protocol::RSP_DATA_CH2 | 0xb7 => 2,
            0xb8 => 3,
            _ => 4,
        }
    }
} // }}}

// HardwareInfo {{{
/// Sub-frame 0 of the 3-frame hardware/firmware info exchange: five 16-bit
/// fields starting at byte 12.
#[derive(PartialEq, Clone, Debug, Serialize, Nom)]
#[nom(BigEndian)]
pub struct HardwareInfo {
    pub fw_version: u16,
    pub fw_build_year: u16,
    pub fw_build_date: u16,
    pub fw_build_time: u16,
    pub hw_version: u16,
}

impl HardwareInfo {
    pub fn decode(frame: &Frame) -> Result<Self> {
        let input = frame.slice_from(12);
        match Self::parse(input) {
            Ok((_, info)) => Ok(info),
            Err(_) => bail!("info sub-frame 0 too short ({} bytes)", frame.len()),
        }
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_fields() -> Frame {
        let mut data = vec![0u8; 24];
        data[0] = protocol::RSP_4CH_FIRST;
        data[9..11].copy_from_slice(&3050u16.to_be_bytes()); // 305.0 V
        data[11..13].copy_from_slice(&82u16.to_be_bytes()); // 8.2 A
        data[13..15].copy_from_slice(&2310u16.to_be_bytes()); // 231.0 V
        data[15..17].copy_from_slice(&5002u16.to_be_bytes()); // 50.02 Hz
        data[17..19].copy_from_slice(&2501u16.to_be_bytes()); // 250.1 W
        data[19..21].copy_from_slice(&1234u16.to_be_bytes()); // 1234 Wh
        data[21..23].copy_from_slice(&(-15i16).to_be_bytes()); // -1.5 C
        data[23] = 3;
        Frame::new(data).unwrap()
    }

    #[test]
    fn decodes_scaled_fields() {
        let fragment = ChannelDataFragment::decode(&frame_with_fields()).unwrap();
        assert_eq!(fragment.dc_voltage, 305.0);
        assert_eq!(fragment.dc_current, 8.2);
        assert_eq!(fragment.ac_voltage, 231.0);
        assert_eq!(fragment.ac_frequency, 50.02);
        assert_eq!(fragment.dc_power, 250.1);
        assert_eq!(fragment.yield_day, 1234.0);
        assert_eq!(fragment.temperature, -1.5);
    }

    #[test]
    fn short_frame_is_an_error() {
        let frame = Frame::new(vec![protocol::RSP_DATA_CH1, 0, 0]).unwrap();
        assert!(ChannelDataFragment::decode(&frame).is_err());
    }

    #[test]
    fn slot_mapping() {
        assert_eq!(ChannelDataFragment::slot(0x89), 1);
        assert_eq!(ChannelDataFragment::slot(0xb6), 1);
        assert_eq!(ChannelDataFragment::slot(0x91), 2);
        assert_eq!(ChannelDataFragment::slot(0xb7), 2);
        assert_eq!(ChannelDataFragment::slot(0xb8), 3);
        assert_eq!(ChannelDataFragment::slot(0xb9), 4);
    }

    #[test]
    fn payload_strips_header_and_check_byte() {
        let frame = frame_with_fields();
        let payload = frame.payload();
        assert_eq!(payload.len(), frame.len() - 11);
        assert_eq!(payload[0], frame.byte(10).unwrap());
    }
}
