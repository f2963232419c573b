use mi_bridge::prelude::*;

use mi_bridge::coordinator::PacketStats;
use mi_bridge::mi::frame::Frame;
use mi_bridge::mi::inverter::Inverter;
use mi_bridge::mi::payload::PayloadHandler;
use mi_bridge::mi::protocol::ProtocolRevision;

use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    pub fn config_inverter(serial: &str) -> config::Inverter {
        config::Inverter {
            enabled: true,
            serial: Some(Serial::from_str(serial).unwrap()),
            channels: None,
            revision: None,
            max_channel_power: Some(vec![400.0; 4]),
        }
    }

    /// 2nd serial byte picks the device type: 0x41 = two channels.
    pub fn two_channel_inverter() -> Inverter {
        Inverter::new(0, &Self::config_inverter("104162804632")).unwrap()
    }

    pub fn four_channel_inverter() -> Inverter {
        Inverter::new(0, &Self::config_inverter("106162804632")).unwrap()
    }

    pub fn legacy_inverter() -> Inverter {
        let mut config = Self::config_inverter("104162804632");
        config.revision = Some(ProtocolRevision::Legacy);
        Inverter::new(0, &config).unwrap()
    }

    pub fn handler(channels: &Channels) -> (PayloadHandler, Arc<Mutex<PacketStats>>) {
        Self::handler_with(channels, 5, false)
    }

    pub fn handler_with(
        channels: &Channels,
        max_retransmits: u8,
        strict_crc: bool,
    ) -> (PayloadHandler, Arc<Mutex<PacketStats>>) {
        let stats = Arc::new(Mutex::new(PacketStats::default()));
        let handler = PayloadHandler::new(
            channels.clone(),
            stats.clone(),
            max_retransmits,
            strict_crc,
        );
        (handler, stats)
    }

    /// Status-only frame: the status word sits at byte 9 in the current
    /// field revision.
    pub fn status_frame(id: u8, status: u16) -> Frame {
        let mut data = vec![0u8; 12];
        data[0] = id;
        data[9..11].copy_from_slice(&status.to_be_bytes());
        Frame::new(data).unwrap()
    }

    /// Status-only frame in the legacy field layout: status word at byte 11.
    pub fn legacy_status_frame(id: u8, status: u16) -> Frame {
        let mut data = vec![0u8; 14];
        data[0] = id;
        data[11..13].copy_from_slice(&status.to_be_bytes());
        Frame::new(data).unwrap()
    }

    /// Channel data frame with the fixed field layout at bytes 9..=22 and a
    /// status byte at 23 (read only on the extended per-channel ids).
    pub fn data_frame(id: u8, dc_power_tenths: u16, yield_day: u16, status: u8) -> Frame {
        let mut data = vec![0u8; 24];
        data[0] = id;
        data[9..11].copy_from_slice(&3050u16.to_be_bytes()); // 305.0 V
        data[11..13].copy_from_slice(&82u16.to_be_bytes()); // 8.2 A
        data[13..15].copy_from_slice(&2310u16.to_be_bytes()); // 231.0 V
        data[15..17].copy_from_slice(&5002u16.to_be_bytes()); // 50.02 Hz
        data[17..19].copy_from_slice(&dc_power_tenths.to_be_bytes());
        data[19..21].copy_from_slice(&yield_day.to_be_bytes());
        data[21..23].copy_from_slice(&215u16.to_be_bytes()); // 21.5 C
        data[23] = status;
        Frame::new(data).unwrap()
    }

    /// Info exchange frame: sub-frame index at byte 9, fields from byte 12.
    pub fn info_frame(sub: u8, fields: &[u16]) -> Frame {
        let mut data = vec![0u8; 12 + fields.len() * 2 + 1];
        data[0] = 0x95;
        data[9] = sub;
        for (i, field) in fields.iter().enumerate() {
            data[12 + i * 2..14 + i * 2].copy_from_slice(&field.to_be_bytes());
        }
        Frame::new(data).unwrap()
    }
}

/// Drain every pending message from a broadcast receiver.
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}
