use crate::prelude::*;

use bytes::Bytes;
use std::sync::{Arc, Mutex};

use crate::coordinator::PacketStats;
use crate::mi::frame::{ChannelDataFragment, Frame, HardwareInfo};
use crate::mi::inverter::{DeviceType, Inverter};
use crate::mi::protocol::{self, DevControlCmd, QueuedCommand};
use crate::mi::record::Field;

/// Fixed capacity of the per-device state table; device ids index into it
/// and are validated at every entry point.
pub const MAX_DEVICES: usize = 16;

pub type PayloadListener = Box<dyn Fn(u8) + Send + Sync>;
pub type AlarmListener = Box<dyn Fn(u16, u32, u32) + Send + Sync>;

/// Per-inverter bookkeeping for the request/response cycle in flight.
///
/// `data_received`/`status_received` cover the channel slots
/// {aggregate, ch1, ch2}; slots a device does not physically have are seeded
/// `true` on reset so they never block completion. `status` holds the
/// observed status codes per slot {aggregate, ch1..ch4}, slot 0 being the
/// smallest non-zero code seen this cycle.
#[derive(Clone, Debug, Default)]
pub struct PayloadState {
    pub ts: u64,
    pub requested: bool,
    pub tx_cmd: u8,
    pub tx_id: u8,
    pub complete: bool,
    pub data_received: [bool; 3],
    pub status_received: [bool; 3],
    pub status: [u16; 5],
    pub retransmits: u8,
    pub got_fragment: bool,
    pub skip_next_tick: bool,
    pub fragments: Vec<Bytes>,
}

/// The payload aggregation and retry state machine: classifies inbound
/// frames, decodes multi-fragment channel data into the device record,
/// detects completion, and drives retransmission when a cycle stalls.
///
/// Two entry points mutate state - `on_frame` and `tick` - and the caller
/// must serialize them (the coordinator runs both on one task).
pub struct PayloadHandler {
    channels: Channels,
    stats: Arc<Mutex<PacketStats>>,
    max_retransmits: u8,
    strict_crc: bool,
    states: Vec<PayloadState>,
    payload_listener: Option<PayloadListener>,
    alarm_listener: Option<AlarmListener>,
}

enum Resend {
    Telemetry(u8),
    InfoRequest,
}

impl PayloadHandler {
    pub fn new(
        channels: Channels,
        stats: Arc<Mutex<PacketStats>>,
        max_retransmits: u8,
        strict_crc: bool,
    ) -> Self {
        Self {
            channels,
            stats,
            max_retransmits,
            strict_crc,
            states: vec![PayloadState::default(); MAX_DEVICES],
            payload_listener: None,
            alarm_listener: None,
        }
    }

    pub fn with_payload_listener(mut self, listener: PayloadListener) -> Self {
        self.payload_listener = Some(listener);
        self
    }

    pub fn with_alarm_listener(mut self, listener: AlarmListener) -> Self {
        self.alarm_listener = Some(listener);
        self
    }

    pub fn state(&self, id: u8) -> Option<&PayloadState> {
        self.states.get(id as usize)
    }

    fn slot(&self, iv: &Inverter) -> Option<usize> {
        let id = iv.id as usize;
        if id < self.states.len() {
            Some(id)
        } else {
            warn!("inverter id {} outside device table", iv.id);
            None
        }
    }

    pub fn reset(&mut self, iv: &Inverter, ts: u64) {
        let Some(id) = self.slot(iv) else { return };
        debug!("(#{}) reset payload state", iv.id);

        let st = &mut self.states[id];
        st.ts = ts;
        st.requested = false;
        st.tx_cmd = 0;
        st.tx_id = 0;
        st.complete = false;
        st.retransmits = 0;
        st.got_fragment = false;
        st.skip_next_tick = false;
        st.fragments.clear();
        st.status = [0; 5];
        // channel slots the device does not have must never block completion
        st.data_received = [true; 3];
        st.status_received = [true; 3];
    }

    // start_cycle {{{
    /// Begin a new request cycle for a device: close out a still-outstanding
    /// previous cycle, reset the state, then issue exactly one request
    /// according to the command selection priority (pending device control,
    /// queued hardware-info exchange, telemetry poll).
    pub fn start_cycle(&mut self, iv: &mut Inverter, high_priority: bool, ts: u64) -> Result<()> {
        let Some(id) = self.slot(iv) else {
            bail!("inverter id {} outside device table", iv.id);
        };

        if self.states[id].requested && !self.states[id].complete {
            // previous cycle never finished: give it one last evaluation
            // without retransmitting, then book the failure
            self.tick_device(iv, false);
            let st = &self.states[id];
            if !st.complete {
                if st.got_fragment {
                    warn!("(#{}) abandoning cycle with partial answer", iv.id);
                    self.stat(|s| s.rx_failed += 1);
                } else {
                    warn!("(#{}) abandoning cycle with no answer", iv.id);
                    self.stat(|s| s.rx_no_answer += 1);
                }
                iv.queued_cmd_finished();
            }
        }

        self.reset(iv, ts);
        self.states[id].requested = true;

        if high_priority {
            debug!("(#{}) high priority cycle", iv.id);
        }

        if iv.pending_control {
            let st = &mut self.states[id];
            st.tx_cmd = protocol::TX_REQ_DEVCONTROL;
            st.skip_next_tick = iv.revision.skip_guard();
            info!("(#{}) sending device control {:?}", iv.id, iv.dev_control);
            self.send_control(iv, false);
            return Ok(());
        }

        // the command in flight stays at the queue front until the cycle
        // finishes, so mid-cycle enqueues (alarm log) line up behind it
        if !iv.has_queued_cmds() {
            iv.enqueue(QueuedCommand::DataPoll);
        }

        let queued = iv.queued_cmd();
        if queued == QueuedCommand::HardwareInfo {
            let st = &mut self.states[id];
            st.tx_cmd = protocol::TX_REQ_INFO;
            st.skip_next_tick = iv.revision.skip_guard();
            info!("(#{}) requesting hardware info from {}", iv.id, iv.serial);
            self.send_raw(iv, protocol::TX_REQ_INFO, protocol::INFO_SUB_FRAMES[0], false);
            return Ok(());
        }

        let cmd = Self::wire_cmd(iv, queued);
        {
            let st = &mut self.states[id];
            st.tx_cmd = cmd;
            st.skip_next_tick = iv.revision.skip_guard();
            if matches!(iv.device_type, DeviceType::OneChannel | DeviceType::TwoChannel) {
                st.data_received[0] = false;
                st.data_received[1] = false;
                st.status_received[0] = false;
                st.status_received[1] = false;
            }
            if iv.device_type == DeviceType::TwoChannel {
                st.data_received[2] = false;
                st.status_received[2] = false;
            }
        }
        info!("(#{}) requesting 0x{:02x} from {}", iv.id, cmd, iv.serial);
        self.send_telemetry(iv, cmd, ts, false);
        Ok(())
    } // }}}

    // on_frame {{{
    /// Classify one inbound response frame by its leading identifier byte
    /// and dispatch to the matching decoder.
    pub fn on_frame(&mut self, iv: &mut Inverter, frame: &Frame) {
        let Some(id) = self.slot(iv) else { return };

        self.states[id].fragments.push(frame.payload());

        match frame.id() {
            protocol::RSP_STATUS_CH1 => self.decode_status(iv, frame, 1),
            protocol::RSP_STATUS_CH2 => self.decode_status(iv, frame, 2),
            protocol::RSP_DATA_CH1 | protocol::RSP_DATA_CH2 => self.decode_channel_data(iv, frame),
            fid if (protocol::RSP_4CH_FIRST..=protocol::RSP_4CH_LAST).contains(&fid) => {
                self.decode_channel_data(iv, frame)
            }
            protocol::RSP_INFO => self.decode_info(iv, frame),
            protocol::RSP_DEVCONTROL => self.decode_control_ack(iv, frame),
            _ => self.decode_fallback(iv, frame),
        }
    } // }}}

    // decode_status {{{
    fn decode_status(&mut self, iv: &mut Inverter, frame: &Frame, channel: u8) {
        let Some(id) = self.slot(iv) else { return };
        info!("(#{}) status frame 0x{:02x}", iv.id, frame.id());

        let Some(status) = frame.be_u16(iv.revision.status_offset()) else {
            warn!("(#{}) status frame too short", iv.id);
            self.stat(|s| s.rx_failed += 1);
            return;
        };

        let aggregate_done = {
            let st = &mut self.states[id];
            iv.record.ts = st.ts;
            st.got_fragment = true;
            st.tx_id = frame.id();

            st.status[channel as usize] = status;
            st.status_received[channel as usize] = true;
            if st.status_received[1] && st.status_received[2] {
                st.status_received[0] = true;
            }
            if st.status[0] == 0 || status < st.status[0] {
                st.status[0] = status;
                iv.record.set(0, Field::Event, status as f64);
            }

            st.status_received[0] && st.data_received[0] && !st.complete
        };

        self.advance_alarm_index(iv);

        if aggregate_done {
            self.finalize(iv);
        }
    } // }}}

    // decode_channel_data {{{
    fn decode_channel_data(&mut self, iv: &mut Inverter, frame: &Frame) {
        let Some(id) = self.slot(iv) else { return };

        let slot = ChannelDataFragment::slot(frame.id());
        let fragment = match ChannelDataFragment::decode(frame) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!("(#{}) {}", iv.id, err);
                self.stat(|s| s.rx_failed += 1);
                return;
            }
        };
        info!("(#{}) data frame 0x{:02x} channel {}", iv.id, frame.id(), slot);

        {
            let st = &mut self.states[id];
            iv.record.ts = st.ts;
            st.got_fragment = true;
            st.tx_id = frame.id();
        }

        iv.record.set(slot, Field::DcVoltage, fragment.dc_voltage);
        iv.record.set(slot, Field::DcCurrent, fragment.dc_current);
        iv.record.set(0, Field::AcVoltage, fragment.ac_voltage);
        iv.record.set(0, Field::Frequency, fragment.ac_frequency);
        iv.record.set(slot, Field::DcPower, fragment.dc_power);
        iv.record.set(slot, Field::YieldDay, fragment.yield_day);
        iv.record.set(0, Field::Temperature, fragment.temperature);
        iv.record
            .set(0, Field::Irradiation, iv.irradiation(slot, fragment.dc_power));

        {
            let st = &mut self.states[id];
            if (slot as usize) < st.data_received.len() {
                st.data_received[slot as usize] = true;
            }
            if !st.data_received[0] && st.data_received[1] && st.data_received[2] {
                st.data_received[0] = true;
            }
        }

        // extended per-channel frames carry a trailing status byte and a
        // fragment position within the 4-frame sequence
        if frame.id() >= protocol::RSP_4CH_FIRST {
            if let Some(status) = frame.byte(23) {
                let status = status as u16;
                let st = &mut self.states[id];
                st.status[slot as usize] = status;
                if st.status[0] == 0 || status < st.status[0] {
                    st.status[0] = status;
                    iv.record.set(0, Field::Event, status as f64);
                }
                // anything before the last frame keeps the set open; the
                // last frame closes it provisionally
                st.complete = frame.id() == protocol::RSP_4CH_LAST;
            }
            self.advance_alarm_index(iv);
        }

        let done = {
            let st = &self.states[id];
            (iv.device_type == DeviceType::FourChannel && st.complete)
                || (iv.device_type != DeviceType::FourChannel
                    && st.data_received[0]
                    && st.status_received[0]
                    && !st.complete)
        };
        if done {
            self.finalize(iv);
        }
    } // }}}

    // decode_info {{{
    /// Handles both the 3-sub-frame hardware/firmware info exchange and the
    /// generic info-request acknowledgement (protocol exploration path).
    fn decode_info(&mut self, iv: &mut Inverter, frame: &Frame) {
        let Some(id) = self.slot(iv) else { return };

        {
            let st = &mut self.states[id];
            st.tx_id = frame.id();
            st.got_fragment = true;
        }

        let Some(sub) = frame.byte(9) else {
            warn!("(#{}) info frame too short", iv.id);
            return;
        };

        let hardware_exchange = self.states[id].tx_cmd == protocol::TX_REQ_INFO
            && iv.queued_cmd() == QueuedCommand::HardwareInfo;

        if !hardware_exchange {
            debug!(
                "(#{}) info request ack, sub-frame 0x{:02x}: {:02x?}",
                iv.id,
                sub,
                frame.slice_from(9)
            );
            if sub == 0 {
                iv.queued_cmd_finished();
            }
            return;
        }

        match sub {
            0x00 => match HardwareInfo::decode(frame) {
                Ok(info) => {
                    iv.record.set(0, Field::FwVersion, info.fw_version as f64);
                    iv.record.set(0, Field::FwBuildYear, info.fw_build_year as f64);
                    iv.record.set(0, Field::FwBuildDate, info.fw_build_date as f64);
                    iv.record.set(0, Field::FwBuildTime, info.fw_build_time as f64);
                    iv.record.set(0, Field::HwVersion, info.hw_version as f64);
                    self.send_raw(iv, protocol::TX_REQ_INFO, protocol::INFO_SUB_FRAMES[1], false);
                }
                Err(err) => {
                    warn!("(#{}) {}", iv.id, err);
                    self.stat(|s| s.rx_failed += 1);
                }
            },
            0x01 => {
                debug!("(#{}) info sub-frame 1: {:02x?}", iv.id, frame.slice_from(10));
                self.send_raw(iv, protocol::TX_REQ_INFO, protocol::INFO_SUB_FRAMES[2], false);
            }
            0x12 => {
                debug!("(#{}) info exchange finished", iv.id);
                self.states[id].complete = true;
                iv.queued_cmd_finished();
                self.stat(|s| s.rx_success += 1);
            }
            other => debug!("(#{}) unexpected info sub-frame 0x{:02x}", iv.id, other),
        }
    } // }}}

    // decode_control_ack {{{
    fn decode_control_ack(&mut self, iv: &mut Inverter, frame: &Frame) {
        let Some(id) = self.slot(iv) else { return };
        debug!("(#{}) device control ack", iv.id);

        {
            let st = &mut self.states[id];
            st.tx_id = frame.id();
            st.got_fragment = true;
        }

        iv.clear_control_request();

        if frame.byte(12) == Some(u8::from(DevControlCmd::ActivePowerLimit))
            && frame.byte(13) == Some(0)
        {
            let accepted = frame.be_u16(10) == Some(0);
            info!(
                "inverter {} has {}accepted power limit set point {} with control mode {}",
                iv.id,
                if accepted { "" } else { "NOT " },
                iv.power_limit[0],
                iv.power_limit[1]
            );
            let _ = self
                .channels
                .to_coordinator
                .send(coordinator::ChannelData::PowerLimitAck(iv.serial, accepted));
            iv.clear_cmd_queue();
            iv.enqueue(QueuedCommand::ConfigReadback); // read back the limit
        }

        iv.dev_control = DevControlCmd::Init;
    } // }}}

    // decode_fallback {{{
    /// Anything unmatched: treat the fragments buffered this cycle as one
    /// completed payload for the currently queued command, gated by a length
    /// plausibility check.
    fn decode_fallback(&mut self, iv: &mut Inverter, frame: &Frame) {
        let Some(id) = self.slot(iv) else { return };

        let queued = iv.queued_cmd();
        let (payload, tx_cmd) = {
            let st = &mut self.states[id];
            st.tx_id = frame.id();
            st.got_fragment = true;
            let mut payload: Vec<u8> = st
                .fragments
                .iter()
                .flat_map(|fragment| fragment.iter().copied())
                .collect();
            let len = payload.len().saturating_sub(2); // trailing checksum
            payload.truncate(len);
            (payload, st.tx_cmd)
        };

        info!(
            "(#{}) fallback decode: cmd 0x{:02x} tx_id 0x{:02x} ({} bytes)",
            iv.id,
            tx_cmd,
            frame.id(),
            payload.len()
        );

        match queued.expected_payload_len() {
            Some(expected) if expected != payload.len() => {
                error!(
                    "(#{}) plausibility check failed, expected {} bytes, got {}",
                    iv.id,
                    expected,
                    payload.len()
                );
                self.stat(|s| s.rx_failed += 1);
            }
            _ => {
                {
                    let st = &mut self.states[id];
                    st.complete = true;
                    iv.record.ts = st.ts;
                }
                if queued == QueuedCommand::AlarmLog {
                    self.parse_alarm_log(iv, &payload);
                }
                iv.record.update_derived(iv.channels());
                self.stat(|s| s.rx_success += 1);
                self.notify(tx_cmd);
            }
        }

        iv.queued_cmd_finished();
    } // }}}

    // parse_alarm_log {{{
    /// Alarm log payload: 12-byte entries starting at offset 2, terminated
    /// by a zero code.
    fn parse_alarm_log(&self, iv: &Inverter, payload: &[u8]) {
        let mut offset = 2;
        while offset + 12 <= payload.len() {
            let code = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
            if code == 0 {
                break;
            }
            let start = u16::from_be_bytes([payload[offset + 4], payload[offset + 5]]) as u32;
            let end = u16::from_be_bytes([payload[offset + 6], payload[offset + 7]]) as u32;
            info!("(#{}) alarm {} from {} to {}", iv.id, code, start, end);

            if let Some(listener) = &self.alarm_listener {
                listener(code, start, end);
            }
            let _ = self.channels.to_mqtt.send(mqtt::ChannelData::Message(mqtt::Message {
                topic: format!("{}/alarm", iv.serial),
                retain: false,
                payload: serde_json::json!({ "code": code, "start": start, "end": end })
                    .to_string(),
            }));

            offset += 12;
        }
    } // }}}

    // finalize {{{
    /// Completion: the full data+status set for a cycle has arrived. Fills
    /// in the derived aggregate values and notifies downstream.
    fn finalize(&mut self, iv: &mut Inverter) {
        let Some(id) = self.slot(iv) else { return };

        let (tx_cmd, ac_power) = {
            let st = &mut self.states[id];
            st.complete = true;
            info!("(#{}) complete set of messages", iv.id);

            // no AC power on the wire; approximate from the DC power of the
            // channels currently producing (status 3), derated empirically
            let mut dc_producing = 0.0;
            for channel in 1..=iv.channels() {
                if st.status.get(channel as usize) == Some(&3) {
                    dc_producing += iv.record.get(channel, Field::DcPower).unwrap_or(0.0);
                }
            }
            (st.tx_cmd, dc_producing * 9.5 / 10.0)
        };

        iv.record.set(0, Field::AcPower, ac_power);
        let yield_day = iv.record.yield_day_total(iv.channels());
        iv.record.set(0, Field::YieldDay, yield_day);
        iv.record.update_derived(iv.channels());

        iv.queued_cmd_finished();
        self.stat(|s| s.rx_success += 1);

        let _ = self.channels.to_mqtt.send(mqtt::ChannelData::Message(mqtt::Message {
            topic: format!("{}/record", iv.serial),
            retain: false,
            payload: iv.record.to_json().to_string(),
        }));
        self.notify(tx_cmd);
    } // }}}

    // tick {{{
    /// One scheduler pass over all tracked devices.
    pub fn tick(&mut self, inverters: &mut [Inverter], retransmit: bool) {
        for iv in inverters.iter_mut() {
            self.tick_device(iv, retransmit);
        }
    }

    fn tick_device(&mut self, iv: &mut Inverter, retransmit: bool) {
        let Some(id) = self.slot(iv) else { return };

        {
            let st = &mut self.states[id];

            // a response outside the expected id set must not stall the cycle
            if !st.complete && !protocol::is_expected_response(st.tx_id) {
                debug!("(#{}) unexpected response 0x{:02x}, closing cycle", iv.id, st.tx_id);
                st.complete = true;
                return;
            }

            // one-shot guard: a request was just issued, give the reply a tick
            if st.skip_next_tick {
                st.skip_next_tick = false;
                return;
            }

            if st.complete {
                return;
            }
        }

        let (crc_pass, payload_complete) = self.evaluate(id);

        if !payload_complete {
            if self.states[id].requested && retransmit {
                self.escalate(iv);
            }
        } else if !crc_pass {
            // checksum failure on a believed-complete fragment set: request
            // a fresh transmission of the queued command
            let resend = {
                let st = &mut self.states[id];
                if st.retransmits < self.max_retransmits {
                    st.retransmits += 1;
                    let cmd = Self::wire_cmd(iv, iv.queued_cmd());
                    st.tx_cmd = cmd;
                    st.fragments.clear();
                    warn!("(#{}) crc error, requesting retransmit 0x{:02x}", iv.id, cmd);
                    Some((cmd, st.ts))
                } else {
                    None
                }
            };
            if let Some((cmd, ts)) = resend {
                self.stat(|s| s.crc_errors += 1);
                self.send_telemetry(iv, cmd, ts, true);
            }
        }
    } // }}}

    // escalate {{{
    /// Retry/escalation policy for an incomplete cycle.
    fn escalate(&mut self, iv: &mut Inverter) {
        let Some(id) = self.slot(iv) else { return };

        if iv.pending_control && iv.dev_control.suppresses_retransmit() {
            // these commands are never answered; don't spend the budget
            info!("(#{}) suppressing retransmit for {:?}", iv.id, iv.dev_control);
            self.states[id].retransmits = self.max_retransmits;
            return;
        }
        if iv.pending_control && iv.dev_control == DevControlCmd::ActivePowerLimit {
            info!("(#{}) retransmit power limit", iv.id);
            self.send_control(iv, true);
            return;
        }
        if self.states[id].retransmits >= self.max_retransmits {
            return;
        }

        let resend = {
            let st = &mut self.states[id];
            let retries_before = st.retransmits;
            st.retransmits += 1;

            if !st.got_fragment {
                // silent device: one more attempt, then stop asking
                info!("(#{}) nothing received", iv.id);
                let cmd = st.tx_cmd;
                st.retransmits = self.max_retransmits;
                Resend::Telemetry(cmd)
            } else if st.tx_cmd == protocol::TX_REQ_INFO {
                Resend::InfoRequest
            } else {
                let mut cmd = st.tx_cmd;
                if (protocol::CMD_4CH_FIRST..protocol::CMD_4CH_LAST).contains(&cmd) {
                    // just request the next channel in the sequence
                    cmd += 1;
                } else if cmd == protocol::CMD_CH1 {
                    if st.data_received[1] && iv.device_type == DeviceType::TwoChannel {
                        let early_retry = iv
                            .revision
                            .early_status_retry()
                            .map_or(false, |limit| {
                                !st.status_received[1] && retries_before < limit
                            });
                        if !early_retry && (!st.status_received[2] || !st.data_received[2]) {
                            cmd = protocol::CMD_CH2;
                            st.retransmits = 0;
                        }
                    }
                } else if cmd == protocol::CMD_CH2
                    && st.data_received[2]
                    && st.status_received[2]
                    && (!st.status_received[1] || !st.data_received[1])
                {
                    cmd = protocol::CMD_CH1;
                }
                st.tx_cmd = cmd;
                info!("(#{}) next request is 0x{:02x}", iv.id, cmd);
                Resend::Telemetry(cmd)
            }
        };

        let ts = self.states[id].ts;
        match resend {
            Resend::Telemetry(cmd) => self.send_telemetry(iv, cmd, ts, true),
            Resend::InfoRequest => {
                self.send_raw(iv, protocol::TX_REQ_INFO, protocol::INFO_SUB_FRAMES[0], true)
            }
        }
    } // }}}

    // evaluate {{{
    /// Completeness/checksum gate consulted by the scheduler. Returns
    /// `(crc_pass, complete)`. An incomplete multi-fragment set cannot be
    /// validated yet; with `strict_crc` the buffered fragment set of a
    /// single-fragment command is checksummed (CRC-16/MODBUS over everything
    /// but the trailing two bytes, compared against those bytes).
    fn evaluate(&self, id: usize) -> (bool, bool) {
        let st = &self.states[id];
        let complete = st.complete;

        if !complete {
            if protocol::is_multi_fragment_cmd(st.tx_cmd) {
                return (false, complete);
            }
            if self.strict_crc
                && !st.fragments.is_empty()
                && !Self::fragments_crc_ok(&st.fragments)
            {
                // the set is as complete as it will get, but the checksum disagrees
                return (false, true);
            }
        }

        (true, complete)
    }

    fn fragments_crc_ok(fragments: &[Bytes]) -> bool {
        let payload: Vec<u8> = fragments
            .iter()
            .flat_map(|fragment| fragment.iter().copied())
            .collect();
        if payload.len() < 2 {
            return false;
        }
        let (body, tail) = payload.split_at(payload.len() - 2);
        let mut state = crc16::State::<crc16::MODBUS>::new();
        state.update(body);
        state.get() == u16::from_be_bytes([tail[0], tail[1]])
    } // }}}

    fn advance_alarm_index(&mut self, iv: &mut Inverter) {
        let event = iv.record.get(0, Field::Event).unwrap_or(0.0) as u16;
        if iv.alarm_index < event {
            iv.alarm_index = event;
            info!("(#{}) alarm index advanced to {}", iv.id, event);
            iv.enqueue(QueuedCommand::AlarmLog);
        }
    }

    fn wire_cmd(iv: &Inverter, cmd: QueuedCommand) -> u8 {
        match cmd {
            QueuedCommand::DataPoll => iv.default_poll_cmd(),
            QueuedCommand::HardwareInfo => protocol::TX_REQ_INFO,
            QueuedCommand::AlarmLog => protocol::CMD_ALARM_LOG,
            QueuedCommand::ConfigReadback => protocol::CMD_CONFIG_READBACK,
        }
    }

    fn notify(&self, cmd: u8) {
        if let Some(listener) = &self.payload_listener {
            listener(cmd);
        }
    }

    fn stat<F: FnOnce(&mut PacketStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    // transport sends are fire-and-forget; a closed channel only means we
    // are shutting down
    fn send_telemetry(&self, iv: &Inverter, cmd: u8, ts: u64, retransmit: bool) {
        let _ = self.channels.to_radio.send(radio::ChannelData::TelemetryRequest {
            serial: iv.serial,
            cmd,
            ts,
            alarm_index: iv.alarm_index,
            retransmit,
        });
        self.count_request(retransmit);
    }

    fn send_raw(&self, iv: &Inverter, cmd: u8, subcmd: u8, retransmit: bool) {
        let _ = self.channels.to_radio.send(radio::ChannelData::RawCommand {
            serial: iv.serial,
            cmd,
            subcmd,
            retransmit,
        });
        self.count_request(retransmit);
    }

    fn send_control(&self, iv: &Inverter, retransmit: bool) {
        let _ = self.channels.to_radio.send(radio::ChannelData::ControlCommand {
            serial: iv.serial,
            control: iv.dev_control,
            limit: iv.power_limit,
            retransmit,
        });
        self.count_request(retransmit);
    }

    fn count_request(&self, retransmit: bool) {
        self.stat(|s| {
            s.requests_sent += 1;
            if retransmit {
                s.retransmits_sent += 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_over_reassembled_fragments() {
        let mut body = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let mut state = crc16::State::<crc16::MODBUS>::new();
        state.update(&body);
        let crc = state.get();
        body.extend_from_slice(&crc.to_be_bytes());

        // split across two fragments
        let fragments = vec![Bytes::from(body[..3].to_vec()), Bytes::from(body[3..].to_vec())];
        assert!(PayloadHandler::fragments_crc_ok(&fragments));

        let mut bad = body.clone();
        bad[1] ^= 0xff;
        let fragments = vec![Bytes::from(bad)];
        assert!(!PayloadHandler::fragments_crc_ok(&fragments));
    }
}
