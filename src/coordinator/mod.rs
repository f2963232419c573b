pub mod commands;

use crate::prelude::*;

use std::sync::{Arc, Mutex};

use crate::mi::inverter::Inverter;
use crate::mi::payload::PayloadHandler;
use crate::mi::protocol::{DevControlCmd, QueuedCommand};

// power limit control modes, second word of the control argument
const LIMIT_ABSOLUTE_WATTS: u16 = 0x0000;
const LIMIT_RELATIVE_PCT: u16 = 0x0001;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Shutdown,
    /// Begin a fresh request cycle on every tracked device.
    StartCycles { high_priority: bool },
    /// One scheduler pass over the retry state machine.
    PollTick,
    /// A device answered a power limit request; `true` means accepted.
    PowerLimitAck(Serial, bool),
}

pub type Sender = broadcast::Sender<ChannelData>;

#[derive(Clone, Debug, Default)]
pub struct PacketStats {
    pub frames_received: u64,
    pub requests_sent: u64,
    pub retransmits_sent: u64,
    pub rx_success: u64,
    pub rx_failed: u64,
    pub rx_no_answer: u64,
    pub crc_errors: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
}

impl PacketStats {
    pub fn print_summary(&self) {
        info!("packet stats:");
        info!("  frames received: {}", self.frames_received);
        info!(
            "  requests sent: {} ({} retransmits)",
            self.requests_sent, self.retransmits_sent
        );
        info!(
            "  cycles: {} ok, {} failed, {} unanswered",
            self.rx_success, self.rx_failed, self.rx_no_answer
        );
        info!("  crc errors: {}", self.crc_errors);
        info!(
            "  mqtt: {} sent, {} errors",
            self.mqtt_messages_sent, self.mqtt_errors
        );
    }
}

/// Everything the payload state machine mutates. One lock, taken per event,
/// never held across an await; the receivers below are the only writers.
pub struct Inner {
    pub payload: PayloadHandler,
    pub inverters: Vec<Inverter>,
}

#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    pub shared_stats: Arc<Mutex<PacketStats>>,
    inner: Arc<Mutex<Inner>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Result<Self> {
        let shared_stats = Arc::new(Mutex::new(PacketStats::default()));

        let mut inverters = Vec::new();
        for (id, inverter) in config.enabled_inverters().iter().enumerate() {
            inverters.push(Inverter::new(id as u8, inverter)?);
        }
        info!("tracking {} inverters", inverters.len());

        let payload = PayloadHandler::new(
            channels.clone(),
            shared_stats.clone(),
            config.max_retransmits(),
            config.strict_crc(),
        );

        Ok(Self {
            config,
            channels,
            shared_stats,
            inner: Arc::new(Mutex::new(Inner { payload, inverters })),
        })
    }

    pub async fn start(&self) -> Result<()> {
        futures::try_join!(
            self.radio_receiver(),
            self.mqtt_receiver(),
            self.event_receiver()
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_radio.send(radio::ChannelData::Shutdown);
        let _ = self.channels.from_mqtt.send(mqtt::ChannelData::Shutdown);
        let _ = self.channels.to_coordinator.send(ChannelData::Shutdown);
    }

    // radio_receiver {{{
    async fn radio_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_radio.subscribe();

        loop {
            match receiver.recv().await? {
                radio::ChannelData::Frame { serial, frame } => {
                    self.handle_frame(serial, frame);
                    // frames can arrive back to back; let decoder output
                    // drain before taking the next one
                    tokio::task::yield_now().await;
                }
                radio::ChannelData::Shutdown => break,
                _ => {} // outbound requests echoing on the broadcast
            }
        }

        info!("coordinator radio receiver exiting");
        Ok(())
    }

    fn handle_frame(&self, serial: Serial, frame: crate::mi::frame::Frame) {
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.frames_received += 1;
        }

        let mut inner = self.inner.lock().unwrap();
        let Inner { payload, inverters } = &mut *inner;

        match inverters.iter_mut().find(|iv| iv.serial == serial) {
            Some(iv) => payload.on_frame(iv, &frame),
            None => warn!("frame from unknown device {}", serial),
        }
    } // }}}

    // event_receiver {{{
    async fn event_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.to_coordinator.subscribe();

        loop {
            match receiver.recv().await? {
                ChannelData::Shutdown => break,
                ChannelData::PollTick => {
                    let mut inner = self.inner.lock().unwrap();
                    let Inner { payload, inverters } = &mut *inner;
                    payload.tick(inverters, true);
                }
                ChannelData::StartCycles { high_priority } => {
                    self.start_cycles(high_priority);
                }
                // consumed by command waiters
                ChannelData::PowerLimitAck(_, _) => {}
            }
        }

        info!("coordinator event receiver exiting");
        Ok(())
    }

    fn start_cycles(&self, high_priority: bool) {
        let ts = Utils::unix_ts();
        let mut inner = self.inner.lock().unwrap();
        let Inner { payload, inverters } = &mut *inner;

        for iv in inverters.iter_mut() {
            if let Err(err) = payload.start_cycle(iv, high_priority, ts) {
                error!("(#{}) start_cycle: {:?}", iv.id, err);
            }
        }
    } // }}}

    // mqtt_receiver {{{
    async fn mqtt_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                mqtt::ChannelData::Message(message) => {
                    let _ = self.process_message(message).await;
                }
                mqtt::ChannelData::Shutdown => break,
            }
        }

        info!("coordinator mqtt receiver exiting");
        Ok(())
    }

    async fn process_message(&self, message: mqtt::Message) -> Result<()> {
        for inverter in self.config.inverters_for_message(&message)? {
            match message.to_command(inverter) {
                Ok(command) => {
                    info!("parsed command {:?}", command);
                    let result = self.process_command(command.clone()).await;
                    if result.is_err() {
                        self.publish_result(&command, false);
                    }
                }
                Err(err) => {
                    info!("ignoring {:?}", err);
                }
            }
        }

        Ok(())
    } // }}}

    // process_command {{{
    async fn process_command(&self, command: Command) -> Result<()> {
        use Command::*;

        let serial = command
            .inverter()
            .serial()
            .ok_or_else(|| anyhow!("inverter has no serial configured"))?;

        if self.config.read_only() && command.is_mutation() {
            warn!("can't run {:?} while read_only=true", command);
            self.publish_result(&command, false);
            return Ok(());
        }

        match command {
            SetPowerLimitPct(_, pct) => {
                self.apply_power_limit(command.clone(), serial, [pct, LIMIT_RELATIVE_PCT])
                    .await
            }
            SetPowerLimitWatts(_, watts) => {
                self.apply_power_limit(command.clone(), serial, [watts, LIMIT_ABSOLUTE_WATTS])
                    .await
            }
            Restart(_) => self.request_control(&command, serial, DevControlCmd::Restart),
            CleanState(_) => {
                self.request_control(&command, serial, DevControlCmd::CleanStateLockAlarm)
            }
            ReadHardwareInfo(_) => self.enqueue(&command, serial, QueuedCommand::HardwareInfo),
            ReadAlarms(_) => self.enqueue(&command, serial, QueuedCommand::AlarmLog),
            ReadConfig(_) => self.enqueue(&command, serial, QueuedCommand::ConfigReadback),
        }
    }

    /// Power limit requests are acknowledged by the device; a waiter task
    /// watches for the ack and publishes the outcome.
    async fn apply_power_limit(
        &self,
        command: Command,
        serial: Serial,
        limit: [u16; 2],
    ) -> Result<()> {
        // subscribe before sending so the ack can't be missed
        let waiter = commands::SetPowerLimit::new(self.channels.clone(), command, serial);

        {
            let mut inner = self.inner.lock().unwrap();
            let Inner { payload, inverters } = &mut *inner;
            let iv = Self::inverter_mut(inverters, serial)?;
            iv.request_control(DevControlCmd::ActivePowerLimit, limit);
            payload.start_cycle(iv, true, Utils::unix_ts())?;
        }

        tokio::spawn(async move {
            if let Err(err) = waiter.run().await {
                error!("set_power_limit: {:?}", err);
            }
        });

        Ok(())
    }

    fn request_control(
        &self,
        command: &Command,
        serial: Serial,
        control: DevControlCmd,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let Inner { payload, inverters } = &mut *inner;
            let iv = Self::inverter_mut(inverters, serial)?;
            iv.request_control(control, [0, 0]);
            payload.start_cycle(iv, true, Utils::unix_ts())?;
        }

        // these are not acknowledged; report that the request went out
        self.publish_result(command, true);
        Ok(())
    }

    fn enqueue(&self, command: &Command, serial: Serial, queued: QueuedCommand) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let iv = Self::inverter_mut(&mut inner.inverters, serial)?;
            iv.enqueue(queued);
        }

        self.publish_result(command, true);
        Ok(())
    }

    fn inverter_mut(inverters: &mut [Inverter], serial: Serial) -> Result<&mut Inverter> {
        inverters
            .iter_mut()
            .find(|iv| iv.serial == serial)
            .ok_or_else(|| anyhow!("no tracked inverter with serial {}", serial))
    }

    fn publish_result(&self, command: &Command, ok: bool) {
        let message = mqtt::Message {
            topic: command.to_result_topic(),
            retain: false,
            payload: if ok { "OK" } else { "FAIL" }.to_string(),
        };
        let _ = self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message));
    } // }}}
}
