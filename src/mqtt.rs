use crate::prelude::*;

use crate::coordinator::PacketStats;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::sync::{Arc, Mutex};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

pub enum TargetInverter {
    Serial(Serial),
    All,
}

impl Message {
    pub fn to_command(&self, inverter: config::Inverter) -> Result<Command> {
        use Command::*;

        let (_serial, parts) = self.split_cmd_topic()?;

        let r = match parts[..] {
            ["set", "power_limit_pct"] => SetPowerLimitPct(inverter, self.payload_int()?),
            ["set", "power_limit_watts"] => SetPowerLimitWatts(inverter, self.payload_int()?),
            ["read", "info"] => ReadHardwareInfo(inverter),
            ["read", "alarms"] => ReadAlarms(inverter),
            ["read", "config"] => ReadConfig(inverter),
            ["restart"] => Restart(inverter),
            ["clean_state"] => CleanState(inverter),
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // given a cmd Message, return the serial it is intended for.
    //
    // eg cmd/104162804632/set/power_limit_pct => (104162804632, ['set', 'power_limit_pct'])
    pub fn split_cmd_topic(&self) -> Result<(TargetInverter, Vec<&str>)> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        // bail if the topic is too short to handle.
        // this *shouldn't* happen as our subscribe is for mi/cmd/{serial}/#
        if parts.len() < 2 {
            bail!("ignoring badly formed MQTT topic: {}", self.topic);
        }

        // parts[0] should be cmd
        let serial = parts[1];
        let rest = parts[2..].to_vec();

        if serial == "all" {
            Ok((TargetInverter::All, rest))
        } else {
            let serial = Serial::from_str(serial)?;
            Ok((TargetInverter::Serial(serial), rest))
        }
    }

    fn payload_int(&self) -> Result<u16> {
        self.payload
            .parse()
            .map_err(|err| anyhow!("payload_int: {}", err))
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    shutdown: bool,
    channels: Channels,
    shared_stats: Arc<Mutex<PacketStats>>,
}

impl Mqtt {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        shared_stats: Arc<Mutex<PacketStats>>,
    ) -> Self {
        Self {
            config,
            channels,
            shutdown: false,
            shared_stats,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("mi-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping MQTT client");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client
            .subscribe(
                format!("{}/cmd/all/#", self.config.mqtt().namespace()),
                QoS::AtMostOnce,
            )
            .await?;

        for inverter in self.config.enabled_inverters() {
            client
                .subscribe(
                    format!(
                        "{}/cmd/{}/#",
                        self.config.mqtt().namespace(),
                        inverter.serial().map(|s| s.to_string()).unwrap_or_default()
                    ),
                    QoS::AtMostOnce,
                )
                .await?;
        }

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        loop {
            if self.shutdown {
                info!("MQTT receiver shutting down");
                break;
            }

            if let Ok(event) =
                tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()).await
            {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(publish)?;
                    }
                    Err(e) => {
                        if !self.shutdown {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                    _ => {} // keepalives etc
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        // remove the namespace, including the first /
        // doing it this way means we don't break if namespace happens to contain a /
        let topic = publish.topic[self.config.mqtt().namespace().len() + 1..].to_owned();

        let message = Message {
            topic,
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);
        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                Shutdown => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    let payload = message.payload.as_bytes().to_vec();
                    match client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, payload)
                        .await
                    {
                        Ok(_) => {
                            if let Ok(mut stats) = self.shared_stats.lock() {
                                stats.mqtt_messages_sent += 1;
                            }
                        }
                        Err(err) => {
                            error!("publishing {} failed: {:?}", topic, err);
                            if let Ok(mut stats) = self.shared_stats.lock() {
                                stats.mqtt_errors += 1;
                            }
                        }
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
