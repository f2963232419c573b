use crate::prelude::*;

use crate::coordinator::commands::WaitForAck;

const ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Waits for the device-control acknowledgement of a power limit request
/// and publishes the outcome to the command's result topic. The control
/// request itself is issued by the coordinator before this runs; the
/// subscription is taken in `new` so no ack can slip past in between.
pub struct SetPowerLimit {
    channels: Channels,
    command: Command,
    serial: Serial,
    receiver: broadcast::Receiver<coordinator::ChannelData>,
}

impl SetPowerLimit {
    pub fn new(channels: Channels, command: Command, serial: Serial) -> Self {
        let receiver = channels.to_coordinator.subscribe();
        Self {
            channels,
            command,
            serial,
            receiver,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let accepted = match tokio::time::timeout(ACK_TIMEOUT, self.wait_for_ack()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} power limit ack timed out", self.serial);
                false
            }
        };

        let message = mqtt::Message {
            topic: self.command.to_result_topic(),
            retain: false,
            payload: if accepted { "OK" } else { "FAIL" }.to_string(),
        };
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            bail!("send(to_mqtt) failed - channel closed?");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl WaitForAck for SetPowerLimit {
    async fn wait_for_ack(&mut self) -> Result<bool> {
        loop {
            match self.receiver.recv().await? {
                coordinator::ChannelData::PowerLimitAck(serial, accepted)
                    if serial == self.serial =>
                {
                    return Ok(accepted);
                }
                coordinator::ChannelData::Shutdown => bail!("shutdown"),
                _ => {}
            }
        }
    }
}
