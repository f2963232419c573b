pub mod codec;

use crate::prelude::*;

use futures::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::mi::frame::Frame;
use crate::mi::protocol::DevControlCmd;
use crate::radio::codec::RadioCodec;

// request record tags on the gateway link
const REQ_TELEMETRY: u8 = 0x10;
const REQ_RAW: u8 = 0x11;
const REQ_CONTROL: u8 = 0x12;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    /// Telemetry poll for one device; `alarm_index` is echoed so the device
    /// reports alarms newer than the cursor.
    TelemetryRequest {
        serial: Serial,
        cmd: u8,
        ts: u64,
        alarm_index: u16,
        retransmit: bool,
    },
    /// Raw command word with a sub-command byte (info exchange).
    RawCommand {
        serial: Serial,
        cmd: u8,
        subcmd: u8,
        retransmit: bool,
    },
    /// Device control request with its two-word argument.
    ControlCommand {
        serial: Serial,
        control: DevControlCmd,
        limit: [u16; 2],
        retransmit: bool,
    },
    /// One response frame received from a device.
    Frame { serial: Serial, frame: Frame },
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

/// TCP client for the radio gateway. Reconnects forever; requests and
/// received frames flow through the broadcast channels.
#[derive(Clone)]
pub struct Radio {
    config: ConfigWrapper,
    channels: Channels,
}

impl Radio {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        loop {
            match self.connect().await {
                // a clean return means shutdown was requested
                Ok(()) => break,
                Err(err) => {
                    error!("radio: {:?}", err);
                    info!("reconnecting in 5s");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_radio.send(ChannelData::Shutdown);
    }

    async fn connect(&self) -> Result<()> {
        let radio = self.config.radio();
        info!(
            "connecting to radio gateway at {}:{}",
            radio.host(),
            radio.port()
        );

        let stream =
            tokio::net::TcpStream::connect((radio.host().to_owned(), radio.port())).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut framed_read = FramedRead::new(reader, RadioCodec);
        let mut framed_write = FramedWrite::new(writer, RadioCodec);
        info!("connected to radio gateway");

        let mut to_radio = self.channels.to_radio.subscribe();

        loop {
            tokio::select! {
                message = framed_read.next() => {
                    match message {
                        Some(Ok((serial, frame))) => {
                            debug!("RX {} 0x{:02x} ({} bytes)", serial, frame.id(), frame.len());
                            if self
                                .channels
                                .from_radio
                                .send(ChannelData::Frame { serial, frame })
                                .is_err()
                            {
                                bail!("send(from_radio) failed - channel closed?");
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => bail!("radio gateway closed the connection"),
                    }
                }
                data = to_radio.recv() => {
                    match data? {
                        ChannelData::Shutdown => {
                            info!("radio shutting down");
                            return Ok(());
                        }
                        // inbound frames also arrive here via the broadcast; skip
                        ChannelData::Frame { .. } => {}
                        outbound => {
                            framed_write.send(Self::encode_request(&outbound)?).await?;
                        }
                    }
                }
            }
        }
    }

    /// Flatten a request into the gateway's tagged record format.
    fn encode_request(data: &ChannelData) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(16);

        match data {
            ChannelData::TelemetryRequest {
                serial,
                cmd,
                ts,
                alarm_index,
                retransmit,
            } => {
                body.push(REQ_TELEMETRY);
                body.extend_from_slice(&serial.bytes());
                body.push(*cmd);
                body.push(*retransmit as u8);
                body.extend_from_slice(&alarm_index.to_be_bytes());
                body.extend_from_slice(&(*ts as u32).to_be_bytes());
            }
            ChannelData::RawCommand {
                serial,
                cmd,
                subcmd,
                retransmit,
            } => {
                body.push(REQ_RAW);
                body.extend_from_slice(&serial.bytes());
                body.push(*cmd);
                body.push(*subcmd);
                body.push(*retransmit as u8);
            }
            ChannelData::ControlCommand {
                serial,
                control,
                limit,
                retransmit,
            } => {
                body.push(REQ_CONTROL);
                body.extend_from_slice(&serial.bytes());
                body.push(u8::from(*control));
                body.push(*retransmit as u8);
                body.extend_from_slice(&limit[0].to_be_bytes());
                body.extend_from_slice(&limit[1].to_be_bytes());
            }
            other => bail!("not an outbound request: {:?}", other),
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_request_layout() {
        let body = Radio::encode_request(&ChannelData::TelemetryRequest {
            serial: Serial::new(0x104162804632),
            cmd: 0x09,
            ts: 1_700_000_000,
            alarm_index: 7,
            retransmit: true,
        })
        .unwrap();

        assert_eq!(body[0], REQ_TELEMETRY);
        assert_eq!(&body[1..7], &[0x10, 0x41, 0x62, 0x80, 0x46, 0x32]);
        assert_eq!(body[7], 0x09);
        assert_eq!(body[8], 1);
        assert_eq!(u16::from_be_bytes([body[9], body[10]]), 7);
        assert_eq!(body.len(), 15);
    }

    #[test]
    fn inbound_frames_are_not_encodable() {
        let frame = Frame::new(vec![0x89, 0, 0]).unwrap();
        assert!(Radio::encode_request(&ChannelData::Frame {
            serial: Serial::new(1),
            frame,
        })
        .is_err());
    }
}
