use crate::prelude::*;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::mi::frame::Frame;

/// Length-prefixed framing on the TCP link to the radio gateway. Each
/// message is a big-endian u16 length followed by that many body bytes.
/// Inbound bodies are `[serial; 6][frame bytes]`; outbound bodies are
/// request records built by `radio::Radio`.
pub struct RadioCodec;

const MAX_BODY: usize = 512;

impl Decoder for RadioCodec {
    type Item = (Serial, Frame);
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len > MAX_BODY {
            bail!("oversized radio message ({} bytes)", len);
        }
        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }

        src.advance(2);
        let body = src.split_to(len);
        if body.len() < 7 {
            bail!("radio message too short ({} bytes)", body.len());
        }

        let serial = Serial::from_bytes(body[0..6].try_into()?);
        let frame = Frame::new(body[6..].to_vec())?;
        Ok(Some((serial, frame)))
    }
}

impl Encoder<Vec<u8>> for RadioCodec {
    type Error = Error;

    fn encode(&mut self, body: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        if body.len() > MAX_BODY {
            bail!("oversized radio request ({} bytes)", body.len());
        }
        dst.reserve(2 + body.len());
        dst.put_u16(body.len() as u16);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_framed_message() {
        let mut codec = RadioCodec;
        let mut buf = BytesMut::new();

        let body = [
            0x10, 0x41, 0x62, 0x80, 0x46, 0x32, // serial
            0x89, 0x00, 0x01, // frame
        ];
        buf.put_u16(body.len() as u16);
        buf.put_slice(&body);

        let (serial, frame) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(serial.to_string(), "104162804632");
        assert_eq!(frame.id(), 0x89);
        assert_eq!(frame.len(), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_a_full_message() {
        let mut codec = RadioCodec;
        let mut buf = BytesMut::new();
        buf.put_u16(10);
        buf.put_slice(&[0x10, 0x41]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn round_trips_through_encoder() {
        let mut codec = RadioCodec;
        let mut buf = BytesMut::new();

        let mut body = vec![0x10, 0x41, 0x62, 0x80, 0x46, 0x32];
        body.extend_from_slice(&[0x92, 0xaa]);
        codec.encode(body.clone(), &mut buf).unwrap();

        let (serial, frame) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(serial.bytes(), [0x10, 0x41, 0x62, 0x80, 0x46, 0x32]);
        assert_eq!(frame.id(), 0x92);
    }
}
