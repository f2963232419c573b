use nom::number::streaming::{be_i16, be_u16};
use nom::IResult;

pub struct Utils;

impl Utils {
    pub fn be_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_u16(input)?;
        Ok((input, value as f64 / 10.0))
    }

    pub fn be_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_u16(input)?;
        Ok((input, value as f64 / 100.0))
    }

    pub fn be_u16_div1(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_u16(input)?;
        Ok((input, value as f64))
    }

    pub fn be_i16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_i16(input)?;
        Ok((input, value as f64 / 10.0))
    }

    pub fn unix_ts() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_helpers() {
        assert_eq!(Utils::be_u16_div10(&[0x01, 0x2c, 0xff]).unwrap().1, 30.0);
        assert_eq!(Utils::be_u16_div100(&[0x13, 0x88]).unwrap().1, 50.0);
        assert_eq!(Utils::be_u16_div1(&[0x00, 0x64]).unwrap().1, 100.0);
        // -1.5 degrees
        assert_eq!(Utils::be_i16_div10(&[0xff, 0xf1]).unwrap().1, -1.5);
    }
}
