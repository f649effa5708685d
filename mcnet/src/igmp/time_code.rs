//! RFC 3376 float-encoded time codes (`Max Resp Code`, `QQIC`): an 8-bit field that
//! represents either tenths of a second directly (`code < 128`) or a floating-point
//! value with a 3-bit exponent and 4-bit mantissa (`code >= 128`).

use std::time::Duration;

/// Decode an on-wire time code into a duration, per RFC 3376 §4.1.1 / §4.1.7.
pub fn decode_time(code: u8) -> Duration {
    let tenths: u32 = if code < 128 {
        code as u32
    } else {
        let mant = (code & 0x0F) as u32 | 0x10;
        let exp = ((code >> 4) & 0x07) as u32;
        mant << (exp + 3)
    };
    Duration::from_millis(tenths as u64 * 100)
}

/// Encode a duration into the smallest representable time code such that
/// `decode_time(encode_time(d)) >= d` is not guaranteed in general (the float encoding
/// is lossy above 12.8s); `encode_time` instead picks the *closest* representable code,
/// matching the original `cal_code` rounding behavior.
pub fn encode_time(d: Duration) -> u8 {
    let tenths = (d.as_millis() / 100).min(u16::MAX as u128) as u32;
    if tenths < 128 {
        return tenths as u8;
    }
    let t = tenths & 0x7FFF;
    let mut exp = 15u32;
    while exp > 0 && (t & (1 << exp)) == 0 {
        exp -= 1;
    }
    let mant = (t >> exp.saturating_sub(4)) & 0x0F;
    (0x80 | (exp.saturating_sub(7) << 4) | mant) as u8
}
