use crate::types::{AccelSample, KeyBitmap, KEY_COUNT};
use crate::{MexError, Result};

// -- Service identity --
pub const PROFILE_ID: &str = "/sample/hellomessage";

// -- Frame geometry --
/// Fixed frame width the paired receiver reads.
pub const FRAME_LEN: usize = 35;
pub const FIELD_SEPARATOR: char = ',';
pub const AXIS_PRECISION: usize = 6;

// -- Key state alphabet --
pub const KEY_PRESSED: char = 't';
pub const KEY_RELEASED: char = 'f';

/// Text payload: `"<x>,<y>,<z>,<keys>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pack into a `FRAME_LEN` byte frame, NUL-padding short payloads.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let len = self.0.len();
        if len > FRAME_LEN {
            return Err(MexError::EncodingOverflow { len });
        }
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..len].copy_from_slice(self.0.as_bytes());
        Ok(frame)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Width of every frame handed to the transport.
pub const fn payload_length() -> usize {
    FRAME_LEN
}

/// Render one axis the way C `printf("%f")` does.
fn format_axis(value: f32) -> String {
    if value.is_nan() {
        if value.is_sign_negative() {
            "-nan".to_string()
        } else {
            "nan".to_string()
        }
    } else if value.is_infinite() {
        if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        format!("{:.*}", AXIS_PRECISION, value)
    }
}

/// Render the key bitmap as `KEY_COUNT` characters of `t`/`f`.
pub fn format_keys(keys: &KeyBitmap) -> String {
    keys.slots()
        .iter()
        .map(|&pressed| if pressed { KEY_PRESSED } else { KEY_RELEASED })
        .collect()
}

/// Encode a sample and key state into the receiver's text payload.
pub fn encode(sample: &AccelSample, keys: &KeyBitmap) -> Payload {
    Payload(format!(
        "{x}{sep}{y}{sep}{z}{sep}{k}",
        x = format_axis(sample.x),
        y = format_axis(sample.y),
        z = format_axis(sample.z),
        k = format_keys(keys),
        sep = FIELD_SEPARATOR,
    ))
}

/// Encode straight to a transport frame, failing instead of truncating.
pub fn encode_frame(sample: &AccelSample, keys: &KeyBitmap) -> Result<Vec<u8>> {
    encode(sample, keys).to_frame()
}

/// Parse a payload or frame back into its sample and key state.
/// Trailing NUL padding is ignored.
pub fn decode(data: &[u8]) -> Result<(AccelSample, KeyBitmap)> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end])
        .map_err(|e| MexError::MalformedPayload(format!("not utf-8: {}", e)))?;

    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if fields.len() != 4 {
        return Err(MexError::MalformedPayload(format!(
            "expected 4 fields, got {}",
            fields.len()
        )));
    }

    let axis = |s: &str| -> Result<f32> {
        s.parse::<f32>()
            .map_err(|_| MexError::MalformedPayload(format!("bad axis value '{}'", s)))
    };
    let sample = AccelSample::new(axis(fields[0])?, axis(fields[1])?, axis(fields[2])?);

    let key_field = fields[3];
    if key_field.chars().count() != KEY_COUNT {
        return Err(MexError::MalformedPayload(format!(
            "key field '{}' is not {} characters",
            key_field, KEY_COUNT
        )));
    }
    let mut slots = [false; KEY_COUNT];
    for (slot, c) in slots.iter_mut().zip(key_field.chars()) {
        *slot = match c {
            KEY_PRESSED => true,
            KEY_RELEASED => false,
            other => {
                return Err(MexError::MalformedPayload(format!(
                    "bad key state '{}'",
                    other
                )))
            }
        };
    }

    Ok((sample, KeyBitmap::from_slots(slots)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Key;

    #[test]
    fn test_encode_reference_payload() {
        let sample = AccelSample::new(1.234567, -0.5, 9.81);
        let mut keys = KeyBitmap::new();
        keys.press_key(Key::Left);
        let payload = encode(&sample, &keys);
        assert_eq!(payload.as_str(), "1.234567,-0.500000,9.810000,tffffff");
        assert_eq!(payload.len(), FRAME_LEN);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let sample = AccelSample::new(0.25, 3.5, -7.125);
        let keys = KeyBitmap::from_slots([false, true, false, true, false, false, false]);
        assert_eq!(encode(&sample, &keys), encode(&sample, &keys));
        assert_eq!(encode(&sample, &keys).as_str(), "0.250000,3.500000,-7.125000,ftftfff");
    }

    #[test]
    fn test_short_payload_is_nul_padded() {
        let frame = encode_frame(&AccelSample::default(), &KeyBitmap::new()).unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(&frame[..34], b"0.000000,0.000000,0.000000,fffffff");
        assert_eq!(frame[34], 0);
    }

    #[test]
    fn test_wide_payload_overflows() {
        let sample = AccelSample::new(-19.6133, -19.6133, -19.6133);
        let err = encode_frame(&sample, &KeyBitmap::new()).unwrap_err();
        assert!(matches!(err, MexError::EncodingOverflow { len: 40 }));
    }

    #[test]
    fn test_one_extra_character_still_fits() {
        let one_negative = AccelSample::new(-1.5, 0.25, 9.5);
        let frame = encode_frame(&one_negative, &KeyBitmap::new()).unwrap();
        assert_eq!(&frame[..], b"-1.500000,0.250000,9.500000,fffffff");

        let two_digits = AccelSample::new(10.5, 0.25, 0.5);
        let frame = encode_frame(&two_digits, &KeyBitmap::new()).unwrap();
        assert_eq!(&frame[..], b"10.500000,0.250000,0.500000,fffffff");
    }

    #[test]
    fn test_two_negative_axes_overflow_by_one() {
        let sample = AccelSample::new(-1.5, -0.25, 9.5);
        assert_eq!(encode(&sample, &KeyBitmap::new()).len(), FRAME_LEN + 1);
        let err = encode_frame(&sample, &KeyBitmap::new()).unwrap_err();
        assert!(matches!(err, MexError::EncodingOverflow { len: 36 }));
    }

    #[test]
    fn test_non_finite_axes_match_printf() {
        let sample = AccelSample::new(f32::NAN, f32::INFINITY, f32::NEG_INFINITY);
        assert_eq!(encode(&sample, &KeyBitmap::new()).as_str(), "nan,inf,-inf,fffffff");
    }

    #[test]
    fn test_decode_recovers_fields() {
        let sample = AccelSample::new(1.234567, -0.5, 9.81);
        let keys = KeyBitmap::from_slots([true, false, false, true, false, true, false]);
        let frame = encode_frame(&sample, &keys).unwrap();
        let (decoded, decoded_keys) = decode(&frame).unwrap();
        assert!((decoded.x - sample.x).abs() < 1e-6);
        assert!((decoded.y - sample.y).abs() < 1e-6);
        assert!((decoded.z - sample.z).abs() < 1e-6);
        assert_eq!(decoded_keys, keys);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode(b"1.0,2.0,fffffff").is_err());
        assert!(decode(b"1.0,2.0,3.0,ffff").is_err());
        assert!(decode(b"1.0,2.0,3.0,fffxfff").is_err());
        assert!(decode(b"1.0,abc,3.0,fffffff").is_err());
    }
}
