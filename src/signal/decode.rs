//! Frame decoding: bytes + shape → typed samples.

use super::{frame_len, AccountMode, FrameWrapper, SignalShape, ValueKind, ACCOUNT_PREFIX_LEN};
use crate::error::{BoardError, Result};
use crate::types::DataValue;

/// One decoded sample, with the board tick carried by an account prefix if any
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub tick: Option<u32>,
    pub value: DataValue,
}

/// Read a little-endian integer of `bytes.len()` (≤ 8) bytes
fn read_le(bytes: &[u8], signed: bool) -> i64 {
    let mut raw: u64 = 0;
    for (i, b) in bytes.iter().enumerate().take(8) {
        raw |= (*b as u64) << (8 * i);
    }
    let bits = (bytes.len().min(8) * 8) as u32;
    if signed && bits > 0 && bits < 64 {
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

/// Decode the sample bytes of one unwrapped frame
pub fn decode_value(shape: &SignalShape, bytes: &[u8]) -> Result<DataValue> {
    let attrs = &shape.attributes;
    if shape.kind == ValueKind::Opaque {
        return Ok(DataValue::Bytes(bytes.to_vec()));
    }
    if bytes.len() < attrs.len() {
        return Err(BoardError::Protocol(format!(
            "sample needs {} bytes, got {}",
            attrs.len(),
            bytes.len()
        )));
    }

    let axis_len = attrs.axis_len as usize;
    let raws: Vec<i64> = (0..attrs.axes as usize)
        .map(|axis| read_le(&bytes[axis * axis_len..(axis + 1) * axis_len], attrs.signed))
        .collect();

    if raws.len() == 1 {
        let raw = raws[0];
        if shape.scale == 1.0 {
            return Ok(if attrs.signed {
                DataValue::Int(raw)
            } else {
                DataValue::UInt(raw as u64)
            });
        }
        return Ok(DataValue::Float(raw as f32 / shape.scale));
    }

    Ok(DataValue::Vector(
        raws.into_iter().map(|r| r as f32 / shape.scale).collect(),
    ))
}

/// Decode a notification payload into every sample it carries
pub fn decode_frame(shape: &SignalShape, bytes: &[u8]) -> Result<Vec<DecodedSample>> {
    let needed = shape.frame_len();
    if shape.kind == ValueKind::Numeric && bytes.len() < needed {
        return Err(BoardError::Protocol(format!(
            "frame needs {} bytes, got {}",
            needed,
            bytes.len()
        )));
    }
    let mut out = Vec::new();
    decode_wrapped(shape, &shape.wrappers, bytes, None, &mut out)?;
    Ok(out)
}

fn decode_wrapped(
    shape: &SignalShape,
    wrappers: &[FrameWrapper],
    bytes: &[u8],
    tick: Option<u32>,
    out: &mut Vec<DecodedSample>,
) -> Result<()> {
    let Some((outer, inner)) = wrappers.split_last() else {
        out.push(DecodedSample {
            tick,
            value: decode_value(shape, bytes)?,
        });
        return Ok(());
    };

    match outer {
        FrameWrapper::Account(mode) => {
            if bytes.len() < ACCOUNT_PREFIX_LEN {
                return Err(BoardError::Protocol("missing account prefix".into()));
            }
            let prefix = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let tick = match mode {
                AccountMode::Time => Some(prefix),
                AccountMode::Count => tick,
            };
            decode_wrapped(shape, inner, &bytes[ACCOUNT_PREFIX_LEN..], tick, out)
        }
        FrameWrapper::Pack(count) => {
            let chunk = frame_len(shape.sample_len(), inner);
            for i in 0..*count as usize {
                let start = i * chunk;
                let end = (start + chunk).min(bytes.len());
                let sample = bytes.get(start..end).filter(|b| !b.is_empty()).ok_or_else(|| {
                    BoardError::Protocol(format!(
                        "packed frame of {} bytes ends before sample {} of {}",
                        bytes.len(),
                        i + 1,
                        count
                    ))
                })?;
                decode_wrapped(shape, inner, sample, tick, out)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::DataAttributes;

    #[test]
    fn test_decode_signed_vector() {
        let shape = SignalShape::numeric(DataAttributes::vector(2, 3, true), 16384.0);
        let value = decode_value(&shape, &[0x00, 0x40, 0x00, 0xc0, 0x00, 0x00]).unwrap();
        assert_eq!(value, DataValue::Vector(vec![1.0, -1.0, 0.0]));
    }

    #[test]
    fn test_decode_unscaled_scalars() {
        let unsigned = SignalShape::numeric(DataAttributes::scalar(4, false), 1.0);
        assert_eq!(
            decode_value(&unsigned, &[0xff, 0xff, 0xff, 0xff]).unwrap(),
            DataValue::UInt(0xffff_ffff)
        );
        let signed = SignalShape::numeric(DataAttributes::scalar(2, true), 1.0);
        assert_eq!(
            decode_value(&signed, &[0xfe, 0xff]).unwrap(),
            DataValue::Int(-2)
        );
    }

    #[test]
    fn test_decode_packed_frame() {
        let shape = SignalShape::numeric(DataAttributes::scalar(2, false), 1.0)
            .wrapped(FrameWrapper::Pack(3));
        let samples = decode_frame(&shape, &[1, 0, 2, 0, 3, 0]).unwrap();
        let values: Vec<_> = samples.iter().map(|s| s.value.clone()).collect();
        assert_eq!(
            values,
            vec![DataValue::UInt(1), DataValue::UInt(2), DataValue::UInt(3)]
        );
        assert!(samples.iter().all(|s| s.tick.is_none()));
    }

    #[test]
    fn test_decode_accounted_packed_frame() {
        let shape = SignalShape::numeric(DataAttributes::scalar(2, false), 1.0)
            .wrapped(FrameWrapper::Pack(2))
            .wrapped(FrameWrapper::Account(AccountMode::Time));
        let samples = decode_frame(&shape, &[0x10, 0, 0, 0, 7, 0, 8, 0]).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.tick == Some(0x10)));
    }

    #[test]
    fn test_decode_pack_of_accounted_samples() {
        let shape = SignalShape::numeric(DataAttributes::scalar(1, false), 1.0)
            .wrapped(FrameWrapper::Account(AccountMode::Time))
            .wrapped(FrameWrapper::Pack(2));
        let samples = decode_frame(&shape, &[1, 0, 0, 0, 0xaa, 2, 0, 0, 0, 0xbb]).unwrap();
        assert_eq!(samples[0].tick, Some(1));
        assert_eq!(samples[1].tick, Some(2));
        assert_eq!(samples[1].value, DataValue::UInt(0xbb));
    }

    #[test]
    fn test_short_frame_is_protocol_error() {
        let shape = SignalShape::numeric(DataAttributes::scalar(4, false), 1.0);
        assert!(decode_frame(&shape, &[1, 2]).is_err());
    }

    #[test]
    fn test_short_opaque_packed_frame_is_protocol_error() {
        let shape = SignalShape {
            attributes: DataAttributes::scalar(6, false),
            scale: 1.0,
            kind: ValueKind::Opaque,
            wrappers: vec![FrameWrapper::Pack(2)],
        };
        assert!(matches!(
            decode_frame(&shape, &[1, 2, 3, 4]),
            Err(BoardError::Protocol(_))
        ));
        assert_eq!(decode_frame(&shape, &[0; 12]).unwrap().len(), 2);
    }
}
