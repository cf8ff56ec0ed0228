//! Notification classification and stream dispatch.

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::registry::opcodes::logging;
use crate::registry::{ModuleId, READ_BIT};
use crate::route::RouteId;
use crate::signal::decode::{decode_frame, DecodedSample};
use crate::signal::{SignalShape, SourceAddress, ValueKind};
use crate::types::ResourceClass;

/// What an incoming frame is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification<'a> {
    /// Response to a register read; `register` has the read bit set
    ReadResponse {
        module: u8,
        register: u8,
        payload: &'a [u8],
    },
    /// `[module, creationOpcode, id]`
    Created { class: ResourceClass, id: u8 },
    /// Log entries of a readout
    Readout(&'a [u8]),
    ReadoutProgress(u32),
    PageCompleted,
    /// Anything else: streamed data, or noise
    Data(&'a [u8]),
}

/// Classify a notification frame
pub fn classify(frame: &[u8]) -> Result<Notification<'_>> {
    let [module, register, payload @ ..] = frame else {
        return Err(BoardError::Protocol(format!(
            "notification too short: {:02x?}",
            frame
        )));
    };
    let (module, register) = (*module, *register);

    if register & READ_BIT != 0 {
        return Ok(Notification::ReadResponse {
            module,
            register,
            payload,
        });
    }
    if let Some(class) = ResourceClass::from_creation(module, register) {
        return match payload {
            [id] => Ok(Notification::Created { class, id: *id }),
            _ => Err(BoardError::Protocol(format!(
                "{} creation reply must carry one id byte: {:02x?}",
                class, frame
            ))),
        };
    }
    if module == ModuleId::Logging as u8 {
        match register {
            logging::READOUT_NOTIFY => return Ok(Notification::Readout(payload)),
            logging::READOUT_PROGRESS => {
                return match payload {
                    [a, b, c, d, ..] => Ok(Notification::ReadoutProgress(u32::from_le_bytes([
                        *a, *b, *c, *d,
                    ]))),
                    _ => Err(BoardError::Protocol(format!(
                        "readout progress too short: {:02x?}",
                        frame
                    ))),
                };
            }
            logging::READOUT_PAGE_COMPLETED => return Ok(Notification::PageCompleted),
            _ => {}
        }
    }
    Ok(Notification::Data(frame))
}

/// A stream terminal waiting for data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub route: RouteId,
    /// Plan node index of the terminal
    pub terminal: usize,
    pub name: Option<String>,
    pub source: SourceAddress,
    pub shape: SignalShape,
}

impl StreamTarget {
    /// Payload of `frame` if it comes from this target's source
    pub fn payload<'f>(&self, frame: &'f [u8]) -> Option<&'f [u8]> {
        match frame {
            [module, register, rest @ ..]
                if *module == self.source.module && *register == self.source.register =>
            {
                match self.source.index {
                    Some(index) => match rest {
                        [i, data @ ..] if *i == index => Some(data),
                        _ => None,
                    },
                    None => Some(rest),
                }
            }
            _ => None,
        }
    }

    /// Decode a payload; unwrapped raw slices start at their offset
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<DecodedSample>> {
        let offset = if self.shape.wrappers.is_empty() && self.shape.kind == ValueKind::Numeric {
            self.shape.attributes.offset as usize
        } else {
            0
        };
        let bytes = payload.get(offset..).ok_or_else(|| {
            BoardError::Protocol(format!(
                "payload of {} bytes has no data at offset {}",
                payload.len(),
                offset
            ))
        })?;
        decode_frame(&self.shape, bytes)
    }
}

/// Stream terminals keyed by source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchTable {
    targets: Vec<StreamTarget>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: StreamTarget) {
        self.targets.push(target);
    }

    pub fn remove_route(&mut self, route: RouteId) {
        self.targets.retain(|t| t.route != route);
    }

    /// Targets fed by `frame`, with their payload
    pub fn route<'t, 'f>(&'t self, frame: &'f [u8]) -> Vec<(&'t StreamTarget, &'f [u8])> {
        self.targets
            .iter()
            .filter_map(|t| t.payload(frame).map(|p| (t, p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::catalog;
    use crate::types::DataValue;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&[0x09, 0x02, 0x05]).unwrap(),
            Notification::Created {
                class: ResourceClass::Processor,
                id: 5
            }
        );
        assert!(matches!(
            classify(&[0x0b, 0x85, 1, 0, 0, 0]).unwrap(),
            Notification::ReadResponse {
                module: 0x0b,
                register: 0x85,
                ..
            }
        ));
        assert_eq!(
            classify(&[0x0b, 0x08, 0, 0, 0, 0]).unwrap(),
            Notification::ReadoutProgress(0)
        );
        assert_eq!(classify(&[0x0b, 0x0d]).unwrap(), Notification::PageCompleted);
        assert!(matches!(
            classify(&[0x03, 0x04, 1, 0, 2, 0, 3, 0]).unwrap(),
            Notification::Data(_)
        ));
        assert!(classify(&[0x0b]).is_err());
        assert!(classify(&[0x0b, 0x08, 0]).is_err());
    }

    #[test]
    fn test_indexed_source_matches_index_byte() {
        let temp = catalog::temperature(1);
        let target = StreamTarget {
            route: RouteId(0),
            terminal: 0,
            name: None,
            source: temp.source,
            shape: temp.shape,
        };
        assert!(target.payload(&[0x04, 0x01, 0x00, 0x10, 0x01]).is_none());
        let payload = target.payload(&[0x04, 0x01, 0x01, 0x10, 0x01]).unwrap();
        assert_eq!(
            target.decode(payload).unwrap()[0].value,
            DataValue::Float(34.0)
        );
    }

    #[test]
    fn test_component_decodes_at_offset() {
        let z = catalog::acceleration().component(2).unwrap();
        let mut table = DispatchTable::new();
        table.insert(StreamTarget {
            route: RouteId(3),
            terminal: 1,
            name: Some("z".into()),
            source: z.source,
            shape: z.shape,
        });
        let frame = [0x03, 0x04, 0, 0, 0, 0, 0x00, 0x40];
        let routed = table.route(&frame);
        assert_eq!(routed.len(), 1);
        let samples = routed[0].0.decode(routed[0].1).unwrap();
        assert_eq!(samples[0].value, DataValue::Float(1.0));

        table.remove_route(RouteId(3));
        assert!(table.route(&frame).is_empty());
    }
}
