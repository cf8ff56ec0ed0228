//! Built-in raw sensor signals.
//!
//! Scale factors are the defaults of each sensor's power-on range; range
//! reconfiguration is the sensor driver's business, not the engine's.

use super::{DataAttributes, DataSignal, SignalShape, SourceAddress};
use crate::registry::opcodes::timer as timer_ops;
use crate::registry::ModuleId;

fn raw(
    name: &str,
    module: ModuleId,
    register: u8,
    attributes: DataAttributes,
    scale: f32,
) -> DataSignal {
    DataSignal::new(
        name,
        SourceAddress::new(module as u8, register),
        SignalShape::numeric(attributes, scale),
    )
}

pub fn acceleration() -> DataSignal {
    raw(
        "acceleration",
        ModuleId::Accelerometer,
        0x04,
        DataAttributes::vector(2, 3, true),
        16384.0,
    )
    .with_enable_register(0x02)
    .with_packed(0x1c, 3)
    .with_components(&["x", "y", "z"])
}

pub fn angular_velocity() -> DataSignal {
    raw(
        "angular-velocity",
        ModuleId::Gyro,
        0x05,
        DataAttributes::vector(2, 3, true),
        16.4,
    )
    .with_enable_register(0x02)
    .with_packed(0x07, 3)
    .with_components(&["x", "y", "z"])
}

pub fn magnetic_field() -> DataSignal {
    raw(
        "magnetic-field",
        ModuleId::Magnetometer,
        0x05,
        DataAttributes::vector(2, 3, true),
        16.0,
    )
    .with_enable_register(0x02)
    .with_packed(0x09, 3)
    .with_components(&["x", "y", "z"])
}

pub fn pressure() -> DataSignal {
    raw(
        "pressure",
        ModuleId::Barometer,
        0x01,
        DataAttributes::scalar(4, false),
        256.0,
    )
    .with_enable_register(0x04)
}

pub fn altitude() -> DataSignal {
    raw(
        "altitude",
        ModuleId::Barometer,
        0x02,
        DataAttributes::scalar(4, true),
        256.0,
    )
    .with_enable_register(0x04)
}

/// Temperature of one channel; channels are selected by register index
pub fn temperature(channel: u8) -> DataSignal {
    raw(
        "temperature",
        ModuleId::Temperature,
        0x01,
        DataAttributes::scalar(2, true),
        8.0,
    )
    .with_index(channel)
}

pub fn switch() -> DataSignal {
    raw(
        "switch",
        ModuleId::Switch,
        0x01,
        DataAttributes::scalar(1, false),
        1.0,
    )
}

pub fn illuminance() -> DataSignal {
    raw(
        "illuminance",
        ModuleId::AmbientLight,
        0x03,
        DataAttributes::scalar(4, false),
        1000.0,
    )
    .with_enable_register(0x01)
}

pub fn relative_humidity() -> DataSignal {
    raw(
        "relative-humidity",
        ModuleId::Humidity,
        0x01,
        DataAttributes::scalar(4, false),
        1024.0,
    )
}

/// Fires each time timer `id` elapses; carries no payload
pub fn timer_fired(id: u8) -> DataSignal {
    DataSignal::new(
        "timer",
        SourceAddress::indexed(ModuleId::Timer as u8, timer_ops::NOTIFY, id),
        SignalShape {
            attributes: DataAttributes::scalar(0, false),
            scale: 1.0,
            kind: super::ValueKind::Opaque,
            wrappers: Vec::new(),
        },
    )
}

/// Every built-in raw signal
pub fn all() -> Vec<DataSignal> {
    vec![
        acceleration(),
        angular_velocity(),
        magnetic_field(),
        pressure(),
        altitude(),
        temperature(0),
        switch(),
        illuminance(),
        relative_humidity(),
    ]
}

/// Find the raw signal whose register produces `source`
///
/// Indexed registers match any index; the returned signal carries the
/// requested one.
pub fn lookup(source: &SourceAddress) -> Option<DataSignal> {
    all()
        .into_iter()
        .find(|s| s.source.module == source.module && s.source.register == source.register)
        .map(|s| match (s.source.index, source.index) {
            (Some(_), Some(i)) => s.with_index(i),
            _ => s,
        })
}

pub fn by_name(name: &str) -> Option<DataSignal> {
    all().into_iter().find(|s| s.name == name)
}
