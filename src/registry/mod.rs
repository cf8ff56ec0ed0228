//! Module registry
//!
//! The board reports each module's presence, implementation and revision in
//! response to a `[id, 0x80]` read at connect time. The registry keeps those
//! reports and answers capability questions from them: how many ids a
//! resource class can hand out, whether a revision-gated feature exists, how
//! wide a packed frame may be.

pub mod opcodes;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BoardError, Result};
use crate::types::ResourceClass;

/// Read bit OR'ed into a register opcode
pub const READ_BIT: u8 = 0x80;

/// Register answering the module info read
pub const INFO_REGISTER: u8 = 0x80;

/// Payload bytes available in one processor notification after `[0x09, 0x03, id]`
pub const MAX_NOTIFY_PAYLOAD: usize = 17;

/// Largest packing factor the packer accepts regardless of sample width
pub const PACKER_COUNT_LIMIT: u8 = 8;

/// Board module identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModuleId {
    Switch = 0x01,
    Led = 0x02,
    Accelerometer = 0x03,
    Temperature = 0x04,
    Gpio = 0x05,
    NeoPixel = 0x06,
    IBeacon = 0x07,
    Haptic = 0x08,
    DataProcessor = 0x09,
    Event = 0x0a,
    Logging = 0x0b,
    Timer = 0x0c,
    SerialPassthrough = 0x0d,
    Macro = 0x0f,
    Settings = 0x11,
    Barometer = 0x12,
    Gyro = 0x13,
    AmbientLight = 0x14,
    Magnetometer = 0x15,
    Humidity = 0x16,
    SensorFusion = 0x19,
    Debug = 0xfe,
}

impl ModuleId {
    /// Every module the engine knows about, in discovery order
    pub const ALL: [ModuleId; 22] = [
        ModuleId::Switch,
        ModuleId::Led,
        ModuleId::Accelerometer,
        ModuleId::Temperature,
        ModuleId::Gpio,
        ModuleId::NeoPixel,
        ModuleId::IBeacon,
        ModuleId::Haptic,
        ModuleId::DataProcessor,
        ModuleId::Event,
        ModuleId::Logging,
        ModuleId::Timer,
        ModuleId::SerialPassthrough,
        ModuleId::Macro,
        ModuleId::Settings,
        ModuleId::Barometer,
        ModuleId::Gyro,
        ModuleId::AmbientLight,
        ModuleId::Magnetometer,
        ModuleId::Humidity,
        ModuleId::SensorFusion,
        ModuleId::Debug,
    ];

    /// Look up a module by its wire id
    pub fn from_u8(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| *m as u8 == id)
    }

    /// Display name
    pub fn display_name(self) -> &'static str {
        match self {
            ModuleId::Switch => "Switch",
            ModuleId::Led => "Led",
            ModuleId::Accelerometer => "Accelerometer",
            ModuleId::Temperature => "Temperature",
            ModuleId::Gpio => "Gpio",
            ModuleId::NeoPixel => "NeoPixel",
            ModuleId::IBeacon => "IBeacon",
            ModuleId::Haptic => "Haptic",
            ModuleId::DataProcessor => "DataProcessor",
            ModuleId::Event => "Event",
            ModuleId::Logging => "Logging",
            ModuleId::Timer => "Timer",
            ModuleId::SerialPassthrough => "SerialPassthrough",
            ModuleId::Macro => "Macro",
            ModuleId::Settings => "Settings",
            ModuleId::Barometer => "Barometer",
            ModuleId::Gyro => "Gyro",
            ModuleId::AmbientLight => "AmbientLight",
            ModuleId::Magnetometer => "Magnetometer",
            ModuleId::Humidity => "Humidity",
            ModuleId::SensorFusion => "SensorFusion",
            ModuleId::Debug => "Debug",
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// What the board reported about one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub present: bool,
    pub implementation: u8,
    pub revision: u8,
    /// Module specific trailing bytes (capacities, feature flags)
    pub extra: Vec<u8>,
}

impl ModuleInfo {
    /// Parse a `[id, 0x80, implementation, revision, extra...]` response
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < 2 || frame[1] != INFO_REGISTER {
            return Err(BoardError::Protocol(format!(
                "not a module info response: {:02x?}",
                frame
            )));
        }
        let id = ModuleId::from_u8(frame[0])
            .ok_or_else(|| BoardError::Protocol(format!("unknown module {:#04x}", frame[0])))?;

        if frame.len() < 4 {
            return Ok(Self::absent(id));
        }

        Ok(Self {
            id,
            present: true,
            implementation: frame[2],
            revision: frame[3],
            extra: frame[4..].to_vec(),
        })
    }

    /// An absent module
    pub fn absent(id: ModuleId) -> Self {
        Self {
            id,
            present: false,
            implementation: 0xff,
            revision: 0xff,
            extra: Vec::new(),
        }
    }
}

/// Capability table built from the board's module info dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, ModuleInfo>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a module info report, replacing any earlier one
    pub fn insert(&mut self, info: ModuleInfo) {
        self.modules.insert(info.id, info);
    }

    /// Parse and record a module info response
    pub fn apply_info_response(&mut self, frame: &[u8]) -> Result<ModuleId> {
        let info = ModuleInfo::parse(frame)?;
        let id = info.id;
        self.insert(info);
        Ok(id)
    }

    pub fn info(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(&id)
    }

    pub fn is_present(&self, id: ModuleId) -> bool {
        self.info(id).is_some_and(|m| m.present)
    }

    /// Revision of a present module
    pub fn revision(&self, id: ModuleId) -> Option<u8> {
        self.info(id).filter(|m| m.present).map(|m| m.revision)
    }

    /// Implementation of a present module
    pub fn implementation(&self, id: ModuleId) -> Option<u8> {
        self.info(id).filter(|m| m.present).map(|m| m.implementation)
    }

    /// All known modules
    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    /// Number of ids the board can hand out for a resource class
    pub fn capacity(&self, class: ResourceClass) -> u8 {
        match self.info(class.module()) {
            Some(info) if !info.present => 0,
            Some(info) => info
                .extra
                .first()
                .copied()
                .unwrap_or_else(|| class.default_capacity()),
            None => class.default_capacity(),
        }
    }

    fn revision_at_least(&self, id: ModuleId, min: u8) -> bool {
        self.revision(id).is_some_and(|r| r >= min)
    }

    /// Average processor can run as a high-pass filter
    pub fn supports_highpass(&self) -> bool {
        self.revision_at_least(ModuleId::DataProcessor, opcodes::processor::HIGHPASS_REVISION)
    }

    /// Fuser processor is available
    pub fn supports_fuser(&self) -> bool {
        self.revision_at_least(ModuleId::DataProcessor, opcodes::processor::FUSER_REVISION)
    }

    /// Accounter output may be streamed live
    pub fn supports_streamed_accounting(&self) -> bool {
        self.revision_at_least(
            ModuleId::DataProcessor,
            opcodes::processor::ENHANCED_STREAMING_REVISION,
        )
    }

    /// Readout pages must be acknowledged
    pub fn supports_page_confirm(&self) -> bool {
        self.revision_at_least(ModuleId::Logging, opcodes::logging::PAGE_CONFIRM_REVISION)
    }

    /// Sensor fusion calibration state can be read back
    pub fn supports_calibration_readback(&self) -> bool {
        self.revision_at_least(
            ModuleId::SensorFusion,
            opcodes::sensor_fusion::CALIBRATION_REVISION,
        )
    }

    /// Largest packing factor for samples of `sample_len` bytes
    pub fn max_pack_count(&self, sample_len: usize) -> u8 {
        if sample_len == 0 {
            return 0;
        }
        let by_frame = (MAX_NOTIFY_PAYLOAD / sample_len).min(u8::MAX as usize) as u8;
        by_frame.min(PACKER_COUNT_LIMIT)
    }

    /// Fail with `InvalidOperation` unless `id` is present
    pub fn require(&self, id: ModuleId) -> Result<&ModuleInfo> {
        self.info(id)
            .filter(|m| m.present)
            .ok_or_else(|| BoardError::InvalidOperation(format!("{} module not present", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(frames: &[&[u8]]) -> ModuleRegistry {
        let mut reg = ModuleRegistry::new();
        for f in frames {
            reg.apply_info_response(f).unwrap();
        }
        reg
    }

    #[test]
    fn test_parse_present_module() {
        let info = ModuleInfo::parse(&[0x09, 0x80, 0x00, 0x03, 0x1c]).unwrap();
        assert_eq!(info.id, ModuleId::DataProcessor);
        assert!(info.present);
        assert_eq!(info.revision, 3);
        assert_eq!(info.extra, vec![0x1c]);
    }

    #[test]
    fn test_parse_absent_module() {
        let info = ModuleInfo::parse(&[0x19, 0x80]).unwrap();
        assert!(!info.present);
    }

    #[test]
    fn test_parse_rejects_other_registers() {
        assert!(ModuleInfo::parse(&[0x09, 0x02, 0x00]).is_err());
        assert!(ModuleInfo::parse(&[0x42, 0x80]).is_err());
    }

    #[test]
    fn test_capacity_from_extra_and_defaults() {
        let reg = registry_with(&[&[0x0b, 0x80, 0x00, 0x02, 0x04], &[0x0c, 0x80]]);
        assert_eq!(reg.capacity(ResourceClass::Logger), 4);
        assert_eq!(reg.capacity(ResourceClass::Timer), 0);
        assert_eq!(reg.capacity(ResourceClass::Processor), 28);
    }

    #[test]
    fn test_revision_gated_features() {
        let old = registry_with(&[&[0x09, 0x80, 0x00, 0x01], &[0x19, 0x80, 0x00, 0x00]]);
        assert!(!old.supports_highpass());
        assert!(!old.supports_fuser());
        assert!(!old.supports_calibration_readback());

        let new = registry_with(&[&[0x09, 0x80, 0x00, 0x03], &[0x19, 0x80, 0x00, 0x02]]);
        assert!(new.supports_highpass());
        assert!(new.supports_fuser());
        assert!(new.supports_calibration_readback());
    }

    #[test]
    fn test_max_pack_count() {
        let reg = ModuleRegistry::new();
        assert_eq!(reg.max_pack_count(6), 2);
        assert_eq!(reg.max_pack_count(4), 4);
        assert_eq!(reg.max_pack_count(1), PACKER_COUNT_LIMIT);
        assert_eq!(reg.max_pack_count(0), 0);
    }

    #[test]
    fn test_module_round_trip() {
        for m in ModuleId::ALL {
            assert_eq!(ModuleId::from_u8(m as u8), Some(m));
        }
        assert_eq!(ModuleId::from_u8(0x0e), None);
    }
}
