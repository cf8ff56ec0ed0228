//! Register opcodes and revision thresholds, grouped per module.

/// Data processor (0x09)
pub mod processor {
    pub const ADD: u8 = 0x02;
    pub const NOTIFY: u8 = 0x03;
    pub const STATE: u8 = 0x04;
    pub const PARAMETER: u8 = 0x05;
    pub const REMOVE: u8 = 0x06;
    pub const NOTIFY_ENABLE: u8 = 0x07;
    pub const REMOVE_ALL: u8 = 0x08;

    pub const HIGHPASS_REVISION: u8 = 2;
    pub const ENHANCED_STREAMING_REVISION: u8 = 2;
    pub const FUSER_REVISION: u8 = 3;

    /// Processor type bytes leading each config
    pub mod kind {
        pub const PASSTHROUGH: u8 = 0x01;
        pub const ACCUMULATOR: u8 = 0x02;
        pub const AVERAGE: u8 = 0x03;
        pub const COMPARISON: u8 = 0x06;
        pub const COMBINER: u8 = 0x07;
        pub const TIME: u8 = 0x08;
        pub const MATH: u8 = 0x09;
        pub const DELAY: u8 = 0x0a;
        pub const BUFFER: u8 = 0x0f;
        pub const PACKER: u8 = 0x10;
        pub const ACCOUNTER: u8 = 0x11;
        pub const FUSER: u8 = 0x1b;
    }
}

/// Event (0x0a)
pub mod event {
    pub const ENTRY: u8 = 0x02;
    pub const CMD_PARAMETERS: u8 = 0x03;
    pub const REMOVE: u8 = 0x04;
    pub const REMOVE_ALL: u8 = 0x05;
}

/// Logging (0x0b)
pub mod logging {
    pub const ENABLE: u8 = 0x01;
    pub const TRIGGER: u8 = 0x02;
    pub const REMOVE: u8 = 0x03;
    pub const TIME: u8 = 0x04;
    pub const LENGTH: u8 = 0x05;
    pub const READOUT: u8 = 0x06;
    pub const READOUT_NOTIFY: u8 = 0x07;
    pub const READOUT_PROGRESS: u8 = 0x08;
    pub const REMOVE_ENTRIES: u8 = 0x09;
    pub const READOUT_PAGE_COMPLETED: u8 = 0x0d;
    pub const READOUT_PAGE_CONFIRM: u8 = 0x0e;

    pub const PAGE_CONFIRM_REVISION: u8 = 2;

    /// Loggers store this many data bytes per entry
    pub const ENTRY_DATA_LEN: usize = 4;
    /// id/reset byte + 4-byte tick + data
    pub const ENTRY_LEN: usize = 1 + 4 + ENTRY_DATA_LEN;
}

/// Timer (0x0c)
pub mod timer {
    pub const CREATE: u8 = 0x02;
    pub const START: u8 = 0x03;
    pub const STOP: u8 = 0x04;
    pub const REMOVE: u8 = 0x05;
    pub const NOTIFY: u8 = 0x06;

    /// Repetition count meaning "fire forever"
    pub const REPEAT_FOREVER: u16 = 0xffff;
}

/// Macro (0x0f)
pub mod macros {
    pub const ENABLE: u8 = 0x01;
    pub const BEGIN: u8 = 0x02;
    pub const ADD_COMMAND: u8 = 0x03;
    pub const END: u8 = 0x04;
    pub const EXECUTE: u8 = 0x05;
    pub const ERASE_ALL: u8 = 0x08;
}

/// Sensor fusion (0x19)
pub mod sensor_fusion {
    pub const CALIBRATION_STATE: u8 = 0x0b;

    pub const CALIBRATION_REVISION: u8 = 1;
}
