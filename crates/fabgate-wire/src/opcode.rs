use std::fmt;

/// 16-bit command opcodes understood by the printer fleet.
///
/// The values are fixed by device firmware. Payload contents stay
/// opaque at this layer; the opcode table exists so that gateways and
/// tooling can name traffic without decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    PrintSchedule = 0x03a9,
    EventNotify = 0x03e8,
    FirmwareVersion = 0x03ea,
    /// Temperatures ride in hundredths of a degree C.
    NozzleTemp = 0x03eb,
    HotbedTemp = 0x03ec,
    FanSpeed = 0x03ed,
    PrintSpeed = 0x03ee,
    AutoLeveling = 0x03ef,
    PrintControl = 0x03f0,
    /// Argument 1 selects onboard storage, anything else USB.
    FileListRequest = 0x03f1,
    GcodeFileRequest = 0x03f2,
    AllowFirmwareUpdate = 0x03f3,
    GcodeFileDownload = 0x03fc,
    ZAxisRecoup = 0x03fd,
    ExtrusionStep = 0x03fe,
    /// Firmware's spelling; filament load/unload mode.
    EnterOrQuitMateriel = 0x03ff,
    MoveStep = 0x0400,
    MoveDirection = 0x0401,
    MoveZero = 0x0402,
    AppQueryStatus = 0x0403,
    OnlineNotify = 0x0404,
    AppRecoverFactory = 0x0405,
    BleOnoff = 0x0407,
    DeleteGcodeFile = 0x0408,
    ResetGcodeParam = 0x0409,
    DeviceNameSet = 0x040a,
    DeviceLogUpload = 0x040b,
    OnoffModal = 0x040c,
    MotorLock = 0x040d,
    PreheatConfig = 0x040e,
    BreakPoint = 0x040f,
    AiCalib = 0x0410,
    VideoOnoff = 0x0411,
    AdvancedParameters = 0x0412,
    GcodeCommand = 0x0413,
    PreviewImageUrl = 0x0414,
    SystemCheck = 0x0419,
    AiSwitch = 0x041a,
    /// Bulk g-code transport used by the factory self-test.
    GcodeTransport = 0x07e2,
    AlexaMsg = 0x0bb8,
}

impl Opcode {
    /// Every known opcode, in ascending code order.
    pub const ALL: [Opcode; 40] = [
        Opcode::PrintSchedule,
        Opcode::EventNotify,
        Opcode::FirmwareVersion,
        Opcode::NozzleTemp,
        Opcode::HotbedTemp,
        Opcode::FanSpeed,
        Opcode::PrintSpeed,
        Opcode::AutoLeveling,
        Opcode::PrintControl,
        Opcode::FileListRequest,
        Opcode::GcodeFileRequest,
        Opcode::AllowFirmwareUpdate,
        Opcode::GcodeFileDownload,
        Opcode::ZAxisRecoup,
        Opcode::ExtrusionStep,
        Opcode::EnterOrQuitMateriel,
        Opcode::MoveStep,
        Opcode::MoveDirection,
        Opcode::MoveZero,
        Opcode::AppQueryStatus,
        Opcode::OnlineNotify,
        Opcode::AppRecoverFactory,
        Opcode::BleOnoff,
        Opcode::DeleteGcodeFile,
        Opcode::ResetGcodeParam,
        Opcode::DeviceNameSet,
        Opcode::DeviceLogUpload,
        Opcode::OnoffModal,
        Opcode::MotorLock,
        Opcode::PreheatConfig,
        Opcode::BreakPoint,
        Opcode::AiCalib,
        Opcode::VideoOnoff,
        Opcode::AdvancedParameters,
        Opcode::GcodeCommand,
        Opcode::PreviewImageUrl,
        Opcode::SystemCheck,
        Opcode::AiSwitch,
        Opcode::GcodeTransport,
        Opcode::AlexaMsg,
    ];

    /// Look up a wire code. Unknown codes are not an error at this
    /// layer; callers decide whether to forward or drop.
    pub fn from_code(code: u16) -> Option<Opcode> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Short human-readable hint for logs and dump tooling.
    pub fn describe(self) -> &'static str {
        match self {
            Opcode::PrintSchedule => "cloud print job scheduling",
            Opcode::EventNotify => "device event notification",
            Opcode::FirmwareVersion => "firmware version report",
            Opcode::NozzleTemp => "nozzle temperature (1/100 degC)",
            Opcode::HotbedTemp => "hotbed temperature (1/100 degC)",
            Opcode::FanSpeed => "cooling fan duty",
            Opcode::PrintSpeed => "print speed factor",
            Opcode::AutoLeveling => "bed leveling run",
            Opcode::PrintControl => "start/pause/resume/stop",
            Opcode::FileListRequest => "stored file listing",
            Opcode::GcodeFileRequest => "fetch g-code file",
            Opcode::AllowFirmwareUpdate => "permit OTA update",
            Opcode::GcodeFileDownload => "push g-code to device",
            Opcode::ZAxisRecoup => "z-axis compensation",
            Opcode::ExtrusionStep => "manual extrusion step",
            Opcode::EnterOrQuitMateriel => "filament load/unload mode",
            Opcode::MoveStep => "jog step size",
            Opcode::MoveDirection => "jog direction",
            Opcode::MoveZero => "home axes",
            Opcode::AppQueryStatus => "full status poll",
            Opcode::OnlineNotify => "presence announcement",
            Opcode::AppRecoverFactory => "factory reset",
            Opcode::BleOnoff => "bluetooth toggle",
            Opcode::DeleteGcodeFile => "delete stored file",
            Opcode::ResetGcodeParam => "reset print parameters",
            Opcode::DeviceNameSet => "rename device",
            Opcode::DeviceLogUpload => "device log upload request",
            Opcode::OnoffModal => "modal dialog toggle",
            Opcode::MotorLock => "stepper lock/unlock",
            Opcode::PreheatConfig => "preheat profile",
            Opcode::BreakPoint => "power-loss recovery point",
            Opcode::AiCalib => "AI camera calibration",
            Opcode::VideoOnoff => "camera stream toggle",
            Opcode::AdvancedParameters => "advanced tuning parameters",
            Opcode::GcodeCommand => "raw g-code passthrough",
            Opcode::PreviewImageUrl => "job preview image URL",
            Opcode::SystemCheck => "device self-check",
            Opcode::AiSwitch => "AI detection toggle",
            Opcode::GcodeTransport => "bulk g-code transport (self-test)",
            Opcode::AlexaMsg => "voice-assistant relay",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_known_values() {
        assert_eq!(Opcode::from_code(0x03eb), Some(Opcode::NozzleTemp));
        assert_eq!(Opcode::from_code(0x0413), Some(Opcode::GcodeCommand));
        assert_eq!(Opcode::from_code(0x0bb8), Some(Opcode::AlexaMsg));
    }

    #[test]
    fn test_from_code_unknown_is_none() {
        assert_eq!(Opcode::from_code(0x0000), None);
        assert_eq!(Opcode::from_code(0x0406), None); // hole in the table
        assert_eq!(Opcode::from_code(0xffff), None);
    }

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<u16> = Opcode::ALL.iter().map(|op| op.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_every_opcode_roundtrips_and_describes() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
            assert!(!op.describe().is_empty());
        }
    }

    #[test]
    fn test_display_uses_identifier() {
        assert_eq!(Opcode::NozzleTemp.to_string(), "NozzleTemp");
    }
}
