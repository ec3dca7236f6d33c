//! Engine error codes.
//!
//! The code names are a stable surface shared with other implementations of
//! the transport; each maps to a fixed human-readable phrase. Underlying
//! USB error detail is logged at the failure site, not carried in the code.

use std::fmt;

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by the factories, `activate`, and the USB setup path.
///
/// The `No*` variants name a host-context field that was absent for an
/// enabled option. `NoReadSpace`/`NoWriteSpace`/`NoRead`/`NoWrite` identify
/// missing ring primitives; in this implementation the ring traits make
/// them unrepresentable, but the codes remain part of the stable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineError {
    /// Unspecified failure.
    Generic,
    /// libusb context initialization failed.
    LibusbInitFailed,
    /// The matched device could not be opened.
    CantOpenDev,
    /// Setting USB configuration 1 failed.
    CantSetUsbConfig,
    /// Claiming a vendor interface failed.
    CantClaimIf,
    /// Selecting an alternate setting failed.
    CantSetAltSetting,
    /// Clearing an endpoint halt failed.
    CantClearEp,
    /// Preparing a transfer failed.
    CantPrepareTransfer,
    /// No supported device matched the requested identity.
    CantFindDev,
    /// Host context lacks the ring read-space primitive.
    NoReadSpace,
    /// Host context lacks the ring write-space primitive.
    NoWriteSpace,
    /// Host context lacks the ring read primitive.
    NoRead,
    /// Host context lacks the ring write primitive.
    NoWrite,
    /// Host context lacks the host-to-device audio ring.
    NoP2oAudioBuf,
    /// Host context lacks the device-to-host audio ring.
    NoO2pAudioBuf,
    /// Host context lacks the host-to-device MIDI ring.
    NoP2oMidiBuf,
    /// Host context lacks the device-to-host MIDI ring.
    NoO2pMidiBuf,
    /// Host context lacks the clock.
    NoGetTime,
    /// Host context lacks the clock-recovery filter.
    NoDll,
}

impl EngineError {
    /// Fixed phrase for the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineError::Generic => "error",
            EngineError::LibusbInitFailed => "cannot initialize USB context",
            EngineError::CantOpenDev => "cannot open device",
            EngineError::CantSetUsbConfig => "cannot set USB configuration",
            EngineError::CantClaimIf => "cannot claim interface",
            EngineError::CantSetAltSetting => "cannot set alternate setting",
            EngineError::CantClearEp => "cannot clear endpoint",
            EngineError::CantPrepareTransfer => "cannot prepare transfer",
            EngineError::CantFindDev => "cannot find a matching device",
            EngineError::NoReadSpace => "read_space value not set",
            EngineError::NoWriteSpace => "write_space value not set",
            EngineError::NoRead => "read value not set",
            EngineError::NoWrite => "write value not set",
            EngineError::NoP2oAudioBuf => "p2o audio buffer not set",
            EngineError::NoO2pAudioBuf => "o2p audio buffer not set",
            EngineError::NoP2oMidiBuf => "p2o MIDI buffer not set",
            EngineError::NoO2pMidiBuf => "o2p MIDI buffer not set",
            EngineError::NoGetTime => "get_time function not set",
            EngineError::NoDll => "DLL not set",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrases_are_distinct() {
        let codes = [
            EngineError::Generic,
            EngineError::LibusbInitFailed,
            EngineError::CantOpenDev,
            EngineError::CantSetUsbConfig,
            EngineError::CantClaimIf,
            EngineError::CantSetAltSetting,
            EngineError::CantClearEp,
            EngineError::CantPrepareTransfer,
            EngineError::CantFindDev,
            EngineError::NoReadSpace,
            EngineError::NoWriteSpace,
            EngineError::NoRead,
            EngineError::NoWrite,
            EngineError::NoP2oAudioBuf,
            EngineError::NoO2pAudioBuf,
            EngineError::NoP2oMidiBuf,
            EngineError::NoO2pMidiBuf,
            EngineError::NoGetTime,
            EngineError::NoDll,
        ];

        for (i, a) in codes.iter().enumerate() {
            assert!(!a.as_str().is_empty());
            for b in &codes[i + 1..] {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }
}
