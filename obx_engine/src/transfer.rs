//! USB plumbing: device setup, endpoint submissions, fault policy.
//!
//! The vendor mode lives on three interfaces: interface 1 alt 3 carries
//! audio on a pair of interrupt endpoints, interface 2 alt 2 carries MIDI
//! on a pair of bulk endpoints, and interface 3 alt 0 is claimed without
//! being used. Exactly one transfer per direction is ever in flight; the
//! worker loops submit, block on completion, hand the buffer to a mover,
//! and submit again, so per-direction ordering holds by construction.

use std::time::Duration;

use log::{debug, error, info};
use rusb::{Context, DeviceHandle, UsbContext};

use crate::device::{self, DeviceDesc};
use crate::error::{EngineError, Result};

/// Audio device-to-host interrupt endpoint.
pub(crate) const AUDIO_IN_EP: u8 = 0x83;
/// Audio host-to-device interrupt endpoint.
pub(crate) const AUDIO_OUT_EP: u8 = 0x03;
/// MIDI device-to-host bulk endpoint.
pub(crate) const MIDI_IN_EP: u8 = 0x81;
/// MIDI host-to-device bulk endpoint.
pub(crate) const MIDI_OUT_EP: u8 = 0x01;

const ENDPOINTS: [u8; 4] = [AUDIO_IN_EP, AUDIO_OUT_EP, MIDI_IN_EP, MIDI_OUT_EP];

/// (interface, alternate setting) claimed for the vendor mode.
const IFACE_ALT_SETTINGS: [(u8, u8); 3] = [(1, 3), (2, 2), (3, 0)];

const USB_CONFIGURATION: u8 = 1;

/// Completion wait for the device-paced audio endpoints. Long enough that
/// it only fires on a silent device, short enough that a stop request is
/// observed promptly.
pub(crate) const AUDIO_TIMEOUT: Duration = Duration::from_millis(250);

/// MIDI-in poll slot inside the audio cycle. A timeout here is the idle
/// case, not a fault.
pub(crate) const MIDI_IN_POLL: Duration = Duration::from_millis(1);

/// Completion wait for outbound MIDI bulk transfers.
pub(crate) const MIDI_OUT_TIMEOUT: Duration = Duration::from_millis(250);

/// Byte and frame geometry of one transfer in each direction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferLayout {
    pub blocks_per_transfer: usize,
    pub frames_per_transfer: usize,
    pub inputs: usize,
    pub outputs: usize,
    /// Bytes of one host-to-device frame in the rings (f32 × inputs).
    pub p2o_frame_size: usize,
    /// Bytes of one device-to-host frame in the rings (f32 × outputs).
    pub o2p_frame_size: usize,
    /// Bytes of one whole host-to-device transfer in the rings.
    pub p2o_transfer_size: usize,
    /// Bytes of one whole device-to-host transfer in the rings.
    pub o2p_transfer_size: usize,
    /// On-wire length of one inbound audio transfer.
    pub data_in_len: usize,
    /// On-wire length of one outbound audio transfer.
    pub data_out_len: usize,
}

impl TransferLayout {
    pub(crate) fn new(desc: &DeviceDesc, blocks_per_transfer: usize) -> Self {
        let frames_per_transfer = obx_wire::FRAMES_PER_BLOCK * blocks_per_transfer;
        let p2o_frame_size = 4 * desc.inputs;
        let o2p_frame_size = 4 * desc.outputs;
        Self {
            blocks_per_transfer,
            frames_per_transfer,
            inputs: desc.inputs,
            outputs: desc.outputs,
            p2o_frame_size,
            o2p_frame_size,
            p2o_transfer_size: frames_per_transfer * p2o_frame_size,
            o2p_transfer_size: frames_per_transfer * o2p_frame_size,
            data_in_len: blocks_per_transfer * obx_wire::block_len(desc.outputs),
            data_out_len: blocks_per_transfer * obx_wire::block_len(desc.inputs),
        }
    }
}

/// How a failed submission is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferFault {
    /// The completion wait expired. Idle for MIDI-in, logged for audio.
    Timeout,
    /// USB is noisy; log and keep submitting.
    Transient,
    /// The endpoint is gone or the submission itself is broken; the engine
    /// moves to error state and the loops exit.
    Fatal,
}

pub(crate) fn classify(error: rusb::Error) -> TransferFault {
    match error {
        rusb::Error::Timeout => TransferFault::Timeout,
        rusb::Error::NoDevice
        | rusb::Error::NotFound
        | rusb::Error::Access
        | rusb::Error::InvalidParam
        | rusb::Error::NoMem
        | rusb::Error::NotSupported
        | rusb::Error::BadDescriptor => TransferFault::Fatal,
        _ => TransferFault::Transient,
    }
}

/// An open, configured device: the ownership root for all USB I/O.
pub(crate) struct UsbLink {
    handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
}

impl UsbLink {
    /// Open by bus number and device address, matching the device table.
    pub(crate) fn open_bus_addr(bus: u8, address: u8) -> Result<(Self, &'static DeviceDesc)> {
        let context = Context::new().map_err(|e| {
            error!("cannot initialize USB context: {e}");
            EngineError::LibusbInitFailed
        })?;

        let devices = context.devices().map_err(|e| {
            error!("cannot list USB devices: {e}");
            EngineError::CantFindDev
        })?;

        for device in devices.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }
            let Ok(dd) = device.device_descriptor() else {
                continue;
            };
            let Some(desc) = device::lookup(dd.vendor_id(), dd.product_id()) else {
                continue;
            };

            let handle = device.open().map_err(|e| {
                error!("cannot open {} at {bus:03}:{address:03}: {e}", desc.name);
                EngineError::CantOpenDev
            })?;

            info!("opened {} at {bus:03}:{address:03}", desc.name);
            let mut link = Self {
                handle,
                claimed: Vec::new(),
            };
            link.prepare()?;
            return Ok((link, desc));
        }

        Err(EngineError::CantFindDev)
    }

    /// Wrap an externally-opened device file descriptor (sandboxed hosts
    /// receive the fd from a broker and cannot enumerate).
    #[cfg(unix)]
    pub(crate) fn open_fd(fd: std::os::unix::io::RawFd) -> Result<(Self, &'static DeviceDesc)> {
        use std::ptr::NonNull;

        let context = Context::new().map_err(|e| {
            error!("cannot initialize USB context: {e}");
            EngineError::LibusbInitFailed
        })?;

        let mut raw_handle = std::ptr::null_mut();
        // SAFETY: the context is live, fd is a device node the caller opened
        // for us, and libusb takes its own reference to the fd.
        let rc = unsafe { rusb::ffi::libusb_wrap_sys_device(context.as_raw(), fd as *mut i32, &mut raw_handle) };
        let handle = match NonNull::new(raw_handle) {
            Some(ptr) if rc == 0 => {
                // SAFETY: libusb_wrap_sys_device returned success, so ptr is
                // a valid open handle belonging to `context`.
                unsafe { DeviceHandle::from_libusb(context, ptr) }
            }
            _ => {
                error!("cannot wrap device fd {fd} (libusb rc {rc})");
                return Err(EngineError::CantOpenDev);
            }
        };

        let dd = handle.device().device_descriptor().map_err(|e| {
            error!("cannot read descriptor from wrapped fd: {e}");
            EngineError::CantOpenDev
        })?;
        let desc = device::lookup(dd.vendor_id(), dd.product_id()).ok_or(EngineError::CantFindDev)?;

        info!("opened {} from fd {fd}", desc.name);
        let mut link = Self {
            handle,
            claimed: Vec::new(),
        };
        link.prepare()?;
        Ok((link, desc))
    }

    /// Select the vendor mode: configuration 1, the three interface/alt
    /// pairs, halts cleared on all four endpoints.
    ///
    /// On failure the partially-claimed link is dropped by the caller,
    /// which releases whatever was claimed so far.
    fn prepare(&mut self) -> Result<()> {
        let _ = self.handle.set_auto_detach_kernel_driver(true);

        self.handle.set_active_configuration(USB_CONFIGURATION).map_err(|e| {
            error!("cannot set USB configuration {USB_CONFIGURATION}: {e}");
            EngineError::CantSetUsbConfig
        })?;

        for (iface, alt) in IFACE_ALT_SETTINGS {
            self.handle.claim_interface(iface).map_err(|e| {
                error!("cannot claim interface {iface}: {e}");
                EngineError::CantClaimIf
            })?;
            self.claimed.push(iface);

            self.handle.set_alternate_setting(iface, alt).map_err(|e| {
                error!("cannot set interface {iface} alt setting {alt}: {e}");
                EngineError::CantSetAltSetting
            })?;
        }

        for endpoint in ENDPOINTS {
            self.handle.clear_halt(endpoint).map_err(|e| {
                error!("cannot clear endpoint {endpoint:#04x}: {e}");
                EngineError::CantClearEp
            })?;
        }

        debug!("vendor mode selected, endpoints clear");
        Ok(())
    }

    pub(crate) fn read_audio_in(&self, buf: &mut [u8]) -> rusb::Result<usize> {
        self.handle.read_interrupt(AUDIO_IN_EP, buf, AUDIO_TIMEOUT)
    }

    pub(crate) fn write_audio_out(&self, buf: &[u8]) -> rusb::Result<usize> {
        self.handle.write_interrupt(AUDIO_OUT_EP, buf, AUDIO_TIMEOUT)
    }

    pub(crate) fn poll_midi_in(&self, buf: &mut [u8]) -> rusb::Result<usize> {
        self.handle.read_bulk(MIDI_IN_EP, buf, MIDI_IN_POLL)
    }

    pub(crate) fn write_midi_out(&self, buf: &[u8]) -> rusb::Result<usize> {
        self.handle.write_bulk(MIDI_OUT_EP, buf, MIDI_OUT_TIMEOUT)
    }
}

impl Drop for UsbLink {
    fn drop(&mut self) {
        for &iface in self.claimed.iter().rev() {
            if let Err(e) = self.handle.release_interface(iface) {
                debug!("release interface {iface}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::device;

    use super::*;

    #[test]
    fn test_layout_for_stereo_device() {
        let desc = DeviceDesc {
            name: "test",
            vendor_id: 0,
            product_id: 0,
            inputs: 2,
            outputs: 2,
            output_track_scales: &[1.0, 1.0],
        };
        let layout = TransferLayout::new(&desc, 8);

        assert_eq!(layout.frames_per_transfer, 56);
        assert_eq!(layout.o2p_frame_size, 8);
        assert_eq!(layout.o2p_transfer_size, 448);
        assert_eq!(layout.p2o_transfer_size, 448);
        // 8 blocks of header + 7 frames × 2 channels × 4 bytes
        assert_eq!(layout.data_in_len, 8 * (4 + 56));
        assert_eq!(layout.data_out_len, layout.data_in_len);
    }

    #[test]
    fn test_layout_asymmetric_channels() {
        let desc = *device::lookup(0x1935, 0x000C).unwrap();
        let layout = TransferLayout::new(&desc, 24);

        assert_eq!(layout.frames_per_transfer, 168);
        assert_eq!(layout.p2o_frame_size, 8);
        assert_eq!(layout.o2p_frame_size, 48);
        assert_eq!(layout.data_out_len, 24 * obx_wire::block_len(2));
        assert_eq!(layout.data_in_len, 24 * obx_wire::block_len(12));
    }

    #[test]
    fn test_fault_classification() {
        assert_eq!(classify(rusb::Error::Timeout), TransferFault::Timeout);
        assert_eq!(classify(rusb::Error::Pipe), TransferFault::Transient);
        assert_eq!(classify(rusb::Error::Overflow), TransferFault::Transient);
        assert_eq!(classify(rusb::Error::Io), TransferFault::Transient);
        assert_eq!(classify(rusb::Error::Interrupted), TransferFault::Transient);
        assert_eq!(classify(rusb::Error::NoDevice), TransferFault::Fatal);
        assert_eq!(classify(rusb::Error::NotFound), TransferFault::Fatal);
    }
}
