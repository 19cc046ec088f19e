use std::io::Write;
use std::time::Duration;

use failure::Error;

use crate::device::{DeviceEvent, DeviceProperties};
use crate::ptp_device::{CameraConnector, CameraFile, CameraSession};

/// PTP object format code for folders.
const FORMAT_ASSOCIATION: u16 = 0x3001;
const ALL_STORAGES: u32 = 0xFFFF_FFFF;
/// `ObjectCompressedSize` for objects too big for its 32 bits.
const SIZE_UNKNOWN: u32 = 0xFFFF_FFFF;
const CHUNK_SIZE: u32 = 1024 * 1024;
const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

/// Talks PTP to cameras over libusb.
pub struct UsbConnector {
    context: &'static libusb::Context,
}

impl std::fmt::Debug for UsbConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbConnector")
            .field("context", &"libusb::Context { ... }")
            .finish()
    }
}

impl UsbConnector {
    /// Create the process' libusb context. It lives until exit, which lets sessions outlive any
    /// one borrow of it.
    pub fn new() -> Result<UsbConnector, Error> {
        let context = Box::leak(Box::new(libusb::Context::new()?));
        Ok(UsbConnector { context })
    }
}

fn parse_number(device: &DeviceEvent, key: &str) -> Result<u8, Error> {
    let value = device
        .property(key)
        .ok_or_else(|| format_err!("{} has no {} property", device.description(), key))?;
    value
        .trim()
        .parse()
        .map_err(|e| format_err!("Bad {} {:?} on {}: {}", key, value, device.description(), e))
}

impl CameraConnector for UsbConnector {
    fn connect(&self, device: &DeviceEvent) -> Result<Box<dyn CameraSession>, Error> {
        let bus = parse_number(device, "BUSNUM")?;
        let address = parse_number(device, "DEVNUM")?;

        for usb in self.context.devices()?.iter() {
            if usb.bus_number() != bus || usb.address() != address {
                continue;
            }
            let mut camera = ptp::PtpCamera::new(&usb)?;
            camera.open_session(TIMEOUT)?;
            let info = camera.get_device_info(TIMEOUT)?;
            info!(
                "Opened PTP session with {} {} (serial {})",
                info.Manufacturer, info.Model, info.SerialNumber
            );
            return Ok(Box::new(UsbSession { camera, open: true }));
        }
        bail!("No USB device at bus {} address {}", bus, address);
    }
}

struct UsbSession {
    camera: ptp::PtpCamera<'static>,
    open: bool,
}

impl CameraSession for UsbSession {
    fn files(&mut self) -> Result<Vec<CameraFile>, Error> {
        let mut files = vec![];
        for handle in self.camera.get_objecthandles_all(ALL_STORAGES, None, TIMEOUT)? {
            let info = self.camera.get_objectinfo(handle, TIMEOUT)?;
            if info.ObjectFormat == FORMAT_ASSOCIATION {
                continue;
            }
            files.push(CameraFile {
                handle,
                name: info.Filename,
                size: match info.ObjectCompressedSize {
                    SIZE_UNKNOWN => None,
                    size => Some(u64::from(size)),
                },
            });
        }
        Ok(files)
    }

    fn download(&mut self, file: &CameraFile, out: &mut dyn Write) -> Result<u64, Error> {
        // GetPartialObject offsets are 32 bits, so anything past 4GiB is out of reach.
        let size = match file.size {
            Some(size) => size as u32,
            None => bail!("{} is 4GiB or larger, which PTP can't transfer in parts", &file.name),
        };
        let mut offset: u32 = 0;
        while offset < size {
            let chunk = self
                .camera
                .get_partialobject(file.handle, offset, CHUNK_SIZE, TIMEOUT)?;
            if chunk.is_empty() {
                bail!("{} ended after {} of {} bytes", &file.name, offset, size);
            }
            out.write_all(&chunk)?;
            offset = offset.saturating_add(chunk.len() as u32);
        }
        Ok(u64::from(offset))
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.open {
            self.open = false;
            self.camera.close_session(TIMEOUT)?;
        }
        Ok(())
    }
}
