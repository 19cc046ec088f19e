use failure::Error;

use crate::device::DeviceEvent;
use crate::ptp_device::{CameraConnector, CameraSession};

/// Stands in for the libusb connector in builds without the `usb` feature.
#[derive(Debug)]
pub struct UsbConnector;

impl UsbConnector {
    pub fn new() -> Result<UsbConnector, Error> {
        Ok(UsbConnector)
    }
}

impl CameraConnector for UsbConnector {
    fn connect(&self, device: &DeviceEvent) -> Result<Box<dyn CameraSession>, Error> {
        bail!(
            "Can't talk PTP to {}: camwatch was built without the usb feature",
            device.description()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAction;

    #[test]
    fn test_connecting_explains_missing_feature() {
        let event = DeviceEvent::new("/devices/usb1/1-1", DeviceAction::Add);
        let error = UsbConnector::new().unwrap().connect(&event).err().unwrap();
        assert!(format!("{}", error).contains("without the usb feature"));
    }
}
