use failure::Error;

use crate::device::DeviceEvent;
use crate::hotplug::EventSource;

/// Stands in for the udev monitor in builds without the `udev` feature.
#[derive(Debug)]
pub struct UdevSource {
    _private: (),
}

impl UdevSource {
    pub fn usb() -> Result<UdevSource, Error> {
        bail!("camwatch was built without the udev feature, so it can't watch for devices");
    }
}

impl EventSource for UdevSource {
    fn poll(&mut self) -> Result<Vec<DeviceEvent>, Error> {
        Ok(vec![])
    }
}
