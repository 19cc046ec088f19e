use std::collections::BTreeMap;
use std::fmt;

use failure::Error;

use crate::device::{self, DeviceAction, DeviceEvent, USB_INTERFACES_PROPERTY};
use crate::hotplug::EventSource;

/// A udev netlink subscription to whole USB devices (not their interfaces).
pub struct UdevSource {
    socket: udev::MonitorSocket,
}

impl fmt::Debug for UdevSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdevSource").finish()
    }
}

impl UdevSource {
    pub fn usb() -> Result<UdevSource, Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("usb", "usb_device")?
            .listen()?;
        info!("Subscribed to udev usb events");
        Ok(UdevSource { socket })
    }
}

fn translate(event: &udev::Event) -> DeviceEvent {
    let action = match event.event_type() {
        udev::EventType::Add => DeviceAction::Add,
        udev::EventType::Remove => DeviceAction::Remove,
        _ => DeviceAction::Other,
    };

    let mut properties = BTreeMap::new();
    for property in event.properties() {
        let name = property.name().to_string_lossy().into_owned();
        let mut value = property.value().to_string_lossy().into_owned();
        if name == USB_INTERFACES_PROPERTY {
            value = device::normalise_packed_interfaces(&value);
        }
        properties.insert(name, value);
    }

    DeviceEvent {
        path: event.devpath().to_string_lossy().into_owned(),
        action,
        properties,
        mount_points: vec![],
    }
}

impl EventSource for UdevSource {
    fn poll(&mut self) -> Result<Vec<DeviceEvent>, Error> {
        Ok(self
            .socket
            .iter()
            .map(|event| {
                let event = translate(&event);
                trace!("udev: {} {}", event.action, &event.path);
                event
            })
            .collect())
    }
}
