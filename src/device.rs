use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

/// Set by the libgphoto2 udev rules on devices it can drive over PTP.
pub const PTP_FLAG_PROPERTIES: &[&str] = &["ID_GPHOTO2", "GPHOTO2_DRIVER"];
/// The USB interface descriptors of the device, see `parse_interfaces`.
pub const USB_INTERFACES_PROPERTY: &str = "ID_USB_INTERFACES";
/// Set by the media-player-info udev rules on portable media players.
pub const MEDIA_PLAYER_PROPERTY: &str = "ID_MEDIA_PLAYER";
/// Model name properties, in order of preference.
pub const MODEL_PROPERTIES: &[&str] = &["ID_MODEL", "ID_MODEL_FROM_DATABASE"];

/// USB class code for still image devices.
const IMAGE_CLASS: u8 = 0x06;
/// Still image protocols which speak PTP: bulk-only PTP and its vendor variant.
const PTP_PROTOCOLS: &[u8] = &[0x01, 0x02];

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Add,
    Remove,
    Other,
}

/// Any action other than `add` and `remove` parses as `Other`.
impl FromStr for DeviceAction {
    type Err = Infallible;

    fn from_str(action: &str) -> Result<DeviceAction, Infallible> {
        Ok(match action {
            "add" => DeviceAction::Add,
            "remove" => DeviceAction::Remove,
            _ => DeviceAction::Other,
        })
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceAction::Add => "add",
            DeviceAction::Remove => "remove",
            DeviceAction::Other => "other",
        };
        f.write_str(name)
    }
}

/// A single hotplug notification, as delivered by an `EventSource`.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct DeviceEvent {
    /// The device path, unique per physical device for as long as it stays attached.
    pub path: String,
    pub action: DeviceAction,
    pub properties: BTreeMap<String, String>,
    /// Mount points already known for this device when the event was produced, best first.
    pub mount_points: Vec<PathBuf>,
}

impl DeviceEvent {
    pub fn new<P: Into<String>>(path: P, action: DeviceAction) -> DeviceEvent {
        DeviceEvent {
            path: path.into(),
            action,
            properties: BTreeMap::new(),
            mount_points: vec![],
        }
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_mount_point<P: Into<PathBuf>>(mut self, mount_point: P) -> Self {
        self.mount_points.push(mount_point.into());
        self
    }

    /// A short human readable name for log lines.
    pub fn description(&self) -> String {
        match self.model() {
            Some(model) => format!("{} ({})", &self.path, model),
            None => self.path.clone(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        MODEL_PROPERTIES.iter().find_map(|key| self.property(key))
    }
}

/// Typed access to the attributes the OS attached to a device.
pub trait DeviceProperties {
    fn property(&self, key: &str) -> Option<&str>;

    fn has_property(&self, key: &str) -> bool {
        self.property(key).is_some()
    }
}

impl DeviceProperties for DeviceEvent {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties.property(key)
    }
}

impl DeviceProperties for BTreeMap<String, String> {
    fn property(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl DeviceProperties for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

/// How a device can be ingested, if at all.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraProtocol {
    None,
    MassStorage,
    Ptp,
}

impl fmt::Display for CameraProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraProtocol::None => "none",
            CameraProtocol::MassStorage => "mass-storage",
            CameraProtocol::Ptp => "ptp",
        };
        f.write_str(name)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Classification {
    pub protocol: CameraProtocol,
    /// Which signal produced the verdict.
    pub evidence: String,
}

impl Classification {
    fn new<S: Into<String>>(protocol: CameraProtocol, evidence: S) -> Classification {
        Classification {
            protocol,
            evidence: evidence.into(),
        }
    }

    pub fn is_camera(&self) -> bool {
        self.protocol != CameraProtocol::None
    }
}

/// One record out of a USB interfaces descriptor.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct UsbInterface {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl UsbInterface {
    pub fn is_ptp(&self) -> bool {
        self.class == IMAGE_CLASS && PTP_PROTOCOLS.contains(&self.protocol)
    }
}

fn parse_hex_field(field: &str) -> Option<u8> {
    u8::from_str_radix(field.trim().trim_start_matches(':'), 16).ok()
}

/// Parse a `;` separated list of `class/subclass/protocol` records, eg `:06/01/01;:08/06/50`.
///
/// Records with fewer than three fields or fields that aren't hex are skipped.
pub fn parse_interfaces(descriptor: &str) -> impl Iterator<Item = UsbInterface> + '_ {
    descriptor.split(';').filter_map(|record| {
        let mut fields = record.split('/');
        let class = parse_hex_field(fields.next()?)?;
        let subclass = parse_hex_field(fields.next()?)?;
        let protocol = parse_hex_field(fields.next()?)?;
        Some(UsbInterface {
            class,
            subclass,
            protocol,
        })
    })
}

/// Rewrite udev's packed `ID_USB_INTERFACES` form (`:060101:080650:`) into the record form
/// `parse_interfaces` reads (`:06/01/01;:08/06/50`). Entries that aren't six characters long are
/// passed through untouched, and will be skipped when parsed.
pub fn normalise_packed_interfaces(packed: &str) -> String {
    packed
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match (entry.get(0..2), entry.get(2..4), entry.get(4..6)) {
            (Some(class), Some(subclass), Some(protocol)) if entry.len() == 6 => {
                format!(":{}/{}/{}", class, subclass, protocol)
            }
            _ => format!(":{}", entry),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Decides whether a device is a camera, and how to talk to it.
///
/// Vendors expose inconsistent metadata, so the signals are tried strongest first: an explicit
/// PTP flag, then the interface descriptors, then the model name.
#[derive(Debug, Clone)]
pub struct Classifier {
    camera_models: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(camera_models: I) -> Classifier
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Classifier {
            camera_models: camera_models
                .into_iter()
                .map(|model| model.as_ref().trim().to_lowercase())
                .filter(|model| !model.is_empty())
                .collect(),
        }
    }

    pub fn classify<P: DeviceProperties + ?Sized>(&self, device: &P) -> Classification {
        if let Some(key) = PTP_FLAG_PROPERTIES.iter().find(|key| device.has_property(key)) {
            trace!("PTP flag {} present", key);
            return Classification::new(CameraProtocol::Ptp, "explicit PTP flag");
        }

        if let Some(descriptor) = device.property(USB_INTERFACES_PROPERTY) {
            if let Some(iface) = parse_interfaces(descriptor).find(UsbInterface::is_ptp) {
                return Classification::new(
                    CameraProtocol::Ptp,
                    format!(
                        "image class interface {:02x}/{:02x}/{:02x}",
                        iface.class, iface.subclass, iface.protocol
                    ),
                );
            }
        }

        // Media players don't get a transfer path of their own, they're only ingested when
        // their model name gives them away.
        let media_player = device.has_property(MEDIA_PLAYER_PROPERTY);

        let model = MODEL_PROPERTIES
            .iter()
            .find_map(|key| device.property(key))
            .map(str::to_lowercase);
        if let Some(model) = model {
            if let Some(matched) = self
                .camera_models
                .iter()
                .find(|needle| model.contains(needle.as_str()))
            {
                let evidence = if media_player {
                    format!("model matches {:?} (media player)", matched)
                } else {
                    format!("model matches {:?}", matched)
                };
                return Classification::new(CameraProtocol::MassStorage, evidence);
            }
        }

        Classification::new(CameraProtocol::None, "no camera signals")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(vec!["canon", "Nikon", "gopro"])
    }

    fn device() -> DeviceEvent {
        DeviceEvent::new("/devices/pci0000:00/0000:00:14.0/usb1/1-2", DeviceAction::Add)
    }

    #[test]
    fn test_explicit_ptp_flag_wins() {
        let dev = device()
            .with_property("ID_GPHOTO2", "1")
            .with_property(USB_INTERFACES_PROPERTY, ":08/06/50")
            .with_property("ID_MODEL", "Keyboard");
        let result = classifier().classify(&dev);
        assert_eq!(result.protocol, CameraProtocol::Ptp);
        assert_eq!(result.evidence, "explicit PTP flag");
    }

    #[test]
    fn test_image_interface_is_ptp() {
        for descriptor in &[":06/01/01", ":08/06/50;:06/01/02", ":03/01/01;:06/01/01;"] {
            let dev = device().with_property(USB_INTERFACES_PROPERTY, *descriptor);
            assert_eq!(
                classifier().classify(&dev).protocol,
                CameraProtocol::Ptp,
                "{}",
                descriptor
            );
        }
    }

    #[test]
    fn test_image_interface_with_other_protocol_is_not_ptp() {
        let dev = device().with_property(USB_INTERFACES_PROPERTY, ":06/01/03");
        assert_eq!(classifier().classify(&dev).protocol, CameraProtocol::None);
    }

    #[test]
    fn test_malformed_interface_records_are_skipped() {
        let descriptor = ":06;:06/01;zz/01/01;;/;:06/01/01";
        let parsed: Vec<_> = parse_interfaces(descriptor).collect();
        assert_eq!(
            parsed,
            vec![UsbInterface {
                class: 6,
                subclass: 1,
                protocol: 1
            }]
        );

        let dev = device().with_property(USB_INTERFACES_PROPERTY, ":06;:06/01;garbage");
        assert_eq!(classifier().classify(&dev).protocol, CameraProtocol::None);
    }

    #[test]
    fn test_model_substring_is_mass_storage() {
        let dev = device().with_property("ID_MODEL", "NIKON_DSC_D750");
        let result = classifier().classify(&dev);
        assert_eq!(result.protocol, CameraProtocol::MassStorage);
        assert_eq!(result.evidence, "model matches \"nikon\"");
    }

    #[test]
    fn test_model_from_database_is_consulted() {
        let dev = device().with_property("ID_MODEL_FROM_DATABASE", "HERO9 Black (GoPro)");
        assert_eq!(classifier().classify(&dev).protocol, CameraProtocol::MassStorage);
    }

    #[test]
    fn test_unknown_model_is_none() {
        let dev = device().with_property("ID_MODEL", "USB_Keyboard");
        let result = classifier().classify(&dev);
        assert_eq!(result.protocol, CameraProtocol::None);
        assert!(!result.is_camera());
    }

    #[test]
    fn test_media_player_falls_through_to_model() {
        let player = device().with_property(MEDIA_PLAYER_PROPERTY, "1");
        assert_eq!(classifier().classify(&player).protocol, CameraProtocol::None);

        let player = player.with_property("ID_MODEL", "GoPro_Hero");
        let result = classifier().classify(&player);
        assert_eq!(result.protocol, CameraProtocol::MassStorage);
        assert!(result.evidence.contains("media player"));
    }

    #[test]
    fn test_no_models_configured() {
        let classifier = Classifier::new(Vec::<String>::new());
        let dev = device().with_property("ID_MODEL", "Canon_EOS");
        assert_eq!(classifier.classify(&dev).protocol, CameraProtocol::None);
    }

    #[test]
    fn test_classifies_plain_property_maps() {
        let mut props = HashMap::new();
        props.insert("ID_MODEL".to_string(), "Canon Digital Camera".to_string());
        assert_eq!(classifier().classify(&props).protocol, CameraProtocol::MassStorage);
    }

    #[test]
    fn test_normalises_packed_interfaces() {
        assert_eq!(normalise_packed_interfaces(":060101:080650:"), ":06/01/01;:08/06/50");
        assert_eq!(normalise_packed_interfaces(""), "");
        assert_eq!(normalise_packed_interfaces(":0601:"), ":0601");

        let packed = normalise_packed_interfaces(":080650:060102:");
        assert!(parse_interfaces(&packed).any(|iface| iface.is_ptp()));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("add".parse::<DeviceAction>(), Ok(DeviceAction::Add));
        assert_eq!("remove".parse::<DeviceAction>(), Ok(DeviceAction::Remove));
        assert_eq!("bind".parse::<DeviceAction>(), Ok(DeviceAction::Other));
        assert_eq!("".parse::<DeviceAction>(), Ok(DeviceAction::Other));
    }
}
