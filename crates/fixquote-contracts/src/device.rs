use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

impl DeviceClass {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" | "phone" => Some(Self::Mobile),
            "desktop" | "tablet" => Some(Self::Desktop),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

/// Per-device-class tuning for the whole assistant pipeline.
///
/// The web widget derives the class from viewport width; here it arrives
/// as an explicit flag. Both assistant variants share this one struct
/// instead of carrying their own constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssistantOptions {
    pub max_images: usize,
    pub max_dimension: u32,
    pub base_quality: u8,
    pub fallback_quality: u8,
    pub size_threshold_kb: u64,
    pub timeout_ms: u64,
}

impl AssistantOptions {
    pub fn for_device(device: DeviceClass) -> Self {
        match device {
            DeviceClass::Mobile => Self {
                max_images: 1,
                max_dimension: 1024,
                base_quality: 70,
                fallback_quality: 50,
                size_threshold_kb: 500,
                timeout_ms: 30_000,
            },
            DeviceClass::Desktop => Self {
                max_images: 3,
                max_dimension: 1600,
                base_quality: 80,
                fallback_quality: 60,
                size_threshold_kb: 500,
                timeout_ms: 45_000,
            },
        }
    }

    pub fn size_threshold_bytes(&self) -> u64 {
        self.size_threshold_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::{AssistantOptions, DeviceClass};

    #[test]
    fn parse_accepts_known_classes() {
        assert_eq!(DeviceClass::parse(" Mobile "), Some(DeviceClass::Mobile));
        assert_eq!(DeviceClass::parse("desktop"), Some(DeviceClass::Desktop));
        assert_eq!(DeviceClass::parse("watch"), None);
    }

    #[test]
    fn mobile_options_are_tighter_than_desktop() {
        let mobile = AssistantOptions::for_device(DeviceClass::Mobile);
        let desktop = AssistantOptions::for_device(DeviceClass::Desktop);
        assert!(mobile.max_images < desktop.max_images);
        assert!(mobile.max_dimension < desktop.max_dimension);
        assert!(mobile.base_quality < desktop.base_quality);
        assert!(mobile.timeout_ms < desktop.timeout_ms);
        assert_eq!(mobile.size_threshold_kb, desktop.size_threshold_kb);
    }

    #[test]
    fn threshold_converts_to_bytes() {
        let options = AssistantOptions::for_device(DeviceClass::Mobile);
        assert_eq!(options.size_threshold_bytes(), 500 * 1024);
    }
}
