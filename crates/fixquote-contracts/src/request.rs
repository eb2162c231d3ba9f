use serde::{Deserialize, Serialize};

use crate::device::DeviceClass;
use crate::transcript::Turn;

/// One submission to the analysis backend. Built fresh for every
/// attempt and every clarification turn; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub images: Vec<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<Turn>>,
    pub device_type: String,
}

impl AnalysisRequest {
    pub fn new(
        images: Vec<String>,
        description: impl Into<String>,
        location: Option<String>,
        service_context: Option<String>,
        chat_history: Option<Vec<Turn>>,
        device: DeviceClass,
    ) -> Self {
        Self {
            images,
            description: description.into(),
            location,
            service_context,
            chat_history,
            device_type: device.wire_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AnalysisRequest;
    use crate::device::DeviceClass;
    use crate::transcript::{Role, Turn};

    #[test]
    fn optional_fields_are_omitted_from_the_wire() {
        let request = AnalysisRequest::new(
            vec!["abc".to_string()],
            "dripping tap",
            None,
            None,
            None,
            DeviceClass::Mobile,
        );
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["device_type"], json!("mobile"));
        assert_eq!(wire["images"], json!(["abc"]));
        assert!(wire.get("location").is_none());
        assert!(wire.get("chat_history").is_none());
    }

    #[test]
    fn chat_history_serializes_roles_in_snake_case() {
        let request = AnalysisRequest::new(
            Vec::new(),
            "follow-up",
            Some("Lisbon".to_string()),
            Some("plumbing".to_string()),
            Some(vec![Turn {
                role: Role::Assistant,
                text: "Which tap?".to_string(),
            }]),
            DeviceClass::Desktop,
        );
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["chat_history"][0]["role"], json!("assistant"));
        assert_eq!(wire["service_context"], json!("plumbing"));
    }
}
