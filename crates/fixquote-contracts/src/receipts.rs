use std::path::Path;

use serde_json::{Map, Value};

use crate::batch::CapturedImage;
use crate::request::AnalysisRequest;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// One submission's audit record: what went out, what came back, and
/// how it ended. Image bodies never land on disk; only their digests
/// and sizes do.
pub fn build_receipt(
    session_id: &str,
    request: &AnalysisRequest,
    images: &[CapturedImage],
    backend_response: Option<&Value>,
    outcome_tag: &str,
    error: Option<&str>,
    elapsed_ms: u64,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "session_id".to_string(),
        Value::String(session_id.to_string()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );

    let digests: Vec<Value> = images
        .iter()
        .map(|image| {
            let mut entry = Map::new();
            entry.insert("label".to_string(), Value::String(image.label.clone()));
            entry.insert(
                "sha256".to_string(),
                Value::String(image.source_sha256.clone()),
            );
            entry.insert(
                "source_bytes".to_string(),
                Value::Number(image.source_bytes.into()),
            );
            entry.insert(
                "encoded_bytes".to_string(),
                Value::Number((image.encoded.base64_jpeg.len() as u64).into()),
            );
            entry.insert(
                "passes".to_string(),
                Value::Number(u64::from(image.encoded.passes).into()),
            );
            Value::Object(entry)
        })
        .collect();
    root.insert("images".to_string(), Value::Array(digests));

    root.insert(
        "response".to_string(),
        backend_response
            .map(sanitize_payload)
            .unwrap_or(Value::Null),
    );
    root.insert(
        "outcome".to_string(),
        Value::String(outcome_tag.to_string()),
    );
    root.insert(
        "error".to_string(),
        error
            .map(|text| Value::String(text.to_string()))
            .unwrap_or(Value::Null),
    );
    root.insert("elapsed_ms".to_string(), Value::Number(elapsed_ms.into()));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Strips bulky or sensitive blobs before anything is persisted.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "images" | "image" | "b64_json" | "base64_jpeg" | "data"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{build_receipt, write_receipt, RECEIPT_SCHEMA_VERSION};
    use crate::batch::{CapturedImage, EncodedImage};
    use crate::device::DeviceClass;
    use crate::request::AnalysisRequest;

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(
            vec!["QUJDREVG".to_string()],
            "leaking trap",
            Some("Lisbon".to_string()),
            Some("plumbing".to_string()),
            None,
            DeviceClass::Mobile,
        )
    }

    fn captured() -> CapturedImage {
        CapturedImage::new(
            "sink.jpg",
            "ab12cd34",
            600 * 1024,
            EncodedImage {
                base64_jpeg: "QUJDREVG".to_string(),
                width: 1024,
                height: 768,
                quality: 70,
                passes: 2,
            },
        )
    }

    #[test]
    fn receipt_omits_image_bodies_but_keeps_digests() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("receipt-1.json");
        let response = json!({"success": true, "analysis": {"issue": "leak"}});

        let payload = build_receipt(
            "sess-1",
            &request(),
            &[captured()],
            Some(&response),
            "final_result",
            None,
            1234,
        );
        write_receipt(&path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["images"], json!("<omitted>"));
        assert_eq!(parsed["request"]["description"], json!("leaking trap"));
        assert_eq!(parsed["images"][0]["sha256"], json!("ab12cd34"));
        assert_eq!(parsed["images"][0]["passes"], json!(2));
        assert_eq!(parsed["outcome"], json!("final_result"));
        assert_eq!(parsed["error"], Value::Null);
        assert_eq!(parsed["elapsed_ms"], json!(1234));
        Ok(())
    }

    #[test]
    fn failed_submission_records_error_and_no_response() {
        let payload = build_receipt(
            "sess-1",
            &request(),
            &[captured()],
            None,
            "failed",
            Some("network request failed: connection refused"),
            30_000,
        );
        assert_eq!(payload["response"], Value::Null);
        assert_eq!(
            payload["error"],
            json!("network request failed: connection refused")
        );
    }
}
