use std::env;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use fixquote_contracts::batch::{approx_decoded_mb, check_budget, CapturedImage, EncodedImage};
use fixquote_contracts::device::AssistantOptions;
use fixquote_contracts::dialogue::{AssistantSession, DialoguePhase};
use fixquote_contracts::error::AssistantError;
use fixquote_contracts::events::{EventPayload, SessionLog};
use fixquote_contracts::outcome::{
    parse_outcome, Analysis, AnalysisOutcome, CostEstimate, EstimateResult,
};
use fixquote_contracts::receipts::{build_receipt, write_receipt};
use fixquote_contracts::request::AnalysisRequest;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use indexmap::IndexMap;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

const DEFAULT_API_BASE: &str = "https://api.fixquote.app/v1";
const DEFAULT_FALLBACK_ESTIMATES_JSON: &str = include_str!("../resources/fallback_estimates.json");

// ---------------------------------------------------------------------------
// Image normalizer

/// A raw user-supplied image before normalization.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub label: String,
    pub bytes: Vec<u8>,
}

pub fn read_image_source(path: &Path) -> Result<ImageSource> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImageSource { label, bytes })
}

/// Decode, bound, and JPEG-encode one image.
///
/// Downscale only: images already within the device bound keep their
/// dimensions. If the first encode lands over the size threshold, one
/// retry at the fallback quality runs and its output is kept whatever
/// its size. Never more than two passes.
pub fn normalize_image(
    bytes: &[u8],
    options: &AssistantOptions,
) -> Result<EncodedImage, AssistantError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| AssistantError::ImageLoad(err.to_string()))?;
    let bounded = if decoded.width().max(decoded.height()) > options.max_dimension {
        decoded.resize(
            options.max_dimension,
            options.max_dimension,
            FilterType::Lanczos3,
        )
    } else {
        decoded
    };

    let first = encode_jpeg(&bounded, options.base_quality)?;
    let (encoded, quality, passes) = if first.len() as u64 > options.size_threshold_bytes() {
        let second = encode_jpeg(&bounded, options.fallback_quality)?;
        (second, options.fallback_quality, 2)
    } else {
        (first, options.base_quality, 1)
    };

    Ok(EncodedImage {
        base64_jpeg: BASE64.encode(&encoded),
        width: bounded.width(),
        height: bounded.height(),
        quality,
        passes,
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssistantError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .map_err(|err| AssistantError::ImageLoad(err.to_string()))?;
    Ok(buffer)
}

pub fn capture_image(
    source: &ImageSource,
    options: &AssistantOptions,
) -> Result<CapturedImage, AssistantError> {
    let encoded = normalize_image(&source.bytes, options)?;
    let digest = hex::encode(Sha256::digest(&source.bytes));
    Ok(CapturedImage::new(
        source.label.clone(),
        digest,
        source.bytes.len() as u64,
        encoded,
    ))
}

/// Normalizes a whole selection, one thread per image. A single bad
/// image fails the entire preparation step; nothing partial comes back.
pub fn prepare_batch(
    sources: &[ImageSource],
    options: &AssistantOptions,
) -> Result<Vec<CapturedImage>, AssistantError> {
    thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| scope.spawn(move || capture_image(source, options)))
            .collect();
        let mut captured = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(image)) => captured.push(image),
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error =
                            Some(AssistantError::ImageLoad("worker panicked".to_string()));
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(captured),
        }
    })
}

// ---------------------------------------------------------------------------
// Analysis backend

#[derive(Debug, Clone)]
pub struct AnalysisBackend {
    api_base: String,
    api_token: Option<String>,
    http: HttpClient,
}

impl AnalysisBackend {
    pub fn from_env() -> Self {
        Self::new(api_base_from_env(), non_empty_env("FIXQUOTE_API_TOKEN"))
    }

    pub fn new(api_base: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_token,
            http: HttpClient::new(),
        }
    }

    fn analyze_endpoint(&self) -> String {
        format!("{}/analyze", self.api_base)
    }

    /// Submits one analysis request and resolves to exactly one outcome
    /// or error.
    ///
    /// The budget gate runs first; a batch over the ceiling never
    /// touches the network. The POST itself runs on a worker thread
    /// raced against the device-class timer: if the timer fires first
    /// the call is abandoned (left running, its eventual result sent
    /// into a dropped channel) and `ClientTimeout` comes back.
    pub fn analyze(
        &self,
        request: &AnalysisRequest,
        options: &AssistantOptions,
    ) -> Result<(AnalysisOutcome, Value), AssistantError> {
        check_budget(&request.images)?;

        let body = serde_json::to_value(request)
            .map_err(|err| AssistantError::Network(err.to_string()))?;
        let http = self.http.clone();
        let endpoint = self.analyze_endpoint();
        let token = self.api_token.clone();

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(post_json(&http, &endpoint, token.as_deref(), &body));
        });

        let raw = match receiver.recv_timeout(Duration::from_millis(options.timeout_ms)) {
            Ok(result) => result?,
            Err(_) => {
                return Err(AssistantError::ClientTimeout {
                    timeout_ms: options.timeout_ms,
                })
            }
        };

        let outcome = parse_outcome(&raw).map_err(|err| AssistantError::Server {
            status: 200,
            message: err.to_string(),
        })?;
        Ok((outcome, raw))
    }
}

fn post_json(
    http: &HttpClient,
    endpoint: &str,
    token: Option<&str>,
    body: &Value,
) -> Result<Value, AssistantError> {
    let mut builder = http
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .json(body);
    if let Some(token) = token {
        builder = builder.bearer_auth(token);
    }
    let response = builder
        .send()
        .map_err(|err| AssistantError::Network(err.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .map_err(|err| AssistantError::Network(err.to_string()))?;
    if !status.is_success() {
        return Err(map_error_status(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|_| AssistantError::Server {
        status: status.as_u16(),
        message: "invalid JSON payload".to_string(),
    })
}

/// 413 and 504 get their own variants so the UI can distinguish them
/// from the client-side pre-check and local timer.
fn map_error_status(status: u16, body: &str) -> AssistantError {
    match status {
        413 => AssistantError::ServerPayloadTooLarge,
        504 => AssistantError::ServerTimeout,
        other => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|parsed| {
                    parsed
                        .get("error")
                        .or_else(|| parsed.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| other.to_string());
            AssistantError::Server {
                status: other,
                message,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback estimates

/// Degraded placeholder estimates shown with a failure so the UI is
/// never left empty. Bundled table, ordered as authored.
#[derive(Debug, Clone)]
pub struct FallbackTable {
    entries: IndexMap<String, FallbackEntry>,
}

#[derive(Debug, Clone)]
struct FallbackEntry {
    issue: String,
    min: f64,
    max: f64,
}

impl FallbackTable {
    pub fn bundled() -> Result<Self> {
        Self::parse(DEFAULT_FALLBACK_ESTIMATES_JSON)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: Value =
            serde_json::from_str(raw).context("fallback estimate table is not valid JSON")?;
        let Some(root) = parsed.as_object() else {
            bail!("fallback estimate table is not a JSON object");
        };
        let mut entries = IndexMap::new();
        for (tag, row) in root {
            let issue = row
                .get("issue")
                .and_then(Value::as_str)
                .map(str::to_string);
            let min = row.get("min").and_then(Value::as_f64);
            let max = row.get("max").and_then(Value::as_f64);
            let (Some(issue), Some(min), Some(max)) = (issue, min, max) else {
                bail!("fallback entry '{tag}' is missing issue/min/max");
            };
            entries.insert(tag.clone(), FallbackEntry { issue, min, max });
        }
        if !entries.contains_key("general") {
            bail!("fallback estimate table has no 'general' entry");
        }
        Ok(Self { entries })
    }

    pub fn tags(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn estimate_for(&self, service_context: Option<&str>) -> EstimateResult {
        let entry = service_context
            .map(|tag| tag.trim().to_ascii_lowercase())
            .and_then(|tag| self.entries.get(tag.as_str()))
            .or_else(|| self.entries.get("general"))
            .expect("parse guarantees a 'general' entry");
        EstimateResult {
            analysis: Analysis {
                issue: entry.issue.clone(),
                detail: None,
                severity: None,
            },
            cost_estimate: CostEstimate {
                min: entry.min,
                max: entry.max,
                currency: "EUR".to_string(),
            },
            fallback: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission orchestration

/// Runs one full turn: build the request, call the backend, route the
/// outcome into the session, and leave an event trail plus a receipt
/// either way.
///
/// The outcome (or failure) always reaches the session before any
/// event or receipt hits disk. Observability writes are best-effort:
/// a broken log path or receipts directory is reported on stderr but
/// never leaves the session stuck in `Submitting` or drops a backend
/// answer.
pub fn submit_turn(
    session: &mut AssistantSession,
    text: &str,
    backend: &AnalysisBackend,
    fallbacks: &FallbackTable,
    log: &SessionLog,
    receipts_dir: &Path,
) -> Result<DialoguePhase> {
    let request = session.begin_submit(text)?;
    let images: Vec<CapturedImage> = session.batch().images().to_vec();

    let mut payload = EventPayload::new();
    payload.insert("images".to_string(), json!(images.len()));
    payload.insert(
        "approx_mb".to_string(),
        json!(approx_decoded_mb(&request.images)),
    );
    emit_event(log, "submit_started", payload);

    let started = Instant::now();
    let receipt_path = receipts_dir.join(format!("receipt-{}.json", Utc::now().timestamp_micros()));

    match backend.analyze(&request, session.options()) {
        Ok((outcome, raw)) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let tag = outcome.tag();
            session.apply_outcome(outcome);

            let receipt = build_receipt(
                log.session_id(),
                &request,
                &images,
                Some(&raw),
                tag,
                None,
                elapsed_ms,
            );
            persist_receipt(&receipt_path, &receipt);

            let mut payload = EventPayload::new();
            payload.insert("outcome".to_string(), json!(tag));
            payload.insert("elapsed_ms".to_string(), json!(elapsed_ms));
            emit_event(log, "submit_finished", payload);
        }
        Err(error) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let message = error.to_string();
            let fallback = fallbacks.estimate_for(session.service_context());
            session.apply_failure(error, fallback);

            let receipt = build_receipt(
                log.session_id(),
                &request,
                &images,
                None,
                "failed",
                Some(&message),
                elapsed_ms,
            );
            persist_receipt(&receipt_path, &receipt);

            let mut payload = EventPayload::new();
            payload.insert("error".to_string(), json!(message));
            payload.insert("elapsed_ms".to_string(), json!(elapsed_ms));
            emit_event(log, "submit_failed", payload);
        }
    }

    Ok(session.phase())
}

fn emit_event(log: &SessionLog, event_type: &str, payload: EventPayload) {
    if let Err(err) = log.emit(event_type, payload) {
        eprintln!("fixquote: could not write {event_type} event: {err:#}");
    }
}

fn persist_receipt(path: &Path, receipt: &Value) {
    if let Err(err) = write_receipt(path, receipt) {
        eprintln!("fixquote: could not write receipt {}: {err:#}", path.display());
    }
}

// ---------------------------------------------------------------------------
// Work-order lookup

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    ByNumber,
    ByName,
    Verify,
}

impl LookupMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "by_number" | "number" => Some(Self::ByNumber),
            "by_name" | "name" => Some(Self::ByName),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ByNumber => "by_number",
            Self::ByName => "by_name",
            Self::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub order_number: String,
    pub client_name: Option<String>,
    pub service: Option<String>,
    pub status: Option<String>,
    pub scheduled_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub summary: OrderSummary,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub total_due: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    Preview(OrderSummary),
    Candidates(Vec<OrderSummary>),
    Verified(OrderDetails),
    NotFound { message: String },
}

#[derive(Debug, Clone)]
pub struct WorkOrderClient {
    api_base: String,
    api_token: Option<String>,
    http: HttpClient,
}

impl WorkOrderClient {
    pub fn from_env() -> Self {
        Self::new(api_base_from_env(), non_empty_env("FIXQUOTE_API_TOKEN"))
    }

    pub fn new(api_base: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_token,
            http: HttpClient::new(),
        }
    }

    /// `verify` requires the client name; the backend cross-checks it
    /// against the order before releasing full details.
    pub fn lookup(
        &self,
        query: &str,
        mode: LookupMode,
        client_name: Option<&str>,
    ) -> Result<OrderLookup> {
        if mode == LookupMode::Verify && client_name.map(str::trim).unwrap_or("").is_empty() {
            bail!("verify lookup needs the client name");
        }
        let mut body = Map::new();
        body.insert("query".to_string(), Value::String(query.trim().to_string()));
        body.insert(
            "mode".to_string(),
            Value::String(mode.wire_name().to_string()),
        );
        if let Some(name) = client_name {
            body.insert(
                "client_name".to_string(),
                Value::String(name.trim().to_string()),
            );
        }

        let endpoint = format!("{}/work-orders/lookup", self.api_base);
        let payload = post_json(
            &self.http,
            &endpoint,
            self.api_token.as_deref(),
            &Value::Object(body),
        )
        .map_err(|err| anyhow::anyhow!("work-order lookup failed: {err}"))?;
        parse_order_lookup(&payload)
    }
}

pub fn parse_order_lookup(payload: &Value) -> Result<OrderLookup> {
    let Some(root) = payload.as_object() else {
        bail!("work-order response is not a JSON object");
    };

    if !root.get("found").and_then(Value::as_bool).unwrap_or(true) {
        let message = root
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("No matching work order.")
            .to_string();
        return Ok(OrderLookup::NotFound { message });
    }

    if let Some(matches) = root.get("matches").and_then(Value::as_array) {
        let candidates: Vec<OrderSummary> = matches
            .iter()
            .filter_map(|row| parse_order_summary(row).ok())
            .collect();
        if candidates.is_empty() {
            bail!("work-order response listed matches but none were parseable");
        }
        return Ok(OrderLookup::Candidates(candidates));
    }

    let Some(order) = root.get("order") else {
        bail!("work-order response has neither matches nor an order");
    };
    let summary = parse_order_summary(order)?;

    if root
        .get("verified")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let details = order.as_object().cloned().unwrap_or_default();
        return Ok(OrderLookup::Verified(OrderDetails {
            summary,
            address: details
                .get("address")
                .and_then(Value::as_str)
                .map(str::to_string),
            notes: details
                .get("notes")
                .and_then(Value::as_str)
                .map(str::to_string),
            total_due: details.get("total_due").and_then(Value::as_f64),
        }));
    }
    Ok(OrderLookup::Preview(summary))
}

fn parse_order_summary(value: &Value) -> Result<OrderSummary> {
    let Some(obj) = value.as_object() else {
        bail!("work order entry is not a JSON object");
    };
    let order_number = obj
        .get("order_number")
        .or_else(|| obj.get("number"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let Some(order_number) = order_number else {
        bail!("work order entry has no order number");
    };
    Ok(OrderSummary {
        order_number: order_number.to_string(),
        client_name: obj
            .get("client_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        service: obj
            .get("service")
            .and_then(Value::as_str)
            .map(str::to_string),
        status: obj
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string),
        scheduled_date: obj
            .get("scheduled_date")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

// ---------------------------------------------------------------------------
// Booking handoff

#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfirmation {
    pub reference: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BookingClient {
    api_base: String,
    api_token: Option<String>,
    http: HttpClient,
}

impl BookingClient {
    pub fn from_env() -> Self {
        Self::new(api_base_from_env(), non_empty_env("FIXQUOTE_API_TOKEN"))
    }

    pub fn new(api_base: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_token,
            http: HttpClient::new(),
        }
    }

    /// Hands a finished estimate plus contact fields to the booking
    /// backend; email/WhatsApp notifications are its business from
    /// there.
    pub fn book(
        &self,
        estimate: &EstimateResult,
        contact_name: &str,
        contact_phone: &str,
        location: Option<&str>,
    ) -> Result<BookingConfirmation> {
        if contact_name.trim().is_empty() || contact_phone.trim().is_empty() {
            bail!("booking needs a contact name and phone number");
        }
        let body = json!({
            "analysis": estimate.analysis,
            "cost_estimate": estimate.cost_estimate,
            "fallback": estimate.fallback,
            "contact": {
                "name": contact_name.trim(),
                "phone": contact_phone.trim(),
            },
            "location": location,
        });

        let endpoint = format!("{}/bookings", self.api_base);
        let payload = post_json(&self.http, &endpoint, self.api_token.as_deref(), &body)
            .map_err(|err| anyhow::anyhow!("booking request failed: {err}"))?;

        let reference = payload
            .get("reference")
            .or_else(|| payload.get("booking_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(reference) = reference else {
            bail!("booking response carries no reference");
        };
        Ok(BookingConfirmation {
            reference,
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

// ---------------------------------------------------------------------------
// Environment

fn api_base_from_env() -> String {
    env::var("FIXQUOTE_API_BASE")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
