use crate::batch::{CapturedImage, ImageBatch};
use crate::device::{AssistantOptions, DeviceClass};
use crate::error::AssistantError;
use crate::outcome::{AnalysisOutcome, EstimateResult};
use crate::request::AnalysisRequest;
use crate::transcript::ChatTranscript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialoguePhase {
    Idle,
    Submitting,
    Result,
    Clarifying,
    OffTopic,
    Failed,
}

/// The assistant session: one user's image batch, transcript, and
/// dialogue phase. All mutation goes through this type so the phase
/// only ever moves
/// `Idle -> Submitting -> {Result, Clarifying, OffTopic, Failed}`, with
/// `Clarifying` looping back through `Submitting` on every user turn
/// and `reset` returning to `Idle` from anywhere.
#[derive(Debug, Clone)]
pub struct AssistantSession {
    device: DeviceClass,
    options: AssistantOptions,
    phase: DialoguePhase,
    batch: ImageBatch,
    transcript: ChatTranscript,
    description: String,
    location: Option<String>,
    service_context: Option<String>,
    result: Option<EstimateResult>,
    off_topic_message: Option<String>,
    failure: Option<AssistantError>,
}

impl AssistantSession {
    pub fn new(device: DeviceClass) -> Self {
        Self {
            device,
            options: AssistantOptions::for_device(device),
            phase: DialoguePhase::Idle,
            batch: ImageBatch::new(),
            transcript: ChatTranscript::new(),
            description: String::new(),
            location: None,
            service_context: None,
            result: None,
            off_topic_message: None,
            failure: None,
        }
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn options(&self) -> &AssistantOptions {
        &self.options
    }

    pub fn phase(&self) -> DialoguePhase {
        self.phase
    }

    pub fn batch(&self) -> &ImageBatch {
        &self.batch
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    /// Present in `Result` (real estimate) and `Failed` (degraded
    /// placeholder); `None` elsewhere.
    pub fn result(&self) -> Option<&EstimateResult> {
        self.result.as_ref()
    }

    pub fn off_topic_message(&self) -> Option<&str> {
        self.off_topic_message.as_deref()
    }

    pub fn failure(&self) -> Option<&AssistantError> {
        self.failure.as_ref()
    }

    pub fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(AssistantError::user_message)
    }

    pub fn set_location(&mut self, location: Option<String>) {
        self.location = normalize(location);
    }

    pub fn set_service_context(&mut self, service_context: Option<String>) {
        self.service_context = normalize(service_context);
    }

    pub fn service_context(&self) -> Option<&str> {
        self.service_context.as_deref()
    }

    pub fn add_images(&mut self, images: Vec<CapturedImage>) -> Result<(), AssistantError> {
        if self.phase == DialoguePhase::Submitting {
            return Err(AssistantError::Busy);
        }
        self.batch.try_add(images, self.options.max_images)
    }

    pub fn remove_image(&mut self, index: usize) -> Result<Option<CapturedImage>, AssistantError> {
        if self.phase == DialoguePhase::Submitting {
            return Err(AssistantError::Busy);
        }
        Ok(self.batch.remove(index))
    }

    /// Builds the next request and moves to `Submitting`. User input is
    /// serialized: a second call while one is in flight is rejected.
    ///
    /// In `Clarifying` (or retrying a failure mid-clarification) the
    /// text is a chat turn and the FULL batch plus the whole transcript
    /// go out again; clarification never shrinks the payload. From any
    /// other phase the text starts a fresh request and stale chat or
    /// results are discarded first.
    pub fn begin_submit(&mut self, text: &str) -> Result<AnalysisRequest, AssistantError> {
        if self.phase == DialoguePhase::Submitting {
            return Err(AssistantError::Busy);
        }
        let clarifying = matches!(self.phase, DialoguePhase::Clarifying)
            || (matches!(self.phase, DialoguePhase::Failed) && !self.transcript.is_empty());

        let request = if clarifying {
            self.transcript.push_user(text);
            AnalysisRequest::new(
                self.batch.payloads(),
                text,
                self.location.clone(),
                self.service_context.clone(),
                Some(self.transcript.turns().to_vec()),
                self.device,
            )
        } else {
            self.transcript.clear();
            self.result = None;
            self.off_topic_message = None;
            self.description = text.to_string();
            AnalysisRequest::new(
                self.batch.payloads(),
                text,
                self.location.clone(),
                self.service_context.clone(),
                None,
                self.device,
            )
        };

        self.failure = None;
        self.phase = DialoguePhase::Submitting;
        Ok(request)
    }

    /// Routes a backend outcome. Returns false (and changes nothing)
    /// when no submission is in flight, so a late arrival from an
    /// abandoned call is ignored rather than applied.
    pub fn apply_outcome(&mut self, outcome: AnalysisOutcome) -> bool {
        if self.phase != DialoguePhase::Submitting {
            return false;
        }
        match outcome {
            AnalysisOutcome::Final(result) => {
                self.transcript.clear();
                self.result = Some(result);
                self.phase = DialoguePhase::Result;
            }
            AnalysisOutcome::NeedsClarification { questions } => {
                self.transcript.push_assistant_questions(&questions);
                self.phase = DialoguePhase::Clarifying;
            }
            AnalysisOutcome::OffTopic { message } => {
                self.transcript.clear();
                self.result = None;
                self.off_topic_message = Some(message);
                self.phase = DialoguePhase::OffTopic;
            }
        }
        true
    }

    /// Routes a pipeline failure. The degraded placeholder keeps the
    /// UI populated next to the error message.
    pub fn apply_failure(&mut self, error: AssistantError, fallback: EstimateResult) -> bool {
        if self.phase != DialoguePhase::Submitting {
            return false;
        }
        self.failure = Some(error);
        self.result = Some(fallback);
        self.phase = DialoguePhase::Failed;
        true
    }

    /// Start over: every entity back to its initial empty value, from
    /// any phase, including mid-flight (the in-flight result will then
    /// be ignored by `apply_outcome`).
    pub fn reset(&mut self) {
        self.phase = DialoguePhase::Idle;
        self.batch.clear();
        self.transcript.clear();
        self.description.clear();
        self.result = None;
        self.off_topic_message = None;
        self.failure = None;
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
