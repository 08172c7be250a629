//! In-memory backend for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use catchsync_common::{BackendVariant, Error, MediaField, RecordCode, Result};

use crate::backend::{CatchBackend, MediaPart};

/// A request the in-memory backend received.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Metadata {
        variant: BackendVariant,
        code: String,
        payload: Value,
    },
    Media {
        variant: BackendVariant,
        code: String,
        fields: Vec<MediaField>,
        file_names: Vec<String>,
    },
}

impl BackendCall {
    /// Record code the call was made for.
    pub fn code(&self) -> &str {
        match self {
            BackendCall::Metadata { code, .. } | BackendCall::Media { code, .. } => code,
        }
    }
}

/// Scripted failure returned instead of accepting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Behave as if the network were down.
    Unreachable,
    /// Answer with the given error status.
    Reject(u16),
}

impl ScriptedFailure {
    fn to_error(&self) -> Error {
        match self {
            ScriptedFailure::Unreachable => Error::Unreachable("scripted: no route".to_string()),
            ScriptedFailure::Reject(status) => Error::ServerRejected {
                status: *status,
                message: "scripted rejection".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct Script {
    metadata: HashMap<String, ScriptedFailure>,
    media: HashMap<String, ScriptedFailure>,
    offline: bool,
}

/// In-memory backend.
///
/// Accepts every request unless a failure was scripted for the record, and
/// keeps a log of all calls (including failed ones) in arrival order.
#[derive(Default)]
pub struct MemoryBackend {
    calls: Mutex<Vec<BackendCall>>,
    script: Mutex<Script>,
}

impl MemoryBackend {
    /// Create a backend that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail metadata submissions for `code`.
    pub fn fail_metadata(&self, code: &str, failure: ScriptedFailure) {
        self.script
            .lock()
            .unwrap()
            .metadata
            .insert(code.to_string(), failure);
    }

    /// Fail media uploads for `code`.
    pub fn fail_media(&self, code: &str, failure: ScriptedFailure) {
        self.script
            .lock()
            .unwrap()
            .media
            .insert(code.to_string(), failure);
    }

    /// Fail every request as unreachable while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.script.lock().unwrap().offline = offline;
    }

    /// Drop all scripted failures.
    pub fn heal(&self) {
        *self.script.lock().unwrap() = Script::default();
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Codes of the metadata submissions received, in order.
    pub fn metadata_codes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BackendCall::Metadata { .. }))
            .map(|c| c.code().to_string())
            .collect()
    }

    /// Codes of the media uploads received, in order.
    pub fn media_codes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BackendCall::Media { .. }))
            .map(|c| c.code().to_string())
            .collect()
    }

    fn scripted(&self, code: &str, media: bool) -> Option<Error> {
        let script = self.script.lock().unwrap();
        if script.offline {
            return Some(ScriptedFailure::Unreachable.to_error());
        }
        let table = if media { &script.media } else { &script.metadata };
        table.get(code).map(ScriptedFailure::to_error)
    }
}

#[async_trait]
impl CatchBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit_metadata(&self, variant: BackendVariant, payload: &Value) -> Result<()> {
        let code = payload
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RequestBuild("Payload has no code".to_string()))?
            .to_string();

        self.calls.lock().unwrap().push(BackendCall::Metadata {
            variant,
            code: code.clone(),
            payload: payload.clone(),
        });

        match self.scripted(&code, false) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn upload_media(
        &self,
        variant: BackendVariant,
        code: &RecordCode,
        parts: Vec<MediaPart>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(BackendCall::Media {
            variant,
            code: code.to_string(),
            fields: parts.iter().map(|p| p.field).collect(),
            file_names: parts.into_iter().map(|p| p.file_name).collect(),
        });

        match self.scripted(code.as_str(), true) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
