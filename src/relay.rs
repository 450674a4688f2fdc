use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{SessionError, SessionErrorKind};

pub const RELAY_MESSAGE_TYPE: &str = "updateChatGPT";
pub const MAX_RECENT_DELIVERIES: usize = 25;

/// A context that can receive transcript text. The address identifies the
/// context (for tab-like targets, its URL); how the text is applied is the
/// target's concern.
pub trait RelayTarget: Send + Sync {
    fn address(&self) -> &str;
    fn submit(&self, message: &str) -> Result<String, String>;
}

#[derive(Debug, Serialize)]
pub struct RelayRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RelayResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    pub target_address: Option<String>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(target_address: String) -> Self {
        Self {
            success: true,
            target_address: Some(target_address),
            error: None,
        }
    }

    pub fn failed(target_address: Option<String>, error: String) -> Self {
        Self {
            success: false,
            target_address,
            error: Some(error),
        }
    }

    /// Typed view of a failed delivery; a missing target and a target that
    /// refused the text are distinct kinds for callers that report them.
    pub fn as_error(&self) -> Option<SessionError> {
        if self.success {
            return None;
        }
        let message = self.error.clone().unwrap_or_else(|| "delivery failed".to_string());
        let kind = if self.target_address.is_none() {
            SessionErrorKind::RelayTargetNotFound
        } else {
            SessionErrorKind::RelayApplyFailed
        };
        Some(SessionError::new(kind, message))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub text: String,
    pub success: bool,
}

pub fn append_recent(records: &mut Vec<DeliveryRecord>, record: DeliveryRecord, max: usize) {
    records.insert(0, record);
    records.truncate(max);
}

/// Holds the open targets and routes each delivery to the first one whose
/// address contains the configured pattern. Delivery failures are data, not
/// errors; the next transcript event retries naturally.
pub struct TargetRegistry {
    targets: Vec<Box<dyn RelayTarget>>,
    address_pattern: String,
}

impl TargetRegistry {
    pub fn new(address_pattern: impl Into<String>) -> Self {
        Self {
            targets: Vec::new(),
            address_pattern: address_pattern.into(),
        }
    }

    pub fn register(&mut self, target: Box<dyn RelayTarget>) {
        self.targets.push(target);
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn address_pattern(&self) -> &str {
        &self.address_pattern
    }

    pub fn has_match(&self) -> bool {
        self.find_target().is_some()
    }

    fn find_target(&self) -> Option<&dyn RelayTarget> {
        self.targets
            .iter()
            .map(|target| &**target)
            .find(|target| target.address().contains(&self.address_pattern))
    }

    pub fn deliver(&self, text: &str) -> DeliveryResult {
        let Some(target) = self.find_target() else {
            return DeliveryResult::failed(
                None,
                format!("no target found matching {}", self.address_pattern),
            );
        };
        let address = target.address().to_string();

        let request = RelayRequest {
            kind: RELAY_MESSAGE_TYPE,
            text,
        };
        let message = match serde_json::to_string(&request) {
            Ok(message) => message,
            Err(error) => return DeliveryResult::failed(Some(address), error.to_string()),
        };

        let raw_response = match target.submit(&message) {
            Ok(raw) => raw,
            Err(error) => return DeliveryResult::failed(Some(address), error),
        };

        match serde_json::from_str::<RelayResponse>(&raw_response) {
            Ok(response) if response.success => DeliveryResult::delivered(address),
            Ok(response) => DeliveryResult::failed(
                Some(address),
                response
                    .error
                    .unwrap_or_else(|| "target reported failure".to_string()),
            ),
            Err(error) => DeliveryResult::failed(Some(address), error.to_string()),
        }
    }
}

/// Polls for a matching target with a fixed delay and an attempt cap, checking
/// the session's active flag between attempts. Returns false on exhaustion or
/// cancellation instead of spinning forever.
pub fn wait_for_target(
    registry: &TargetRegistry,
    active: &AtomicBool,
    max_attempts: usize,
    delay: Duration,
) -> bool {
    for attempt in 0..max_attempts {
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        if registry.has_match() {
            return true;
        }
        if attempt + 1 < max_attempts {
            std::thread::sleep(delay);
        }
    }
    log::warn!(
        "no target matching {} appeared within {} attempts",
        registry.address_pattern(),
        max_attempts
    );
    false
}
