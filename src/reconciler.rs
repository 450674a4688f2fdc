use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Partial,
    Final,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub elements: Vec<String>,
}

impl TranscriptEvent {
    pub fn new(kind: TranscriptKind, elements: Vec<String>) -> Self {
        Self { kind, elements }
    }
}

/// Holds the current transcript text for one session. Every event replaces
/// the text wholesale; partial and final hypotheses share the same path, so
/// the displayed text always reflects the most recent service hypothesis.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    current_text: String,
    event_count: u64,
    final_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub event_count: u64,
    pub final_count: u64,
    pub text_len: usize,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &TranscriptEvent) -> &str {
        self.current_text = event.elements.join(" ");
        self.event_count += 1;
        if event.kind == TranscriptKind::Final {
            self.final_count += 1;
        }
        &self.current_text
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    pub fn status(&self) -> ReconcilerStatus {
        ReconcilerStatus {
            event_count: self.event_count,
            final_count: self.final_count,
            text_len: self.current_text.len(),
        }
    }
}
