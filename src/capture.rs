use futures::channel::mpsc;

use crate::staging::RawFile;

/// A completed unit from a capture device (dictation, recorder, camera).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Provisional transcript for the utterance in progress. Replaces the previous delta.
    TextDelta(String),
    /// Settled transcript, appended to the draft.
    FinalText(String),
    FileReady(RawFile),
}

/// Producer/consumer pair for capture events. Devices push into the sender;
/// the orchestrator drains the receiver as a stream.
pub fn capture_channel() -> (mpsc::UnboundedSender<CaptureEvent>, mpsc::UnboundedReceiver<CaptureEvent>) {
    mpsc::unbounded()
}

/// Text being composed: committed text plus the live provisional tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftBuffer {
    committed: String,
    interim: String,
}

impl DraftBuffer {
    pub fn set(&mut self, text: impl Into<String>) {
        self.committed = text.into();
        self.interim.clear();
    }

    pub fn push_delta(&mut self, delta: &str) {
        self.interim = delta.to_string();
    }

    pub fn push_final(&mut self, text: &str) {
        self.committed.push_str(text);
        self.interim.clear();
    }

    pub fn text(&self) -> String {
        format!("{}{}", self.committed, self.interim)
    }

    pub fn take(&mut self) -> String {
        let text = self.text();
        self.clear();
        text
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.interim.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.interim.is_empty()
    }
}
