//! Error types for trace loading and analysis
//!
//! [`TraceError`] covers both hard loader failures (unreadable file, invalid
//! JSON) and the degraded conditions the engine meets during a pass. The pass
//! itself never returns an error: degraded conditions are recorded in
//! [`Diagnostics`] and reflected in step content instead.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// An event is missing a field its kind requires
    #[error("malformed {kind} event #{id}: missing {field}")]
    MalformedEvent {
        id: u64,
        kind: String,
        field: &'static str,
    },

    /// A record in the document is not an object of the expected shape
    #[error("invalid record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    /// Alias resolution found no target in any frame
    #[error("no resolvable target for pointer '{pointer}'")]
    UnresolvedPointerTarget { pointer: String },

    /// `func_exit` observed with no open frame
    #[error("func_exit for '{function}' with no open frame")]
    FrameUnderflow { function: String },

    /// A frame was still open when the event list ended
    #[error("frame '{frame_id}' still open at end of trace")]
    DanglingFrame { frame_id: String },

    /// An alias chain revisited a name
    #[error("alias chain for '{pointer}' revisits '{revisited}'")]
    CyclicAlias { pointer: String, revisited: String },

    /// An exit event had no matching open scope
    #[error("{event} in '{frame_id}' has no matching open scope")]
    ScopeMismatch { event: String, frame_id: String },

    #[error("trace document has no events array")]
    MissingEvents,

    #[error("invalid trace document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters and messages for every degraded condition met during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub malformed_events: usize,
    pub unresolved_pointers: usize,
    pub frame_underflows: usize,
    pub dangling_frames: usize,
    pub cyclic_aliases: usize,
    pub scope_mismatches: usize,
    pub messages: Vec<String>,
}

impl Diagnostics {
    /// Record a degraded condition and log it
    pub fn record(&mut self, err: TraceError) {
        match &err {
            TraceError::MalformedEvent { .. } | TraceError::InvalidRecord { .. } => {
                self.malformed_events += 1
            }
            TraceError::UnresolvedPointerTarget { .. } => self.unresolved_pointers += 1,
            TraceError::FrameUnderflow { .. } => self.frame_underflows += 1,
            TraceError::DanglingFrame { .. } => self.dangling_frames += 1,
            TraceError::CyclicAlias { .. } => self.cyclic_aliases += 1,
            TraceError::ScopeMismatch { .. } => self.scope_mismatches += 1,
            TraceError::MissingEvents | TraceError::Document(_) | TraceError::Io(_) => {}
        }
        tracing::warn!("{}", err);
        self.messages.push(err.to_string());
    }

    /// True if the pass met no degraded condition
    pub fn is_clean(&self) -> bool {
        self.messages.is_empty()
    }
}
