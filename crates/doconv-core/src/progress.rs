//! Structured progress events and the sinks that receive them.
//!
//! The orchestrator reports each pipeline stage, and each unit inside a
//! stage, to a [`ProgressSink`]. Events are purely observational: nothing in
//! the pipeline reads them back.
//!
//! ```rust
//! use doconv_core::progress::{ProgressEvent, ProgressSink};
//! use std::sync::Mutex;
//!
//! let seen = Mutex::new(Vec::new());
//! let sink = |event: ProgressEvent| seen.lock().unwrap().push(event.to_string());
//! sink.emit(ProgressEvent::stage(doconv_core::progress::Stage::Starting));
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::ConversionError;

/// Pipeline stages in the order a request passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request accepted, nothing read yet.
    Starting,
    /// Source container is being opened.
    Loading,
    /// A reader is extracting one unit.
    Reading,
    /// The watermark remover is scanning the whole document.
    Scanning,
    /// The watermark remover is cleaning one page.
    Cleaning,
    /// A writer is encoding one unit.
    Writing,
    /// Output bytes are being serialized.
    Saving,
}

/// What a unit represents in the format being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Page,
    Slide,
    Section,
}

impl UnitKind {
    fn noun(self) -> &'static str {
        match self {
            UnitKind::Page => "page",
            UnitKind::Slide => "slide",
            UnitKind::Section => "section",
        }
    }
}

/// Position of a unit within its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitPosition {
    pub kind: UnitKind,
    /// 1-based unit index.
    pub index: u32,
    pub total: u32,
}

/// A single progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitPosition>,
}

impl ProgressEvent {
    /// Event for a whole stage.
    pub fn stage(stage: Stage) -> Self {
        Self { stage, unit: None }
    }

    /// Event for one unit inside a stage.
    pub fn unit(stage: Stage, kind: UnitKind, index: u32, total: u32) -> Self {
        Self {
            stage,
            unit: Some(UnitPosition { kind, index, total }),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.stage, self.unit) {
            (Stage::Reading, Some(u)) if u.kind == UnitKind::Page => {
                write!(f, "extracting text from page {}/{}", u.index, u.total)
            }
            (Stage::Reading, Some(u)) => {
                write!(f, "reading {} {}/{}", u.kind.noun(), u.index, u.total)
            }
            (Stage::Cleaning, Some(u)) => {
                write!(f, "cleaning watermark layer on {} {}/{}", u.kind.noun(), u.index, u.total)
            }
            (Stage::Writing, Some(u)) if u.kind == UnitKind::Slide => {
                write!(f, "processing slide {}/{}", u.index, u.total)
            }
            (Stage::Writing, Some(u)) if u.kind == UnitKind::Page => {
                write!(f, "rendering page {}/{}", u.index, u.total)
            }
            (Stage::Writing, Some(u)) => {
                write!(f, "writing {} {}/{}", u.kind.noun(), u.index, u.total)
            }
            (stage, Some(u)) => write!(f, "{:?} {} {}/{}", stage, u.kind.noun(), u.index, u.total),
            (Stage::Starting, None) => f.write_str("initializing local conversion engine"),
            (Stage::Loading, None) => f.write_str("loading source document"),
            (Stage::Reading, None) => f.write_str("parsing document structure"),
            (Stage::Scanning, None) => f.write_str("scanning for watermark signatures"),
            (Stage::Cleaning, None) => f.write_str("cleaning watermark layers"),
            (Stage::Writing, None) => f.write_str("building output document"),
            (Stage::Saving, None) => f.write_str("serializing output"),
        }
    }
}

/// Receives progress events.
///
/// `emit` is called synchronously from the pipeline and must return quickly;
/// sinks that forward to slower consumers should queue, as [`ChannelProgress`]
/// does.
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that discards every event.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that forwards events into an unbounded channel without blocking.
#[derive(Clone)]
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Shared flag a caller sets to stop a running request at the next unit
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-request progress and cancellation state threaded through the pipeline.
pub(crate) struct PipelineContext<'a> {
    sink: &'a dyn ProgressSink,
    cancel: Option<&'a CancellationFlag>,
    completed: u32,
}

impl<'a> PipelineContext<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, cancel: Option<&'a CancellationFlag>) -> Self {
        Self {
            sink,
            cancel,
            completed: 0,
        }
    }

    pub(crate) fn stage(&self, stage: Stage) {
        self.sink.emit(ProgressEvent::stage(stage));
    }

    /// Mark the start of a unit. This is the only place cancellation is
    /// observed, so a unit is never abandoned halfway.
    pub(crate) fn unit(
        &mut self,
        stage: Stage,
        kind: UnitKind,
        index: u32,
        total: u32,
    ) -> Result<(), ConversionError> {
        if self.cancel.is_some_and(CancellationFlag::is_cancelled) {
            return Err(ConversionError::Cancelled {
                completed: self.completed,
            });
        }
        self.sink.emit(ProgressEvent::unit(stage, kind, index, total));
        self.completed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_slide_writing_display() {
        let event = ProgressEvent::unit(Stage::Writing, UnitKind::Slide, 2, 3);
        assert_eq!(event.to_string(), "processing slide 2/3");
    }

    #[test]
    fn test_page_reading_display() {
        let event = ProgressEvent::unit(Stage::Reading, UnitKind::Page, 1, 4);
        assert_eq!(event.to_string(), "extracting text from page 1/4");
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Starting < Stage::Reading);
        assert!(Stage::Scanning < Stage::Cleaning);
        assert!(Stage::Writing < Stage::Saving);
    }

    #[test]
    fn test_closure_sink_receives_events() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: ProgressEvent| seen.lock().unwrap().push(event);
        let mut ctx = PipelineContext::new(&sink, None);
        ctx.stage(Stage::Starting);
        ctx.unit(Stage::Reading, UnitKind::Page, 1, 1).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cancellation_checked_at_unit_boundary() {
        let flag = CancellationFlag::new();
        let mut ctx = PipelineContext::new(&NoopProgress, Some(&flag));
        ctx.unit(Stage::Reading, UnitKind::Page, 1, 2).unwrap();
        flag.cancel();
        let err = ctx.unit(Stage::Reading, UnitKind::Page, 2, 2).unwrap_err();
        assert!(matches!(err, ConversionError::Cancelled { completed: 1 }));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelProgress::new();
        drop(rx);
        sink.emit(ProgressEvent::stage(Stage::Saving));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelProgress::new();
        for i in 1..=3 {
            sink.emit(ProgressEvent::unit(Stage::Writing, UnitKind::Page, i, 3));
        }
        drop(sink);
        let mut indices = Vec::new();
        while let Some(event) = rx.recv().await {
            indices.push(event.unit.unwrap().index);
        }
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
