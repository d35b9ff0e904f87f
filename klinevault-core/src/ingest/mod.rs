//! Window acquisition, run driving and polling

pub mod driver;
pub mod pipeline;
pub mod schedule;

pub use driver::{IngestEngine, IngestRun, IngestSummary, RunError};
pub use pipeline::{IngestError, SkipReason, WindowPipeline, WindowResolution};
pub use schedule::{Poller, SystemClock, WallClock};
