//! Domain types for klinevault

pub mod bar;
pub mod granularity;
pub mod window;

pub use bar::{Bar, BarDecodeError};
pub use granularity::{Granularity, ParseGranularityError};
pub use window::{window_dates, WindowId, WindowOutcome, WindowStatus};
