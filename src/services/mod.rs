//! Service layer used by the processor and the front end
//!
//! - Progress reporting
//! - Input reading and output path derivation
//! - Export of results
//! - Completion notifications

pub mod export;
pub mod io;
pub mod notification;
pub mod progress;

pub use export::{flatten_on_white, save_as, save_default};
pub use io::{ImageIOService, InputAdvisory, OUTPUT_SUFFIX};
pub use notification::{LogNotifier, NoOpNotifier, Notification, Notifier, RecordingNotifier};
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProcessingTimings,
    ProgressReporter, ProgressUpdate,
};
