//! Built-in interviewer implementations.

mod auto_approve;
mod callback;
mod console;
mod queue;
mod recording;

pub use auto_approve::AutoApproveInterviewer;
pub use callback::CallbackInterviewer;
pub use console::ConsoleInterviewer;
pub use queue::QueueInterviewer;
pub use recording::{Recording, RecordingInterviewer};
