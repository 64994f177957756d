pub mod issue;
pub mod job;
pub mod printer;
pub mod queue;

pub use issue::Issue;
pub use job::{Job, JobStatus};
pub use printer::{Printer, PrinterStatus};
pub use queue::Queue;
