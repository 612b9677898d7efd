mod document;
mod finder;
mod wait;
mod worker;

pub use document::ChromiumDocument;
pub use finder::{CmpFinder, VisitResult};
pub use wait::WaitStrategy;
pub use worker::{ChromiumWorker, VisitJob};
