pub mod attempt;
pub mod interaction;
pub mod progress;
pub mod question;

pub use attempt::{AttemptRecord, AttemptStats};
pub use progress::{Language, QuestionMemory, UserProgress};
pub use question::{QuestionDraft, QuestionRecord};
