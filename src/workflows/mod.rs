//! Content-generation workflows
//!
//! Three linear pipelines, each an ordered sequence of stages over a typed
//! state record: research (search → extract → save), authoring
//! (retrieve → draft → quiz), and tutoring (style-transfer → quiz-adapt).
//! There is no branching and no retry; a stage failure aborts the call.

pub mod author;
pub mod research;
pub mod tutor;

pub use author::{AuthorWorkflow, Draft, QuizDraft};
pub use research::{ResearchReport, ResearchWorkflow};
pub use tutor::{numeric_tokens, Personalized, TutorWorkflow};
