pub mod event;
pub mod hook;
pub mod language;
pub mod retry;
pub mod score;
pub mod submission;
pub mod submission_status;

pub use language::Language;
pub use score::{Feedback, Score};
pub use submission::{
    Assignment, GradeReport, Submission, SubmissionKey, TestCase, TestOutcome, TestResult,
};
pub use submission_status::SubmissionStatus;
