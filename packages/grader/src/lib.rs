pub mod config;
pub mod error;
pub mod fixture;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod service;
pub mod store;

pub use config::GraderAppConfig;
pub use error::GradeError;
pub use lifecycle::ConflictPolicy;
pub use orchestrator::Grader;
pub use service::{
    Actor, AssignmentStats, Collaborators, GradingService, Role, ServiceSettings, SubmitOutcome,
    SubmitRequest,
};
