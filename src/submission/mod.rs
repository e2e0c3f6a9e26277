pub mod controller;
pub mod state;

pub use controller::SubmissionController;
pub use state::{
    Attempt, AttemptId, AttemptResult, Effect, Event, Outcome, Phase, SubmissionSnapshot,
    SubmissionState, WorkflowError,
};
