pub mod error;
pub mod harness;
pub mod outcome;
pub mod quickjs;

use async_trait::async_trait;
use common::Language;

pub use error::SandboxError;
pub use harness::Verdict;
pub use outcome::{
    EntryContract, EntryPoint, EvaluationUnit, Execution, ExecutionOutcome, Fault, Phase,
    ProgramRole, TimeBudget,
};
pub use quickjs::{QuickJsSandbox, SandboxLimits};

/// Isolated executor for untrusted programs.
///
/// Every call runs in a fresh context: nothing persists between executions.
/// Faults and timeouts of the program are reported in the returned
/// [`Execution`]; `Err` is reserved for failures of the sandbox itself.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, language: Language) -> bool;

    async fn execute(
        &self,
        unit: EvaluationUnit,
        entry: &EntryContract,
        budget: TimeBudget,
    ) -> Result<Execution, SandboxError>;
}
