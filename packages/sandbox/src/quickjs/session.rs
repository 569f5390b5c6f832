use std::time::{Duration, Instant};

use rquickjs::function::IntoArgs;
use rquickjs::{Context, Ctx, FromJs, Function, Object, Runtime, Value};
use tracing::debug;

use super::SandboxLimits;
use super::deadline::Deadline;
use crate::error::SandboxError;
use crate::outcome::{
    EntryContract, EntryPoint, EvaluationUnit, ExecutionOutcome, Fault, Phase, ProgramRole,
    TimeBudget,
};

const PRELUDE: &str = include_str!("prelude.js");

pub(crate) struct SessionReport {
    pub outcome: ExecutionOutcome,
    pub console: Vec<String>,
    pub duration: Duration,
}

/// Why a harness call did not return normally.
enum Abort {
    TimedOut,
    Fault(String),
}

/// Run one execution in a throwaway runtime. Blocks the calling thread.
pub(crate) fn run(
    limits: &SandboxLimits,
    unit: &EvaluationUnit,
    entry: &EntryContract,
    budget: TimeBudget,
) -> Result<SessionReport, SandboxError> {
    let started = Instant::now();

    let runtime = Runtime::new().map_err(|e| SandboxError::Initialization(e.to_string()))?;
    runtime.set_memory_limit(limits.memory_limit_bytes());
    runtime.set_max_stack_size(limits.stack_limit_bytes());
    let deadline = Deadline::new();
    let interrupt = deadline.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || interrupt.expired())));
    let context =
        Context::full(&runtime).map_err(|e| SandboxError::Initialization(e.to_string()))?;

    let (outcome, console) = context.with(|ctx| -> Result<_, SandboxError> {
        let setup: Function = ctx
            .eval(PRELUDE)
            .map_err(|e| SandboxError::Initialization(describe_error(&ctx, e)))?;
        let harness: Object = setup
            .call((limits.console_line_limit, limits.console_line_width))
            .map_err(|e| SandboxError::Initialization(describe_error(&ctx, e)))?;

        let session = Session {
            ctx: ctx.clone(),
            harness,
            deadline,
        };
        let outcome = session.execute(unit, entry, budget);
        let console = session.logs();
        Ok((outcome, console))
    })?;

    Ok(SessionReport {
        outcome,
        console,
        duration: started.elapsed(),
    })
}

struct Session<'js> {
    ctx: Ctx<'js>,
    harness: Object<'js>,
    deadline: Deadline,
}

impl<'js> Session<'js> {
    fn execute(
        &self,
        unit: &EvaluationUnit,
        entry: &EntryContract,
        budget: TimeBudget,
    ) -> ExecutionOutcome {
        self.deadline.arm(budget.load);
        let loaded = self
            .call::<Value, _>("loadSubmission", (unit.submission.as_str(),))
            .map(|v| opt_string(&v));
        match loaded {
            Ok(None) => {}
            Ok(Some(reason)) | Err(Abort::Fault(reason)) => {
                return ExecutionOutcome::Faulted(Fault::Load {
                    role: ProgramRole::Submission,
                    reason,
                });
            }
            Err(Abort::TimedOut) => {
                return ExecutionOutcome::TimedOut {
                    phase: Phase::Load,
                    budget: budget.load,
                };
            }
        }

        let entry_point = match entry {
            EntryContract::Exports => {
                return match self.call_json("exportNames") {
                    Ok(value) => ExecutionOutcome::Completed { value },
                    Err(Abort::TimedOut) => ExecutionOutcome::TimedOut {
                        phase: Phase::Load,
                        budget: budget.load,
                    },
                    Err(Abort::Fault(reason)) => {
                        ExecutionOutcome::Faulted(Fault::Runtime { reason })
                    }
                };
            }
            EntryContract::Evaluate(entry_point) => entry_point,
        };

        self.deadline.arm(budget.run);
        let test_program = unit.test_program.as_deref().unwrap_or_default();
        let loaded = self
            .call::<Value, _>("loadTest", (test_program, entry_point.as_str()))
            .map(|v| opt_string(&v));
        match loaded {
            Ok(None) => {}
            Ok(Some(reason)) | Err(Abort::Fault(reason)) => {
                return ExecutionOutcome::Faulted(Fault::Load {
                    role: ProgramRole::TestProgram,
                    reason,
                });
            }
            Err(Abort::TimedOut) => {
                return ExecutionOutcome::TimedOut {
                    phase: Phase::Run,
                    budget: budget.run,
                };
            }
        }

        match self.evaluate(entry_point) {
            Ok(outcome) => outcome,
            Err(Abort::TimedOut) => ExecutionOutcome::TimedOut {
                phase: Phase::Run,
                budget: budget.run,
            },
            Err(Abort::Fault(reason)) => ExecutionOutcome::Faulted(Fault::Runtime { reason }),
        }
    }

    /// Call the entry point and drive jobs and timers until the verdict
    /// settles.
    fn evaluate(&self, entry_point: &EntryPoint) -> Result<ExecutionOutcome, Abort> {
        if !self.call::<bool, _>("hasEntry", ())? {
            return Ok(ExecutionOutcome::Faulted(Fault::MissingEntry {
                name: entry_point.to_string(),
            }));
        }
        self.call::<(), _>("start", ())?;

        loop {
            while self.ctx.execute_pending_job() {
                if self.deadline.expired() {
                    let _ = self.ctx.catch();
                    return Err(Abort::TimedOut);
                }
            }

            let status: String = self.call("status", ())?;
            match status.as_str() {
                "fulfilled" => {
                    let value = self.call_json("verdictJson")?;
                    return Ok(ExecutionOutcome::Completed { value });
                }
                "rejected" => {
                    let reason = opt_string(&self.call::<Value, _>("error", ())?)
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(Abort::Fault(reason));
                }
                _ => {}
            }

            let delay = self
                .call::<Value, _>("nextTimerDelay", ())?
                .as_number()
                .unwrap_or(-1.0);
            if delay < 0.0 {
                // No job or timer left that could settle the verdict.
                debug!("Verdict can no longer settle");
                return Err(Abort::TimedOut);
            }
            let delay = Duration::from_millis(delay.ceil() as u64);
            if delay > self.deadline.remaining() {
                return Err(Abort::TimedOut);
            }
            std::thread::sleep(delay);
            self.call::<(), _>("fireNextTimer", ())?;
        }
    }

    fn logs(&self) -> Vec<String> {
        self.deadline.disarm();
        self.call::<Value, _>("logs", ())
            .ok()
            .and_then(|v| opt_string(&v))
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    fn call<R, A>(&self, name: &str, args: A) -> Result<R, Abort>
    where
        R: FromJs<'js>,
        A: IntoArgs<'js>,
    {
        let function: Function = self.harness.get(name).map_err(|e| self.abort(e))?;
        function.call(args).map_err(|e| self.abort(e))
    }

    /// Call a harness function that returns a JSON document as a string.
    fn call_json(&self, name: &str) -> Result<serde_json::Value, Abort> {
        let text = opt_string(&self.call::<Value, _>(name, ())?)
            .ok_or_else(|| Abort::Fault(format!("Harness returned no data from {name}")))?;
        serde_json::from_str(&text)
            .map_err(|e| Abort::Fault(format!("Harness returned malformed data: {e}")))
    }

    fn abort(&self, err: rquickjs::Error) -> Abort {
        if self.deadline.tripped() {
            if matches!(err, rquickjs::Error::Exception) {
                let _ = self.ctx.catch();
            }
            return Abort::TimedOut;
        }
        Abort::Fault(describe_error(&self.ctx, err))
    }
}

fn opt_string(value: &Value<'_>) -> Option<String> {
    value.as_string().and_then(|s| s.to_string().ok())
}

/// Render a pending exception (or any other engine error) as `Name: message`.
fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let thrown = ctx.catch();
    if let Some(object) = thrown.as_object() {
        let field = |key: &str| {
            object
                .get::<_, Value>(key)
                .ok()
                .and_then(|v| opt_string(&v))
        };
        if let Some(message) = field("message") {
            let name = field("name").unwrap_or_else(|| "Error".to_string());
            return format!("{name}: {message}");
        }
    }
    opt_string(&thrown).unwrap_or_else(|| "Uncaught exception".to_string())
}
