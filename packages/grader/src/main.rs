use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::Language;
use common::event::GradedEvent;
use common::hook::HookRegistry;
use grader::notify::{HookNotifier, LogHook, NotificationFeed};
use grader::store::MemoryStore;
use grader::{Collaborators, GraderAppConfig, GradingService, SubmitRequest, fixture};
use sandbox::QuickJsSandbox;
use tracing::info;

#[derive(Parser)]
#[command(name = "gradely", version, about = "Grade JavaScript submissions against assignment tests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission and print the report as JSON
    Grade {
        /// Assignment file (TOML)
        #[arg(long)]
        assignment: PathBuf,
        /// Submitted program
        #[arg(long)]
        submission: PathBuf,
        /// Submitting user
        #[arg(long, default_value = "local")]
        user: String,
        /// Language of the submission. Defaults to the assignment's
        #[arg(long)]
        language: Option<Language>,
    },
    /// Validate an assignment file and list its tests
    Check {
        #[arg(long)]
        assignment: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Grade {
            assignment,
            submission,
            user,
            language,
        } => grade(assignment, submission, user, language).await,
        Commands::Check { assignment } => check(assignment),
    }
}

async fn grade(
    assignment: PathBuf,
    submission: PathBuf,
    user: String,
    language: Option<Language>,
) -> anyhow::Result<()> {
    let config = GraderAppConfig::load().context("Failed to load config")?;
    let assignment = fixture::load(&assignment)?;
    let language = fixture::submission_language(&assignment, language)?;
    let program = tokio::fs::read_to_string(&submission)
        .await
        .with_context(|| format!("Failed to read submission {}", submission.display()))?;

    let store = Arc::new(MemoryStore::new());
    let assignment_id = assignment.id.clone();
    store.insert_assignment(assignment).await;

    let feed = NotificationFeed::new();
    let mut registry = HookRegistry::new();
    registry.add_hook::<GradedEvent, _>(Arc::new(LogHook));
    registry.add_hook::<GradedEvent, _>(feed);

    let sandbox = Arc::new(QuickJsSandbox::new(config.sandbox.clone()));
    let service = GradingService::from_config(
        &config,
        sandbox,
        Collaborators {
            tests: store.clone(),
            store: store.clone(),
            notifier: Arc::new(HookNotifier::new(registry)),
        },
    );

    let submission_config = &config.submission;
    let sweeper = (submission_config.stuck_sweep_interval_secs > 0).then(|| {
        service.spawn_stuck_sweeper(
            Duration::from_secs(submission_config.stuck_sweep_interval_secs),
            Duration::from_secs(submission_config.stuck_after_secs),
        )
    });

    info!(assignment_id = %assignment_id, user = %user, "Grading submission");
    let outcome = service
        .submit_and_grade(SubmitRequest {
            assignment_id,
            user_id: user,
            program,
            language,
        })
        .await
        .context("Grading failed")?;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn check(assignment: PathBuf) -> anyhow::Result<()> {
    let assignment = fixture::load(&assignment)?;
    let summary = serde_json::json!({
        "id": assignment.id,
        "language": assignment.language,
        "tests": assignment
            .tests
            .iter()
            .map(|t| serde_json::json!({ "id": t.id, "name": t.name }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
