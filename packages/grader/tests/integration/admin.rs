use std::sync::Arc;
use std::time::Duration;

use common::{Feedback, Language, Score, SubmissionStatus};
use grader::store::{MemoryStore, NewSubmission, StatusUpdate, SubmissionStore};
use grader::{Actor, ConflictPolicy, GradeError, Role};
use uuid::Uuid;

use crate::support::{
    ADD, ADD_TEST, FlakyLoader, GatedSandbox, SUBTRACT, TestGrader, assignment, eventually,
    fast_settings, request, test_case,
};

fn new_submission(assignment_id: &str, user_id: &str) -> NewSubmission {
    NewSubmission {
        assignment_id: assignment_id.into(),
        user_id: user_id.into(),
        program: ADD.into(),
        language: Language::JavaScript,
    }
}

mod overrides {
    use super::*;

    #[tokio::test]
    async fn only_staff_can_override() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;
        let graded = app
            .service
            .submit_and_grade(request("add", "u1", SUBTRACT))
            .await
            .unwrap();
        let id = graded.submission_id;

        let err = app
            .service
            .override_score(&Actor::new("u1", Role::Student), id, 100.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::PermissionDenied(_)));

        let updated = app
            .service
            .override_score(
                &Actor::new("ta1", Role::Ta),
                id,
                95.5,
                Some("Accepted after review".into()),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, SubmissionStatus::Graded);
        assert_eq!(updated.score.unwrap().to_string(), "95.50");
        assert_eq!(updated.feedback, Some(Feedback::note("Accepted after review")));

        let err = app
            .service
            .override_score(&Actor::new("prof", Role::Instructor), id, 120.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::Validation(_)));

        let err = app
            .service
            .override_score(&Actor::new("root", Role::Admin), Uuid::now_v7(), 50.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::NotFound(_)));
    }

    #[tokio::test]
    async fn unfinished_submission_cannot_be_overridden() {
        let app = TestGrader::gated(GatedSandbox::new(), ConflictPolicy::Reject);
        let pending = app
            .store
            .upsert_submission(new_submission("a1", "u1"))
            .await
            .unwrap();

        let err = app
            .service
            .override_score(&Actor::new("root", Role::Admin), pending.id, 80.0, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GradeError::InvalidTransition {
                from: SubmissionStatus::Pending,
                to: SubmissionStatus::Graded,
            }
        ));
    }

    #[tokio::test]
    async fn failed_submission_can_be_overridden() {
        let store = Arc::new(MemoryStore::new());
        let app = TestGrader::build(
            GatedSandbox::new(),
            store.clone(),
            FlakyLoader::new(store.clone(), u32::MAX),
            fast_settings(ConflictPolicy::Reject),
        );
        app.service
            .submit_and_grade(request("a1", "u1", "correct"))
            .await
            .unwrap_err();
        let failed = store.list_submissions("a1").await.unwrap().remove(0);
        assert_eq!(failed.status, SubmissionStatus::Failed);

        let updated = app
            .service
            .override_score(&Actor::new("prof", Role::Instructor), failed.id, 80.0, None)
            .await
            .unwrap();
        assert_eq!(updated.status, SubmissionStatus::Graded);
        assert_eq!(updated.score, Some(Score::from_percent(80.0).unwrap()));
        assert_eq!(
            updated.feedback,
            Some(Feedback::note("Score overridden by prof"))
        );
        eventually(|| app.feed.list("u1").len() == 1).await;
    }
}

mod stats {
    use super::*;

    #[tokio::test]
    async fn assignment_stats_summarize_submissions() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;
        app.service
            .submit_and_grade(request("add", "u1", ADD))
            .await
            .unwrap();
        app.service
            .submit_and_grade(request("add", "u2", SUBTRACT))
            .await
            .unwrap();
        app.store
            .upsert_submission(new_submission("add", "u3"))
            .await
            .unwrap();

        let stats = app.service.assignment_stats("add").await.unwrap();
        assert_eq!(stats.submissions, 3);
        assert_eq!(stats.graded, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.perfect_scores, 1);
        assert_eq!(stats.average_score.unwrap().to_string(), "50.00");

        let empty = app.service.assignment_stats("nothing").await.unwrap();
        assert_eq!(empty.submissions, 0);
        assert_eq!(empty.average_score, None);
    }
}

mod stuck {
    use super::*;

    #[tokio::test]
    async fn abandoned_submission_is_failed() {
        let app = TestGrader::gated(GatedSandbox::new(), ConflictPolicy::Reject);
        let submission = app
            .store
            .upsert_submission(new_submission("a1", "u1"))
            .await
            .unwrap();
        app.store
            .update_status(submission.id, SubmissionStatus::Pending, StatusUpdate::grading())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let recovered = app.service.recover_stuck(Duration::ZERO).await.unwrap();
        assert_eq!(recovered, vec![submission.id]);

        let stored = app.store.find_submission(submission.id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Failed);
        assert_eq!(stored.feedback, Some(Feedback::note("Grading interrupted")));

        assert!(app.service.recover_stuck(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_submission_is_left_alone() {
        let app = TestGrader::gated(GatedSandbox::new(), ConflictPolicy::Reject);
        let submission = app
            .store
            .upsert_submission(new_submission("a1", "u1"))
            .await
            .unwrap();

        let recovered = app
            .service
            .recover_stuck(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(recovered.is_empty());
        let stored = app.store.find_submission(submission.id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn running_pass_is_not_recovered() {
        let sandbox = GatedSandbox::new();
        let app = TestGrader::gated(sandbox.clone(), ConflictPolicy::Reject)
            .with_assignment(assignment("a1", vec![test_case("t1", "gated", 0)]))
            .await;

        let pass = {
            let service = app.service.clone();
            tokio::spawn(async move { service.submit_and_grade(request("a1", "u1", "correct")).await })
        };
        eventually(|| sandbox.entered() == 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(app.service.recover_stuck(Duration::ZERO).await.unwrap().is_empty());

        sandbox.open();
        let outcome = pass.await.unwrap().unwrap();
        let stored = app.store.find_submission(outcome.submission_id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Graded);
    }

    #[tokio::test]
    async fn sweeper_recovers_in_background() {
        let app = TestGrader::gated(GatedSandbox::new(), ConflictPolicy::Reject);
        let submission = app
            .store
            .upsert_submission(new_submission("a1", "u1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = app
            .service
            .spawn_stuck_sweeper(Duration::from_millis(10), Duration::ZERO);
        let mut status = SubmissionStatus::Pending;
        for _ in 0..200 {
            status = app.store.find_submission(submission.id).await.unwrap().status;
            if status == SubmissionStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sweeper.abort();
        assert_eq!(status, SubmissionStatus::Failed);
    }
}
