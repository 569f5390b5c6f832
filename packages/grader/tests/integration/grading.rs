use common::{Feedback, Score, SubmissionStatus};
use grader::store::SubmissionStore;

use crate::support::{ADD, ADD_TEST, SUBTRACT, TestGrader, assignment, request, test_case};

mod scoring {
    use super::*;

    #[tokio::test]
    async fn correct_submission_scores_full_marks() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;

        let outcome = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();
        assert_eq!(outcome.score, Score::FULL);
        assert_eq!(outcome.feedback, Feedback::passed(1, 1));
        assert!(outcome.results[0].pass);

        let stored = app.store.find_submission(outcome.submission_id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Graded);
        assert_eq!(stored.score, Some(Score::FULL));
        let results = app.store.test_results(outcome.submission_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome.test_id, "t1");
    }

    #[tokio::test]
    async fn wrong_submission_scores_zero_with_message() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;

        let outcome = app
            .service
            .submit_and_grade(request("add", "u2", SUBTRACT))
            .await
            .unwrap();
        assert_eq!(outcome.score, Score::ZERO);
        assert_eq!(outcome.feedback, Feedback::passed(0, 1));
        assert_eq!(
            outcome.results[0].message.as_deref(),
            Some("add should return 3 for 1+2")
        );
    }

    #[tokio::test]
    async fn partial_score_is_rounded_to_hundredths() {
        let failing = "function run() { return { pass: false }; }";
        let app = TestGrader::quickjs()
            .with_assignment(assignment(
                "add",
                vec![
                    test_case("t1", ADD_TEST, 0),
                    test_case("t2", failing, 1),
                    test_case("t3", failing, 2),
                ],
            ))
            .await;

        let outcome = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();
        assert_eq!(outcome.score.to_string(), "33.33");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["score"], serde_json::json!(33.33));
        assert_eq!(json["feedback"]["summary"], "Passed 1/3");
        assert_eq!(json["results"][1]["pass"], false);
        assert!(json["results"][1].get("message").is_none());
    }

    #[tokio::test]
    async fn assignment_without_tests() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("empty", vec![]))
            .await;

        let outcome = app
            .service
            .submit_and_grade(request("empty", "u1", ADD))
            .await
            .unwrap();
        assert_eq!(outcome.score, Score::ZERO);
        assert_eq!(outcome.feedback, Feedback::no_tests());
        assert!(outcome.results.is_empty());

        let stored = app.store.find_submission(outcome.submission_id).await.unwrap();
        assert_eq!(stored.status, SubmissionStatus::Graded);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrent_tests_keep_declared_order() {
        let failing = "function run() { return { pass: false, message: 'nope' }; }";
        let slow = r#"
async function run({ userCode }) {
  await new Promise((resolve) => setTimeout(resolve, 20));
  return { pass: userCode.add(2, 2) === 4 };
}
"#;
        let app = TestGrader::quickjs_concurrent(3)
            .with_assignment(assignment(
                "add",
                vec![
                    test_case("t4", failing, 3),
                    test_case("t1", slow, 0),
                    test_case("t3", ADD_TEST, 2),
                    test_case("t2", failing, 1),
                ],
            ))
            .await;

        let outcome = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(ids, ["t1", "t2", "t3", "t4"]);
        assert!(outcome.results[0].pass);
        assert_eq!(outcome.results[1].message.as_deref(), Some("nope"));
        assert_eq!(outcome.score.to_string(), "50.00");

        let regraded = app.service.regrade(outcome.submission_id).await.unwrap();
        let passes: Vec<(&str, bool)> = regraded
            .results
            .iter()
            .map(|r| (r.test_id.as_str(), r.pass))
            .collect();
        assert_eq!(passes, [("t1", true), ("t2", false), ("t3", true), ("t4", false)]);
    }
}

mod faults {
    use super::*;

    #[tokio::test]
    async fn unloadable_submission_fails_every_test() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment(
                "add",
                vec![test_case("t1", ADD_TEST, 0), test_case("t2", ADD_TEST, 1)],
            ))
            .await;

        let outcome = app
            .service
            .submit_and_grade(request("add", "u1", "module.exports = {"))
            .await
            .unwrap();
        assert_eq!(outcome.score, Score::ZERO);
        assert_eq!(outcome.results.len(), 2);
        for result in &outcome.results {
            assert!(!result.pass);
            assert!(
                result
                    .message
                    .as_deref()
                    .unwrap()
                    .starts_with("Submission failed to load: ")
            );
        }
    }

    #[tokio::test]
    async fn runaway_test_times_out_without_blocking_others() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment(
                "add",
                vec![
                    test_case("loop", "function run() { while (true) {} }", 0),
                    test_case("t2", ADD_TEST, 1),
                ],
            ))
            .await;

        let outcome = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();
        assert_eq!(
            outcome.results[0].message.as_deref(),
            Some("Test timed out after 1000 ms")
        );
        assert!(outcome.results[1].pass);
        assert_eq!(outcome.score.to_string(), "50.00");
    }
}

mod resubmission {
    use super::*;

    #[tokio::test]
    async fn resubmission_replaces_previous_record() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;

        let first = app
            .service
            .submit_and_grade(request("add", "u1", SUBTRACT))
            .await
            .unwrap();
        let second = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();

        assert_eq!(first.submission_id, second.submission_id);
        assert_eq!(second.score, Score::FULL);

        let submissions = app.store.list_submissions("add").await.unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].submitted_program, ADD);
        let results = app.store.test_results(second.submission_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].outcome.pass);
    }

    #[tokio::test]
    async fn regrade_uses_current_tests() {
        let app = TestGrader::quickjs()
            .with_assignment(assignment("add", vec![test_case("t1", ADD_TEST, 0)]))
            .await;
        let graded = app.service.submit_and_grade(request("add", "u1", ADD)).await.unwrap();
        assert_eq!(graded.score, Score::FULL);

        let stricter = "function run({ userCode }) { return { pass: userCode.add(0.1, 0.2) === 0.3 }; }";
        app.store
            .insert_assignment(assignment(
                "add",
                vec![test_case("t1", ADD_TEST, 0), test_case("t2", stricter, 1)],
            ))
            .await;

        let regraded = app.service.regrade(graded.submission_id).await.unwrap();
        assert_eq!(regraded.submission_id, graded.submission_id);
        assert_eq!(regraded.results.len(), 2);
        assert_eq!(regraded.score.to_string(), "50.00");
    }
}
