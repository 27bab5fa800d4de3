mod grading_support;

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use grading_support::{
    PageScript, StubBrowser, StubOracle, complete_page, temp_root, write_submission,
};
use pagegrade::{
    BatchReport, RunOptions,
    config::Prompts,
    constants::REFERENCE_ARTIFACT_KEY,
    oracle::{Oracle, OracleRequest},
    pipeline::run,
};

const RUBRIC: &str = "Checkbox present - 2\nFooter has copyright - 1";

const CRITERIA: &str = r#"```json
[{"description":"Checkbox present","weight":2,"kind":"structural","checks":[{"selector":"input[type=checkbox]"}]},{"description":"Footer has copyright","weight":1,"kind":"visual"}]
```"#;

const JUDGMENT: &str = "Checkbox present: 2/2\nFooter has copyright: 0.5/1\nScore: 7.5\nNice work overall.";

fn options(submissions: &Path, work: &Path) -> RunOptions {
    RunOptions::builder()
        .submissions_root(submissions)
        .rubric_text(RUBRIC)
        .artifact_dir(work.join("artifacts"))
        .report_dir(work.join("reports"))
        .nav_timeout(Duration::from_millis(200))
        .build()
}

fn checkbox_script() -> PageScript {
    PageScript {
        present: ["input[type=checkbox]".to_string()].into_iter().collect(),
        ..PageScript::default()
    }
}

#[tokio::test]
async fn every_submission_gets_one_result_in_discovery_order() {
    let submissions = temp_root("batch-subs");
    let work = temp_root("batch-work");
    complete_page(&submissions, "alice");
    write_submission(&submissions, "bob", &[("style.css", "body {}")]);
    complete_page(&submissions, "carol");
    complete_page(&submissions, "dave");

    let oracle = StubOracle::scripted(CRITERIA, JUDGMENT);
    let browser = StubBrowser::new(PageScript {
        hang_on: vec!["/carol/".to_string()],
        ..checkbox_script()
    });

    let report = run(&options(&submissions, &work), &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    let names: Vec<_> = report.results().iter().map(|r| r.name()).collect();
    assert_eq!(names, ["alice", "bob", "carol", "dave"]);

    let alice = &report.results()[0];
    assert_eq!(alice.score(), 7.5);
    assert_eq!(alice.feedback(), JUDGMENT);
    assert_eq!(alice.error(), None);
    assert_eq!(alice.manual_correction(), None);

    let bob = &report.results()[1];
    assert_eq!(bob.score(), 0.0);
    assert!(bob.error().expect("flag error").contains("HTML"));
    assert_eq!(bob.manual_correction(), Some(false));

    let carol = &report.results()[2];
    assert_eq!(carol.score(), 0.0);
    assert!(!carol.error().expect("timeout error").is_empty());
    assert_eq!(carol.manual_correction(), Some(true));

    let dave = &report.results()[3];
    assert_eq!(dave.score(), 7.5);
    assert_eq!(dave.error(), None);

    // The flagged submission never reached the browser.
    let log = browser.log();
    let navigations = log.navigations();
    assert_eq!(navigations.len(), 3);
    assert!(navigations.iter().all(|url| !url.contains("/bob/")));
    assert_eq!((log.opened(), log.closed()), (3, 3));

    let grading = oracle.grading_requests();
    assert_eq!(grading.len(), 2);
    for request in &grading {
        assert_eq!(request.attachments().len(), 1);
        assert!(request.user_text().contains("PASS: Checkbox present"));
    }

    let metadata = report.metadata();
    assert_eq!(metadata.criteria_count, 2);
    assert_eq!(metadata.max_score, 3.0);
    assert!(!metadata.reference_used);
    assert!(metadata.rubric_failure.is_none());
    assert!(metadata.finished_at.is_some());

    assert!(work.join("artifacts").join("alice.png").is_file());
    assert!(!work.join("artifacts").join("bob.png").exists());

    let reread = BatchReport::read_from(&work.join("reports"))
        .await
        .expect("report re-reads");
    assert_eq!(reread, report);

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn oracle_failure_fails_only_that_submission() {
    let submissions = temp_root("batch-oracle-subs");
    let work = temp_root("batch-oracle-work");
    complete_page(&submissions, "alice");
    complete_page(&submissions, "bob");

    let judged = AtomicUsize::new(0);
    let oracle = StubOracle::new(move |request| {
        if request.attachments().is_empty() {
            return Ok(CRITERIA.to_string());
        }
        if judged.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("rate limited"))
        } else {
            Ok("Score: 9".to_string())
        }
    });
    let browser = StubBrowser::new(checkbox_script());

    let report = run(&options(&submissions, &work), &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    let alice = &report.results()[0];
    assert!(alice.error().expect("oracle error").contains("rate limited"));
    assert_eq!(alice.manual_correction(), Some(true));

    let bob = &report.results()[1];
    assert_eq!(bob.score(), 9.0);
    assert_eq!(bob.error(), None);

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn missing_score_still_keeps_feedback() {
    let submissions = temp_root("batch-noscore-subs");
    let work = temp_root("batch-noscore-work");
    complete_page(&submissions, "alice");

    let response = "The page looks fine but I will not give a number.";
    let oracle = StubOracle::scripted(CRITERIA, response);
    let browser = StubBrowser::new(checkbox_script());

    let report = run(&options(&submissions, &work), &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    let alice = &report.results()[0];
    assert_eq!(alice.score(), 0.0);
    assert_eq!(alice.feedback(), response);
    assert_eq!(alice.error(), None);

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn garbled_rubric_leaves_everything_to_visual_judgment() {
    let submissions = temp_root("batch-garbled-subs");
    let work = temp_root("batch-garbled-work");
    complete_page(&submissions, "alice");

    let oracle = StubOracle::scripted("I'd rather not.", "Score: 4");
    let browser = StubBrowser::new(checkbox_script());

    let report = run(&options(&submissions, &work), &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    assert_eq!(report.metadata().criteria_count, 0);
    assert!(report.metadata().rubric_failure.is_some());
    assert_eq!(report.results()[0].score(), 4.0);
    assert!(browser.log().selectors.lock().expect("lock").is_empty());

    let grading = oracle.grading_requests();
    assert!(grading[0].user_text().contains("Footer has copyright - 1"));

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn reference_design_is_sent_second_and_enables_review_signal() {
    let submissions = temp_root("batch-ref-subs");
    let work = temp_root("batch-ref-work");
    complete_page(&submissions, "alice");

    let oracle = StubOracle::scripted(
        CRITERIA,
        "Score: 6\nThe layout is quite different from the reference. Needs manual correction.",
    );
    let browser = StubBrowser::new(checkbox_script());
    let options = RunOptions::builder()
        .submissions_root(&submissions)
        .rubric_text(RUBRIC)
        .reference_url("http://127.0.0.1:9/reference/".to_string())
        .artifact_dir(work.join("artifacts"))
        .report_dir(work.join("reports"))
        .nav_timeout(Duration::from_millis(200))
        .build();

    let report = run(&options, &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    assert!(report.metadata().reference_used);
    assert_eq!(report.results()[0].manual_correction(), Some(true));
    assert_eq!(report.results()[0].score(), 6.0);

    let grading = oracle.grading_requests();
    assert_eq!(grading[0].attachments().len(), 2);
    assert!(
        work.join("artifacts")
            .join(format!("{REFERENCE_ARTIFACT_KEY}.png"))
            .is_file()
    );

    let navigations = browser.log().navigations();
    assert_eq!(navigations[0], "http://127.0.0.1:9/reference/");

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn unreachable_reference_is_skipped() {
    let submissions = temp_root("batch-noref-subs");
    let work = temp_root("batch-noref-work");
    complete_page(&submissions, "alice");

    let oracle = StubOracle::scripted(CRITERIA, "Score: 5");
    let browser = StubBrowser::new(PageScript {
        hang_on: vec!["/reference/".to_string()],
        ..checkbox_script()
    });
    let options = RunOptions::builder()
        .submissions_root(&submissions)
        .rubric_text(RUBRIC)
        .reference_url("http://127.0.0.1:9/reference/".to_string())
        .artifact_dir(work.join("artifacts"))
        .report_dir(work.join("reports"))
        .nav_timeout(Duration::from_millis(100))
        .build();

    let report = run(&options, &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    assert!(!report.metadata().reference_used);
    assert_eq!(report.results()[0].score(), 5.0);
    assert_eq!(report.results()[0].manual_correction(), None);
    assert_eq!(oracle.grading_requests()[0].attachments().len(), 1);

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn unreadable_root_fails_the_run() {
    let work = temp_root("batch-missing-work");
    let missing = work.join("does-not-exist");

    let oracle = StubOracle::scripted(CRITERIA, JUDGMENT);
    let browser = StubBrowser::new(PageScript::default());

    let outcome = run(&options(&missing, &work), &oracle, &browser, &Prompts::load()).await;
    assert!(outcome.is_err());
    assert!(oracle.requests().is_empty());
    assert_eq!(browser.log().opened(), 0);

    let _ = fs::remove_dir_all(work);
}

/// Never answers grading requests; answers rubric requests unless
/// `stall_rubric` is set.
struct StalledOracle {
    stall_rubric: bool,
}

#[async_trait]
impl Oracle for StalledOracle {
    async fn complete(&self, request: OracleRequest) -> anyhow::Result<String> {
        if request.attachments().is_empty() && !self.stall_rubric {
            return Ok(CRITERIA.to_string());
        }
        std::future::pending().await
    }
}

#[tokio::test]
async fn silent_oracle_fails_each_submission_instead_of_stalling_the_batch() {
    let submissions = temp_root("batch-silent-subs");
    let work = temp_root("batch-silent-work");
    complete_page(&submissions, "alice");
    complete_page(&submissions, "bob");

    let oracle = StalledOracle { stall_rubric: false };
    let browser = StubBrowser::new(checkbox_script());
    let options = RunOptions::builder()
        .submissions_root(&submissions)
        .rubric_text(RUBRIC)
        .artifact_dir(work.join("artifacts"))
        .report_dir(work.join("reports"))
        .nav_timeout(Duration::from_millis(200))
        .oracle_timeout(Duration::from_millis(100))
        .build();

    let report = run(&options, &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    assert_eq!(report.metadata().criteria_count, 2);
    assert_eq!(report.results().len(), 2);
    for result in report.results() {
        assert_eq!(result.score(), 0.0);
        assert_eq!(result.manual_correction(), Some(true));
        assert!(result.error().expect("oracle error").contains("No answer from the oracle"));
    }
    let log = browser.log();
    assert_eq!((log.opened(), log.closed()), (2, 2));

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}

#[tokio::test]
async fn silent_oracle_during_normalization_degrades_the_rubric() {
    let submissions = temp_root("batch-silent-rubric-subs");
    let work = temp_root("batch-silent-rubric-work");
    complete_page(&submissions, "alice");

    let oracle = StalledOracle { stall_rubric: true };
    let browser = StubBrowser::new(checkbox_script());
    let options = RunOptions::builder()
        .submissions_root(&submissions)
        .rubric_text(RUBRIC)
        .artifact_dir(work.join("artifacts"))
        .report_dir(work.join("reports"))
        .nav_timeout(Duration::from_millis(200))
        .oracle_timeout(Duration::from_millis(100))
        .build();

    let report = run(&options, &oracle, &browser, &Prompts::load())
        .await
        .expect("run completes");

    assert_eq!(report.metadata().criteria_count, 0);
    assert!(report.metadata().rubric_failure.is_some());
    assert!(report.results()[0].error().is_some());

    let _ = fs::remove_dir_all(submissions);
    let _ = fs::remove_dir_all(work);
}
