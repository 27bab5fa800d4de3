mod grading_support;

use anyhow::anyhow;
use grading_support::StubOracle;
use pagegrade::{
    config::Prompts,
    rubric::{CriterionKind, normalize},
};

const RUBRIC: &str = "Checkbox present - 2\nFooter has copyright - 1";

const CRITERIA: &str = r#"[{"description":"Checkbox present","weight":2,"kind":"structural","checks":[{"selector":"input[type=checkbox]"}]},{"description":"Footer has copyright","weight":1,"kind":"visual"}]"#;

fn assert_expected_criteria(rubric: &pagegrade::rubric::NormalizedRubric) {
    assert!(rubric.failure().is_none(), "{:?}", rubric.failure());
    let criteria = rubric.criteria();
    assert_eq!(criteria.len(), 2);

    assert_eq!(criteria[0].description(), "Checkbox present");
    assert_eq!(criteria[0].weight(), 2.0);
    assert_eq!(criteria[0].kind(), CriterionKind::Structural);
    assert_eq!(criteria[0].checks().len(), 1);
    assert_eq!(criteria[0].checks()[0].selector(), "input[type=checkbox]");

    assert_eq!(criteria[1].description(), "Footer has copyright");
    assert_eq!(criteria[1].weight(), 1.0);
    assert_eq!(criteria[1].kind(), CriterionKind::Visual);
    assert!(criteria[1].checks().is_empty());

    assert_eq!(rubric.max_score(), 3.0);
}

#[tokio::test]
async fn plain_payload_is_parsed() {
    let oracle = StubOracle::scripted(CRITERIA, "");
    let rubric = normalize(&oracle, RUBRIC, &Prompts::load()).await;
    assert_expected_criteria(&rubric);

    let requests = oracle.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].user_text().contains("Checkbox present - 2"));
    assert!(requests[0].attachments().is_empty());
}

#[tokio::test]
async fn fenced_payload_is_parsed() {
    let fenced = format!("Here is the rubric:\n```json\n{CRITERIA}\n```\nLet me know!");
    let oracle = StubOracle::scripted(&fenced, "");
    let rubric = normalize(&oracle, RUBRIC, &Prompts::load()).await;
    assert_expected_criteria(&rubric);
}

#[tokio::test]
async fn unparseable_payload_degrades_to_no_criteria() {
    let oracle = StubOracle::scripted("Sorry, I cannot help with that.", "");
    let rubric = normalize(&oracle, RUBRIC, &Prompts::load()).await;
    assert!(rubric.criteria().is_empty());
    assert!(rubric.failure().is_some());
    assert_eq!(rubric.source(), RUBRIC);
}

#[tokio::test]
async fn oracle_failure_degrades_to_no_criteria() {
    let oracle = StubOracle::new(|_| Err(anyhow!("connection reset")));
    let rubric = normalize(&oracle, RUBRIC, &Prompts::load()).await;
    assert!(rubric.criteria().is_empty());
    assert!(
        rubric
            .failure()
            .expect("failure recorded")
            .contains("connection reset")
    );
}

#[tokio::test]
async fn empty_rubric_never_reaches_the_oracle() {
    let oracle = StubOracle::scripted(CRITERIA, "");
    let rubric = normalize(&oracle, "   \n", &Prompts::load()).await;
    assert!(rubric.criteria().is_empty());
    assert!(rubric.failure().is_some());
    assert!(oracle.requests().is_empty());
}
