use serde_json::json;

use xlsform_spec::{
    FormSpec,
    render::{RenderStatus, build_preview, render_json, render_text},
};

fn fixture(name: &str) -> &'static str {
    match name {
        "household_survey" => include_str!("../tests/fixtures/household_survey.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

#[test]
fn render_text_includes_next_question() {
    let spec: FormSpec = serde_json::from_str(fixture("household_survey")).expect("deserialize");
    let payload = build_preview(&spec, &json!({}));

    assert_eq!(payload.status, RenderStatus::NeedInput);
    assert_eq!(payload.next_question_id.as_deref(), Some("consent"));

    let text = render_text(&payload);
    assert!(text.contains("Form: Household Survey (household_survey)"));
    assert!(text.contains("Next question: consent"));
    assert!(text.contains("if ${consent} = 'yes'"));
    assert!(text.contains("choices: (waiting for region)"));
}

#[test]
fn cascade_choices_follow_parent_answer() {
    let spec: FormSpec = serde_json::from_str(fixture("household_survey")).expect("deserialize");
    let payload = build_preview(&spec, &json!({ "consent": "yes", "region": "central" }));

    let district = payload
        .questions
        .iter()
        .find(|question| question.name == "district")
        .expect("district question");
    assert!(district.visible);
    assert_eq!(district.depth, 1);
    let names = district
        .choices
        .as_ref()
        .expect("select choices")
        .iter()
        .map(|choice| choice.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["kampala", "wakiso"]);
    assert_eq!(payload.next_question_id.as_deref(), Some("respondent_name"));
}

#[test]
fn render_json_exposes_structure() {
    let spec: FormSpec = serde_json::from_str(fixture("household_survey")).expect("deserialize");
    let payload = build_preview(&spec, &json!({ "consent": "no", "household_size": 1 }));

    let ui = render_json(&payload);
    assert_eq!(ui["form_id"], "household_survey");
    assert_eq!(ui["form_version"], "2024.1");
    assert_eq!(ui["progress"]["answered"], 2);
    assert_eq!(ui["progress"]["total"], 3);
    assert_eq!(ui["next_question_id"], "crops");
    let questions = ui["questions"].as_array().expect("questions array");
    let respondent = questions
        .iter()
        .find(|question| question["name"] == "respondent")
        .expect("respondent group");
    assert_eq!(respondent["visible"], false);
    assert_eq!(respondent["type"], "group");
    assert_eq!(questions[0]["current_value"], "no");
}

#[test]
fn answered_form_is_complete() {
    let spec: FormSpec = serde_json::from_str(fixture("household_survey")).expect("deserialize");
    let payload = build_preview(
        &spec,
        &json!({ "consent": "no", "household_size": 1, "crops": ["beans"] }),
    );
    assert_eq!(payload.status, RenderStatus::Complete);
    assert!(render_text(&payload).contains("All visible questions are answered."));
}
