mod command;
mod session;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use xlsform_spec::{CascadeError, ExportError, ParseError, render_json, validate};

pub use command::SessionCommand;
pub use session::{FormSession, HISTORY_LIMIT, SessionOutcome};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid session snapshot: {0}")]
    Snapshot(#[from] serde_cbor::Error),
    #[error("'{0}' is not a valid name")]
    InvalidName(String),
    #[error("a question named '{0}' already exists")]
    DuplicateName(String),
    #[error("question '{0}' does not exist")]
    UnknownQuestion(String),
    #[error("parent '{0}' does not exist")]
    UnknownParent(String),
    #[error("'{0}' is not a group or repeat")]
    NotAContainer(String),
    #[error("position {position} is out of range (0..={len})")]
    PositionOutOfRange { position: usize, len: usize },
    #[error("question '{name}' is used by {}", .dependents.join(", "))]
    QuestionInUse { name: String, dependents: Vec<String> },
    #[error("relevant for '{question}': '{reference}' {reason}")]
    InvalidReference {
        question: String,
        reference: String,
        reason: &'static str,
    },
    #[error("invalid expression: {0}")]
    Expression(#[from] ParseError),
    #[error("choice list '{0}' does not exist")]
    UnknownChoiceList(String),
    #[error("choice list '{0}' already exists")]
    DuplicateChoiceList(String),
    #[error("choice list '{name}' is used by {}", .questions.join(", "))]
    ChoiceListInUse { name: String, questions: Vec<String> },
    #[error("choice '{name}' already exists in '{list}'")]
    DuplicateChoice { list: String, name: String },
    #[error("choice '{name}' does not exist in '{list}'")]
    UnknownChoice { list: String, name: String },
    #[error("invalid cascade: {0}")]
    Cascade(#[from] CascadeError),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error(transparent)]
    Export(#[from] ExportError),
}

fn load_session(state_json: &str) -> Result<FormSession, SessionError> {
    if state_json.trim().is_empty() {
        return Ok(FormSession::default());
    }
    Ok(serde_json::from_str(state_json)?)
}

/// Blank input means no answers yet; anything else must be valid JSON.
fn parse_answers(answers_json: &str) -> Result<Value, SessionError> {
    if answers_json.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_str(answers_json)?)
}

fn respond(result: Result<Value, SessionError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn step(state_json: &str, command_json: &str) -> Result<Value, SessionError> {
    let mut session = load_session(state_json)?;
    let command: SessionCommand = serde_json::from_str(command_json)?;
    let outcome = session.apply(command)?;
    Ok(json!({
        "state": serde_json::to_value(&session)?,
        "report": serde_json::to_value(&outcome.report)?,
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<SessionCommand>),
    One(SessionCommand),
}

fn step_batch(state_json: &str, commands_json: &str) -> Result<Value, SessionError> {
    let mut session = load_session(state_json)?;
    let commands = match serde_json::from_str::<Batch>(commands_json)? {
        Batch::Many(commands) => commands,
        Batch::One(command) => vec![command],
    };
    let mut report = session.report();
    for command in commands {
        report = session.apply(command)?.report;
    }
    Ok(json!({
        "state": serde_json::to_value(&session)?,
        "report": serde_json::to_value(&report)?,
    }))
}

/// Applies one command to a JSON session state and returns
/// `{"state": ..., "report": ...}` for the host to store and display.
/// An empty state starts a blank form.
pub fn handle(state_json: &str, command_json: &str) -> String {
    respond(step(state_json, command_json))
}

/// Applies a list of commands (or a single one), stopping at the first failure.
pub fn handle_batch(state_json: &str, commands_json: &str) -> String {
    respond(step_batch(state_json, commands_json))
}

pub fn describe(state_json: &str) -> String {
    respond(load_session(state_json).and_then(|session| Ok(serde_json::to_value(session.spec())?)))
}

pub fn check(state_json: &str) -> String {
    respond(load_session(state_json).and_then(|session| Ok(serde_json::to_value(session.report())?)))
}

pub fn preview(state_json: &str, answers_json: &str) -> String {
    respond(load_session(state_json).and_then(|session| {
        let answers = parse_answers(answers_json)?;
        Ok(render_json(&session.preview(&answers)))
    }))
}

pub fn validate_answers(state_json: &str, answers_json: &str) -> String {
    respond(load_session(state_json).and_then(|session| {
        let answers = parse_answers(answers_json)?;
        Ok(serde_json::to_value(validate(session.spec(), &answers))?)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(state: &str, command: Value) -> Value {
        let response = handle(state, &command.to_string());
        serde_json::from_str(&response).expect("json")
    }

    #[test]
    fn empty_state_starts_blank_form() {
        let response = run(
            "",
            json!({
                "command": "set_form_meta",
                "id": "market_survey",
                "title": "Market survey"
            }),
        );
        assert_eq!(response["state"]["spec"]["id"], "market_survey");
        assert_eq!(response["state"]["history"].as_array().map(Vec::len), Some(1));
        let codes = response["report"]["issues"]
            .as_array()
            .expect("issues")
            .iter()
            .map(|issue| issue["code"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(codes, vec!["empty_form"]);
    }

    #[test]
    fn state_threads_through_steps() {
        let first = run(
            "",
            json!({
                "command": "add_question",
                "question": { "name": "stall_count", "type": "integer", "label": "Stalls" }
            }),
        );
        let state = first["state"].to_string();
        let second = run(
            &state,
            json!({
                "command": "add_question",
                "question": { "name": "notes", "type": "text", "label": "Notes" },
                "position": 0
            }),
        );
        let names = second["state"]["spec"]["questions"]
            .as_array()
            .expect("questions")
            .iter()
            .map(|question| question["name"].clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![json!("notes"), json!("stall_count")]);

        let undone = run(&second["state"].to_string(), json!({ "command": "undo" }));
        assert_eq!(undone["state"]["spec"], first["state"]["spec"]);
    }

    #[test]
    fn errors_are_reported_as_json() {
        let response = run("", json!({ "command": "remove_question", "name": "ghost" }));
        assert_eq!(response["error"], "question 'ghost' does not exist");

        let response = handle("", "not json");
        let parsed: Value = serde_json::from_str(&response).expect("json");
        assert!(parsed["error"].as_str().unwrap_or_default().starts_with("invalid json"));
    }

    #[test]
    fn batch_applies_commands_in_order() {
        let commands = json!([
            { "command": "add_choice_list", "list": { "name": "yes_no", "choices": [
                { "name": "yes", "label": "Yes" }, { "name": "no", "label": "No" }
            ]}},
            { "command": "add_question", "question": {
                "name": "open", "type": "select_one", "label": "Open today?", "choice_list": "yes_no"
            }},
            { "command": "add_question", "question": {
                "name": "visitors", "type": "integer", "label": "Visitors"
            }},
            { "command": "set_relevant", "name": "visitors", "relevant": "${open} = 'yes'" }
        ]);
        let response: Value =
            serde_json::from_str(&handle_batch("", &commands.to_string())).expect("json");
        assert_eq!(
            response["state"]["spec"]["questions"][1]["relevant"]["op"],
            "eq"
        );
        let state = response["state"].to_string();

        let preview: Value = serde_json::from_str(&preview(&state, r#"{"open":"no"}"#)).expect("json");
        assert_eq!(preview["questions"][1]["visible"], false);
        assert_eq!(preview["status"], "complete");

        let validation: Value =
            serde_json::from_str(&validate_answers(&state, r#"{"open":"yes"}"#)).expect("json");
        assert_eq!(validation["valid"], true);

        let report: Value = serde_json::from_str(&check(&state)).expect("json");
        assert!(report["issues"].as_array().expect("issues").is_empty());

        let spec: Value = serde_json::from_str(&describe(&state)).expect("json");
        assert_eq!(spec["id"], "new_form");
    }

    #[test]
    fn malformed_answers_are_reported_not_ignored() {
        for response in [preview("", "{not json"), validate_answers("", "[1,")] {
            let parsed: Value = serde_json::from_str(&response).expect("json");
            assert!(
                parsed["error"].as_str().unwrap_or_default().starts_with("invalid json"),
                "{}",
                response
            );
        }
        let blank: Value = serde_json::from_str(&preview("", "  ")).expect("json");
        assert!(blank.get("error").is_none());
    }
}
