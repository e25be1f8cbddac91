use std::collections::BTreeSet;

use serde_json::{Number, Value};
use xlsform_spec::{PreviewChoice, PreviewPayload, PreviewQuestion, QuestionType, RenderProgress};

/// Controls which bits of state the trial run prints.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum Verbosity {
    /// Clean output: question prompts only.
    Clean,
    /// Verbose output: status, visible questions, relevant expressions.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Prints prompts while a form is filled in from the terminal.
pub struct WizardPresenter {
    verbosity: Verbosity,
    header_printed: bool,
    show_answers_json: bool,
}

impl WizardPresenter {
    pub fn new(verbosity: Verbosity, show_answers_json: bool) -> Self {
        Self {
            verbosity,
            header_printed: false,
            show_answers_json,
        }
    }

    pub fn show_header(&mut self, payload: &PreviewPayload) {
        if self.header_printed {
            return;
        }
        println!("Form: {}", payload.form_title);
        if self.verbosity.is_verbose()
            && let Some(help) = &payload.help
        {
            println!("Help: {}", help);
        }
        self.header_printed = true;
    }

    pub fn show_status(&self, payload: &PreviewPayload) {
        if !self.verbosity.is_verbose() {
            return;
        }
        println!(
            "Status: {} ({}/{})",
            payload.status.as_str(),
            payload.progress.answered,
            payload.progress.total
        );
        println!("Visible questions:");
        for question in payload.questions.iter().filter(|question| question.visible) {
            let mut entry = format!(
                "{}- {} ({})",
                "  ".repeat(question.depth + 1),
                question.name,
                question.label
            );
            if question.required {
                entry.push_str(" [required]");
            }
            println!("{}", entry);
        }
    }

    pub fn show_prompt(&self, prompt: &PromptContext) {
        let mut line = if prompt.total > 0 {
            format!("{}/{} {}", prompt.index, prompt.total, prompt.label)
        } else {
            format!("{} {}", prompt.index, prompt.label)
        };
        if prompt.required {
            line.push_str(" *");
        }
        if let Some(hint) = &prompt.type_hint {
            line.push(' ');
            line.push_str(hint);
        }
        println!("{}", line);
        if let Some(hint) = &prompt.hint {
            println!("{}", hint);
        }
        if !prompt.choices.is_empty() {
            for (index, choice) in prompt.choices.iter().enumerate() {
                println!("  {}) {} [{}]", index + 1, choice.label, choice.name);
            }
        }
        if self.verbosity.is_verbose()
            && let Some(relevant) = &prompt.relevant
        {
            println!("Shown because: {}", relevant);
        }
    }

    pub fn show_parse_error(&self, error: &AnswerParseError) {
        eprintln!("Invalid answer: {}", error.user_message);
        if let Some(debug) = &error.debug_message {
            eprintln!("  Expected: {}", debug);
        }
    }

    pub fn show_completion(&self, answers: &Value) {
        println!("Done ✅");
        if self.show_answers_json {
            match serde_json::to_string_pretty(answers) {
                Ok(pretty) => println!("{}", pretty),
                Err(err) => eprintln!("Failed to serialize answers to JSON: {}", err),
            }
        }
    }
}

/// Context used to format a single prompt.
pub struct PromptContext {
    pub index: usize,
    pub total: usize,
    pub label: String,
    pub hint: Option<String>,
    pub required: bool,
    pub type_hint: Option<String>,
    pub choices: Vec<PreviewChoice>,
    pub relevant: Option<String>,
}

impl PromptContext {
    pub fn new(question: &PreviewQuestion, progress: &RenderProgress) -> Self {
        let label = if question.label.is_empty() {
            question.name.clone()
        } else {
            question.label.clone()
        };
        Self {
            index: (progress.answered + 1).max(1),
            total: progress.total,
            label,
            hint: question.hint.clone(),
            required: question.required,
            type_hint: type_hint(question.kind),
            choices: question.choices.clone().unwrap_or_default(),
            relevant: question.relevant.clone(),
        }
    }
}

fn type_hint(kind: QuestionType) -> Option<String> {
    let hint = match kind {
        QuestionType::Integer => "(whole number)",
        QuestionType::Decimal => "(number)",
        QuestionType::SelectOne => "(choice number or name)",
        QuestionType::SelectMultiple => "(comma separated choices)",
        QuestionType::Date => "(YYYY-MM-DD)",
        QuestionType::Time => "(HH:MM)",
        QuestionType::Datetime => "(YYYY-MM-DDTHH:MM:SS)",
        QuestionType::Geopoint => "(latitude longitude)",
        QuestionType::Acknowledge => "(ok)",
        QuestionType::Repeat => "(JSON array of entries)",
        _ => return None,
    };
    Some(hint.to_string())
}

/// The first visible question that still needs an answer. Questions inside
/// repeats are answered as part of the repeat's array.
pub fn pending_question<'a>(
    payload: &'a PreviewPayload,
    skipped: &BTreeSet<String>,
) -> Option<&'a PreviewQuestion> {
    let mut repeat_depth: Option<usize> = None;
    for question in &payload.questions {
        if let Some(depth) = repeat_depth {
            if question.depth > depth {
                continue;
            }
            repeat_depth = None;
        }
        if question.kind == QuestionType::Repeat {
            repeat_depth = Some(question.depth);
        } else if !question.kind.is_answerable() {
            continue;
        }
        if question.visible && !skipped.contains(&question.name) && !has_value(question) {
            return Some(question);
        }
    }
    None
}

fn has_value(question: &PreviewQuestion) -> bool {
    match &question.current_value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// Error produced when parsing answers from the user.
#[derive(Debug)]
pub struct AnswerParseError {
    pub user_message: String,
    pub debug_message: Option<String>,
}

impl AnswerParseError {
    pub fn new(user_message: impl Into<String>, debug_message: Option<String>) -> Self {
        Self {
            user_message: user_message.into(),
            debug_message,
        }
    }
}

/// Turns terminal input into an answer value; `Ok(None)` skips an optional
/// question.
pub fn parse_answer(question: &PreviewQuestion, raw: &str) -> Result<Option<Value>, AnswerParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        if question.required {
            return Err(AnswerParseError::new(
                "This question requires an answer.",
                None,
            ));
        }
        return Ok(None);
    }

    let value = match question.kind {
        QuestionType::Integer => parse_integer(raw)?,
        QuestionType::Decimal => parse_decimal(raw)?,
        QuestionType::SelectOne => Value::String(match_choice(question, raw)?),
        QuestionType::SelectMultiple => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| match_choice(question, part).map(Value::String))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        QuestionType::Acknowledge => match raw.to_lowercase().as_str() {
            "ok" | "y" | "yes" => Value::String("OK".into()),
            _ => {
                return Err(AnswerParseError::new(
                    "Type ok to acknowledge.",
                    Some("expected ok".to_string()),
                ));
            }
        },
        QuestionType::Repeat => parse_repeat(raw)?,
        _ => Value::String(raw.to_string()),
    };
    Ok(Some(value))
}

fn parse_integer(raw: &str) -> Result<Value, AnswerParseError> {
    raw.parse::<i64>()
        .map(Number::from)
        .map(Value::Number)
        .map_err(|_| {
            AnswerParseError::new(
                "Please enter a whole number.",
                Some("expected integer".to_string()),
            )
        })
}

fn parse_decimal(raw: &str) -> Result<Value, AnswerParseError> {
    raw.parse::<f64>()
        .map_err(|_| {
            AnswerParseError::new(
                "Please enter a number.",
                Some("expected number".to_string()),
            )
        })
        .and_then(|value| {
            Number::from_f64(value).map(Value::Number).ok_or_else(|| {
                AnswerParseError::new(
                    "Please enter a finite number.",
                    Some("number must be finite".to_string()),
                )
            })
        })
}

/// Accepts a 1-based position, a choice name, or a label (case-insensitive).
fn match_choice(question: &PreviewQuestion, raw: &str) -> Result<String, AnswerParseError> {
    let choices = question.choices.as_deref().unwrap_or_default();
    if choices.is_empty() {
        let reason = match &question.cascade_parent {
            Some(parent) => format!("answer '{}' first", parent),
            None => "the choice list is empty".to_string(),
        };
        return Err(AnswerParseError::new(
            "No choices are available for this question.",
            Some(reason),
        ));
    }

    if let Ok(position) = raw.parse::<usize>()
        && (1..=choices.len()).contains(&position)
    {
        return Ok(choices[position - 1].name.clone());
    }
    choices
        .iter()
        .find(|choice| choice.name.eq_ignore_ascii_case(raw) || choice.label.eq_ignore_ascii_case(raw))
        .map(|choice| choice.name.clone())
        .ok_or_else(|| {
            let names = choices
                .iter()
                .map(|choice| choice.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            AnswerParseError::new(
                format!("Choose one of: {}.", names),
                Some(format!("allowed values: {}", names)),
            )
        })
}

fn parse_repeat(raw: &str) -> Result<Value, AnswerParseError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.as_array().is_some_and(|items| items.iter().all(Value::is_object)) => {
            Ok(value)
        }
        Ok(_) => Err(AnswerParseError::new(
            "Repeat answers must be a JSON array of objects.",
            Some("expected [{\"field\": \"value\"}]".to_string()),
        )),
        Err(err) => Err(AnswerParseError::new(
            "Invalid repeat; provide a JSON array (e.g. [{\"field\": \"value\"}]).",
            Some(err.to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use xlsform_spec::{Choice, ChoiceList, FormSpec, QuestionSpec, build_preview};

    fn question(kind: QuestionType, required: bool) -> PreviewQuestion {
        PreviewQuestion {
            name: "field".into(),
            label: "Field".into(),
            hint: None,
            kind,
            depth: 0,
            required,
            visible: true,
            relevant: None,
            cascade_parent: None,
            current_value: None,
            choices: kind.is_select().then(|| {
                vec![
                    PreviewChoice {
                        name: "maize".into(),
                        label: "Maize".into(),
                    },
                    PreviewChoice {
                        name: "beans".into(),
                        label: "Beans".into(),
                    },
                ]
            }),
        }
    }

    #[test]
    fn select_one_accepts_position_name_or_label() {
        let select = question(QuestionType::SelectOne, true);
        assert_eq!(parse_answer(&select, "2").unwrap(), Some(json!("beans")));
        assert_eq!(parse_answer(&select, "MAIZE").unwrap(), Some(json!("maize")));
        assert_eq!(parse_answer(&select, "Beans").unwrap(), Some(json!("beans")));
        assert!(parse_answer(&select, "cassava").is_err());
        assert!(parse_answer(&select, "3").is_err());
    }

    #[test]
    fn select_multiple_collects_array() {
        let select = question(QuestionType::SelectMultiple, false);
        assert_eq!(
            parse_answer(&select, "beans, 1").unwrap(),
            Some(json!(["beans", "maize"]))
        );
    }

    #[test]
    fn blank_input_skips_only_optional_questions() {
        assert_eq!(parse_answer(&question(QuestionType::Text, false), "  ").unwrap(), None);
        assert!(parse_answer(&question(QuestionType::Text, true), "").is_err());
    }

    #[test]
    fn numbers_and_repeats_are_typed() {
        assert_eq!(
            parse_answer(&question(QuestionType::Integer, true), "42").unwrap(),
            Some(json!(42))
        );
        assert!(parse_answer(&question(QuestionType::Integer, true), "4.5").is_err());
        assert_eq!(
            parse_answer(&question(QuestionType::Decimal, true), "4.5").unwrap(),
            Some(json!(4.5))
        );
        assert!(parse_answer(&question(QuestionType::Repeat, true), r#"[{"name": "Ann"}]"#).is_ok());
        assert!(parse_answer(&question(QuestionType::Repeat, true), r#"{"name": "Ann"}"#).is_err());
    }

    #[test]
    fn pending_question_skips_repeat_children_and_skipped_names() {
        let mut form = FormSpec::new("visits", "Visits");
        let mut members = QuestionSpec::new("members", QuestionType::Repeat, "Members");
        members.children = vec![QuestionSpec::new("member_name", QuestionType::Text, "Name")];
        let mut crop = QuestionSpec::new("crop", QuestionType::SelectOne, "Crop");
        crop.choice_list = Some("crops".into());
        form.questions = vec![
            QuestionSpec::new("intro", QuestionType::Note, "Welcome"),
            members,
            crop,
        ];
        form.choice_lists = vec![ChoiceList::new("crops", vec![Choice::new("maize", "Maize")])];

        let payload = build_preview(&form, &Value::Object(Map::new()));
        let mut skipped = BTreeSet::new();
        assert_eq!(
            pending_question(&payload, &skipped).map(|question| question.name.as_str()),
            Some("members")
        );
        skipped.insert("members".to_string());
        assert_eq!(
            pending_question(&payload, &skipped).map(|question| question.name.as_str()),
            Some("crop")
        );

        let answered = build_preview(&form, &json!({ "crop": "maize" }));
        assert!(pending_question(&answered, &skipped).is_none());
    }
}
