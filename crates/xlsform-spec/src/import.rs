//! Read an XLSForm workbook back into a [`FormSpec`].

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::LazyLock;

use calamine::{Data, Reader, Xlsx};
use regex::Regex;
use thiserror::Error;

use crate::parse::parse_or_raw;
use crate::spec::{CascadeSpec, Choice, ChoiceList, Constraint, FormSpec, QuestionSpec, QuestionType};

static CHOICE_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*=\s*\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}\s*$")
        .expect("choice filter pattern is valid")
});

static CONSTRAINT_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:\.\s*(?P<cmp>>=|<=)\s*(?P<num>-?[0-9]+(?:\.[0-9]+)?)|string-length\(\.\)\s*(?P<lcmp>>=|<=)\s*(?P<len>[0-9]+)|regex\(\.,\s*(?:'(?P<sq>[^']*)'|"(?P<dq>[^"]*)")\))$"#,
    )
    .expect("constraint pattern is valid")
});

/// Metadata rows that carry no question and are dropped on import.
const METADATA_TYPES: [&str; 12] = [
    "start",
    "end",
    "today",
    "deviceid",
    "subscriberid",
    "simserial",
    "phonenumber",
    "username",
    "email",
    "audit",
    "start-geopoint",
    "hidden",
];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),
    #[error("workbook has no '{0}' sheet")]
    MissingSheet(&'static str),
    #[error("sheet '{sheet}' has no '{column}' column")]
    MissingColumn {
        sheet: &'static str,
        column: &'static str,
    },
    #[error("row {row}: unsupported question type '{value}'")]
    UnsupportedType { row: usize, value: String },
    #[error("row {row}: '{found}' does not close an open block")]
    UnmatchedEnd { row: usize, found: String },
    #[error("block '{name}' is never closed")]
    UnclosedBlock { name: String },
    #[error("choices row {row}: missing list_name")]
    MissingListName { row: usize },
}

/// One worksheet with lower-cased headers.
struct Sheet {
    headers: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    fn from_rows(mut rows: impl Iterator<Item = Vec<String>>) -> Self {
        let headers = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, header)| (header.trim().to_ascii_lowercase(), index))
            .collect();
        Self {
            headers,
            rows: rows.collect(),
        }
    }

    fn has(&self, column: &str) -> bool {
        self.headers.contains_key(column)
    }

    /// Cell for `column`, falling back to the first translated `column::lang` variant.
    fn get<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        let index = self.headers.get(column).copied().or_else(|| {
            let prefix = format!("{}::", column);
            self.headers
                .iter()
                .filter(|(header, _)| header.starts_with(&prefix))
                .map(|(_, index)| *index)
                .min()
        });
        index
            .and_then(|index| row.get(index))
            .map(|cell| cell.trim())
            .unwrap_or("")
    }

    fn optional(&self, row: &[String], column: &str) -> Option<String> {
        let value = self.get(row, column);
        (!value.is_empty()).then(|| value.to_string())
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(text) => text.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => {
            if value.fract() == 0.0 {
                (*value as i64).to_string()
            } else {
                value.to_string()
            }
        }
        Data::Bool(value) => value.to_string(),
        Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        _ => String::new(),
    }
}

fn read_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    wanted: &str,
) -> Result<Option<Sheet>, ImportError> {
    let Some(name) = workbook
        .sheet_names()
        .into_iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted))
    else {
        return Ok(None);
    };
    let range = workbook.worksheet_range(&name)?;
    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
    Ok(Some(Sheet::from_rows(rows)))
}

fn is_yes(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "true()" | "1" | "y"
    )
}

/// Parses `.xlsx` bytes into a form definition.
pub fn import_xlsx(bytes: &[u8]) -> Result<FormSpec, ImportError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;

    let survey = read_sheet(&mut workbook, "survey")?.ok_or(ImportError::MissingSheet("survey"))?;
    for column in ["type", "name"] {
        if !survey.has(column) {
            return Err(ImportError::MissingColumn {
                sheet: "survey",
                column,
            });
        }
    }

    let mut form = FormSpec::new("imported_form", "");
    if let Some(settings) = read_sheet(&mut workbook, "settings")?
        && let Some(row) = settings.rows.first()
    {
        if let Some(id) = settings.optional(row, "form_id") {
            form.id = id;
        }
        form.title = settings.get(row, "form_title").to_string();
        form.version = settings.optional(row, "version");
        form.default_language = settings.optional(row, "default_language");
        form.instance_name = settings.optional(row, "instance_name");
    }
    if form.title.is_empty() {
        form.title = form.id.clone();
    }

    form.questions = read_questions(&survey)?;

    if let Some(choices) = read_sheet(&mut workbook, "choices")? {
        form.choice_lists = read_choices(&choices)?;
    }

    log::info!(
        "imported form '{}' ({} questions, {} choice lists)",
        form.id,
        form.flatten().len(),
        form.choice_lists.len()
    );
    Ok(form)
}

fn read_questions(survey: &Sheet) -> Result<Vec<QuestionSpec>, ImportError> {
    let mut top = Vec::new();
    let mut open: Vec<QuestionSpec> = Vec::new();

    for (index, row) in survey.rows.iter().enumerate() {
        let row_number = index + 2;
        let raw_type = survey.get(row, "type");
        if raw_type.is_empty() {
            if !survey.get(row, "name").is_empty() {
                log::warn!("survey row {}: skipping row without a type", row_number);
            }
            continue;
        }
        let normalized = raw_type.to_ascii_lowercase().replace(' ', "_");
        let mut words = raw_type.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_lowercase();

        match normalized.as_str() {
            "begin_group" | "begin_repeat" => {
                let kind = if normalized == "begin_group" {
                    QuestionType::Group
                } else {
                    QuestionType::Repeat
                };
                let mut block = base_question(survey, row, kind);
                if let Some(count) = survey.optional(row, "repeat_count") {
                    match count.parse::<u32>() {
                        Ok(count) => block.repeat_count = Some(count),
                        Err(_) => log::warn!(
                            "survey row {}: ignoring non-numeric repeat_count '{}'",
                            row_number,
                            count
                        ),
                    }
                }
                open.push(block);
                continue;
            }
            "end_group" | "end_repeat" => {
                let expected = if normalized == "end_group" {
                    QuestionType::Group
                } else {
                    QuestionType::Repeat
                };
                let block = match open.pop() {
                    Some(block) if block.kind == expected => block,
                    _ => {
                        return Err(ImportError::UnmatchedEnd {
                            row: row_number,
                            found: raw_type.to_string(),
                        });
                    }
                };
                attach(&mut open, &mut top, block);
                continue;
            }
            _ => {}
        }

        if METADATA_TYPES.contains(&keyword.as_str()) {
            log::debug!("survey row {}: dropping metadata field '{}'", row_number, keyword);
            continue;
        }

        let kind = QuestionType::from_keyword(&keyword)
            .filter(|kind| !kind.is_container())
            .ok_or_else(|| ImportError::UnsupportedType {
                row: row_number,
                value: raw_type.to_string(),
            })?;
        let mut question = base_question(survey, row, kind);
        if kind.is_select() {
            question.choice_list = words.next().map(String::from);
        }
        question.required = is_yes(survey.get(row, "required"));
        if question.required {
            question.required_message = survey.optional(row, "required_message");
        }
        question.constraint = survey
            .optional(row, "constraint")
            .map(|text| parse_constraint(&text, survey.optional(row, "constraint_message")));
        question.calculation = survey.optional(row, "calculation").map(|text| parse_or_raw(&text));
        question.default = survey.optional(row, "default");
        question.read_only = is_yes(survey.get(row, "read_only"));
        if let Some(filter) = survey.optional(row, "choice_filter") {
            match CHOICE_FILTER.captures(&filter) {
                Some(captures) => {
                    question.cascade = Some(CascadeSpec {
                        column: captures[1].to_string(),
                        parent: captures[2].to_string(),
                    });
                }
                None => log::warn!(
                    "survey row {}: choice_filter '{}' is not a simple cascade; dropped",
                    row_number,
                    filter
                ),
            }
        }

        attach(&mut open, &mut top, question);
    }

    if let Some(block) = open.pop() {
        return Err(ImportError::UnclosedBlock { name: block.name });
    }
    Ok(top)
}

fn base_question(survey: &Sheet, row: &[String], kind: QuestionType) -> QuestionSpec {
    let mut question = QuestionSpec::new(survey.get(row, "name"), kind, survey.get(row, "label"));
    question.hint = survey.optional(row, "hint");
    question.relevant = survey.optional(row, "relevant").map(|text| parse_or_raw(&text));
    question.appearance = survey.optional(row, "appearance");
    question
}

fn attach(open: &mut [QuestionSpec], top: &mut Vec<QuestionSpec>, question: QuestionSpec) {
    match open.last_mut() {
        Some(parent) => parent.children.push(question),
        None => top.push(question),
    }
}

/// Recovers structured bounds from the conjunction the encoder writes;
/// anything else is kept as a verbatim expression.
fn parse_constraint(text: &str, message: Option<String>) -> Constraint {
    let mut constraint = Constraint {
        message,
        ..Default::default()
    };
    let mut structured = constraint.clone();
    for part in text.split(" and ").map(str::trim) {
        let Some(captures) = CONSTRAINT_PART.captures(part) else {
            constraint.expression = Some(text.trim().to_string());
            return constraint;
        };
        if let (Some(cmp), Some(num)) = (captures.name("cmp"), captures.name("num")) {
            let value = num.as_str().parse::<f64>().ok();
            let slot = if cmp.as_str() == ">=" {
                &mut structured.min
            } else {
                &mut structured.max
            };
            if slot.is_some() || value.is_none() {
                constraint.expression = Some(text.trim().to_string());
                return constraint;
            }
            *slot = value;
        } else if let (Some(cmp), Some(len)) = (captures.name("lcmp"), captures.name("len")) {
            let value = len.as_str().parse::<usize>().ok();
            let slot = if cmp.as_str() == ">=" {
                &mut structured.min_len
            } else {
                &mut structured.max_len
            };
            if slot.is_some() || value.is_none() {
                constraint.expression = Some(text.trim().to_string());
                return constraint;
            }
            *slot = value;
        } else {
            let pattern = captures
                .name("sq")
                .or_else(|| captures.name("dq"))
                .map(|m| m.as_str().to_string());
            if structured.pattern.is_some() {
                constraint.expression = Some(text.trim().to_string());
                return constraint;
            }
            structured.pattern = pattern;
        }
    }
    structured
}

fn read_choices(choices: &Sheet) -> Result<Vec<ChoiceList>, ImportError> {
    let list_column = if choices.has("list_name") {
        "list_name"
    } else {
        "list name"
    };
    let mut filter_columns = choices
        .headers
        .iter()
        .filter(|(header, _)| {
            !header.is_empty()
                && !matches!(
                    header.as_str(),
                    "list_name" | "list name" | "name" | "label" | "image" | "audio" | "video"
                )
                && !header.contains("::")
        })
        .map(|(header, _)| header.clone())
        .collect::<Vec<_>>();
    filter_columns.sort();

    let mut lists: Vec<ChoiceList> = Vec::new();
    for (index, row) in choices.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let list_name = choices.get(row, list_column);
        if list_name.is_empty() {
            return Err(ImportError::MissingListName { row: index + 2 });
        }
        let mut choice = Choice::new(choices.get(row, "name"), choices.get(row, "label"));
        for column in &filter_columns {
            if let Some(value) = choices.optional(row, column) {
                choice = choice.with_filter(column.clone(), value);
            }
        }
        match lists.iter_mut().find(|list| list.name == list_name) {
            Some(list) => list.choices.push(choice),
            None => lists.push(ChoiceList::new(list_name, vec![choice])),
        }
    }
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_constraints_are_recovered() {
        let constraint = parse_constraint(
            ". >= 0 and . <= 120 and string-length(.) <= 3",
            Some("bad age".into()),
        );
        assert_eq!(constraint.min, Some(0.0));
        assert_eq!(constraint.max, Some(120.0));
        assert_eq!(constraint.max_len, Some(3));
        assert_eq!(constraint.expression, None);
        assert_eq!(constraint.message.as_deref(), Some("bad age"));

        let pattern = parse_constraint("regex(., '^[0-9]{10}$')", None);
        assert_eq!(pattern.pattern.as_deref(), Some("^[0-9]{10}$"));
    }

    #[test]
    fn other_constraints_stay_verbatim() {
        let constraint = parse_constraint(". > ${age} and . < 10", None);
        assert_eq!(constraint.expression.as_deref(), Some(". > ${age} and . < 10"));
        assert_eq!(constraint.min, None);
    }

    #[test]
    fn translated_headers_fall_back() {
        let sheet = Sheet::from_rows(
            vec![
                vec!["Type".to_string(), "name".into(), "label::English (en)".into()],
                vec!["text".into(), "q1".into(), "First".into()],
            ]
            .into_iter(),
        );
        let row = &sheet.rows[0];
        assert_eq!(sheet.get(row, "type"), "text");
        assert_eq!(sheet.get(row, "label"), "First");
        assert_eq!(sheet.optional(row, "hint"), None);
    }

    #[test]
    fn nested_blocks_are_rebuilt() {
        let sheet = Sheet::from_rows(
            vec![
                vec!["type".to_string(), "name".into(), "label".into(), "choice_filter".into()],
                vec!["begin_group".into(), "g".into(), "Group".into(), "".into()],
                vec!["begin repeat".into(), "members".into(), "Members".into(), "".into()],
                vec!["text".into(), "member".into(), "Member".into(), "".into()],
                vec!["end repeat".into(), "".into(), "".into(), "".into()],
                vec!["end_group".into(), "".into(), "".into(), "".into()],
                vec!["select_one cities".into(), "city".into(), "City".into(), "country=${country}".into()],
            ]
            .into_iter(),
        );
        let questions = read_questions(&sheet).expect("valid survey");
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].children[0].kind, QuestionType::Repeat);
        assert_eq!(questions[0].children[0].children[0].name, "member");
        assert_eq!(questions[1].choice_list.as_deref(), Some("cities"));
        assert_eq!(
            questions[1].cascade,
            Some(CascadeSpec {
                parent: "country".into(),
                column: "country".into()
            })
        );
    }

    #[test]
    fn mismatched_blocks_fail() {
        let sheet = Sheet::from_rows(
            vec![
                vec!["type".to_string(), "name".into()],
                vec!["begin_group".into(), "g".into()],
                vec!["end_repeat".into(), "".into()],
            ]
            .into_iter(),
        );
        assert!(matches!(
            read_questions(&sheet),
            Err(ImportError::UnmatchedEnd { row: 3, .. })
        ));

        let unclosed = Sheet::from_rows(
            vec![
                vec!["type".to_string(), "name".into()],
                vec!["begin_group".into(), "g".into()],
            ]
            .into_iter(),
        );
        assert!(matches!(
            read_questions(&unclosed),
            Err(ImportError::UnclosedBlock { name }) if name == "g"
        ));
    }
}
