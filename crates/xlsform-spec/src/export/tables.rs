use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::cascade::choice_filter;
use crate::spec::{FormSpec, QuestionSpec, QuestionType};

/// Survey sheet columns in output order; the first three are always written.
pub const SURVEY_COLUMNS: [&str; 15] = [
    "type",
    "name",
    "label",
    "hint",
    "required",
    "required_message",
    "relevant",
    "constraint",
    "constraint_message",
    "choice_filter",
    "calculation",
    "default",
    "appearance",
    "read_only",
    "repeat_count",
];

/// Fixed choices columns; cascade filter columns follow in name order.
pub const CHOICES_COLUMNS: [&str; 3] = ["list_name", "name", "label"];

pub const SETTINGS_COLUMNS: [&str; 5] = [
    "form_title",
    "form_id",
    "version",
    "default_language",
    "instance_name",
];

/// A sheet as header plus string rows, one cell per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|candidate| candidate == column)
    }

    /// Cell by row index and column header; empty when the column is absent.
    pub fn cell(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|col| self.rows.get(row).and_then(|cells| cells.get(col)))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, column: &str) -> Vec<&str> {
        (0..self.rows.len())
            .map(|row| self.cell(row, column))
            .collect()
    }
}

/// The three sheets of an XLSForm workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlsFormTables {
    pub survey: Table,
    pub choices: Table,
    pub settings: Table,
}

impl XlsFormTables {
    pub fn sheets(&self) -> [&Table; 3] {
        [&self.survey, &self.choices, &self.settings]
    }
}

type Row = BTreeMap<String, String>;

struct TableBuilder {
    order: Vec<String>,
    always: usize,
    rows: Vec<Row>,
}

impl TableBuilder {
    fn new(order: &[&str], always: usize) -> Self {
        Self {
            order: order.iter().map(|column| column.to_string()).collect(),
            always,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Keeps mandatory columns plus any column that holds a value; unknown
    /// columns are appended alphabetically.
    fn finish(self, name: &str) -> Table {
        let populated = |column: &str| {
            self.rows
                .iter()
                .any(|row| row.get(column).is_some_and(|value| !value.is_empty()))
        };
        let mut columns = self
            .order
            .iter()
            .enumerate()
            .filter(|(index, column)| *index < self.always || populated(column))
            .map(|(_, column)| column.clone())
            .collect::<Vec<_>>();
        let extra = self
            .rows
            .iter()
            .flat_map(|row| row.keys())
            .filter(|column| !self.order.contains(column) && populated(column))
            .cloned()
            .collect::<std::collections::BTreeSet<_>>();
        columns.extend(extra);

        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        Table {
            name: name.into(),
            columns,
            rows,
        }
    }
}

fn set(row: &mut Row, column: &str, value: Option<String>) {
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        row.insert(column.into(), value);
    }
}

fn yes(flag: bool) -> Option<String> {
    flag.then(|| "yes".to_string())
}

/// Encodes the form, stamping a version from the current time when needed.
pub fn encode(spec: &FormSpec) -> XlsFormTables {
    encode_at(spec, Utc::now())
}

/// Encodes the form with an explicit clock for the fallback version.
pub fn encode_at(spec: &FormSpec, now: DateTime<Utc>) -> XlsFormTables {
    let mut survey = TableBuilder::new(&SURVEY_COLUMNS, 3);
    encode_questions(&spec.questions, &mut survey);

    let mut choices = TableBuilder::new(&CHOICES_COLUMNS, CHOICES_COLUMNS.len());
    for list in &spec.choice_lists {
        for choice in &list.choices {
            let mut row = Row::new();
            row.insert("list_name".into(), list.name.clone());
            row.insert("name".into(), choice.name.clone());
            row.insert("label".into(), choice.label.clone());
            for (column, value) in &choice.filters {
                set(&mut row, column, Some(value.clone()));
            }
            choices.push(row);
        }
    }

    let mut settings = TableBuilder::new(&SETTINGS_COLUMNS, 3);
    let mut row = Row::new();
    row.insert("form_title".into(), spec.title.clone());
    row.insert("form_id".into(), spec.id.clone());
    row.insert(
        "version".into(),
        spec.version
            .clone()
            .filter(|version| !version.trim().is_empty())
            .unwrap_or_else(|| now.format("%Y%m%d%H%M").to_string()),
    );
    set(&mut row, "default_language", spec.default_language.clone());
    set(&mut row, "instance_name", spec.instance_name.clone());
    settings.push(row);

    XlsFormTables {
        survey: survey.finish("survey"),
        choices: choices.finish("choices"),
        settings: settings.finish("settings"),
    }
}

fn encode_questions(questions: &[QuestionSpec], survey: &mut TableBuilder) {
    for question in questions {
        match question.kind {
            QuestionType::Group | QuestionType::Repeat => {
                let block = if question.kind == QuestionType::Group {
                    "group"
                } else {
                    "repeat"
                };
                let mut begin = common_row(question, format!("begin_{}", block));
                if question.kind == QuestionType::Repeat {
                    set(&mut begin, "repeat_count", question.repeat_count.map(|count| count.to_string()));
                }
                survey.push(begin);
                encode_questions(&question.children, survey);
                let mut end = Row::new();
                end.insert("type".into(), format!("end_{}", block));
                survey.push(end);
            }
            kind => {
                let type_cell = match (&question.choice_list, kind.is_select()) {
                    (Some(list), true) => format!("{} {}", kind.keyword(), list),
                    _ => kind.keyword().to_string(),
                };
                let mut row = common_row(question, type_cell);
                set(&mut row, "required", yes(question.required));
                if question.required {
                    set(&mut row, "required_message", question.required_message.clone());
                }
                if let Some(constraint) = &question.constraint {
                    set(&mut row, "constraint", constraint.to_xpath());
                    set(&mut row, "constraint_message", constraint.message.clone());
                }
                set(&mut row, "choice_filter", choice_filter(question));
                set(
                    &mut row,
                    "calculation",
                    question.calculation.as_ref().map(|expr| expr.to_xpath()),
                );
                set(&mut row, "default", question.default.clone());
                set(&mut row, "read_only", yes(question.read_only));
                survey.push(row);
            }
        }
    }
}

fn common_row(question: &QuestionSpec, type_cell: String) -> Row {
    let mut row = Row::new();
    row.insert("type".into(), type_cell);
    row.insert("name".into(), question.name.clone());
    set(&mut row, "label", Some(question.label.clone()));
    set(&mut row, "hint", question.hint.clone());
    set(
        &mut row,
        "relevant",
        question.relevant.as_ref().map(|expr| expr.to_xpath()),
    );
    set(&mut row, "appearance", question.appearance.clone());
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::spec::{CascadeSpec, Choice, ChoiceList, Constraint};
    use chrono::TimeZone;

    fn sample_form() -> FormSpec {
        let mut consent = QuestionSpec::new("consent", QuestionType::SelectOne, "Do you consent?");
        consent.choice_list = Some("yes_no".into());
        consent.required = true;

        let mut age = QuestionSpec::new("age", QuestionType::Integer, "Age");
        age.constraint = Some(Constraint {
            min: Some(0.0),
            max: Some(120.0),
            message: Some("Age must be between 0 and 120".into()),
            ..Default::default()
        });

        let mut district = QuestionSpec::new("district", QuestionType::SelectOne, "District");
        district.choice_list = Some("districts".into());
        district.cascade = Some(CascadeSpec {
            parent: "region".into(),
            column: "region".into(),
        });

        let mut region = QuestionSpec::new("region", QuestionType::SelectOne, "Region");
        region.choice_list = Some("regions".into());

        let mut details = QuestionSpec::new("details", QuestionType::Group, "Details");
        details.relevant = Some(Expr::answer_equals("consent", "yes"));
        details.children = vec![age, region, district];

        let mut form = FormSpec::new("baseline", "Baseline survey");
        form.questions = vec![consent, details];
        form.choice_lists = vec![
            ChoiceList::new("yes_no", vec![Choice::new("yes", "Yes"), Choice::new("no", "No")]),
            ChoiceList::new("regions", vec![Choice::new("north", "North")]),
            ChoiceList::new(
                "districts",
                vec![Choice::new("gulu", "Gulu").with_filter("region", "north")],
            ),
        ];
        form
    }

    #[test]
    fn survey_rows_wrap_groups_and_decorate_selects() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        let tables = encode_at(&sample_form(), now);
        let survey = &tables.survey;

        assert_eq!(
            survey.column("type"),
            vec![
                "select_one yes_no",
                "begin_group",
                "integer",
                "select_one regions",
                "select_one districts",
                "end_group"
            ]
        );
        assert_eq!(survey.cell(1, "relevant"), "${consent} = 'yes'");
        assert_eq!(survey.cell(0, "required"), "yes");
        assert_eq!(survey.cell(2, "constraint"), ". >= 0 and . <= 120");
        assert_eq!(survey.cell(2, "constraint_message"), "Age must be between 0 and 120");
        assert_eq!(survey.cell(4, "choice_filter"), "region=${region}");
        assert!(survey.column_index("calculation").is_none());
        assert!(survey.column_index("hint").is_none());
    }

    #[test]
    fn choices_append_filter_columns() {
        let tables = encode(&sample_form());
        let choices = &tables.choices;
        assert_eq!(choices.columns, vec!["list_name", "name", "label", "region"]);
        assert_eq!(choices.rows.len(), 4);
        assert_eq!(choices.cell(3, "region"), "north");
        assert_eq!(choices.cell(0, "region"), "");
    }

    #[test]
    fn settings_stamp_version_when_missing() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        let mut form = sample_form();
        let tables = encode_at(&form, now);
        assert_eq!(tables.settings.cell(0, "version"), "202403050930");
        assert_eq!(tables.settings.columns, vec!["form_title", "form_id", "version"]);

        form.version = Some("3".into());
        form.default_language = Some("English (en)".into());
        let tables = encode_at(&form, now);
        assert_eq!(tables.settings.cell(0, "version"), "3");
        assert_eq!(tables.settings.cell(0, "default_language"), "English (en)");
    }
}
