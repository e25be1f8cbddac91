//! Structural checks on a form definition, run before export and after
//! every session edit.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cascade::cascade_errors;
use crate::expr::Expr;
use crate::names::is_valid_name;
use crate::spec::{FormSpec, QuestionSpec, QuestionType, is_filter_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding of [`check_form`]. `code` is stable and machine readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormIssue {
    pub severity: Severity,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub message: String,
}

impl FormIssue {
    fn error(code: &str, question: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.into(),
            question: question.map(String::from),
            message: message.into(),
        }
    }

    fn warning(code: &str, question: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, question, message)
        }
    }
}

impl fmt::Display for FormIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.question {
            Some(question) => write!(f, "{} [{}] {}: {}", level, self.code, question, self.message),
            None => write!(f, "{} [{}] {}", level, self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormReport {
    pub issues: Vec<FormIssue>,
}

impl FormReport {
    /// True when nothing blocks export; warnings are allowed.
    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &FormIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &FormIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    /// One-line description used in error messages.
    pub fn summary(&self) -> String {
        let errors = self.errors().count();
        match self.errors().next() {
            Some(first) if errors > 1 => format!("{} (and {} more)", first, errors - 1),
            Some(first) => first.to_string(),
            None => "no blocking issues".into(),
        }
    }
}

pub fn check_form(spec: &FormSpec) -> FormReport {
    let mut issues = Vec::new();

    if spec.id.trim().is_empty() || !is_valid_name(&spec.id) {
        issues.push(FormIssue::error(
            "invalid_form_id",
            None,
            format!("form id '{}' is not a valid identifier", spec.id),
        ));
    }
    if spec.title.trim().is_empty() {
        issues.push(FormIssue::warning("missing_title", None, "form has no title"));
    }
    if spec.questions.is_empty() {
        issues.push(FormIssue::error("empty_form", None, "form has no questions"));
    }

    let flat = spec.flatten();
    let mut seen = HashSet::new();
    for (position, question) in flat.iter().enumerate() {
        check_question(spec, question, position, &mut seen, &mut issues);
    }

    check_choice_lists(spec, &flat, &mut issues);

    for error in cascade_errors(spec) {
        issues.push(FormIssue::error("cascade", Some(error.question()), error.to_string()));
    }

    FormReport { issues }
}

fn check_question(
    spec: &FormSpec,
    question: &QuestionSpec,
    position: usize,
    seen: &mut HashSet<String>,
    issues: &mut Vec<FormIssue>,
) {
    let name = Some(question.name.as_str());

    if !is_valid_name(&question.name) {
        issues.push(FormIssue::error(
            "invalid_name",
            name,
            "names must start with a letter or underscore and contain only letters, digits, '_', '-' or '.'",
        ));
    }
    if !seen.insert(question.name.clone()) {
        issues.push(FormIssue::error("duplicate_name", name, "name is used more than once"));
    }
    if question.kind.requires_label() && question.label.trim().is_empty() {
        issues.push(FormIssue::error("missing_label", name, "question has no label"));
    }

    if question.kind.is_select() {
        match &question.choice_list {
            None => issues.push(FormIssue::error(
                "missing_choice_list",
                name,
                "select questions need a choice list",
            )),
            Some(list) if spec.choice_list(list).is_none() => issues.push(FormIssue::error(
                "unknown_choice_list",
                name,
                format!("choice list '{}' does not exist", list),
            )),
            Some(_) => {}
        }
    } else if question.choice_list.is_some() {
        issues.push(FormIssue::warning(
            "unexpected_choice_list",
            name,
            format!("{} questions ignore choice lists", question.kind),
        ));
    }

    if question.kind.is_container() {
        if question.children.is_empty() {
            issues.push(FormIssue::error("empty_group", name, "group has no questions"));
        }
    } else if !question.children.is_empty() {
        issues.push(FormIssue::error(
            "unexpected_children",
            name,
            format!("{} questions cannot contain other questions", question.kind),
        ));
    }

    if question.kind == QuestionType::Calculate && question.calculation.is_none() {
        issues.push(FormIssue::error(
            "missing_calculation",
            name,
            "calculate questions need a calculation",
        ));
    }
    if question.repeat_count.is_some() && question.kind != QuestionType::Repeat {
        issues.push(FormIssue::warning(
            "unexpected_repeat_count",
            name,
            "repeat_count only applies to repeats",
        ));
    }

    if let Some(relevant) = &question.relevant {
        check_references(spec, question, position, relevant, "relevant", issues);
    }
    if let Some(calculation) = &question.calculation {
        check_references(spec, question, position, calculation, "calculation", issues);
    }
    if let Some(constraint) = &question.constraint {
        if let (Some(min), Some(max)) = (constraint.min, constraint.max)
            && min > max
        {
            issues.push(FormIssue::error(
                "constraint_range",
                name,
                format!("constraint min '{}' cannot exceed max '{}'", min, max),
            ));
        }
        if let (Some(min_len), Some(max_len)) = (constraint.min_len, constraint.max_len)
            && min_len > max_len
        {
            issues.push(FormIssue::error(
                "constraint_range",
                name,
                format!("constraint min_len '{}' cannot exceed max_len '{}'", min_len, max_len),
            ));
        }
        if let Some(pattern) = &constraint.pattern
            && let Err(err) = Regex::new(pattern)
        {
            issues.push(FormIssue::error(
                "invalid_pattern",
                name,
                format!("pattern does not compile: {}", err),
            ));
        }
    }
}

fn check_references(
    spec: &FormSpec,
    question: &QuestionSpec,
    position: usize,
    expr: &Expr,
    column: &str,
    issues: &mut Vec<FormIssue>,
) {
    let name = Some(question.name.as_str());
    for reference in expr.references() {
        if reference == question.name {
            issues.push(FormIssue::error(
                "self_reference",
                name,
                format!("{} refers to the question itself", column),
            ));
            continue;
        }
        match spec.position_of(&reference) {
            None => issues.push(FormIssue::error(
                "unknown_reference",
                name,
                format!("{} refers to unknown question '{}'", column, reference),
            )),
            Some(target) if target > position => issues.push(FormIssue::warning(
                "forward_reference",
                name,
                format!("{} refers to '{}', which comes later in the form", column, reference),
            )),
            Some(_) => {}
        }
    }
}

fn check_choice_lists(spec: &FormSpec, flat: &[&QuestionSpec], issues: &mut Vec<FormIssue>) {
    let used: BTreeSet<&str> = flat
        .iter()
        .filter(|question| question.kind.is_select())
        .filter_map(|question| question.choice_list.as_deref())
        .collect();

    let mut seen_lists = HashSet::new();
    for list in &spec.choice_lists {
        let list_name = Some(list.name.as_str());
        if !is_valid_name(&list.name) {
            issues.push(FormIssue::error(
                "invalid_name",
                list_name,
                "choice list name is not a valid identifier",
            ));
        }
        if !seen_lists.insert(list.name.as_str()) {
            issues.push(FormIssue::error(
                "duplicate_list",
                list_name,
                "choice list is defined more than once",
            ));
        }
        if list.choices.is_empty() {
            issues.push(FormIssue::error("empty_choice_list", list_name, "choice list has no choices"));
        }
        let mut seen_choices = HashSet::new();
        for choice in &list.choices {
            if !seen_choices.insert(choice.name.as_str()) {
                issues.push(FormIssue::error(
                    "duplicate_choice",
                    list_name,
                    format!("choice '{}' appears more than once", choice.name),
                ));
            }
            if choice.name.trim().is_empty() || choice.name.contains(char::is_whitespace) {
                issues.push(FormIssue::error(
                    "invalid_choice_name",
                    list_name,
                    format!("choice '{}' must be a single non-empty word", choice.name),
                ));
            }
            for column in choice.filters.keys().filter(|column| !is_filter_column(column)) {
                issues.push(FormIssue::error(
                    "invalid_filter_column",
                    list_name,
                    format!(
                        "choice '{}' uses '{}' as a filter column, which is reserved or not a valid name",
                        choice.name, column
                    ),
                ));
            }
            if choice.label.trim().is_empty() {
                issues.push(FormIssue::warning(
                    "missing_choice_label",
                    list_name,
                    format!("choice '{}' has no label", choice.name),
                ));
            }
        }
        if !used.contains(list.name.as_str()) {
            issues.push(FormIssue::warning(
                "unused_choice_list",
                list_name,
                "no question uses this choice list",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Choice, ChoiceList};

    fn market_form() -> FormSpec {
        let mut stall = QuestionSpec::new("stall", QuestionType::SelectOne, "Stall");
        stall.choice_list = Some("stalls".into());
        let mut form = FormSpec::new("market", "Market");
        form.questions = vec![stall];
        form.choice_lists = vec![ChoiceList::new(
            "stalls",
            vec![Choice::new("fruit", "Fruit"), Choice::new("fish", "Fish")],
        )];
        form
    }

    #[test]
    fn clean_form_has_no_errors() {
        let report = check_form(&market_form());
        assert!(report.is_ok(), "{:?}", report);
    }

    #[test]
    fn filter_keys_may_not_shadow_choice_columns() {
        let mut form = market_form();
        form.choice_lists[0].choices[0] = Choice::new("fruit", "Fruit").with_filter("label", "x");
        form.choice_lists[0].choices[1] = Choice::new("fish", "Fish").with_filter("two words", "y");
        let report = check_form(&form);
        assert!(!report.is_ok());
        let flagged = report
            .issues
            .iter()
            .filter(|issue| issue.code == "invalid_filter_column")
            .count();
        assert_eq!(flagged, 2);

        form.choice_lists[0].choices[0] = Choice::new("fruit", "Fruit").with_filter("zone", "x");
        form.choice_lists[0].choices[1] = Choice::new("fish", "Fish").with_filter("zone", "y");
        assert!(check_form(&form).is_ok());
    }

    #[test]
    fn duplicate_names_and_unknown_lists_are_errors() {
        let mut form = market_form();
        let mut again = QuestionSpec::new("stall", QuestionType::SelectOne, "Stall again");
        again.choice_list = Some("missing".into());
        form.questions.push(again);
        let report = check_form(&form);
        assert!(report.has_code("duplicate_name"));
        assert!(report.has_code("unknown_choice_list"));
    }
}
