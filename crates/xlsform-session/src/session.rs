use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xlsform_spec::{
    CascadeSpec, ChoiceList, Expr, FormReport, FormSpec, PreviewPayload, QuestionSpec,
    build_preview, check_form, export_xlsx, is_valid_name, resolve_cascade,
};

use crate::SessionError;
use crate::command::SessionCommand;

/// Number of undo snapshots kept.
pub const HISTORY_LIMIT: usize = 50;

/// Result of a successful command: the current form and its check report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub spec: FormSpec,
    pub report: FormReport,
}

/// A form under construction plus its undo history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSession {
    spec: FormSpec,
    #[serde(default)]
    history: Vec<FormSpec>,
}

impl Default for FormSession {
    fn default() -> Self {
        Self::new(FormSpec::new("new_form", "New form"))
    }
}

impl FormSession {
    pub fn new(spec: FormSpec) -> Self {
        Self {
            spec,
            history: Vec::new(),
        }
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn into_spec(self) -> FormSpec {
        self.spec
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn report(&self) -> FormReport {
        check_form(&self.spec)
    }

    /// Applies a command to a copy of the form; the session only changes
    /// when the whole command succeeds.
    pub fn apply(&mut self, command: SessionCommand) -> Result<SessionOutcome, SessionError> {
        let name = command.name();
        if let SessionCommand::Undo = command {
            self.spec = self.history.pop().ok_or(SessionError::NothingToUndo)?;
        } else {
            let mut draft = self.spec.clone();
            apply_to(&mut draft, command)?;
            let previous = std::mem::replace(&mut self.spec, draft);
            self.history.push(previous);
            if self.history.len() > HISTORY_LIMIT {
                let excess = self.history.len() - HISTORY_LIMIT;
                self.history.drain(..excess);
            }
        }

        let report = check_form(&self.spec);
        log::debug!(
            "applied {} to '{}' ({} errors, {} warnings)",
            name,
            self.spec.id,
            report.errors().count(),
            report.warnings().count()
        );
        Ok(SessionOutcome {
            spec: self.spec.clone(),
            report,
        })
    }

    pub fn export_xlsx(&self) -> Result<Vec<u8>, SessionError> {
        Ok(export_xlsx(&self.spec)?)
    }

    pub fn preview(&self, answers: &Value) -> PreviewPayload {
        build_preview(&self.spec, answers)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, SessionError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, SessionError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }
}

fn apply_to(spec: &mut FormSpec, command: SessionCommand) -> Result<(), SessionError> {
    match command {
        SessionCommand::SetFormMeta {
            id,
            title,
            version,
            description,
            default_language,
            instance_name,
        } => {
            if let Some(id) = id {
                if !is_valid_name(&id) {
                    return Err(SessionError::InvalidName(id));
                }
                spec.id = id;
            }
            if let Some(title) = title {
                spec.title = title;
            }
            let clearable = |value: String| (!value.trim().is_empty()).then_some(value);
            if let Some(version) = version {
                spec.version = clearable(version);
            }
            if let Some(description) = description {
                spec.description = clearable(description);
            }
            if let Some(language) = default_language {
                spec.default_language = clearable(language);
            }
            if let Some(instance_name) = instance_name {
                spec.instance_name = clearable(instance_name);
            }
        }
        SessionCommand::AddQuestion {
            question,
            parent,
            position,
        } => add_question(spec, question, parent, position)?,
        SessionCommand::RemoveQuestion { name, force } => remove_question(spec, &name, force)?,
        SessionCommand::MoveQuestion { name, position } => {
            let siblings = spec
                .container_of_mut(&name)
                .ok_or_else(|| SessionError::UnknownQuestion(name.clone()))?;
            let index = siblings
                .iter()
                .position(|question| question.name == name)
                .ok_or_else(|| SessionError::UnknownQuestion(name.clone()))?;
            if position >= siblings.len() {
                return Err(SessionError::PositionOutOfRange {
                    position,
                    len: siblings.len(),
                });
            }
            let question = siblings.remove(index);
            siblings.insert(position, question);
        }
        SessionCommand::UpdateQuestion { question, force } => update_question(spec, question, force)?,
        SessionCommand::RenameQuestion { name, new_name } => rename_question(spec, &name, &new_name)?,
        SessionCommand::SetRelevant { name, relevant } => {
            let expr = relevant.resolve()?;
            check_relevant_references(spec, &name, &expr)?;
            question_mut(spec, &name)?.relevant = Some(expr);
        }
        SessionCommand::ClearRelevant { name } => {
            question_mut(spec, &name)?.relevant = None;
        }
        SessionCommand::AddChoiceList { list } => {
            if !is_valid_name(&list.name) {
                return Err(SessionError::InvalidName(list.name));
            }
            if spec.choice_list(&list.name).is_some() {
                return Err(SessionError::DuplicateChoiceList(list.name));
            }
            let mut seen = BTreeSet::new();
            for choice in &list.choices {
                if !seen.insert(choice.name.as_str()) {
                    return Err(SessionError::DuplicateChoice {
                        list: list.name.clone(),
                        name: choice.name.clone(),
                    });
                }
            }
            spec.choice_lists.push(list);
        }
        SessionCommand::RemoveChoiceList { name } => {
            let users = spec
                .flatten()
                .into_iter()
                .filter(|question| question.choice_list.as_deref() == Some(name.as_str()))
                .map(|question| question.name.clone())
                .collect::<Vec<_>>();
            if !users.is_empty() {
                return Err(SessionError::ChoiceListInUse { name, questions: users });
            }
            let index = spec
                .choice_lists
                .iter()
                .position(|list| list.name == name)
                .ok_or(SessionError::UnknownChoiceList(name))?;
            spec.choice_lists.remove(index);
        }
        SessionCommand::AddChoice {
            list,
            choice,
            position,
        } => {
            let target = choice_list_mut(spec, &list)?;
            if target.contains(&choice.name) {
                return Err(SessionError::DuplicateChoice {
                    list,
                    name: choice.name,
                });
            }
            match position {
                Some(position) if position > target.choices.len() => {
                    return Err(SessionError::PositionOutOfRange {
                        position,
                        len: target.choices.len(),
                    });
                }
                Some(position) => target.choices.insert(position, choice),
                None => target.choices.push(choice),
            }
        }
        SessionCommand::RemoveChoice { list, name } => {
            let target = choice_list_mut(spec, &list)?;
            let index = target
                .choices
                .iter()
                .position(|choice| choice.name == name)
                .ok_or(SessionError::UnknownChoice { list, name })?;
            target.choices.remove(index);
        }
        SessionCommand::SetCascade {
            name,
            parent,
            column,
        } => {
            question_mut(spec, &name)?.cascade = Some(CascadeSpec { parent, column });
            resolve_cascade(spec, &name)?;
        }
        SessionCommand::ClearCascade { name } => {
            question_mut(spec, &name)?.cascade = None;
        }
        SessionCommand::Undo => {}
    }
    Ok(())
}

fn question_mut<'a>(spec: &'a mut FormSpec, name: &str) -> Result<&'a mut QuestionSpec, SessionError> {
    spec.find_question_mut(name)
        .ok_or_else(|| SessionError::UnknownQuestion(name.to_string()))
}

fn choice_list_mut<'a>(spec: &'a mut FormSpec, name: &str) -> Result<&'a mut ChoiceList, SessionError> {
    spec.choice_list_mut(name)
        .ok_or_else(|| SessionError::UnknownChoiceList(name.to_string()))
}

/// A relevant expression may only use questions that come before `name`.
fn check_relevant_references(spec: &FormSpec, name: &str, expr: &Expr) -> Result<(), SessionError> {
    let own = spec
        .position_of(name)
        .ok_or_else(|| SessionError::UnknownQuestion(name.to_string()))?;
    for reference in expr.references() {
        let reason = match spec.position_of(&reference) {
            _ if reference == name => Some("refers to the question itself"),
            None => Some("is not a question in this form"),
            Some(position) if position > own => Some("comes later in the form"),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            return Err(SessionError::InvalidReference {
                question: name.to_string(),
                reference,
                reason,
            });
        }
    }
    Ok(())
}

fn update_question(spec: &mut FormSpec, mut question: QuestionSpec, force: bool) -> Result<(), SessionError> {
    let existing = spec
        .find_question(&question.name)
        .ok_or_else(|| SessionError::UnknownQuestion(question.name.clone()))?;
    if question.children.is_empty() && question.kind.is_container() {
        question.children = existing.children.clone();
    }
    let mut before = BTreeSet::new();
    subtree_names(existing, &mut before);

    let mut after = BTreeSet::from([question.name.clone()]);
    let mut stack = question.children.iter().collect::<Vec<_>>();
    while let Some(current) = stack.pop() {
        if !is_valid_name(&current.name) {
            return Err(SessionError::InvalidName(current.name.clone()));
        }
        let taken_elsewhere = spec.contains_question(&current.name) && !before.contains(&current.name);
        if taken_elsewhere || !after.insert(current.name.clone()) {
            return Err(SessionError::DuplicateName(current.name.clone()));
        }
        stack.extend(current.children.iter());
    }

    let dropped = before.difference(&after).cloned().collect::<BTreeSet<_>>();
    if !dropped.is_empty() {
        let dependents = dependents_of(spec, &dropped);
        if !dependents.is_empty() {
            let name = dropped.into_iter().collect::<Vec<_>>().join(", ");
            if !force {
                return Err(SessionError::QuestionInUse { name, dependents });
            }
            log::warn!(
                "updating '{}' drops {} still used by {}",
                question.name,
                name,
                dependents.join(", ")
            );
        }
    }

    if let Some(relevant) = &question.relevant {
        check_relevant_references(spec, &question.name, relevant)?;
    }

    let name = question.name.clone();
    *question_mut(spec, &name)? = question;
    Ok(())
}

fn subtree_names(question: &QuestionSpec, out: &mut BTreeSet<String>) {
    out.insert(question.name.clone());
    for child in &question.children {
        subtree_names(child, out);
    }
}

fn add_question(
    spec: &mut FormSpec,
    question: QuestionSpec,
    parent: Option<String>,
    position: Option<usize>,
) -> Result<(), SessionError> {
    let mut incoming = BTreeSet::new();
    let mut stack = vec![&question];
    while let Some(current) = stack.pop() {
        if !is_valid_name(&current.name) {
            return Err(SessionError::InvalidName(current.name.clone()));
        }
        if spec.contains_question(&current.name) || !incoming.insert(current.name.clone()) {
            return Err(SessionError::DuplicateName(current.name.clone()));
        }
        stack.extend(current.children.iter());
    }

    let siblings = match &parent {
        None => &mut spec.questions,
        Some(parent) => {
            let container = spec
                .find_question_mut(parent)
                .ok_or_else(|| SessionError::UnknownParent(parent.clone()))?;
            if !container.kind.is_container() {
                return Err(SessionError::NotAContainer(parent.clone()));
            }
            &mut container.children
        }
    };
    match position {
        Some(position) if position > siblings.len() => Err(SessionError::PositionOutOfRange {
            position,
            len: siblings.len(),
        }),
        Some(position) => {
            siblings.insert(position, question);
            Ok(())
        }
        None => {
            siblings.push(question);
            Ok(())
        }
    }
}

/// Questions outside `removed` whose expressions or cascade use one of `removed`.
fn dependents_of(spec: &FormSpec, removed: &BTreeSet<String>) -> Vec<String> {
    spec.flatten()
        .into_iter()
        .filter(|question| !removed.contains(&question.name))
        .filter(|question| {
            let constraint_refs = question
                .constraint
                .as_ref()
                .and_then(|constraint| constraint.expression.as_deref())
                .map(xlsform_spec::references_in)
                .unwrap_or_default();
            question
                .dependencies()
                .iter()
                .chain(constraint_refs.iter())
                .any(|reference| removed.contains(reference))
        })
        .map(|question| question.name.clone())
        .collect()
}

fn remove_question(spec: &mut FormSpec, name: &str, force: bool) -> Result<(), SessionError> {
    let question = spec
        .find_question(name)
        .ok_or_else(|| SessionError::UnknownQuestion(name.to_string()))?;
    let mut removed = BTreeSet::new();
    subtree_names(question, &mut removed);

    let dependents = dependents_of(spec, &removed);
    if !dependents.is_empty() {
        if !force {
            return Err(SessionError::QuestionInUse {
                name: name.to_string(),
                dependents,
            });
        }
        log::warn!(
            "removing '{}' leaves dangling references in {}",
            name,
            dependents.join(", ")
        );
    }
    spec.remove_question(name);
    Ok(())
}

fn rename_question(spec: &mut FormSpec, name: &str, new_name: &str) -> Result<(), SessionError> {
    if !spec.contains_question(name) {
        return Err(SessionError::UnknownQuestion(name.to_string()));
    }
    if !is_valid_name(new_name) {
        return Err(SessionError::InvalidName(new_name.to_string()));
    }
    if spec.contains_question(new_name) {
        return Err(SessionError::DuplicateName(new_name.to_string()));
    }

    fn walk(questions: &mut [QuestionSpec], from: &str, to: &str) {
        let old_ref = format!("${{{}}}", from);
        let new_ref = format!("${{{}}}", to);
        for question in questions {
            if question.name == from {
                question.name = to.to_string();
            }
            if let Some(relevant) = &mut question.relevant {
                relevant.rename_reference(from, to);
            }
            if let Some(calculation) = &mut question.calculation {
                calculation.rename_reference(from, to);
            }
            if let Some(cascade) = &mut question.cascade
                && cascade.parent == from
            {
                cascade.parent = to.to_string();
            }
            if let Some(expression) = question
                .constraint
                .as_mut()
                .and_then(|constraint| constraint.expression.as_mut())
            {
                *expression = expression.replace(&old_ref, &new_ref);
            }
            walk(&mut question.children, from, to);
        }
    }

    walk(&mut spec.questions, name, new_name);
    Ok(())
}
