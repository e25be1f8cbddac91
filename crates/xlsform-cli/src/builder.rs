use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use xlsform_session::{FormSession, SessionCommand};
use xlsform_spec::{
    CascadeSpec, Choice, ChoiceList, Constraint, ExprSource, FormReport, FormSpec, QuestionSpec,
    QuestionType, VisibilityMode, answers_schema, example_answers, name_from_label,
    resolve_visibility, unique_name,
};

/// Input shape describing what should be generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInput {
    pub dir_name: String,
    #[serde(default)]
    pub summary_md: Option<String>,
    pub form: FormInput,
    #[serde(default)]
    pub choice_lists: Vec<ChoiceList>,
    #[serde(default)]
    pub questions: Vec<QuestionInput>,
}

/// Settings sheet fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_language: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
}

/// Question collected from prompts or a JSON input file. `name` is derived
/// from the label when omitted; `choices` creates a list from plain labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub choice_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant: Option<ExprSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<ExprSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeSpec>,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub repeat_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<QuestionInput>,
}

/// Generated bundle returned by the builder.
pub struct GeneratedBundle {
    pub spec: FormSpec,
    pub report: FormReport,
    pub schema: Value,
    pub examples: Value,
    pub workbook: Vec<u8>,
}

/// Builds the form through session commands so JSON input gets the same
/// checks as interactive edits, then derives the bundle artifacts.
pub fn build_bundle(input: &GenerationInput) -> Result<GeneratedBundle, String> {
    if input.dir_name.trim().is_empty() {
        return Err("dir_name must be provided".into());
    }
    if input.questions.is_empty() {
        return Err("at least one question must be defined".into());
    }

    let mut session = FormSession::new(FormSpec::new(&input.form.id, &input.form.title));
    apply(
        &mut session,
        SessionCommand::SetFormMeta {
            id: None,
            title: None,
            version: input.form.version.clone(),
            description: input.form.description.clone(),
            default_language: input.form.default_language.clone(),
            instance_name: input.form.instance_name.clone(),
        },
    )?;
    for list in &input.choice_lists {
        apply(&mut session, SessionCommand::AddChoiceList { list: list.clone() })?;
    }
    for question in &input.questions {
        add_question_input(&mut session, question, None)?;
    }

    bundle_from_spec(session.into_spec())
}

/// Derives schema, example answers and the workbook for an existing form.
pub fn bundle_from_spec(spec: FormSpec) -> Result<GeneratedBundle, String> {
    let report = xlsform_spec::check_form(&spec);
    if !report.is_ok() {
        return Err(format!("form definition has errors: {}", report.summary()));
    }
    let answers = Value::Object(Map::new());
    let visibility = resolve_visibility(&spec, &answers, VisibilityMode::Visible);
    let schema = answers_schema(&spec, &visibility);
    let examples = example_answers(&spec, &visibility);
    let workbook = xlsform_spec::export_xlsx(&spec).map_err(|err| err.to_string())?;

    Ok(GeneratedBundle {
        spec,
        report,
        schema,
        examples,
        workbook,
    })
}

fn apply(session: &mut FormSession, command: SessionCommand) -> Result<(), String> {
    let name = command.name();
    session
        .apply(command)
        .map(|_| ())
        .map_err(|err| format!("{}: {}", name, err))
}

fn add_question_input(
    session: &mut FormSession,
    input: &QuestionInput,
    parent: Option<&str>,
) -> Result<(), String> {
    let name = match &input.name {
        Some(name) => name.trim().to_string(),
        None => unique_name(&name_from_label(&input.label), |candidate| {
            session.spec().contains_question(candidate)
        }),
    };

    let choice_list = match (&input.choice_list, &input.choices) {
        (Some(list), _) => Some(list.clone()),
        (None, Some(labels)) => {
            let list_name = unique_name(&format!("{}_choices", name), |candidate| {
                session.spec().choice_list(candidate).is_some()
            });
            apply(
                session,
                SessionCommand::AddChoiceList {
                    list: choice_list_from_labels(&list_name, labels),
                },
            )?;
            Some(list_name)
        }
        (None, None) => None,
    };

    let resolve = |source: &Option<ExprSource>, field: &str| {
        source
            .as_ref()
            .map(ExprSource::resolve)
            .transpose()
            .map_err(|err| format!("{} of '{}': {}", field, name, err))
    };

    let question = QuestionSpec {
        name: name.clone(),
        kind: input.kind,
        label: input.label.clone(),
        hint: input.hint.clone(),
        required: input.required,
        required_message: input.required_message.clone(),
        relevant: resolve(&input.relevant, "relevant")?,
        constraint: input.constraint.clone(),
        choice_list,
        cascade: None,
        calculation: resolve(&input.calculation, "calculation")?,
        default: input.default.clone(),
        appearance: input.appearance.clone(),
        read_only: input.read_only,
        repeat_count: input.repeat_count,
        children: Vec::new(),
    };
    apply(
        session,
        SessionCommand::AddQuestion {
            question,
            parent: parent.map(str::to_string),
            position: None,
        },
    )?;

    if let Some(cascade) = &input.cascade {
        apply(
            session,
            SessionCommand::SetCascade {
                name: name.clone(),
                parent: cascade.parent.clone(),
                column: cascade.column.clone(),
            },
        )?;
    }

    for child in &input.children {
        add_question_input(session, child, Some(&name))?;
    }
    Ok(())
}

/// Turns plain labels into a choice list, deriving unique choice names.
pub fn choice_list_from_labels(list_name: &str, labels: &[String]) -> ChoiceList {
    let mut choices: Vec<Choice> = Vec::new();
    for label in labels.iter().map(|label| label.trim()).filter(|label| !label.is_empty()) {
        let name = unique_name(&name_from_label(label), |candidate| {
            choices.iter().any(|choice| choice.name == candidate)
        });
        choices.push(Choice::new(name, label));
    }
    ChoiceList::new(list_name, choices)
}

/// Serialize the bundle to disk.
pub fn write_bundle(
    bundle: &GeneratedBundle,
    dir_name: &str,
    summary: Option<&str>,
    out_root: &Path,
) -> io::Result<PathBuf> {
    let bundle_dir = out_root.join(dir_name);
    let forms_dir = bundle_dir.join("forms");
    let examples_dir = bundle_dir.join("examples");
    let schemas_dir = bundle_dir.join("schemas");

    fs::create_dir_all(&forms_dir)?;
    fs::create_dir_all(&examples_dir)?;
    fs::create_dir_all(&schemas_dir)?;

    let base_name = sanitize_file_name(&bundle.spec.id);

    write_json(
        &forms_dir.join(format!("{}.form.json", base_name)),
        &bundle.spec,
    )?;
    fs::write(
        forms_dir.join(format!("{}.xlsx", base_name)),
        &bundle.workbook,
    )?;
    write_json(
        &examples_dir.join(format!("{}.answers.example.json", base_name)),
        &bundle.examples,
    )?;
    write_json(
        &schemas_dir.join(format!("{}.answers.schema.json", base_name)),
        &bundle.schema,
    )?;

    let readme = build_readme(bundle, summary, &base_name).map_err(io::Error::other)?;
    fs::write(bundle_dir.join("README.md"), readme)?;

    log::info!("bundle for '{}' written to {}", bundle.spec.id, bundle_dir.display());
    Ok(bundle_dir)
}

fn sanitize_file_name(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "form".into()
    } else {
        cleaned
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> io::Result<()> {
    let contents = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(path, contents)
}

const README_TEMPLATE: &str = "# {{title}}

Form ID: `{{id}}`{{#if version}} (version {{version}}){{/if}}

{{description}}

## Summary

{{summary}}

## Questions

{{#each questions}}
- `{{name}}` {{type}}{{#if required}} (required){{/if}}: {{label}}
{{/each}}

## Files

- `forms/{{base}}.form.json`
- `forms/{{base}}.xlsx`
- `examples/{{base}}.answers.example.json`
- `schemas/{{base}}.answers.schema.json`

Check the example answers with:

```
xlsform-builder validate --spec forms/{{base}}.form.json --answers examples/{{base}}.answers.example.json
```
";

fn build_readme(
    bundle: &GeneratedBundle,
    summary: Option<&str>,
    base: &str,
) -> Result<String, handlebars::RenderError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    let questions = bundle
        .spec
        .flatten()
        .into_iter()
        .map(|question| {
            json!({
                "name": question.name,
                "type": question.kind.keyword(),
                "required": question.required,
                "label": question.label,
            })
        })
        .collect::<Vec<_>>();

    let context = json!({
        "title": bundle.spec.title,
        "id": bundle.spec.id,
        "version": bundle.spec.version,
        "description": bundle
            .spec
            .description
            .as_deref()
            .unwrap_or("No description provided."),
        "summary": summary.unwrap_or("Generated by `xlsform-builder`."),
        "questions": questions,
        "base": base,
    });
    handlebars.render_template(README_TEMPLATE, &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn question(kind: QuestionType, label: &str) -> QuestionInput {
        QuestionInput {
            name: None,
            kind,
            label: label.into(),
            hint: None,
            required: false,
            required_message: None,
            read_only: false,
            default: None,
            choices: None,
            choice_list: None,
            relevant: None,
            calculation: None,
            constraint: None,
            cascade: None,
            appearance: None,
            repeat_count: None,
            children: Vec::new(),
        }
    }

    fn input(questions: Vec<QuestionInput>) -> GenerationInput {
        GenerationInput {
            dir_name: "bundle".into(),
            summary_md: None,
            form: FormInput {
                id: "farm_visit".into(),
                title: "Farm visit".into(),
                version: Some("1".into()),
                description: None,
                default_language: None,
                instance_name: None,
            },
            choice_lists: Vec::new(),
            questions,
        }
    }

    #[test]
    fn names_and_lists_are_derived_from_labels() {
        let mut crops = question(QuestionType::SelectMultiple, "Crops grown?");
        crops.choices = Some(vec!["Maize".into(), "Sweet potato".into(), "maize".into()]);
        let bundle = build_bundle(&input(vec![
            question(QuestionType::Text, "Farmer name"),
            question(QuestionType::Text, "Farmer name"),
            crops,
        ]))
        .expect("bundle");

        let names = bundle
            .spec
            .questions
            .iter()
            .map(|question| question.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["farmer_name", "farmer_name_2", "crops_grown"]);

        let list = bundle.spec.choice_list("crops_grown_choices").expect("list");
        let choice_names = list
            .choices
            .iter()
            .map(|choice| choice.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(choice_names, vec!["maize", "sweet_potato", "maize_2"]);
        assert_eq!(
            bundle.spec.questions[2].choice_list.as_deref(),
            Some("crops_grown_choices")
        );
    }

    #[test]
    fn survey_columns_come_from_input() {
        let generation: GenerationInput = serde_json::from_value(serde_json::json!({
            "dir_name": "bundle",
            "form": { "id": "farm_visit", "title": "Farm visit" },
            "questions": [
                {
                    "type": "text",
                    "label": "Farmer name",
                    "required": true,
                    "required_message": "Ask for the farmer's name"
                },
                { "type": "text", "label": "Farm code", "default": "F-001", "read_only": true }
            ]
        }))
        .expect("input");
        let bundle = build_bundle(&generation).expect("bundle");
        let farmer = bundle.spec.find_question("farmer_name").expect("farmer");
        assert_eq!(farmer.required_message.as_deref(), Some("Ask for the farmer's name"));
        let code = bundle.spec.find_question("farm_code").expect("code");
        assert!(code.read_only);
        assert!(!farmer.read_only);
    }

    #[test]
    fn bad_references_are_reported() {
        let mut later = question(QuestionType::Integer, "Plot size");
        later.relevant = Some(ExprSource::Xpath("${owner} = 'yes'".into()));
        let err = build_bundle(&input(vec![later]))
            .err()
            .expect("unknown reference rejected");
        assert!(err.contains("owner"), "{}", err);
    }

    #[test]
    fn bundle_is_written_with_readme() {
        let mut visit = question(QuestionType::Group, "Visit");
        visit.children = vec![question(QuestionType::Date, "Visit date")];
        let mut required = question(QuestionType::Integer, "Plot count");
        required.required = true;
        let generation = input(vec![required, visit]);
        let bundle = build_bundle(&generation).expect("bundle");
        let temp_dir = TempDir::new().expect("temp dir");

        let bundle_dir = write_bundle(&bundle, &generation.dir_name, None, temp_dir.path())
            .expect("bundle write");

        assert!(bundle_dir.join("forms/farm_visit.form.json").exists());
        assert!(bundle_dir.join("forms/farm_visit.xlsx").exists());
        assert!(bundle_dir.join("examples/farm_visit.answers.example.json").exists());
        assert!(bundle_dir.join("schemas/farm_visit.answers.schema.json").exists());

        let readme = fs::read_to_string(bundle_dir.join("README.md")).expect("readme");
        assert!(readme.starts_with("# Farm visit"));
        assert!(readme.contains("(version 1)"));
        assert!(readme.contains("`plot_count` integer (required): Plot count"));
        assert!(readme.contains("`visit_date` date: Visit date"));
    }
}
