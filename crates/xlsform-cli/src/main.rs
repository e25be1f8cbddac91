pub mod builder;

mod config;
mod logging;
mod wizard;

use builder::{
    GeneratedBundle, GenerationInput, build_bundle, bundle_from_spec, choice_list_from_labels,
    write_bundle,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use wizard::{PromptContext, Verbosity, WizardPresenter, parse_answer, pending_question};
use xlsform_session::{FormSession, SessionCommand};
use xlsform_spec::{
    ExportError, ExprSource, FormReport, FormSpec, QuestionSpec, QuestionType, ValidationResult,
    build_preview, check_form, export_xlsx, form_schema, import_xlsx, is_valid_name,
    name_from_label, render_json, render_text, unique_name, validate,
};

pub(crate) type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Survey form builder with XLSForm export",
    long_about = "Builds survey forms interactively or from JSON, checks them, and exports XLSForm workbooks for ODK/Kobo style data collection"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PreviewFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build a form question by question and emit a bundle.
    New {
        /// Root directory for the bundle (defaults to XLSFORM_OUTPUT_DIR or the current directory).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Overwrite an existing bundle.
        #[arg(long)]
        force: bool,
        /// Print the generated form JSON.
        #[arg(long)]
        verbose: bool,
    },
    /// Build a bundle from a JSON description of the form.
    Generate {
        /// JSON file with form metadata, choice lists and questions.
        #[arg(long, value_name = "INPUT")]
        input: PathBuf,
        /// Root directory for the bundle.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Overwrite an existing bundle.
        #[arg(long)]
        force: bool,
        /// Print the generated form JSON.
        #[arg(long)]
        verbose: bool,
    },
    /// Write a form definition as an XLSForm workbook.
    Export {
        /// Path to the form JSON.
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        /// Destination `.xlsx` file.
        #[arg(long, value_name = "XLSX")]
        out: PathBuf,
        /// Overwrite an existing workbook.
        #[arg(long)]
        force: bool,
    },
    /// Read an XLSForm workbook back into form JSON.
    Import {
        /// Source `.xlsx` file.
        #[arg(long, value_name = "XLSX")]
        xlsx: PathBuf,
        /// Destination JSON file (stdout when omitted).
        #[arg(long, value_name = "SPEC")]
        out: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Report definition problems that would block export.
    Check {
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
    },
    /// Validate answers against a form.
    Validate {
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
    },
    /// Show the form outline with visibility for a set of answers.
    Preview {
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = PreviewFormat::Text)]
        format: PreviewFormat,
    },
    /// Fill in a form from the terminal to try out its logic.
    Fill {
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        /// Optional JSON file containing initial answers.
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// Show status, visible questions and relevant expressions.
        #[arg(long, alias = "debug")]
        verbose: bool,
        /// Print the answers as JSON when done.
        #[arg(long)]
        answers_json: bool,
    },
    /// Apply editing commands to a stored session.
    Session {
        /// CBOR session snapshot; created when missing.
        #[arg(long, value_name = "STATE")]
        state: PathBuf,
        /// A command object or array of command objects, as JSON.
        #[arg(long, value_name = "JSON", conflicts_with = "commands")]
        command: Option<String>,
        /// File containing a command object or array of command objects.
        #[arg(long, value_name = "FILE")]
        commands: Option<PathBuf>,
        /// Also write the form as an XLSForm workbook.
        #[arg(long, value_name = "XLSX")]
        export: Option<PathBuf>,
        /// Overwrite an existing workbook.
        #[arg(long)]
        force: bool,
    },
    /// Print the JSON Schema of the form definition format.
    Schema {
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::New {
            out,
            force,
            verbose,
        } => run_new(out, force, verbose),
        Command::Generate {
            input,
            out,
            force,
            verbose,
        } => run_generate(input, out, force, verbose),
        Command::Export { spec, out, force } => run_export(spec, out, force),
        Command::Import { xlsx, out, force } => run_import(xlsx, out, force),
        Command::Check { spec } => run_check(spec),
        Command::Validate { spec, answers } => run_validate(spec, answers),
        Command::Preview {
            spec,
            answers,
            format,
        } => run_preview(spec, answers, format),
        Command::Fill {
            spec,
            answers,
            verbose,
            answers_json,
        } => run_fill(spec, answers, verbose, answers_json),
        Command::Session {
            state,
            command,
            commands,
            export,
            force,
        } => run_session(state, command, commands, export, force),
        Command::Schema { out } => run_schema(out),
    }
}

fn read_spec(path: &Path) -> CliResult<FormSpec> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn read_answers(path: Option<&Path>) -> CliResult<Value> {
    match path {
        Some(path) => {
            let contents = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        }
        None => Ok(Value::Object(Map::new())),
    }
}

fn run_new(out_dir: Option<PathBuf>, force: bool, verbose: bool) -> CliResult<()> {
    println!("Interactive XLSForm builder");
    let form_id = loop {
        let id = prompt_non_empty(&mark_required("Form ID"), None)?;
        if is_valid_name(&id) {
            break id;
        }
        println!("'{}' is not a valid form ID; use letters, digits and underscores.", id);
    };
    let title = prompt_non_empty(&mark_required("Form title"), None)?;
    let version = prompt_optional("Form version (optional)")?;
    let description = prompt_optional("Description (optional)")?;
    let summary = prompt_optional("Summary for README (optional)")?;
    let dir_name = prompt_non_empty(&mark_required("Output directory name"), Some(&form_id))?;
    let out_root = config::resolve_output_root(out_dir)?;

    let mut session = FormSession::new(FormSpec::new(&form_id, &title));
    session.apply(SessionCommand::SetFormMeta {
        id: None,
        title: None,
        version,
        description,
        default_language: None,
        instance_name: None,
    })?;

    loop {
        let Some(label) = prompt_optional("Question label (blank to finish)")? else {
            break;
        };
        if let Err(err) = prompt_question(&mut session, label) {
            println!("Question not added: {}. Let's try again.", err);
        }
    }

    if session.spec().questions.is_empty() {
        return Err("at least one question is required".into());
    }
    let report = session.report();
    print_report(&report);
    if !report.is_ok() {
        return Err("form definition has errors".into());
    }

    let bundle_dir = out_root.join(&dir_name);
    prepare_bundle_dir(&bundle_dir, force)?;
    let bundle = bundle_from_spec(session.into_spec())?;
    let bundle_dir = write_bundle(&bundle, &dir_name, summary.as_deref(), &out_root)?;
    println!("Generated form bundle at {}", bundle_dir.display());
    if verbose {
        dump_bundle_debug(&bundle)?;
    }
    Ok(())
}

/// Collects one question and adds it through session commands; a failed
/// follow-up edit leaves the question in place.
fn prompt_question(session: &mut FormSession, label: String) -> CliResult<()> {
    let suggested = unique_name(&name_from_label(&label), |candidate| {
        session.spec().contains_question(candidate)
    });
    let name = prompt_line("Question name", Some(&suggested))?;
    let kind = prompt_question_type()?;

    let containers = session
        .spec()
        .flatten()
        .into_iter()
        .filter(|question| question.kind.is_container())
        .map(|question| question.name.clone())
        .collect::<Vec<_>>();
    let parent = if containers.is_empty() {
        None
    } else {
        prompt_optional(&format!(
            "Parent group or repeat (blank for top level; {})",
            containers.join(", ")
        ))?
    };

    let mut question = QuestionSpec::new(&name, kind, label);
    question.hint = prompt_optional("Hint (optional)")?;
    if kind.is_answerable() {
        question.required = prompt_bool("Required?", false)?;
    }
    if kind.is_select() {
        question.choice_list = Some(prompt_choice_list(session, &name)?);
    }
    if kind == QuestionType::Calculate {
        let calculation = prompt_non_empty(&mark_required("Calculation"), None)?;
        question.calculation = Some(ExprSource::Xpath(calculation).resolve()?);
    }

    session.apply(SessionCommand::AddQuestion {
        question,
        parent,
        position: None,
    })?;

    loop {
        let Some(relevant) = prompt_optional("Relevant expression (optional)")? else {
            break;
        };
        match session.apply(SessionCommand::SetRelevant {
            name: name.clone(),
            relevant: ExprSource::Xpath(relevant),
        }) {
            Ok(_) => break,
            Err(err) => println!("Invalid relevant expression: {}", err),
        }
    }
    Ok(())
}

/// Reuses an existing list when its name is entered, otherwise builds one
/// from comma separated labels.
fn prompt_choice_list(session: &mut FormSession, question: &str) -> CliResult<String> {
    loop {
        let raw = prompt_non_empty(
            &mark_required("Choices (comma separated labels, or an existing list name)"),
            None,
        )?;
        if session.spec().choice_list(raw.trim()).is_some() {
            return Ok(raw.trim().to_string());
        }
        let labels = raw
            .split(',')
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>();
        if labels.is_empty() {
            println!("Provide at least one choice.");
            continue;
        }
        let list_name = unique_name(&format!("{}_choices", question), |candidate| {
            session.spec().choice_list(candidate).is_some()
        });
        session.apply(SessionCommand::AddChoiceList {
            list: choice_list_from_labels(&list_name, &labels),
        })?;
        return Ok(list_name);
    }
}

fn prepare_bundle_dir(bundle_dir: &Path, force: bool) -> CliResult<()> {
    config::ensure_allowed_root(bundle_dir)?;
    if bundle_dir.exists() {
        if force {
            fs::remove_dir_all(bundle_dir)?;
        } else {
            return Err(format!(
                "bundle {} already exists; rerun with --force to overwrite",
                bundle_dir.display()
            )
            .into());
        }
    }
    Ok(())
}

fn dump_bundle_debug(bundle: &GeneratedBundle) -> CliResult<()> {
    println!("Form definition:");
    println!("{}", serde_json::to_string_pretty(&bundle.spec)?);
    println!("Answer schema:");
    println!("{}", serde_json::to_string_pretty(&bundle.schema)?);
    println!("Example answers:");
    println!("{}", serde_json::to_string_pretty(&bundle.examples)?);
    Ok(())
}

fn run_generate(
    input_path: PathBuf,
    out_dir: Option<PathBuf>,
    force: bool,
    verbose: bool,
) -> CliResult<()> {
    let contents = fs::read_to_string(&input_path)?;
    let input: GenerationInput = serde_json::from_str(&contents)?;
    let out_root = config::resolve_output_root(out_dir)?;
    prepare_bundle_dir(&out_root.join(&input.dir_name), force)?;

    let bundle = build_bundle(&input)?;
    print_report(&bundle.report);
    let bundle_dir = write_bundle(&bundle, &input.dir_name, input.summary_md.as_deref(), &out_root)?;
    println!("Generated form bundle at {}", bundle_dir.display());
    if verbose {
        dump_bundle_debug(&bundle)?;
    }
    Ok(())
}

fn run_export(spec_path: PathBuf, out: PathBuf, force: bool) -> CliResult<()> {
    let spec = read_spec(&spec_path)?;
    let bytes = match export_xlsx(&spec) {
        Ok(bytes) => bytes,
        Err(ExportError::InvalidForm(report)) => {
            print_report(&report);
            return Err("form definition has errors".into());
        }
        Err(err) => return Err(err.into()),
    };
    print_report(&check_form(&spec));
    config::write_output(&out, &bytes, force)?;
    println!(
        "Exported {} ({} questions) to {}",
        spec.id,
        spec.flatten().len(),
        out.display()
    );
    Ok(())
}

fn run_import(xlsx: PathBuf, out: Option<PathBuf>, force: bool) -> CliResult<()> {
    let bytes = fs::read(&xlsx)?;
    let spec = import_xlsx(&bytes)?;
    let report = check_form(&spec);
    for issue in &report.issues {
        eprintln!("{}", issue);
    }
    let json = serde_json::to_string_pretty(&spec)?;
    match out {
        Some(path) => {
            config::write_output(&path, json.as_bytes(), force)?;
            println!("Imported {} into {}", spec.id, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_check(spec_path: PathBuf) -> CliResult<()> {
    let spec = read_spec(&spec_path)?;
    let report = check_form(&spec);
    print_report(&report);
    if report.is_ok() {
        println!("Form '{}' is ready for export.", spec.id);
        Ok(())
    } else {
        Err("form definition has errors".into())
    }
}

fn print_report(report: &FormReport) {
    for issue in &report.issues {
        println!("{}", issue);
    }
}

fn run_validate(spec_path: PathBuf, answers_path: PathBuf) -> CliResult<()> {
    let spec = read_spec(&spec_path)?;
    let answers = read_answers(Some(&answers_path))?;

    let result = validate(&spec, &answers);
    println!(
        "Validation result: {}",
        if result.valid { "valid" } else { "invalid" }
    );
    describe_validation(&result);

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(result: &ValidationResult) {
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            println!(
                "  {} - {}",
                error.path.as_deref().unwrap_or("<unknown>"),
                error.message
            );
        }
    }
    if !result.missing_required.is_empty() {
        println!(
            "Missing required answers: {}",
            result.missing_required.join(", ")
        );
    }
    if !result.unknown_fields.is_empty() {
        println!(
            "Unknown answer fields: {}",
            result.unknown_fields.join(", ")
        );
    }
}

fn run_preview(spec_path: PathBuf, answers: Option<PathBuf>, format: PreviewFormat) -> CliResult<()> {
    let spec = read_spec(&spec_path)?;
    let answers = read_answers(answers.as_deref())?;
    let payload = build_preview(&spec, &answers);
    match format {
        PreviewFormat::Text => println!("{}", render_text(&payload)),
        PreviewFormat::Json => println!("{}", serde_json::to_string_pretty(&render_json(&payload))?),
    }
    Ok(())
}

fn run_fill(
    spec_path: PathBuf,
    answers_path: Option<PathBuf>,
    verbose: bool,
    answers_json: bool,
) -> CliResult<()> {
    let spec = read_spec(&spec_path)?;
    let mut answers = read_answers(answers_path.as_deref())?;
    let mut presenter = WizardPresenter::new(Verbosity::from_verbose(verbose), answers_json);
    let mut skipped = BTreeSet::new();

    loop {
        let payload = build_preview(&spec, &answers);
        presenter.show_header(&payload);
        presenter.show_status(&payload);
        let Some(question) = pending_question(&payload, &skipped) else {
            break;
        };
        let prompt = PromptContext::new(question, &payload.progress);
        let name = question.name.clone();

        loop {
            presenter.show_prompt(&prompt);
            let raw = read_answer_line()?;
            let value = match parse_answer(question, &raw) {
                Ok(value) => value,
                Err(err) => {
                    presenter.show_parse_error(&err);
                    continue;
                }
            };
            let Some(value) = value else {
                skipped.insert(name.clone());
                break;
            };

            let mut candidate = answers.clone();
            if let Some(map) = candidate.as_object_mut() {
                map.insert(name.clone(), value);
            }
            let result = validate(&spec, &candidate);
            let mut problems = result.errors_for(&name).peekable();
            if problems.peek().is_none() {
                answers = candidate;
                break;
            }
            for problem in problems {
                eprintln!(
                    "Invalid answer: {}",
                    problem.path.as_deref().map_or_else(
                        || problem.message.clone(),
                        |path| format!("{} - {}", path, problem.message)
                    )
                );
            }
        }
    }

    presenter.show_completion(&answers);
    let result = validate(&spec, &answers);
    if !result.valid {
        describe_validation(&result);
    }
    Ok(())
}

fn read_answer_line() -> CliResult<String> {
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Err("input ended before the form was complete".into());
    }
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("exit") {
        return Err("form filling aborted by user".into());
    }
    Ok(trimmed.to_string())
}

fn load_session(state: &Path) -> CliResult<FormSession> {
    if state.exists() {
        let bytes = fs::read(state)?;
        Ok(FormSession::from_cbor(&bytes)?)
    } else {
        log::info!("starting a new session at {}", state.display());
        Ok(FormSession::default())
    }
}

fn parse_commands(raw: &str) -> CliResult<Vec<SessionCommand>> {
    let value: Value = serde_json::from_str(raw)?;
    let commands = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(commands)
}

fn run_session(
    state: PathBuf,
    command: Option<String>,
    commands_path: Option<PathBuf>,
    export: Option<PathBuf>,
    force: bool,
) -> CliResult<()> {
    let mut session = load_session(&state)?;
    let raw = match (command, commands_path) {
        (Some(command), _) => Some(command),
        (None, Some(path)) => Some(fs::read_to_string(path)?),
        (None, None) => None,
    };

    if let Some(raw) = raw {
        for command in parse_commands(&raw)? {
            let name = command.name();
            session.apply(command)?;
            println!("Applied {}", name);
        }
        config::write_output(&state, &session.to_cbor()?, true)?;
    }

    let report = session.report();
    print_report(&report);
    println!(
        "Form '{}': {} questions, {} choice lists, {} undo steps",
        session.spec().id,
        session.spec().flatten().len(),
        session.spec().choice_lists.len(),
        session.history_len()
    );

    if let Some(path) = export {
        let bytes = session.export_xlsx()?;
        config::write_output(&path, &bytes, force)?;
        println!("Exported {}", path.display());
    }
    Ok(())
}

fn run_schema(out: Option<PathBuf>) -> CliResult<()> {
    let schema = serde_json::to_string_pretty(&form_schema())?;
    match out {
        Some(path) => config::write_output(&path, schema.as_bytes(), true)?,
        None => println!("{}", schema),
    }
    Ok(())
}

fn prompt_line(prompt: &str, default: Option<&str>) -> CliResult<String> {
    if let Some(default_value) = default {
        print!("{} [{}]: ", prompt, default_value);
    } else {
        print!("{}: ", prompt);
    }
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Err("input ended before the form was complete".into());
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn prompt_optional(prompt: &str) -> CliResult<Option<String>> {
    let value = prompt_line(prompt, None)?;
    if value.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

fn prompt_non_empty(prompt: &str, default: Option<&str>) -> CliResult<String> {
    loop {
        let value = prompt_line(prompt, default)?;
        if !value.trim().is_empty() {
            return Ok(value);
        }
        println!("Value cannot be empty.");
    }
}

fn mark_required(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.to_lowercase().contains("required") {
        trimmed.to_string()
    } else {
        format!("{} (required)", trimmed)
    }
}

fn prompt_bool(prompt: &str, default: bool) -> CliResult<bool> {
    let prompt_text = format!("{} (y/n)", prompt.trim());
    let default_hint = if default { "Y" } else { "N" };
    loop {
        let line = prompt_line(&prompt_text, Some(default_hint))?;
        match line.trim().to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            other => {
                println!("Invalid answer '{}'. Expected yes or no.", other);
            }
        }
    }
}

fn prompt_question_type() -> CliResult<QuestionType> {
    let keywords = QuestionType::ALL
        .iter()
        .map(|kind| kind.keyword())
        .collect::<Vec<_>>()
        .join("|");
    loop {
        let value = prompt_line(&format!("Question type ({})", keywords), Some("text"))?;
        match value.parse::<QuestionType>() {
            Ok(kind) => return Ok(kind),
            Err(err) => println!("{}", err),
        }
    }
}
