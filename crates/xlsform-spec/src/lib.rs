#![allow(missing_docs)]

pub mod answers;
pub mod answers_schema;
pub mod cascade;
pub mod check;
pub mod examples;
pub mod export;
pub mod expr;
pub mod import;
pub mod names;
pub mod parse;
pub mod progress;
pub mod render;
pub mod spec;
pub mod validate;
pub mod visibility;

pub use answers::{ValidationError, ValidationResult};
pub use answers_schema::{form_schema, generate as answers_schema};
pub use cascade::{
    CascadeError, CascadeLink, ancestors, available_choices, choice_filter, dependents,
    resolve_cascade, resolve_cascades,
};
pub use check::{FormIssue, FormReport, Severity, check_form};
pub use examples::generate as example_answers;
pub use export::{ExportError, XlsFormTables, encode, encode_at, export_xlsx, write_xlsx};
pub use expr::Expr;
pub use import::{ImportError, import_xlsx};
pub use names::{is_valid_name, name_from_label, unique_name};
pub use parse::{ExprSource, ParseError, parse_expression, parse_or_raw, references_in};
pub use progress::{answered_count, next_question};
pub use render::{
    PreviewChoice, PreviewPayload, PreviewQuestion, RenderProgress, RenderStatus, build_preview,
    render_json, render_text,
};
pub use spec::{
    CascadeSpec, Choice, ChoiceList, Constraint, FormSpec, QuestionSpec, QuestionType,
    is_filter_column,
};
pub use validate::validate;
pub use visibility::{VisibilityMap, VisibilityMode, resolve_visibility};
