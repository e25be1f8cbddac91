//! XLSForm export: form model to `survey` / `choices` / `settings` tables,
//! then tables to an in-memory `.xlsx` workbook.

mod tables;
mod workbook;

pub use tables::{
    CHOICES_COLUMNS, SETTINGS_COLUMNS, SURVEY_COLUMNS, Table, XlsFormTables, encode, encode_at,
};
pub use workbook::write_xlsx;

use thiserror::Error;

use crate::check::{FormReport, check_form};
use crate::spec::FormSpec;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("form definition has errors: {}", .0.summary())]
    InvalidForm(FormReport),
    #[error("failed to write workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
}

/// Checks the form and encodes it into `.xlsx` bytes ready for download.
pub fn export_xlsx(spec: &FormSpec) -> Result<Vec<u8>, ExportError> {
    let report = check_form(spec);
    if !report.is_ok() {
        return Err(ExportError::InvalidForm(report));
    }
    for warning in report.warnings() {
        log::warn!("exporting '{}' with {}", spec.id, warning);
    }
    let tables = encode(spec);
    let bytes = write_xlsx(&tables)?;
    log::info!(
        "exported form '{}' ({} survey rows, {} choices, {} bytes)",
        spec.id,
        tables.survey.rows.len(),
        tables.choices.rows.len(),
        bytes.len()
    );
    Ok(bytes)
}
