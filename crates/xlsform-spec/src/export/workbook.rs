use rust_xlsxwriter::{Format, Workbook, XlsxError};

use super::tables::{Table, XlsFormTables};

fn create_header_format() -> Format {
    Format::new().set_bold()
}

/// Writes the three XLSForm sheets into a workbook and returns its bytes.
pub fn write_xlsx(tables: &XlsFormTables) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header_format = create_header_format();

    for table in tables.sheets() {
        write_table(&mut workbook, table, &header_format)?;
    }

    workbook.save_to_buffer()
}

fn write_table(workbook: &mut Workbook, table: &Table, header_format: &Format) -> Result<(), XlsxError> {
    let sheet = workbook.add_worksheet();
    sheet.set_name(&table.name)?;

    for (col, header) in table.columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header, header_format)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        let row_num = index as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            if !cell.is_empty() {
                sheet.write_string(row_num, col as u16, cell)?;
            }
        }
    }

    sheet.set_freeze_panes(1, 0)?;
    sheet.autofit();
    Ok(())
}
