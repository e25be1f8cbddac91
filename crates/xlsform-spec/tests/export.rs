use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use xlsform_spec::{ExportError, FormSpec, export_xlsx, import_xlsx};

fn household() -> FormSpec {
    serde_json::from_str(include_str!("fixtures/household_survey.json")).expect("deserialize")
}

fn sheet_rows(bytes: &[u8], sheet: &str) -> Vec<Vec<String>> {
    let mut workbook = Xlsx::new(Cursor::new(bytes.to_vec())).expect("open workbook");
    let range = workbook.worksheet_range(sheet).expect("sheet exists");
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::String(text) => text.clone(),
                    Data::Empty => String::new(),
                    other => format!("{:?}", other),
                })
                .collect()
        })
        .collect()
}

#[test]
fn workbook_has_xlsform_sheets() {
    let bytes = export_xlsx(&household()).expect("export");
    let workbook = Xlsx::new(Cursor::new(bytes.clone())).expect("open workbook");
    assert_eq!(workbook.sheet_names(), vec!["survey", "choices", "settings"]);

    let survey = sheet_rows(&bytes, "survey");
    assert_eq!(&survey[0][..3], &["type", "name", "label"]);
    let types = survey.iter().skip(1).map(|row| row[0].as_str()).collect::<Vec<_>>();
    let begins = types.iter().filter(|kind| kind.starts_with("begin_")).count();
    let ends = types.iter().filter(|kind| kind.starts_with("end_")).count();
    assert_eq!(begins, 2);
    assert_eq!(begins, ends);

    let filter_col = survey[0]
        .iter()
        .position(|header| header == "choice_filter")
        .expect("choice_filter column");
    let district = survey
        .iter()
        .find(|row| row[1] == "district")
        .expect("district row");
    assert_eq!(district[0], "select_one districts");
    assert_eq!(district[filter_col], "region=${region}");

    let choices = sheet_rows(&bytes, "choices");
    assert_eq!(choices[0], vec!["list_name", "name", "label", "region"]);
    assert_eq!(choices.len(), 1 + 10);

    let settings = sheet_rows(&bytes, "settings");
    assert_eq!(settings[1], vec!["Household Survey", "household_survey", "2024.1"]);
}

#[test]
fn exported_workbook_imports_back() {
    let mut original = household();
    let bytes = export_xlsx(&original).expect("export");
    let imported = import_xlsx(&bytes).expect("import");

    original.description = None;
    assert_eq!(imported, original);
}

#[test]
fn invalid_forms_are_not_exported() {
    let mut form = household();
    form.questions[0].choice_list = Some("missing".into());
    match export_xlsx(&form) {
        Err(ExportError::InvalidForm(report)) => {
            assert!(report.has_code("unknown_choice_list"));
        }
        other => panic!("expected invalid form, got {:?}", other.map(|bytes| bytes.len())),
    }
}
