use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde_json::json;
use xlsform_session::{FormSession, SessionCommand, SessionError};
use xlsform_spec::{FormSpec, import_xlsx};

fn build_session() -> FormSession {
    let mut session = FormSession::new(FormSpec::new("clinic_visit", "Clinic visit"));
    let commands = json!([
        { "command": "set_form_meta", "version": "3", "instance_name": "concat(${patient_name}, '-', ${visit_date})" },
        { "command": "add_choice_list", "list": { "name": "yes_no", "choices": [
            { "name": "yes", "label": "Yes" }, { "name": "no", "label": "No" }
        ]}},
        { "command": "add_choice_list", "list": { "name": "services", "choices": [
            { "name": "antenatal", "label": "Antenatal" }, { "name": "vaccination", "label": "Vaccination" }
        ]}},
        { "command": "add_choice_list", "list": { "name": "vaccines", "choices": [
            { "name": "polio", "label": "Polio", "filters": { "service": "vaccination" } },
            { "name": "measles", "label": "Measles", "filters": { "service": "vaccination" } },
            { "name": "checkup", "label": "Check-up", "filters": { "service": "antenatal" } }
        ]}},
        { "command": "add_question", "question": {
            "name": "patient_name", "type": "text", "label": "Patient name", "required": true
        }},
        { "command": "add_question", "question": {
            "name": "visit_date", "type": "date", "label": "Visit date", "required": true
        }},
        { "command": "add_question", "question": {
            "name": "service", "type": "select_one", "label": "Service", "choice_list": "services"
        }},
        { "command": "add_question", "question": {
            "name": "details", "type": "group", "label": "Details"
        }},
        { "command": "add_question", "parent": "details", "question": {
            "name": "item", "type": "select_one", "label": "Item", "choice_list": "vaccines"
        }},
        { "command": "add_question", "parent": "details", "question": {
            "name": "follow_up", "type": "select_one", "label": "Follow-up needed?", "choice_list": "yes_no"
        }},
        { "command": "set_cascade", "name": "item", "parent": "service", "column": "service" },
        { "command": "set_relevant", "name": "details", "relevant": "${service} != ''" }
    ]);
    let commands: Vec<SessionCommand> = serde_json::from_value(commands).expect("commands");
    for command in commands {
        session.apply(command).expect("command applies");
    }
    session
}

#[test]
fn session_exports_cascading_form() {
    let session = build_session();
    assert!(session.report().is_ok(), "{:?}", session.report());

    let bytes = session.export_xlsx().expect("export");
    let mut workbook = Xlsx::new(Cursor::new(bytes.clone())).expect("open");
    let survey = workbook.worksheet_range("survey").expect("survey sheet");
    let rows = survey
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::String(text) => text.clone(),
                    _ => String::new(),
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let header = &rows[0];
    let relevant = header.iter().position(|h| h == "relevant").expect("relevant column");
    let filter = header.iter().position(|h| h == "choice_filter").expect("filter column");

    let types = rows.iter().skip(1).map(|row| row[0].as_str()).collect::<Vec<_>>();
    assert_eq!(
        types,
        vec![
            "text",
            "date",
            "select_one services",
            "begin_group",
            "select_one vaccines",
            "select_one yes_no",
            "end_group"
        ]
    );
    assert_eq!(rows[4][relevant], "${service} != ''");
    assert_eq!(rows[5][filter], "service=${service}");

    let imported = import_xlsx(&bytes).expect("import");
    assert_eq!(&imported, session.spec());
}

#[test]
fn failed_export_reports_form_errors() {
    let mut session = build_session();
    session
        .apply(SessionCommand::RemoveQuestion {
            name: "service".into(),
            force: true,
        })
        .expect("forced removal");
    match session.export_xlsx() {
        Err(SessionError::Export(err)) => {
            assert!(err.to_string().contains("form definition has errors"));
        }
        other => panic!("expected export failure, got {:?}", other.map(|bytes| bytes.len())),
    }
}
