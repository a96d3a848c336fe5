use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, StudentRecord};
use serde_json::json;

pub(super) fn record_json(record: &StudentRecord) -> serde_json::Value {
    json!({
        "id": record.id,
        "name": record.name,
        "year": record.year,
        "section": record.section,
        "registerNumber": record.register_number,
        "photoPath": record.photo_path,
        "signaturePath": record.signature_path,
        "hasDevice": record.has_device,
        "deviceMac": record.device_mac,
        "createdAt": record.created_at,
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let year = req.params.get("year").and_then(|v| v.as_i64());
    let section = req.params.get("section").and_then(|v| v.as_str());

    match registry::list_students(conn, year, section) {
        Ok(records) => {
            let students: Vec<serde_json::Value> = records.iter().map(record_json).collect();
            ok(
                &req.id,
                json!({ "total": students.len(), "students": students }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
