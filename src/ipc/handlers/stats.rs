use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::stats;
use chrono::Utc;
use serde_json::json;

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let records = match registry::list_students(conn, None, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let year_wise = stats::count_by_year(&state.cohorts, &records);
    let section_wise = stats::count_by_section(&records);
    let weekly = stats::recent_within_days(&records, 7, Utc::now());

    let year_map: serde_json::Map<String, serde_json::Value> = year_wise
        .iter()
        .map(|(year, n)| (year.to_string(), json!(n)))
        .collect();
    let section_map: serde_json::Map<String, serde_json::Value> = section_wise
        .iter()
        .map(|(section, n)| (section.clone(), json!(n)))
        .collect();

    ok(
        &req.id,
        json!({
            "totalStudents": records.len(),
            "yearWise": year_map,
            "sectionWise": section_map,
            "weeklyCount": weekly.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
