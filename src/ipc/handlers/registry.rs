use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, NewRegistration, UploadedFile};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use super::students;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_upload(req: &Request, key: &str) -> Result<Option<UploadedFile>, serde_json::Value> {
    let Some(value) = req.params.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let filename = value
        .get("filename")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}.filename", key), None))?;
    let data = value
        .get("dataBase64")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}.dataBase64", key), None))?;
    let bytes = STANDARD.decode(data).map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{}.dataBase64 is not valid base64", key),
            None,
        )
    })?;
    Ok(Some(UploadedFile { filename, bytes }))
}

fn handle_prefix(state: &mut AppState, req: &Request) -> serde_json::Value {
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(prefix) = state.cohorts.prefix_for_year(year) else {
        return err(
            &req.id,
            "invalid_year",
            format!("invalid year {}", year),
            None,
        );
    };
    ok(
        &req.id,
        json!({
            "year": year,
            "prefix": prefix,
            "sections": state.cohorts.sections_for_year(year),
        }),
    )
}

fn handle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let number = match required_str(req, "registerNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::find_by_number(conn, &number) {
        Ok(found) => ok(
            &req.id,
            json!({ "registerNumber": number, "exists": found.is_some() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match required_str(req, "section") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_digits = match required_str(req, "lastDigits") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let photo = match parse_upload(req, "photo") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing photo", None),
        Err(e) => return e,
    };
    let signature = match parse_upload(req, "signature") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let has_device = req
        .params
        .get("hasDevice")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let device_mac = req
        .params
        .get("deviceMac")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let submission = NewRegistration {
        name,
        year,
        section,
        last_digits,
        photo,
        signature,
        has_device,
        device_mac,
    };

    match registry::register(&state.cohorts, conn, &workspace, submission) {
        Ok(record) => {
            log::info!("registered {} ({})", record.register_number, record.name);
            ok(
                &req.id,
                json!({
                    "registerNumber": record.register_number,
                    "student": students::record_json(&record),
                }),
            )
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), e.details()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registry.prefix" => Some(handle_prefix(state, req)),
        "registry.check" => Some(handle_check(state, req)),
        "registry.register" => Some(handle_register(state, req)),
        _ => None,
    }
}
