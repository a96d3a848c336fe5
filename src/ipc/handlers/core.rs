use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Reports need a working workbook writer; surface that at selection time
    // instead of at the first download.
    if let Err(e) = report::workbook_support() {
        return err(&req.id, e.code(), e.to_string(), None);
    }

    match db::open_db(&path) {
        Ok(conn) => {
            for dir in ["uploads", "reports"] {
                if let Err(e) = std::fs::create_dir_all(path.join(dir)) {
                    return err(
                        &req.id,
                        "workspace_setup_failed",
                        format!("failed to create {} directory: {}", dir, e),
                        None,
                    );
                }
            }
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            log::info!("workspace selected: {}", path.to_string_lossy());
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_workspace_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let confirmed = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !confirmed {
        return err(
            &req.id,
            "bad_params",
            "reset requires params.confirm = true",
            None,
        );
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let removed = match conn.execute("DELETE FROM students", []) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    // Rows and their stored images go together; leave the directories in
    // place but empty.
    for dir in ["uploads", "reports"] {
        let path = workspace.join(dir);
        let _ = std::fs::remove_dir_all(&path);
        if let Err(e) = std::fs::create_dir_all(&path) {
            return err(
                &req.id,
                "workspace_setup_failed",
                format!("failed to recreate {} directory: {}", dir, e),
                None,
            );
        }
    }

    log::info!("workspace reset: {} rows removed", removed);
    ok(&req.id, json!({ "removedStudents": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.reset" => Some(handle_workspace_reset(state, req)),
        _ => None,
    }
}
