use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, StudentRecord};
use crate::report;
use crate::stats;
use chrono::Utc;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReportScope {
    All,
    Weekly,
    Year { year: i64, section: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Xlsx,
    Csv,
}

fn parse_scope(state: &AppState, req: &Request) -> Result<ReportScope, serde_json::Value> {
    match req
        .params
        .get("scope")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("all") => Ok(ReportScope::All),
        Some("weekly") => Ok(ReportScope::Weekly),
        Some("year") => {
            let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
                return Err(err(&req.id, "bad_params", "missing year", None));
            };
            if state.cohorts.prefix_for_year(year).is_none() {
                return Err(err(
                    &req.id,
                    "invalid_year",
                    format!("invalid year {}", year),
                    None,
                ));
            }
            let section = req
                .params
                .get("section")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if let Some(ref s) = section {
                if !state.cohorts.is_section_valid_for_year(year, s) {
                    return Err(err(
                        &req.id,
                        "invalid_section",
                        format!(
                            "invalid section '{}' for year {}; valid sections: {}",
                            s,
                            year,
                            state.cohorts.sections_for_year(year).join(", ")
                        ),
                        Some(json!({ "year": year, "section": s })),
                    ));
                }
            }
            Ok(ReportScope::Year { year, section })
        }
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            "scope must be one of: all, weekly, year",
            Some(json!({ "scope": other })),
        )),
    }
}

fn parse_format(req: &Request) -> Result<ReportFormat, serde_json::Value> {
    match req
        .params
        .get("format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("xlsx") => Ok(ReportFormat::Xlsx),
        Some("csv") => Ok(ReportFormat::Csv),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            "format must be one of: xlsx, csv",
            Some(json!({ "format": other })),
        )),
    }
}

fn select_records(
    conn: &rusqlite::Connection,
    scope: &ReportScope,
) -> Result<Vec<StudentRecord>, rusqlite::Error> {
    match scope {
        ReportScope::All => registry::list_students(conn, None, None),
        ReportScope::Weekly => {
            let all = registry::list_students(conn, None, None)?;
            Ok(stats::recent_within_days(&all, 7, Utc::now()))
        }
        ReportScope::Year { year, section } => {
            registry::list_students(conn, Some(*year), section.as_deref())
        }
    }
}

fn scope_context(scope: &ReportScope) -> String {
    match scope {
        ReportScope::All => report::DEFAULT_CONTEXT.to_string(),
        ReportScope::Weekly => "weekly".to_string(),
        ReportScope::Year {
            year,
            section: None,
        } => format!("year_{}", year),
        ReportScope::Year {
            year,
            section: Some(s),
        } => format!("year_{}_section_{}", year, s.to_ascii_uppercase()),
    }
}

fn empty_message(scope: &ReportScope) -> String {
    match scope {
        ReportScope::All => "no student data available to generate report".to_string(),
        ReportScope::Weekly => "no students registered in the last 7 days".to_string(),
        ReportScope::Year {
            year,
            section: None,
        } => format!("no students found for year {}", year),
        ReportScope::Year {
            year,
            section: Some(s),
        } => format!("no students found for year {} section {}", year, s),
    }
}

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scope = match parse_scope(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let format = match parse_format(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let records = match select_records(conn, &scope) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if records.is_empty() {
        return err(&req.id, "not_found", empty_message(&scope), None);
    }

    let context = scope_context(&scope);
    let reports_dir = workspace.join("reports");
    let generated = match format {
        ReportFormat::Xlsx => report::generate(&records, &workspace, &reports_dir, &context),
        ReportFormat::Csv => report::generate_csv(&records, &reports_dir, &context),
    };

    match generated {
        Ok(summary) => {
            log::info!(
                "report generated: {} ({} rows, {} embedded)",
                summary.path.to_string_lossy(),
                summary.rows,
                summary.embedded
            );
            ok(
                &req.id,
                json!({
                    "path": summary.path.to_string_lossy(),
                    "rows": summary.rows,
                    "embedded": summary.embedded,
                    "placeholders": summary.placeholders,
                }),
            )
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.generate" => Some(handle_generate(state, req)),
        _ => None,
    }
}
