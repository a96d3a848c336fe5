use crate::cohort::{self, CohortConfig};
use crate::imaging::{self, ImagingError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub year: i64,
    pub section: String,
    pub register_number: String,
    pub photo_path: String,
    pub signature_path: Option<String>,
    pub has_device: bool,
    pub device_mac: Option<String>,
    pub created_at: String,
}

impl StudentRecord {
    /// Stored timestamps are UTC text. Naive values are assumed UTC so window
    /// comparisons never mix offsets.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Photo,
    Signature,
}

impl UploadKind {
    fn as_str(self) -> &'static str {
        match self {
            UploadKind::Photo => "photo",
            UploadKind::Signature => "signature",
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    InvalidYear {
        year: i64,
    },
    InvalidSection {
        year: i64,
        section: String,
        allowed: Vec<String>,
    },
    InvalidSuffix,
    DuplicateRegistration {
        register_number: String,
    },
    Image {
        field: UploadKind,
        source: ImagingError,
    },
    Storage(String),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidYear { .. } => "invalid_year",
            RegistryError::InvalidSection { .. } => "invalid_section",
            RegistryError::InvalidSuffix => "invalid_suffix",
            RegistryError::DuplicateRegistration { .. } => "duplicate_registration",
            RegistryError::Image { source, .. } => source.code(),
            RegistryError::Storage(_) => "db_update_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            RegistryError::InvalidSection {
                year,
                section,
                allowed,
            } => Some(json!({ "year": year, "section": section, "validSections": allowed })),
            RegistryError::DuplicateRegistration { register_number } => {
                Some(json!({ "registerNumber": register_number }))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidYear { year } => write!(f, "invalid year {}", year),
            RegistryError::InvalidSection {
                year,
                section,
                allowed,
            } => write!(
                f,
                "invalid section '{}' for year {}; valid sections: {}",
                section,
                year,
                allowed.join(", ")
            ),
            RegistryError::InvalidSuffix => {
                write!(f, "last digits must be exactly 3 numeric characters")
            }
            RegistryError::DuplicateRegistration { register_number } => write!(
                f,
                "registration number {} already exists; use different last 3 digits",
                register_number
            ),
            RegistryError::Image { field, source } => {
                write!(f, "{}: {}", field.as_str(), source)
            }
            RegistryError::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub name: String,
    pub year: i64,
    pub section: String,
    pub last_digits: String,
    pub photo: UploadedFile,
    pub signature: Option<UploadedFile>,
    pub has_device: bool,
    pub device_mac: Option<String>,
}

/// Build the candidate registration number for a cohort. The caller performs
/// the insert; the window between this lookup and that insert is closed by the
/// UNIQUE constraint on `register_number`.
pub fn allocate(
    cohorts: &CohortConfig,
    conn: &Connection,
    year: i64,
    suffix: &str,
) -> Result<String, RegistryError> {
    if !cohort::is_suffix_valid(suffix) {
        return Err(RegistryError::InvalidSuffix);
    }
    let Some(prefix) = cohorts.prefix_for_year(year) else {
        return Err(RegistryError::InvalidYear { year });
    };
    let candidate = format!("{}{}", prefix, suffix);
    if register_number_exists(conn, &candidate)? {
        return Err(RegistryError::DuplicateRegistration {
            register_number: candidate,
        });
    }
    Ok(candidate)
}

pub fn register_number_exists(conn: &Connection, number: &str) -> Result<bool, RegistryError> {
    conn.query_row(
        "SELECT 1 FROM students WHERE register_number = ?",
        [number],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| RegistryError::Storage(e.to_string()))
}

/// The registration unit: validate, normalize in memory, write image files,
/// insert the row. A failure after files are written removes them again, so a
/// rejected registration leaves no partial state.
pub fn register(
    cohorts: &CohortConfig,
    conn: &Connection,
    root: &Path,
    submission: NewRegistration,
) -> Result<StudentRecord, RegistryError> {
    if !cohorts.is_section_valid_for_year(submission.year, &submission.section) {
        if cohorts.prefix_for_year(submission.year).is_none() {
            return Err(RegistryError::InvalidYear {
                year: submission.year,
            });
        }
        return Err(RegistryError::InvalidSection {
            year: submission.year,
            section: submission.section.clone(),
            allowed: cohorts.sections_for_year(submission.year),
        });
    }
    let register_number = allocate(cohorts, conn, submission.year, &submission.last_digits)?;

    let photo_bytes = normalize_upload(UploadKind::Photo, &submission.photo)?;
    let signature_bytes = submission
        .signature
        .as_ref()
        .map(|file| normalize_upload(UploadKind::Signature, file))
        .transpose()?;

    let section = submission.section.to_ascii_uppercase();
    let photo_rel = imaging::photo_rel_path(submission.year, &section, &register_number);
    let photo_abs = imaging::save(root, &photo_rel, &photo_bytes)
        .map_err(|e| RegistryError::Storage(e.to_string()))?;
    let mut written = vec![photo_abs];

    let signature_rel = if let Some(bytes) = &signature_bytes {
        let rel = imaging::signature_rel_path(submission.year, &section, &register_number);
        match imaging::save(root, &rel, bytes) {
            Ok(abs) => {
                written.push(abs);
                Some(rel)
            }
            Err(e) => {
                remove_files(&written);
                return Err(RegistryError::Storage(e.to_string()));
            }
        }
    } else {
        None
    };

    let device_mac = if submission.has_device {
        submission
            .device_mac
            .as_deref()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
    } else {
        None
    };

    let record = StudentRecord {
        id: Uuid::new_v4().to_string(),
        name: submission.name.trim().to_string(),
        year: submission.year,
        section,
        register_number: register_number.clone(),
        photo_path: rel_str(&photo_rel),
        signature_path: signature_rel.as_deref().map(rel_str),
        has_device: submission.has_device,
        device_mac,
        created_at: Utc::now().format(CREATED_AT_FORMAT).to_string(),
    };

    let inserted = conn.execute(
        "INSERT INTO students(id, name, year, section, register_number, photo_path,
                              signature_path, has_device, device_mac, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.name,
            record.year,
            &record.section,
            &record.register_number,
            &record.photo_path,
            record.signature_path.as_deref(),
            record.has_device as i64,
            record.device_mac.as_deref(),
            &record.created_at,
        ),
    );
    if let Err(e) = inserted {
        // A lost race against a concurrent insert surfaces here; this
        // registration's files must not outlive its row.
        remove_files(&written);
        if is_unique_violation(&e) {
            return Err(RegistryError::DuplicateRegistration { register_number });
        }
        return Err(RegistryError::Storage(e.to_string()));
    }

    Ok(record)
}

fn normalize_upload(kind: UploadKind, file: &UploadedFile) -> Result<Vec<u8>, RegistryError> {
    let wrap = |source| RegistryError::Image {
        field: kind,
        source,
    };
    imaging::validate_extension(&file.filename).map_err(wrap)?;
    imaging::validate_size(file.bytes.len()).map_err(wrap)?;
    imaging::normalize(&file.bytes).map_err(wrap)
}

fn rel_str(rel: &Path) -> String {
    rel.to_string_lossy().into_owned()
}

fn remove_files(paths: &[PathBuf]) {
    for p in paths {
        let _ = std::fs::remove_file(p);
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn find_by_number(
    conn: &Connection,
    number: &str,
) -> Result<Option<StudentRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, year, section, register_number, photo_path, signature_path,
                has_device, device_mac, created_at
         FROM students WHERE register_number = ?",
        [number],
        map_student_row,
    )
    .optional()
}

/// Full or filtered scan, newest first.
pub fn list_students(
    conn: &Connection,
    year: Option<i64>,
    section: Option<&str>,
) -> Result<Vec<StudentRecord>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT id, name, year, section, register_number, photo_path, signature_path,
                has_device, device_mac, created_at
         FROM students",
    );
    let section_upper = section.map(|s| s.to_ascii_uppercase());
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref y) = year {
        clauses.push("year = ?");
        binds.push(y);
    }
    if let Some(ref s) = section_upper {
        clauses.push("section = ?");
        binds.push(s);
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), map_student_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_student_row(r: &rusqlite::Row) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        year: r.get(2)?,
        section: r.get(3)?,
        register_number: r.get(4)?,
        photo_path: r.get(5)?,
        signature_path: r.get(6)?,
        has_device: r.get::<_, i64>(7)? != 0,
        device_mac: r.get(8)?,
        created_at: r.get(9)?,
    })
}
