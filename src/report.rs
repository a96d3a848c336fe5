use crate::imaging;
use crate::registry::{self, StudentRecord};
use anyhow::Context;
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const REPORT_COLUMNS: [&str; 6] = [
    "Photo",
    "Name",
    "Year",
    "Section",
    "Registration Number",
    "Registration Date",
];

pub const DEFAULT_CONTEXT: &str = "student";

// Layout constants tuned so a 100x100 thumbnail sits inside its cell.
const COLUMN_WIDTHS: [f64; 6] = [16.0, 28.0, 8.0, 10.0, 24.0, 22.0];
const COLUMN_LETTERS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];
const HEADER_ROW_HEIGHT: f64 = 22.0;
const DATA_ROW_HEIGHT: f64 = 80.0;
// 9525 EMU per pixel.
const THUMB_EMU: i64 = 952_500;
const THUMB_INSET_EMU: i64 = 19_050;

#[derive(Debug)]
pub enum ReportError {
    Write(String),
    MissingDependency(String),
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::Write(_) => "report_write_failed",
            ReportError::MissingDependency(_) => "missing_dependency",
        }
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Write(msg) => write!(f, "failed to write report: {}", msg),
            ReportError::MissingDependency(msg) => {
                write!(f, "workbook support unavailable: {}", msg)
            }
        }
    }
}

impl std::error::Error for ReportError {}

#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub embedded: usize,
    pub placeholders: usize,
}

/// Startup capability probe: exercise the container writer against an
/// in-memory sink so a broken workbook stack is reported up front instead of
/// at the first download.
pub fn workbook_support() -> Result<(), ReportError> {
    let unavailable = |e: String| ReportError::MissingDependency(e);
    let mut probe = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    probe
        .start_file("probe.xml", opts)
        .map_err(|e| unavailable(e.to_string()))?;
    probe
        .write_all(b"<probe/>")
        .map_err(|e| unavailable(e.to_string()))?;
    probe.finish().map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}

#[derive(Clone, Copy)]
enum PhotoCell {
    Embedded(usize),
    Missing,
    Failed,
}

struct ReportRow {
    photo: PhotoCell,
    name: String,
    year: i64,
    section: String,
    register_number: String,
    date_text: String,
}

/// Produce `{context}_report_{YYYYMMDD_HHMMSS}.xlsx` under `reports_dir`, one
/// data row per record in caller order, with a thumbnail embedded per stored
/// photo. Row-level photo problems degrade to placeholder text; only a
/// destination failure aborts the report.
pub fn generate(
    records: &[StudentRecord],
    files_root: &Path,
    reports_dir: &Path,
    context: &str,
) -> Result<ReportSummary, ReportError> {
    std::fs::create_dir_all(reports_dir).map_err(|e| ReportError::Write(e.to_string()))?;
    let file_name = format!(
        "{}_report_{}.xlsx",
        context,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let scratch = scratch_dir(&file_name)?;
    let result = generate_into(records, files_root, reports_dir, &file_name, &scratch);
    // Scratch thumbnails must not accumulate across report runs; removal
    // failures are swallowed.
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

fn generate_into(
    records: &[StudentRecord],
    files_root: &Path,
    reports_dir: &Path,
    file_name: &str,
    scratch: &Path,
) -> Result<ReportSummary, ReportError> {
    let mut media: Vec<Vec<u8>> = Vec::new();
    let mut placeholders = 0usize;
    let mut rows = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        let photo_abs = files_root.join(&record.photo_path);
        let photo = if record.photo_path.is_empty() || !photo_abs.is_file() {
            placeholders += 1;
            PhotoCell::Missing
        } else {
            match thumbnail_via_scratch(&photo_abs, scratch, i) {
                Ok(bytes) => {
                    media.push(bytes);
                    PhotoCell::Embedded(media.len())
                }
                Err(e) => {
                    log::warn!(
                        "report thumbnail failed for {}: {:#}",
                        record.register_number,
                        e
                    );
                    placeholders += 1;
                    PhotoCell::Failed
                }
            }
        };
        rows.push(ReportRow {
            photo,
            name: record.name.clone(),
            year: record.year,
            section: record.section.clone(),
            register_number: record.register_number.clone(),
            date_text: date_text(&record.created_at),
        });
    }

    let final_path = reports_dir.join(file_name);
    let partial = reports_dir.join(format!("{}.partial", file_name));
    if let Err(e) = write_workbook(&partial, &rows, &media) {
        let _ = std::fs::remove_file(&partial);
        return Err(ReportError::Write(format!("{:#}", e)));
    }
    if let Err(e) = std::fs::rename(&partial, &final_path) {
        let _ = std::fs::remove_file(&partial);
        return Err(ReportError::Write(e.to_string()));
    }

    Ok(ReportSummary {
        path: final_path,
        rows: rows.len(),
        embedded: media.len(),
        placeholders,
    })
}

/// The photo-less CSV variant kept for plain tabular consumers.
pub fn generate_csv(
    records: &[StudentRecord],
    reports_dir: &Path,
    context: &str,
) -> Result<ReportSummary, ReportError> {
    std::fs::create_dir_all(reports_dir).map_err(|e| ReportError::Write(e.to_string()))?;
    let file_name = format!(
        "{}_report_{}.csv",
        context,
        Utc::now().format("%Y%m%d_%H%M%S")
    );

    let mut body = String::from("Name,Year,Section,Register Number,Registration Date\n");
    for record in records {
        body.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_field(&record.name),
            record.year,
            csv_field(&record.section),
            csv_field(&record.register_number),
            csv_field(&date_text(&record.created_at)),
        ));
    }

    let final_path = reports_dir.join(&file_name);
    let partial = reports_dir.join(format!("{}.partial", file_name));
    if let Err(e) = std::fs::write(&partial, body.as_bytes()) {
        let _ = std::fs::remove_file(&partial);
        return Err(ReportError::Write(e.to_string()));
    }
    if let Err(e) = std::fs::rename(&partial, &final_path) {
        let _ = std::fs::remove_file(&partial);
        return Err(ReportError::Write(e.to_string()));
    }
    Ok(ReportSummary {
        path: final_path,
        rows: records.len(),
        embedded: 0,
        placeholders: 0,
    })
}

/// Unique-per-invocation scratch directory so concurrent report runs cannot
/// clobber each other's thumbnails.
fn scratch_dir(file_name: &str) -> Result<PathBuf, ReportError> {
    let stem = file_name.trim_end_matches(".xlsx");
    let dir = std::env::temp_dir().join(format!("{}-{}.thumbs", stem, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).map_err(|e| ReportError::Write(e.to_string()))?;
    Ok(dir)
}

fn thumbnail_via_scratch(src: &Path, scratch: &Path, idx: usize) -> anyhow::Result<Vec<u8>> {
    let raw = std::fs::read(src)
        .with_context(|| format!("failed to read stored photo {}", src.to_string_lossy()))?;
    let thumb = imaging::thumbnail(&raw)?;
    let path = scratch.join(format!("thumb{}.jpeg", idx));
    std::fs::write(&path, &thumb)
        .with_context(|| format!("failed to write scratch thumbnail {}", path.to_string_lossy()))?;
    // Embed the bytes that actually landed in scratch.
    std::fs::read(&path)
        .with_context(|| format!("failed to read scratch thumbnail {}", path.to_string_lossy()))
}

fn date_text(raw: &str) -> String {
    match registry::parse_timestamp(raw) {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        // Unparsable stored values are rendered verbatim instead of failing
        // the row.
        None => raw.to_string(),
    }
}

fn write_workbook(path: &Path, rows: &[ReportRow], media: &[Vec<u8>]) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create workbook {}", path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let has_media = !media.is_empty();

    let mut put = |zip: &mut ZipWriter<File>, name: &str, body: &[u8]| -> anyhow::Result<()> {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start workbook entry {}", name))?;
        zip.write_all(body)
            .with_context(|| format!("failed to write workbook entry {}", name))?;
        Ok(())
    };

    put(&mut zip, "[Content_Types].xml", content_types_xml(has_media).as_bytes())?;
    put(&mut zip, "_rels/.rels", ROOT_RELS.as_bytes())?;
    put(&mut zip, "xl/workbook.xml", WORKBOOK_XML.as_bytes())?;
    put(&mut zip, "xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes())?;
    put(&mut zip, "xl/styles.xml", STYLES_XML.as_bytes())?;
    put(
        &mut zip,
        "xl/worksheets/sheet1.xml",
        sheet_xml(rows, has_media).as_bytes(),
    )?;

    if has_media {
        put(&mut zip, "xl/worksheets/_rels/sheet1.xml.rels", SHEET_RELS.as_bytes())?;
        put(&mut zip, "xl/drawings/drawing1.xml", drawing_xml(rows).as_bytes())?;
        put(
            &mut zip,
            "xl/drawings/_rels/drawing1.xml.rels",
            drawing_rels(media.len()).as_bytes(),
        )?;
        for (i, bytes) in media.iter().enumerate() {
            put(&mut zip, &format!("xl/media/image{}.jpeg", i + 1), bytes)?;
        }
    }

    zip.finish().context("failed to finalize workbook")?;
    Ok(())
}

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

const ROOT_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>",
    "</Relationships>"
);

const WORKBOOK_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" ",
    "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
    "<sheets><sheet name=\"Students\" sheetId=\"1\" r:id=\"rId1\"/></sheets>",
    "</workbook>"
);

const WORKBOOK_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/>",
    "<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>",
    "</Relationships>"
);

const SHEET_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing\" Target=\"../drawings/drawing1.xml\"/>",
    "</Relationships>"
);

// Style 1 is the header: bold white on a solid fill, centered.
const STYLES_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
    "<fonts count=\"2\">",
    "<font><sz val=\"11\"/><name val=\"Calibri\"/></font>",
    "<font><b/><color rgb=\"FFFFFFFF\"/><sz val=\"11\"/><name val=\"Calibri\"/></font>",
    "</fonts>",
    "<fills count=\"3\">",
    "<fill><patternFill patternType=\"none\"/></fill>",
    "<fill><patternFill patternType=\"gray125\"/></fill>",
    "<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FF4472C4\"/><bgColor indexed=\"64\"/></patternFill></fill>",
    "</fills>",
    "<borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>",
    "<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>",
    "<cellXfs count=\"2\">",
    "<xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>",
    "<xf numFmtId=\"0\" fontId=\"1\" fillId=\"2\" borderId=\"0\" xfId=\"0\" applyFont=\"1\" applyFill=\"1\" applyAlignment=\"1\">",
    "<alignment horizontal=\"center\" vertical=\"center\"/>",
    "</xf>",
    "</cellXfs>",
    "</styleSheet>"
);

fn content_types_xml(has_media: bool) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">");
    out.push_str("<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>");
    out.push_str("<Default Extension=\"xml\" ContentType=\"application/xml\"/>");
    if has_media {
        out.push_str("<Default Extension=\"jpeg\" ContentType=\"image/jpeg\"/>");
    }
    out.push_str("<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>");
    out.push_str("<Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>");
    out.push_str("<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>");
    if has_media {
        out.push_str("<Override PartName=\"/xl/drawings/drawing1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.drawing+xml\"/>");
    }
    out.push_str("</Types>");
    out
}

fn sheet_xml(rows: &[ReportRow], has_drawing: bool) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" ");
    out.push_str("xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">");

    out.push_str("<cols>");
    for (i, width) in COLUMN_WIDTHS.iter().enumerate() {
        out.push_str(&format!(
            "<col min=\"{n}\" max=\"{n}\" width=\"{w}\" customWidth=\"1\"/>",
            n = i + 1,
            w = width
        ));
    }
    out.push_str("</cols>");

    out.push_str("<sheetData>");
    out.push_str(&format!(
        "<row r=\"1\" ht=\"{}\" customHeight=\"1\">",
        HEADER_ROW_HEIGHT
    ));
    for (i, title) in REPORT_COLUMNS.into_iter().enumerate() {
        out.push_str(&inline_str_cell(COLUMN_LETTERS[i], 1, title, Some(1)));
    }
    out.push_str("</row>");

    for (i, row) in rows.iter().enumerate() {
        let r = i + 2;
        out.push_str(&format!(
            "<row r=\"{}\" ht=\"{}\" customHeight=\"1\">",
            r, DATA_ROW_HEIGHT
        ));
        match row.photo {
            // The thumbnail floats over the cell via the drawing part.
            PhotoCell::Embedded(_) => {}
            PhotoCell::Missing => out.push_str(&inline_str_cell("A", r, "No Photo", None)),
            PhotoCell::Failed => out.push_str(&inline_str_cell("A", r, "Photo Error", None)),
        }
        out.push_str(&inline_str_cell("B", r, &row.name, None));
        out.push_str(&format!("<c r=\"C{}\"><v>{}</v></c>", r, row.year));
        out.push_str(&inline_str_cell("D", r, &row.section, None));
        out.push_str(&inline_str_cell("E", r, &row.register_number, None));
        out.push_str(&inline_str_cell("F", r, &row.date_text, None));
        out.push_str("</row>");
    }
    out.push_str("</sheetData>");

    if has_drawing {
        out.push_str("<drawing r:id=\"rId1\"/>");
    }
    out.push_str("</worksheet>");
    out
}

fn inline_str_cell(col: &str, row: usize, text: &str, style: Option<u32>) -> String {
    let s = style.map(|s| format!(" s=\"{}\"", s)).unwrap_or_default();
    format!(
        "<c r=\"{}{}\"{} t=\"inlineStr\"><is><t>{}</t></is></c>",
        col,
        row,
        s,
        escape_xml(text)
    )
}

fn drawing_xml(rows: &[ReportRow]) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<xdr:wsDr xmlns:xdr=\"http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing\" ");
    out.push_str("xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" ");
    out.push_str("xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">");
    for (i, row) in rows.iter().enumerate() {
        let PhotoCell::Embedded(media_idx) = row.photo else {
            continue;
        };
        // Anchor in the photo cell of sheet row i+2 (0-based row index i+1).
        out.push_str("<xdr:oneCellAnchor>");
        out.push_str(&format!(
            "<xdr:from><xdr:col>0</xdr:col><xdr:colOff>{off}</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>{off}</xdr:rowOff></xdr:from>",
            off = THUMB_INSET_EMU,
            row = i + 1
        ));
        out.push_str(&format!(
            "<xdr:ext cx=\"{0}\" cy=\"{0}\"/>",
            THUMB_EMU
        ));
        out.push_str("<xdr:pic><xdr:nvPicPr>");
        out.push_str(&format!(
            "<xdr:cNvPr id=\"{}\" name=\"Photo {}\"/><xdr:cNvPicPr/>",
            media_idx + 1,
            media_idx
        ));
        out.push_str("</xdr:nvPicPr><xdr:blipFill>");
        out.push_str(&format!("<a:blip r:embed=\"rId{}\"/>", media_idx));
        out.push_str("<a:stretch><a:fillRect/></a:stretch></xdr:blipFill>");
        out.push_str("<xdr:spPr><a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></xdr:spPr>");
        out.push_str("</xdr:pic><xdr:clientData/></xdr:oneCellAnchor>");
    }
    out.push_str("</xdr:wsDr>");
    out
}

fn drawing_rels(media_count: usize) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str(
        "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    );
    for i in 1..=media_count {
        out.push_str(&format!(
            "<Relationship Id=\"rId{0}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" Target=\"../media/image{0}.jpeg\"/>",
            i
        ));
    }
    out.push_str("</Relationships>");
    out
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
