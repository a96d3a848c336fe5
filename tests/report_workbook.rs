#[path = "../src/cohort.rs"]
mod cohort;
#[path = "../src/imaging.rs"]
mod imaging;
#[path = "../src/registry.rs"]
mod registry;
#[path = "../src/report.rs"]
mod report;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use registry::StudentRecord;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 200])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(85))
        .expect("encode jpeg");
    out
}

fn record(name: &str, number: &str, photo_path: &str, created_at: &str) -> StudentRecord {
    StudentRecord {
        id: format!("id-{}", number),
        name: name.to_string(),
        year: 1,
        section: "A".to_string(),
        register_number: number.to_string(),
        photo_path: photo_path.to_string(),
        signature_path: None,
        has_device: false,
        device_mac: None,
        created_at: created_at.to_string(),
    }
}

fn store_photo(workspace: &Path, number: &str, bytes: &[u8]) -> String {
    let rel = imaging::photo_rel_path(1, "A", number);
    imaging::save(workspace, &rel, bytes).expect("store photo");
    rel.to_string_lossy().into_owned()
}

fn zip_names(path: &Path) -> Vec<String> {
    let file = File::open(path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(file).expect("open zip archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("zip entry").name().to_string())
        .collect()
}

fn zip_entry_string(path: &Path, name: &str) -> String {
    let file = File::open(path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(file).expect("open zip archive");
    let mut out = String::new();
    archive
        .by_name(name)
        .expect("zip entry present")
        .read_to_string(&mut out)
        .expect("read zip entry");
    out
}

#[test]
fn workbook_embeds_thumbnails_and_degrades_per_row() {
    let workspace = temp_dir("registrar-report");
    let reports_dir = workspace.join("reports");

    let good1 = store_photo(
        &workspace,
        "RA2511026050001",
        &imaging::normalize(&jpeg_bytes(64, 80)).expect("normalize"),
    );
    let good2 = store_photo(
        &workspace,
        "RA2511026050002",
        &imaging::normalize(&jpeg_bytes(100, 100)).expect("normalize"),
    );
    // A recorded path whose bytes never were an image.
    let corrupt = store_photo(&workspace, "RA2511026050004", b"scrambled bytes");

    let records = vec![
        record(
            "Ada Lovelace",
            "RA2511026050001",
            &good1,
            "2026-01-02T03:04:05Z",
        ),
        record("Grace Hopper", "RA2511026050002", &good2, "not-a-date"),
        record(
            "Missing Photo",
            "RA2511026050003",
            "uploads/1/A/RA2511026050003.jpg",
            "2026-01-03T10:00:00Z",
        ),
        record(
            "Corrupt Photo",
            "RA2511026050004",
            &corrupt,
            "2026-01-04T10:00:00Z",
        ),
    ];

    let summary =
        report::generate(&records, &workspace, &reports_dir, "student").expect("generate report");

    assert_eq!(summary.rows, 4);
    assert_eq!(summary.embedded, 2);
    assert_eq!(summary.placeholders, 2);

    let file_name = summary
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .expect("file name")
        .to_string();
    assert!(file_name.starts_with("student_report_"));
    assert!(file_name.ends_with(".xlsx"));
    assert!(summary.path.is_file());

    let names = zip_names(&summary.path);
    assert!(names.iter().any(|n| n == "[Content_Types].xml"));
    assert!(names.iter().any(|n| n == "xl/worksheets/sheet1.xml"));
    assert!(names.iter().any(|n| n == "xl/drawings/drawing1.xml"));
    let media: Vec<&String> = names.iter().filter(|n| n.starts_with("xl/media/")).collect();
    assert_eq!(media.len(), 2, "exactly the two decodable photos embed");

    let sheet = zip_entry_string(&summary.path, "xl/worksheets/sheet1.xml");
    assert_eq!(sheet.matches("<row ").count(), 5, "header plus four data rows");
    assert!(sheet.contains("Registration Number"));
    assert!(sheet.contains("Ada Lovelace"));
    assert!(sheet.contains("No Photo"));
    assert!(sheet.contains("Photo Error"));
    assert!(sheet.contains("2026-01-02 03:04:05"));
    // Unparsable stored values render verbatim instead of failing the row.
    assert!(sheet.contains("not-a-date"));

    let thumb = {
        let file = File::open(&summary.path).expect("open workbook");
        let mut archive = zip::ZipArchive::new(file).expect("open zip archive");
        let mut bytes = Vec::new();
        archive
            .by_name("xl/media/image1.jpeg")
            .expect("first media entry")
            .read_to_end(&mut bytes)
            .expect("read media entry");
        bytes
    };
    let decoded = image::load_from_memory(&thumb).expect("decode embedded thumbnail");
    assert_eq!(decoded.width(), imaging::THUMB_SIZE);
    assert_eq!(decoded.height(), imaging::THUMB_SIZE);

    // No partial workbook and no scratch thumbnails may survive the run.
    let stem = file_name.trim_end_matches(".xlsx");
    for entry in std::fs::read_dir(&reports_dir).expect("read reports dir") {
        let name = entry.expect("dir entry").file_name();
        assert!(
            !name.to_string_lossy().ends_with(".partial"),
            "partial workbook left behind: {:?}",
            name
        );
    }
    for entry in std::fs::read_dir(std::env::temp_dir()).expect("read temp dir") {
        let name = entry.expect("dir entry").file_name();
        assert!(
            !name.to_string_lossy().starts_with(stem),
            "scratch directory left behind: {:?}",
            name
        );
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_record_set_yields_header_only_workbook() {
    let workspace = temp_dir("registrar-report-empty");
    let reports_dir = workspace.join("reports");

    let summary =
        report::generate(&[], &workspace, &reports_dir, "year_2").expect("generate empty report");
    assert_eq!(summary.rows, 0);
    assert_eq!(summary.embedded, 0);

    let names = zip_names(&summary.path);
    assert!(names.iter().all(|n| !n.starts_with("xl/media/")));
    assert!(names.iter().all(|n| !n.starts_with("xl/drawings/")));

    let sheet = zip_entry_string(&summary.path, "xl/worksheets/sheet1.xml");
    assert_eq!(sheet.matches("<row ").count(), 1);
    for title in report::REPORT_COLUMNS {
        assert!(sheet.contains(title), "missing header {}", title);
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn csv_report_quotes_awkward_fields() {
    let workspace = temp_dir("registrar-report-csv");
    let reports_dir = workspace.join("reports");

    let records = vec![
        record(
            "Lovelace, Ada",
            "RA2511026050001",
            "",
            "2026-01-02T03:04:05Z",
        ),
        record("Grace Hopper", "RA2511026050002", "", "2026-01-03T04:05:06Z"),
    ];
    let summary =
        report::generate_csv(&records, &reports_dir, "weekly").expect("generate csv report");
    assert_eq!(summary.rows, 2);

    let body = std::fs::read_to_string(&summary.path).expect("read csv");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Name,Year,Section,Register Number,Registration Date");
    assert!(lines[1].starts_with("\"Lovelace, Ada\",1,A,RA2511026050001,2026-01-02 03:04:05"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workbook_support_probe_passes() {
    report::workbook_support().expect("workbook support");
}
