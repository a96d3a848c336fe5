#[path = "../src/cohort.rs"]
mod cohort;
#[path = "../src/db.rs"]
mod db;
#[path = "../src/imaging.rs"]
mod imaging;
#[path = "../src/registry.rs"]
mod registry;

use cohort::CohortConfig;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use registry::{NewRegistration, RegistryError, UploadedFile};
use std::io::Cursor;
use std::path::PathBuf;
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
        Rgb([(x % 256) as u8, (y % 256) as u8, 64])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(85))
        .expect("encode jpeg");
    out
}

fn submission(name: &str, year: i64, section: &str, digits: &str) -> NewRegistration {
    NewRegistration {
        name: name.to_string(),
        year,
        section: section.to_string(),
        last_digits: digits.to_string(),
        photo: UploadedFile {
            filename: "photo.jpg".to_string(),
            bytes: jpeg_bytes(64, 80),
        },
        signature: None,
        has_device: false,
        device_mac: None,
    }
}

#[test]
fn allocate_concatenates_prefix_and_suffix() {
    let workspace = temp_dir("registrar-allocate");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    assert_eq!(
        registry::allocate(&cohorts, &conn, 1, "007").expect("allocate year 1"),
        "RA2511026050007"
    );
    assert_eq!(
        registry::allocate(&cohorts, &conn, 2, "123").expect("allocate year 2"),
        "RA2411026050123"
    );
    assert_eq!(
        registry::allocate(&cohorts, &conn, 3, "000").expect("allocate year 3"),
        "RA2311026050000"
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn allocate_rejects_malformed_input() {
    let workspace = temp_dir("registrar-allocate-bad");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    assert!(matches!(
        registry::allocate(&cohorts, &conn, 1, "12a"),
        Err(RegistryError::InvalidSuffix)
    ));
    assert!(matches!(
        registry::allocate(&cohorts, &conn, 1, "0070"),
        Err(RegistryError::InvalidSuffix)
    ));
    assert!(matches!(
        registry::allocate(&cohorts, &conn, 9, "007"),
        Err(RegistryError::InvalidYear { year: 9 })
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn register_persists_row_and_photo_then_refuses_duplicates() {
    let workspace = temp_dir("registrar-register");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    let record = registry::register(
        &cohorts,
        &conn,
        &workspace,
        submission("  Ada Lovelace  ", 1, "a", "007"),
    )
    .expect("first registration");

    assert_eq!(record.register_number, "RA2511026050007");
    assert_eq!(record.name, "Ada Lovelace");
    assert_eq!(record.section, "A");
    assert_eq!(record.photo_path, "uploads/1/A/RA2511026050007.jpg");
    assert!(record.signature_path.is_none());

    let stored = std::fs::read(workspace.join(&record.photo_path)).expect("stored photo");
    let decoded = image::load_from_memory(&stored).expect("decode stored photo");
    assert_eq!(decoded.width(), imaging::IMAGE_SIZE);
    assert_eq!(decoded.height(), imaging::IMAGE_SIZE);

    assert!(registry::register_number_exists(&conn, "RA2511026050007").expect("exists"));
    let found = registry::find_by_number(&conn, "RA2511026050007")
        .expect("lookup")
        .expect("record present");
    assert_eq!(found.name, "Ada Lovelace");

    // The exact same cohort and digits must be refused, not overwritten.
    let dup = registry::register(
        &cohorts,
        &conn,
        &workspace,
        submission("Someone Else", 1, "A", "007"),
    );
    match dup {
        Err(RegistryError::DuplicateRegistration { register_number }) => {
            assert_eq!(register_number, "RA2511026050007");
        }
        other => panic!("expected duplicate error, got {:?}", other.map(|r| r.register_number)),
    }

    // The original row and photo survive the rejected attempt.
    let survivors = registry::list_students(&conn, None, None).expect("list");
    assert_eq!(survivors.len(), 1);
    assert!(workspace.join(&record.photo_path).is_file());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn register_stores_signature_and_uppercases_mac() {
    let workspace = temp_dir("registrar-register-device");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    let mut sub = submission("Grace Hopper", 2, "b", "314");
    sub.signature = Some(UploadedFile {
        filename: "sign.jpg".to_string(),
        bytes: jpeg_bytes(40, 20),
    });
    sub.has_device = true;
    sub.device_mac = Some("aa:bb:cc:dd:ee:ff".to_string());

    let record =
        registry::register(&cohorts, &conn, &workspace, sub).expect("register with device");
    assert_eq!(record.register_number, "RA2411026050314");
    assert_eq!(record.device_mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert!(record.has_device);

    let signature_path = record.signature_path.as_deref().expect("signature path");
    assert_eq!(signature_path, "uploads/2/B/RA2411026050314_sign.jpg");
    assert!(workspace.join(signature_path).is_file());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn register_rejects_bad_cohort_and_writes_nothing() {
    let workspace = temp_dir("registrar-register-badsection");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    let err = registry::register(
        &cohorts,
        &conn,
        &workspace,
        submission("Nobody", 3, "E", "111"),
    )
    .expect_err("year 3 has no section E");
    match err {
        RegistryError::InvalidSection { allowed, .. } => {
            assert_eq!(allowed, vec!["A", "B", "C", "D"]);
        }
        other => panic!("expected invalid section, got {:?}", other),
    }

    let err = registry::register(
        &cohorts,
        &conn,
        &workspace,
        submission("Nobody", 9, "A", "111"),
    )
    .expect_err("unknown year");
    assert!(matches!(err, RegistryError::InvalidYear { year: 9 }));

    assert!(registry::list_students(&conn, None, None).expect("list").is_empty());
    assert!(!workspace.join("uploads").exists());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn register_gates_uploads_before_touching_anything() {
    let workspace = temp_dir("registrar-register-gates");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    let mut wrong_ext = submission("Nobody", 1, "A", "200");
    wrong_ext.photo.filename = "photo.gif".to_string();
    let err = registry::register(&cohorts, &conn, &workspace, wrong_ext).expect_err("gif");
    assert_eq!(err.code(), "invalid_format");

    let mut too_big = submission("Nobody", 1, "A", "201");
    too_big.photo.bytes = vec![0u8; imaging::MAX_FILE_BYTES + 1];
    let err = registry::register(&cohorts, &conn, &workspace, too_big).expect_err("oversized");
    assert_eq!(err.code(), "file_too_large");

    let mut garbage = submission("Nobody", 1, "A", "202");
    garbage.photo.bytes = b"definitely not pixels".to_vec();
    let err = registry::register(&cohorts, &conn, &workspace, garbage).expect_err("garbage");
    assert_eq!(err.code(), "unsupported_image_data");

    // None of the rejected attempts may leave a row or a file behind.
    assert!(registry::list_students(&conn, None, None).expect("list").is_empty());
    assert!(!workspace.join("uploads").exists());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn listing_filters_by_cohort_and_orders_newest_first() {
    let workspace = temp_dir("registrar-listing");
    let conn = db::open_db(&workspace).expect("open db");
    let cohorts = CohortConfig::default();

    registry::register(&cohorts, &conn, &workspace, submission("First", 1, "A", "001"))
        .expect("register first");
    registry::register(&cohorts, &conn, &workspace, submission("Second", 1, "B", "002"))
        .expect("register second");
    registry::register(&cohorts, &conn, &workspace, submission("Third", 3, "a", "003"))
        .expect("register third");

    let all = registry::list_students(&conn, None, None).expect("list all");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].name, "Third");
    assert_eq!(all[2].name, "First");

    let year1 = registry::list_students(&conn, Some(1), None).expect("list year 1");
    assert_eq!(year1.len(), 2);

    // Section filters are case-insensitive like the validation gate.
    let year1b = registry::list_students(&conn, Some(1), Some("b")).expect("list year 1 B");
    assert_eq!(year1b.len(), 1);
    assert_eq!(year1b[0].name, "Second");

    let _ = std::fs::remove_dir_all(workspace);
}
