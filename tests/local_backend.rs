//! Full runs against the filesystem backend in a temp directory.

use certbatch::config::GeneratorConfig;
use certbatch::local::{LocalBackend, Workbook, TRASH_DIR};
use certbatch::services::{ChildFilter, DocumentService, FileKind, StorageService};
use certbatch::{Column, Generator, IdentityPool, RunStatus};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn write_sheet(root: &Path, rows: &[&[&str]]) {
    let workbook = Workbook {
        rows: rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    };
    fs::write(
        root.join("list.json"),
        serde_json::to_string(&workbook).unwrap(),
    )
    .unwrap();
}

fn read_sheet(root: &Path) -> Workbook {
    serde_json::from_str(&fs::read_to_string(root.join("list.json")).unwrap()).unwrap()
}

/// Root with a template, a sheet and two identity files (plus noise).
fn fixture() -> (TempDir, TempDir) {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("cert.txt"),
        "Awarded to <<الاسم>> for <<course>>.",
    )
    .unwrap();
    write_sheet(
        root.path(),
        &[
            &["#", "الاسم", "Course"],
            &["1", "م. سارة خالد", "Rust"],
            &["2", "Omar Adel", "Go"],
            &["3", "", "Zig"],
        ],
    );

    let creds = TempDir::new().unwrap();
    fs::write(creds.path().join("sa-1.json"), r#"{"client_email":"a@x"}"#).unwrap();
    fs::write(
        creds.path().join("service-account-2.json"),
        r#"{"client_email":"b@x"}"#,
    )
    .unwrap();
    fs::write(creds.path().join("sa-broken.json"), "{not json").unwrap();
    fs::write(creds.path().join("notes.json"), "{}").unwrap();
    (root, creds)
}

#[tokio::test]
async fn run_end_to_end_on_disk() {
    let (root, creds) = fixture();
    let discovery = IdentityPool::discover(creds.path()).unwrap();
    assert_eq!(discovery.pool.len(), 2);
    assert_eq!(discovery.skipped.len(), 1);

    let backend = LocalBackend::with_public_base_url(root.path(), "https://certs.example/");
    let config = GeneratorConfig::builder()
        .template("cert.txt")
        .destination_folder("out")
        .source("list.json")
        .without_delays()
        .build()
        .unwrap();
    let generator = Generator::new(config.clone(), discovery.pool, Arc::new(backend));

    let saved = generator.save_config(config).await.unwrap();
    assert_eq!(saved.name_column, Some(Column::from_index(1)));
    assert_eq!(saved.link_column, Some(Column::from_index(3)));
    assert_eq!(saved.variables.len(), 1);

    // Bind the second placeholder to the course column.
    let mut variables = generator.detect_variables().await.unwrap();
    assert_eq!(variables.len(), 2);
    assert_eq!(variables[1].token, "<<course>>");
    variables[1] = certbatch::Variable::column("<<course>>", Column::from_index(2));
    generator.set_variables(variables).unwrap();

    let report = generator.run().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(generator.snapshot().status, RunStatus::Completed);

    let out = root.path().join("out");
    assert_eq!(
        fs::read_to_string(out.join("سارة خالد.pdf")).unwrap(),
        "Awarded to سارة خالد for Rust."
    );
    assert_eq!(
        fs::read_to_string(out.join("Omar Adel.pdf")).unwrap(),
        "Awarded to Omar Adel for Go."
    );
    // Working copies are gone; only the two outputs remain.
    assert_eq!(fs::read_dir(&out).unwrap().count(), 2);

    let sheet = read_sheet(root.path());
    assert_eq!(sheet.rows[0][3], "رابط الشهادة");
    assert_eq!(sheet.rows[1][3], "https://certs.example/out/سارة خالد.pdf");
    assert_eq!(sheet.rows[2][3], "https://certs.example/out/Omar Adel.pdf");
    assert!(sheet.rows[3].get(3).map_or(true, |c| c.is_empty()));

    // Everything has a link now; a second run finds nothing to do.
    let report = generator.run().await.unwrap();
    assert_eq!(report.passes, 0);
    assert_eq!(report.completed, 0);
}

#[tokio::test]
async fn reload_identities_replaces_the_pool() {
    let (root, creds) = fixture();
    let generator = Generator::new(
        GeneratorConfig::default(),
        IdentityPool::default(),
        Arc::new(LocalBackend::new(root.path())),
    );
    assert_eq!(generator.identity_count(), 0);

    assert_eq!(assert_ok!(generator.reload_identities(creds.path())), 2);
    assert_eq!(generator.snapshot().identities, 2);

    let empty = TempDir::new().unwrap();
    assert_err!(generator.reload_identities(empty.path()));
    assert_eq!(generator.identity_count(), 0);
}

#[tokio::test]
async fn trash_and_listing() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("templates")).unwrap();
    fs::write(root.path().join("templates/b.txt"), "x").unwrap();
    fs::write(root.path().join("templates/a.slides"), "x").unwrap();
    fs::write(root.path().join("templates/list.json"), "{}").unwrap();
    fs::create_dir(root.path().join("templates/z-folder")).unwrap();
    let backend = LocalBackend::new(root.path());

    let docs = backend
        .list_children("templates", ChildFilter::Documents)
        .await
        .unwrap();
    let names: Vec<_> = docs.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["z-folder", "a.slides", "b.txt"]);
    assert_eq!(docs[1].kind, FileKind::Presentation);
    assert_eq!(docs[2].id, "templates/b.txt");

    backend.trash("templates/b.txt").await.unwrap();
    assert!(!root.path().join("templates/b.txt").exists());
    assert!(root.path().join("templates").join(TRASH_DIR).join("b.txt").exists());

    // Trashed files are hidden from listings; deleting a missing file is fine.
    let all = backend
        .list_children("templates", ChildFilter::All)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    backend.delete("templates/b.txt").await.unwrap();

    let uploaded = backend.upload(b"pdf".to_vec(), "a/b.pdf", "out").await.unwrap();
    assert_eq!(uploaded.id, "out/a_b.pdf");
    assert_eq!(uploaded.link, "http://localhost/out/a_b.pdf");
}
