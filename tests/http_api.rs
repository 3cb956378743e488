use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum_test::TestServer;
use axum_test::multipart::MultipartForm;
use serde_json::{Value, json};

use qrserve::{
    AppState, DirectoryStore, MemoryStore, QrDecoder, QrStore, RecordingRevealer, SavedQr, router,
};

const VIRTUAL_ROOT: &str = "/virtual/saved_qrcodes";

struct Harness {
    server: TestServer,
    store: Arc<MemoryStore>,
    revealer: Arc<RecordingRevealer>,
}

fn harness_with(revealer: RecordingRevealer) -> Harness {
    let store = Arc::new(MemoryStore::new(VIRTUAL_ROOT));
    let revealer = Arc::new(revealer);
    let state = AppState::new(store.clone(), revealer.clone());
    let server = TestServer::new(router(state)).unwrap();
    Harness {
        server,
        store,
        revealer,
    }
}

fn harness() -> Harness {
    harness_with(RecordingRevealer::new())
}

fn decode(png: &[u8]) -> String {
    QrDecoder::new()
        .decode_png(png)
        .unwrap()
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn index_serves_html_form() {
    let h = harness();
    let response = h.server.get("/").await;
    response.assert_status_ok();
    assert!(response.text().contains("/generate"));
}

#[tokio::test]
async fn generate_direct_returns_png_without_saving() {
    let h = harness();
    let response = h
        .server
        .post("/generate")
        .form(&[("qr_text", "  hello world  ")])
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(decode(response.as_bytes()), "hello world");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn generate_rejects_empty_and_whitespace_text() {
    let h = harness();

    for text in ["", "   ", "\n\t"] {
        let response = h
            .server
            .post("/generate")
            .form(&[("qr_text", text), ("save", "true")])
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body, json!({ "error": "No text provided" }));
    }

    let response = h.server.post("/generate").form(&[("save", "true")]).await;
    response.assert_status_bad_request();

    assert!(h.store.is_empty());
}

#[tokio::test]
async fn generate_without_form_fields_reports_no_text() {
    let h = harness();

    let response = h.server.post("/generate").await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body, json!({ "error": "No text provided" }));

    let response = h.server.post("/generate").text("qr_text=hello").await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body, json!({ "error": "No text provided" }));

    assert!(h.store.is_empty());
}

#[tokio::test]
async fn generate_accepts_multipart_forms() {
    let h = harness();

    let response = h
        .server
        .post("/generate")
        .multipart(MultipartForm::new().add_text("qr_text", "hello multipart"))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(decode(response.as_bytes()), "hello multipart");
    assert!(h.store.is_empty());

    let response = h
        .server
        .post("/generate")
        .multipart(
            MultipartForm::new()
                .add_text("qr_text", "kept")
                .add_text("save", "true"),
        )
        .await;
    response.assert_status_ok();
    let saved: SavedQr = response.json();
    assert!(saved.saved);
    assert_eq!(h.store.len(), 1);

    let response = h
        .server
        .post("/generate")
        .multipart(MultipartForm::new().add_text("qr_text", "  "))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body, json!({ "error": "No text provided" }));
}

#[tokio::test]
async fn generate_uses_first_value_of_repeated_field() {
    let h = harness();
    let response = h
        .server
        .post("/generate")
        .form(&[("qr_text", "first"), ("qr_text", "second")])
        .await;
    response.assert_status_ok();
    assert_eq!(decode(response.as_bytes()), "first");
}

#[tokio::test]
async fn generate_only_saves_for_true_flag() {
    let h = harness();

    for flag in ["false", "1", "yes", "on", "truee", ""] {
        let response = h
            .server
            .post("/generate")
            .form(&[("qr_text", "hello"), ("save", flag)])
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
    }
    assert!(h.store.is_empty());

    let response = h
        .server
        .post("/generate")
        .form(&[("qr_text", "hello"), ("save", "TrUe")])
        .await;
    response.assert_status_ok();
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn generate_save_returns_descriptor_and_url_round_trips() {
    let h = harness();
    let response = h
        .server
        .post("/generate")
        .form(&[("qr_text", "hello"), ("save", "true")])
        .await;
    response.assert_status_ok();

    let saved: SavedQr = response.json();
    assert!(saved.saved);

    let names = h.store.names();
    assert_eq!(names.len(), 1);
    let name = &names[0];
    assert!(name.starts_with("qrcode_") && name.ends_with(".png"));
    assert_eq!(saved.url, format!("/qrcodes/{name}"));
    assert_eq!(PathBuf::from(&saved.path), Path::new(VIRTUAL_ROOT).join(name));

    let fetched = h.server.get(&saved.url).await;
    fetched.assert_status_ok();
    assert_eq!(
        fetched.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let disposition = fetched
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("inline"));

    let stored = h.store.get(name).await.unwrap();
    assert_eq!(fetched.as_bytes().as_ref(), stored.as_slice());
    assert_eq!(decode(fetched.as_bytes()), "hello");
}

#[tokio::test]
async fn saved_file_lookup_misses_are_not_found() {
    let h = harness();
    h.server
        .get("/qrcodes/qrcode_19700101_000000.png")
        .await
        .assert_status_not_found();
    h.server
        .get("/qrcodes/..%2Fsecret.png")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn generate_oversized_text_is_a_server_error() {
    let h = harness();
    let text = "x".repeat(4000);
    let response = h
        .server
        .post("/generate")
        .form(&[("qr_text", text.as_str()), ("save", "true")])
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn open_folder_requires_path() {
    let h = harness();

    for body in [json!({}), json!({ "path": "" }), json!({ "path": null })] {
        let response = h.server.post("/open_folder").json(&body).await;
        response.assert_status_bad_request();
        let payload: Value = response.json();
        assert_eq!(payload, json!({ "error": "missing path" }));
    }

    assert!(h.revealer.opened().is_empty());
}

#[tokio::test]
async fn open_folder_rejects_invalid_json() {
    let h = harness();
    let response = h
        .server
        .post("/open_folder")
        .text("{not json")
        .await;
    response.assert_status_bad_request();
    assert!(h.revealer.opened().is_empty());
}

#[tokio::test]
async fn open_folder_rejects_paths_outside_save_dir() {
    let h = harness();

    for path in [
        "/etc/passwd",
        "/virtual/saved_qrcodes_evil/qrcode.png",
        "/virtual/saved_qrcodes/../secrets/qrcode.png",
        VIRTUAL_ROOT,
        "relative/qrcode.png",
    ] {
        let response = h
            .server
            .post("/open_folder")
            .json(&json!({ "path": path }))
            .await;
        response.assert_status_forbidden();
        let payload: Value = response.json();
        assert_eq!(payload, json!({ "error": "path not allowed" }));
    }

    assert!(h.revealer.opened().is_empty());
}

#[tokio::test]
async fn open_folder_reveals_parent_directory() {
    let h = harness();
    let response = h
        .server
        .post("/open_folder")
        .json(&json!({ "path": "/virtual/saved_qrcodes/qrcode_20240101_000000.png" }))
        .await;
    response.assert_status_ok();
    let payload: Value = response.json();
    assert_eq!(payload, json!({ "opened": true }));
    assert_eq!(h.revealer.opened(), vec![PathBuf::from(VIRTUAL_ROOT)]);
}

#[tokio::test]
async fn open_folder_reports_launch_failure() {
    let h = harness_with(RecordingRevealer::failing(
        "failed to launch xdg-open: No such file or directory",
    ));
    let response = h
        .server
        .post("/open_folder")
        .json(&json!({ "path": "/virtual/saved_qrcodes/a.png" }))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = response.json();
    assert_eq!(
        payload,
        json!({ "error": "failed to launch xdg-open: No such file or directory" })
    );
}

#[tokio::test]
async fn directory_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirectoryStore::open(dir.path().join("saved_qrcodes")).unwrap());
    let revealer = Arc::new(RecordingRevealer::new());
    let server = TestServer::new(router(AppState::new(store.clone(), revealer.clone()))).unwrap();

    let response = server
        .post("/generate")
        .form(&[("qr_text", "persist me"), ("save", "true")])
        .await;
    response.assert_status_ok();
    let saved: SavedQr = response.json();

    let on_disk: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
    assert_eq!(on_disk.len(), 1);

    let path = PathBuf::from(&saved.path);
    assert!(path.is_absolute());
    let file_bytes = std::fs::read(&path).unwrap();

    let fetched = server.get(&saved.url).await;
    fetched.assert_status_ok();
    assert_eq!(fetched.as_bytes().as_ref(), file_bytes.as_slice());
    assert_eq!(decode(&file_bytes), "persist me");

    server
        .post("/open_folder")
        .json(&json!({ "path": saved.path }))
        .await
        .assert_status_ok();
    assert_eq!(revealer.opened(), vec![store.root().to_path_buf()]);

    // A sibling directory sharing the name prefix stays out of reach.
    let evil = dir.path().join("saved_qrcodes_evil");
    std::fs::create_dir(&evil).unwrap();
    std::fs::write(evil.join("x.png"), b"x").unwrap();
    server
        .post("/open_folder")
        .json(&json!({ "path": evil.join("x.png") }))
        .await
        .assert_status_forbidden();
    assert_eq!(revealer.opened().len(), 1);
}
