//! HTTP surface: `POST /upload` and `GET /health`.
//!
//! `/upload` takes a `multipart/form-data` body. Every part named `files` is
//! stored in a fresh request directory; other parts are ignored. The
//! response is one of:
//!
//! | status | body |
//! |--------|------|
//! | 200 | `{ "message", "geminiResponse" }` (+ `extraction` when output validation is on) |
//! | 400 | `{ "message" }` |
//! | 500 | `{ "message", "error", "kind" }` |

use crate::error::{ErrorKind, ExtractError};
use crate::extract::Extractor;
use crate::output::Extraction;
use crate::pipeline::scope::RequestScope;
use crate::pipeline::Stage;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Multipart field that carries documents.
pub const FILES_FIELD: &str = "files";

/// Default request body cap for `/upload`.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const SUCCESS_MESSAGE: &str = "Files processed successfully";
const FAILURE_MESSAGE: &str = "Error processing files";

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
}

impl AppState {
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    message: &'static str,
    gemini_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    extraction: Option<Extraction>,
}

#[derive(Debug, Serialize)]
struct ClientErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct ServerErrorBody {
    message: &'static str,
    error: String,
    kind: ErrorKind,
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind.is_client_error() {
            debug!("Client error: {}", self);
            return (
                StatusCode::BAD_REQUEST,
                Json(ClientErrorBody {
                    message: self.to_string(),
                }),
            )
                .into_response();
        }

        tracing::error!("Request failed ({}): {}", kind, self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ServerErrorBody {
                message: FAILURE_MESSAGE,
                error: self.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let extractor = &state.extractor;
    let mut scope = extractor.new_scope();

    let stored = match multipart {
        Ok(multipart) => store_files(&mut scope, multipart).await,
        Err(rejection) => Err(ExtractError::InvalidUpload {
            detail: rejection.body_text(),
        }),
    };
    if let Err(e) = stored {
        return abort(extractor, &mut scope, e).await;
    }
    if scope.is_empty() {
        return abort(extractor, &mut scope, ExtractError::NoFiles).await;
    }
    info!(
        request_id = %scope.id(),
        "Received {} file(s)",
        scope.files().len()
    );

    match extractor.run(&mut scope).await {
        Ok(output) => {
            let response = (
                StatusCode::OK,
                Json(UploadResponse {
                    message: SUCCESS_MESSAGE,
                    gemini_response: output.raw_text,
                    extraction: output.extraction,
                }),
            )
                .into_response();
            extractor.advance(&mut scope, Stage::Responded);
            if let Err(e) = extractor.finish(&mut scope, true).await {
                warn!(request_id = %scope.id(), "Cleanup failed: {}", e);
            }
            response
        }
        Err(e) => {
            if let Err(ce) = extractor.finish(&mut scope, false).await {
                warn!(request_id = %scope.id(), "Cleanup failed: {}", ce);
            }
            e.into_response()
        }
    }
}

/// Fail a request before the pipeline ran.
async fn abort(extractor: &Extractor, scope: &mut RequestScope, error: ExtractError) -> Response {
    extractor.fail(scope, &error);
    if let Err(e) = extractor.finish(scope, false).await {
        warn!(request_id = %scope.id(), "Cleanup failed: {}", e);
    }
    error.into_response()
}

/// Write every `files` part into the request directory, in arrival order.
async fn store_files(scope: &mut RequestScope, mut multipart: Multipart) -> Result<(), ExtractError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ExtractError::InvalidUpload {
            detail: e.body_text(),
        })?
    {
        if field.name() != Some(FILES_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring {} part without a filename", FILES_FIELD);
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|e| ExtractError::InvalidUpload {
            detail: e.body_text(),
        })?;
        scope.store(&file_name, content_type.as_deref(), &data).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CleanupPolicy, ExtractConfig};
    use crate::provider::FileState;
    use crate::test_support::{xlsx_bytes, FakeProvider};
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(fake: &Arc<FakeProvider>, root: &TempDir, validate: bool) -> TestServer {
        let config = ExtractConfig::builder()
            .uploads_root(root.path())
            .poll_interval(Duration::from_millis(1))
            .max_poll_wait(Some(Duration::from_secs(5)))
            .cleanup(CleanupPolicy::Always)
            .validate_output(validate)
            .build()
            .unwrap();
        let state = AppState::new(Extractor::new(fake.clone(), config));
        TestServer::new(router(state, DEFAULT_MAX_UPLOAD_BYTES)).unwrap()
    }

    fn root_is_empty(root: &TempDir) -> bool {
        std::fs::read_dir(root.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let root = TempDir::new().unwrap();
        let app = server(&FakeProvider::new(), &root, false);
        let response = app.get("/health").await;
        response.assert_status_ok();
        response.assert_json(&serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn no_files_is_400_without_directory() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        let app = server(&fake, &root, false);

        let response = app
            .post("/upload")
            .multipart(MultipartForm::new().add_text("note", "nothing attached"))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body, serde_json::json!({ "message": "No files uploaded" }));
        assert!(root_is_empty(&root));
        assert!(fake.uploads().is_empty());
    }

    #[tokio::test]
    async fn text_part_named_files_is_not_a_file() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        let app = server(&fake, &root, false);

        let response = app
            .post("/upload")
            .multipart(MultipartForm::new().add_text("files", "hello"))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body, serde_json::json!({ "message": "No files uploaded" }));
        assert!(root_is_empty(&root));
        assert!(fake.uploads().is_empty());
    }

    #[tokio::test]
    async fn text_part_named_files_is_skipped_next_to_a_file() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        let app = server(&fake, &root, false);

        let form = MultipartForm::new().add_text("files", "hello").add_part(
            "files",
            Part::bytes(b"a,b\n1,2\n".as_slice())
                .file_name("sales.csv")
                .mime_type("text/csv"),
        );
        let response = app.post("/upload").multipart(form).await;

        response.assert_status_ok();
        let uploads = fake.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].display_name, "sales.csv");
    }

    #[tokio::test]
    async fn non_multipart_body_is_400() {
        let root = TempDir::new().unwrap();
        let app = server(&FakeProvider::new(), &root, false);
        let response = app.post("/upload").text("hello").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn successful_upload_returns_raw_text() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        fake.respond_with("```json\n{\"invoices\":[]}\n```");
        let app = server(&fake, &root, false);

        let form = MultipartForm::new()
            .add_text("comment", "ignored")
            .add_part(
                FILES_FIELD,
                Part::bytes(b"serial,total\nINV-1,10\n".as_slice())
                    .file_name("sales.csv")
                    .mime_type("text/csv"),
            );
        let response = app.post("/upload").multipart(form).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["message"], SUCCESS_MESSAGE);
        assert_eq!(body["geminiResponse"], "```json\n{\"invoices\":[]}\n```");
        assert!(body.get("extraction").is_none());
        assert_eq!(fake.uploads().len(), 1);
        assert!(root_is_empty(&root));
    }

    #[tokio::test]
    async fn spreadsheet_is_converted_before_upload() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        let app = server(&fake, &root, false);

        let form = MultipartForm::new()
            .add_part(
                FILES_FIELD,
                Part::bytes(xlsx_bytes(&[&["name", "qty"], &["Pen", "3"]]))
                    .file_name("stock.xlsx")
                    .mime_type("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            )
            .add_part(
                FILES_FIELD,
                Part::bytes(b"%PDF-1.4".as_slice())
                    .file_name("invoice.pdf")
                    .mime_type("application/pdf"),
            );
        app.post("/upload").multipart(form).await.assert_status_ok();

        let uploads = fake.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].display_name, "stock.csv");
        assert_eq!(uploads[0].bytes, b"name,qty\nPen,3\n");
        assert_eq!(uploads[1].display_name, "invoice.pdf");
    }

    #[tokio::test]
    async fn failed_file_is_500_with_kind() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        fake.script_upload("scan.pdf", vec![FileState::Failed]);
        let app = server(&fake, &root, false);

        let form = MultipartForm::new().add_part(
            FILES_FIELD,
            Part::bytes(b"%PDF".as_slice())
                .file_name("scan.pdf")
                .mime_type("application/pdf"),
        );
        let response = app.post("/upload").multipart(form).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["message"], FAILURE_MESSAGE);
        assert_eq!(body["kind"], "file_processing_failed");
        assert!(body["error"].as_str().unwrap().contains("files/fake-1"));
        assert!(fake.generate_calls().is_empty());
        assert!(root_is_empty(&root));
    }

    #[tokio::test]
    async fn unreadable_spreadsheet_is_conversion_error() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        let app = server(&fake, &root, false);

        let form = MultipartForm::new().add_part(
            FILES_FIELD,
            Part::bytes(b"definitely not a workbook".as_slice())
                .file_name("broken.xlsx")
                .mime_type("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        );
        let response = app.post("/upload").multipart(form).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["kind"], "conversion");
        assert!(fake.uploads().is_empty());
    }

    #[tokio::test]
    async fn validated_output_is_attached() {
        let root = TempDir::new().unwrap();
        let fake = FakeProvider::new();
        fake.respond_with(r#"{"invoices":[],"products":[],"customers":[{"name":"Acme","phone_number":null,"total_purchase_amount":99.5}]}"#);
        let app = server(&fake, &root, true);

        let form = MultipartForm::new().add_part(
            FILES_FIELD,
            Part::bytes(b"a\n".as_slice()).file_name("a.csv").mime_type("text/csv"),
        );
        let response = app.post("/upload").multipart(form).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["extraction"]["customers"][0]["name"], "Acme");
        assert_eq!(body["extraction"]["customers"][0]["total_purchase_amount"], 99.5);
    }
}
