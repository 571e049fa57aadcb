use std::io::Cursor;
use std::sync::Arc;

use cancer_api::handle;
use cancer_api::upload::MAX_UPLOAD_BYTES;
use cancer_serve::store::{MemoryStore, RecordStore, StoreError, StoreFuture};
use cancer_serve::{HistoryEntry, InferenceError, InputTensor, Model, PredictionRecord, Predictor};
use futures_util::FutureExt;
use hyper::{header, Body, Method, Request, Response, StatusCode};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use serde_json::{json, Value};

const BOUNDARY: &str = "predict-test-boundary";

struct FixedScore(f32);

impl Model for FixedScore {
    fn predict(&self, _input: &InputTensor) -> Result<f32, InferenceError> {
        Ok(self.0)
    }
}

struct Down;

impl RecordStore for Down {
    fn put<'a>(&'a self, _record: &'a PredictionRecord) -> StoreFuture<'a, ()> {
        async {
            Err(StoreError::Malformed("connection refused".to_string()))
        }
        .boxed()
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<HistoryEntry>> {
        async {
            Err(StoreError::Malformed("connection refused".to_string()))
        }
        .boxed()
    }

    fn backend(&self) -> &'static str {
        "down"
    }
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 48, Rgb([180, 120, 90]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

fn part(name: &str, content_type: Option<&str>, data: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"lesion.png\"\r\n",
        BOUNDARY, name
    )
    .into_bytes();
    if let Some(ct) = content_type {
        out.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn closing() -> Vec<u8> {
    format!("--{}--\r\n", BOUNDARY).into_bytes()
}

fn multipart(parts: Vec<Vec<u8>>) -> Vec<u8> {
    let mut body: Vec<u8> = parts.into_iter().flatten().collect();
    body.extend_from_slice(&closing());
    body
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn predictor(score: f32, store: Arc<dyn RecordStore>) -> Arc<Predictor> {
    Arc::new(Predictor::new(Arc::new(FixedScore(score)), store))
}

async fn call(predictor: &Arc<Predictor>, req: Request<Body>) -> (StatusCode, Value) {
    let response: Response<Body> = handle(req, Arc::clone(predictor)).await.unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn valid_image_is_classified_and_listed() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));

    let body = multipart(vec![part("image", Some("image/png"), &png_bytes())]);
    let (status, json) = call(&predictor, predict_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    let data = &json["data"];
    assert_eq!(data["result"], "Cancer");
    assert_eq!(data["suggestion"], "Segera periksa ke dokter!");
    assert!(data["createdAt"].as_str().unwrap().ends_with('Z'));

    let (status, listed) = call(&predictor, get("/predict/histories")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        listed,
        json!({
            "status": "success",
            "data": [{ "id": data["id"], "history": data }]
        })
    );
}

#[tokio::test]
async fn score_at_threshold_is_non_cancer() {
    let predictor = predictor(0.5, Arc::new(MemoryStore::new()));

    let body = multipart(vec![part("image", Some("image/png"), &png_bytes())]);
    let (status, json) = call(&predictor, predict_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["result"], "Non-cancer");
    assert_eq!(json["data"]["suggestion"], "Penyakit kanker tidak terdeteksi.");
}

#[tokio::test]
async fn missing_image_field_is_bad_request() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));

    let body = multipart(vec![part("photo", Some("image/png"), &png_bytes())]);
    let (status, json) = call(&predictor, predict_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json,
        json!({ "status": "fail", "message": "No image file uploaded" })
    );
}

#[tokio::test]
async fn non_image_type_is_bad_request_regardless_of_body() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));

    for data in [png_bytes(), b"plain text".to_vec()] {
        let body = multipart(vec![part("image", Some("text/plain"), &data)]);
        let (status, json) = call(&predictor, predict_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Invalid image file uploaded");
    }
}

#[tokio::test]
async fn corrupt_image_is_server_error() {
    let store = Arc::new(MemoryStore::new());
    let predictor = predictor(0.7, store.clone());

    let body = multipart(vec![part("image", Some("image/jpeg"), b"\xff\xd8\xffgarbage")]);
    let (status, json) = call(&predictor, predict_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json,
        json!({ "status": "fail", "message": "Terjadi kesalahan dalam melakukan prediksi" })
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn unreachable_store_is_server_error() {
    let predictor = predictor(0.7, Arc::new(Down));

    let body = multipart(vec![part("image", Some("image/png"), &png_bytes())]);
    let (status, json) = call(&predictor, predict_request(body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "fail");

    let (status, json) = call(&predictor, get("/predict/histories")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json["message"],
        "Terjadi kesalahan dalam mengambil riwayat prediksi"
    );
}

#[tokio::test]
async fn empty_history_is_success() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));

    let (status, json) = call(&predictor, get("/predict/histories")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "status": "success", "data": [] }));
}

#[tokio::test]
async fn structured_timestamps_are_listed_as_iso_strings() {
    let store = Arc::new(MemoryStore::new());
    let stored = json!({
        "id": "legacy-1",
        "result": "Cancer",
        "suggestion": "Segera periksa ke dokter!",
        "createdAt": { "_seconds": 1_700_000_000, "_nanoseconds": 0 }
    });
    if let Value::Object(doc) = stored {
        store.insert_document("legacy-1", doc).await;
    }
    let predictor = predictor(0.7, store);

    let (_, json) = call(&predictor, get("/predict/histories")).await;

    assert_eq!(
        json["data"][0]["history"]["createdAt"],
        "2023-11-14T22:13:20.000Z"
    );
    assert_eq!(json["data"][0]["id"], "legacy-1");
}

/// A multipart body whose total size is exactly `total` bytes.
fn body_of_size(total: usize) -> Vec<u8> {
    let image = part("image", Some("image/png"), &png_bytes());
    let empty_filler = part("filler", None, b"");
    let fixed = image.len() + empty_filler.len() + closing().len();
    let filler = vec![b'a'; total - fixed];

    let body = multipart(vec![image, part("filler", None, &filler)]);
    assert_eq!(body.len(), total);
    body
}

#[tokio::test]
async fn upload_of_exactly_the_limit_is_accepted() {
    let predictor = predictor(0.2, Arc::new(MemoryStore::new()));

    let (status, json) = call(&predictor, predict_request(body_of_size(MAX_UPLOAD_BYTES))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["result"], "Non-cancer");
}

#[tokio::test]
async fn upload_one_byte_over_the_limit_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let predictor = predictor(0.2, store.clone());

    let (status, json) =
        call(&predictor, predict_request(body_of_size(MAX_UPLOAD_BYTES + 1))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["status"], "fail");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));

    let (status, _) = call(&predictor, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&predictor, get("/predict")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn preflight_allows_any_origin() {
    let predictor = predictor(0.7, Arc::new(MemoryStore::new()));
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/predict")
        .header(header::ORIGIN, "https://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = handle(req, predictor).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .contains("POST"));
}
