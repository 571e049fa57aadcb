use std::convert::Infallible;
use std::sync::Arc;

use cancer_serve::pipeline::HISTORY_FAILED_MESSAGE;
use cancer_serve::{Predictor, Timer};
use hyper::header::{self, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{error, info, warn};

use crate::response::{fail, success};
use crate::upload::{read_upload, PayloadError};

pub const PREDICT_PATH: &str = "/predict";
pub const HISTORIES_PATH: &str = "/predict/histories";

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const DEFAULT_ALLOWED_HEADERS: &str = "Accept, Authorization, Content-Type, If-None-Match";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Route one request. Every response allows any origin.
pub async fn handle(
    req: Request<Body>,
    predictor: Arc<Predictor>,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::OPTIONS, _) => preflight(&req),
        (&Method::POST, PREDICT_PATH) => predict(req, &predictor).await,
        (&Method::GET, HISTORIES_PATH) => histories(&predictor).await,
        (_, PREDICT_PATH) | (_, HISTORIES_PATH) => {
            fail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => fail(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(allow_any_origin(response))
}

async fn predict(req: Request<Body>, predictor: &Predictor) -> Response<Body> {
    let mut t = Timer::new_start("Handling request");

    let (parts, body) = req.into_parts();
    let upload = match read_upload(&parts.headers, body).await {
        Ok(upload) => upload,
        Err(err) => return payload_failure(err),
    };

    let response = match predictor.predict(upload).await {
        Ok(record) => success(&record),
        Err(err) => {
            if err.is_client_error() {
                warn!("Rejected upload: {}", err);
            } else {
                error!("Prediction error: {}", err);
            }
            fail(status(err.status_code()), err.public_message())
        }
    };

    t.stop();
    response
}

async fn histories(predictor: &Predictor) -> Response<Body> {
    match predictor.histories().await {
        Ok(entries) => {
            info!("Listing {} histories", entries.len());
            success(&entries)
        }
        Err(err) => {
            error!("Error fetching histories: {}", err);
            fail(StatusCode::INTERNAL_SERVER_ERROR, HISTORY_FAILED_MESSAGE)
        }
    }
}

fn payload_failure(err: PayloadError) -> Response<Body> {
    warn!("Rejected request body: {}", err);
    match err {
        PayloadError::TooLarge { .. } => fail(StatusCode::PAYLOAD_TOO_LARGE, &err.to_string()),
        PayloadError::Read(_) | PayloadError::Multipart(_) => {
            fail(StatusCode::BAD_REQUEST, "Invalid multipart payload")
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn preflight(req: &Request<Body>) -> Response<Body> {
    let allowed_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOWED_HEADERS));

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed_headers);
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

fn allow_any_origin(mut response: Response<Body>) -> Response<Body> {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
