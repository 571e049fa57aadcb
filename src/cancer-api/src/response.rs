use hyper::header::{self, HeaderValue};
use hyper::{Body, Response, StatusCode};
use log::error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

pub fn success<T: Serialize>(data: &T) -> Response<Body> {
    json(
        StatusCode::OK,
        &Envelope {
            status: Status::Success,
            data: Some(data),
            message: None,
        },
    )
}

pub fn fail(code: StatusCode, message: &str) -> Response<Body> {
    json::<Envelope<'_, ()>>(
        code,
        &Envelope {
            status: Status::Fail,
            data: None,
            message: Some(message),
        },
    )
}

fn json<T: Serialize>(code: StatusCode, body: &T) -> Response<Body> {
    let (code, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (code, bytes),
        Err(e) => {
            error!("Could not serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"status":"fail","message":"Internal Server Error"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = code;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}
