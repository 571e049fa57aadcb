use std::convert::Infallible;

use cancer_serve::Upload;
use futures_util::stream;
use hyper::body::{Bytes, HttpBody};
use hyper::header::{self, HeaderMap};
use hyper::Body;
use log::debug;

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 1_000_000;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload content length greater than maximum allowed: {limit}")]
    TooLarge { limit: usize },
    #[error("could not read request body: {0}")]
    Read(#[from] hyper::Error),
    #[error("invalid multipart payload: {0}")]
    Multipart(#[from] multer::Error),
}

/// Collect `body`, failing as soon as it grows past `limit` bytes.
///
/// A declared `Content-Length` over the limit is rejected without reading.
pub async fn read_limited(
    mut body: Body,
    declared_len: Option<u64>,
    limit: usize,
) -> Result<Bytes, PayloadError> {
    if declared_len.map_or(false, |len| len > limit as u64) {
        return Err(PayloadError::TooLarge { limit });
    }

    let mut buf = Vec::with_capacity(declared_len.unwrap_or(0) as usize);
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(PayloadError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Find the `image` part of a multipart body.
///
/// Bodies that are not multipart at all carry no upload.
pub async fn extract_image(content_type: Option<&str>, body: Bytes) -> Result<Option<Upload>, PayloadError> {
    let content_type = match content_type {
        Some(ct) if ct.trim_start().to_ascii_lowercase().starts_with("multipart/") => ct,
        _ => {
            debug!("Request body is not multipart: {:?}", content_type);
            return Ok(None);
        }
    };

    let boundary = multer::parse_boundary(content_type)?;
    let mut multipart = multer::Multipart::new(
        stream::once(async move { Ok::<Bytes, Infallible>(body) }),
        boundary,
    );

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let declared = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await?;
        debug!("Received {} bytes declared as {:?}", data.len(), declared);

        return Ok(Some(Upload::new(declared.as_deref(), data.to_vec())));
    }

    Ok(None)
}

/// Size check and multipart parsing for one request.
pub async fn read_upload(
    headers: &HeaderMap,
    body: Body,
) -> Result<Option<Upload>, PayloadError> {
    let bytes = read_limited(body, content_length(headers), MAX_UPLOAD_BYTES).await?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    extract_image(content_type, bytes).await
}
