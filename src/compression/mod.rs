use anyhow::Result;
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use hyper::{HeaderMap, Response};
use std::io::Write;
use tracing::debug;

pub const MIN_COMPRESS_SIZE: usize = 1024;

const COMPRESS_TYPES: [&str; 7] = [
    "text/",
    "application/javascript",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "application/wasm",
    "image/svg+xml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

/// Picks the first of br, gzip, deflate the client accepts with a non-zero
/// quality.
pub fn negotiate(accept_encoding: &str) -> Option<Encoding> {
    let accepted: Vec<&str> = accept_encoding
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let name = parts.next()?.trim();
            let refused = parts.any(|param| {
                param
                    .trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .map(|q| q <= 0.0)
                    .unwrap_or(false)
            });
            (!name.is_empty() && !refused).then_some(name)
        })
        .collect();

    [Encoding::Brotli, Encoding::Gzip, Encoding::Deflate]
        .into_iter()
        .find(|encoding| {
            accepted
                .iter()
                .any(|name| name.eq_ignore_ascii_case(encoding.as_str()))
        })
}

pub struct CompressionHandler {
    level: u32,
}

impl Default for CompressionHandler {
    fn default() -> Self {
        Self::new(6)
    }
}

impl CompressionHandler {
    pub fn new(level: u32) -> Self {
        Self { level }
    }

    pub async fn compress_response(
        &self,
        response: Response<Full<Bytes>>,
        request_headers: &HeaderMap,
    ) -> Result<Response<Full<Bytes>>> {
        let accept_encoding = request_headers
            .get("accept-encoding")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        self.compress_response_with_encoding(response, accept_encoding)
            .await
    }

    pub async fn compress_response_with_encoding(
        &self,
        mut response: Response<Full<Bytes>>,
        accept_encoding: &str,
    ) -> Result<Response<Full<Bytes>>> {
        if !should_compress(&response) {
            return Ok(response);
        }

        response
            .headers_mut()
            .append(VARY, HeaderValue::from_static("Accept-Encoding"));

        let encoding = match negotiate(accept_encoding) {
            Some(encoding) => encoding,
            None => return Ok(response),
        };

        let (parts, body) = response.into_parts();
        let body_bytes = body.collect().await?.to_bytes();

        if body_bytes.len() < MIN_COMPRESS_SIZE {
            return Ok(Response::from_parts(parts, Full::new(body_bytes)));
        }

        let compressed = match encoding {
            Encoding::Brotli => self.compress_brotli(&body_bytes)?,
            Encoding::Gzip => self.compress_gzip(&body_bytes)?,
            Encoding::Deflate => self.compress_deflate(&body_bytes)?,
        };

        debug!(
            "Compressed {} bytes to {} with {}",
            body_bytes.len(),
            compressed.len(),
            encoding.as_str()
        );

        let mut response = Response::from_parts(parts, Full::new(Bytes::new()));
        let headers = response.headers_mut();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));
        headers.remove("accept-ranges");
        // A compressed representation must not share the identity ETag
        let weak_etag = headers
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|etag| format!("W/{}", etag.trim_start_matches("W/")));
        if let Some(Ok(value)) = weak_etag.map(|etag| HeaderValue::from_str(&etag)) {
            headers.insert("etag", value);
        }
        *response.body_mut() = Full::new(compressed);

        Ok(response)
    }

    fn compress_gzip(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), FlateCompression::new(self.level));
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        Ok(Bytes::from(compressed))
    }

    fn compress_deflate(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = ZlibEncoder::new(Vec::new(), FlateCompression::new(self.level));
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        Ok(Bytes::from(compressed))
    }

    fn compress_brotli(&self, data: &[u8]) -> Result<Bytes> {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(
                &mut compressed,
                4096, // buffer size
                self.level,
                22, // window size
            );
            writer.write_all(data)?;
            writer.flush()?;
        }
        Ok(Bytes::from(compressed))
    }
}

fn should_compress(response: &Response<Full<Bytes>>) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(CONTENT_ENCODING) {
        return false;
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    COMPRESS_TYPES.iter().any(|ct| content_type.starts_with(ct))
}
