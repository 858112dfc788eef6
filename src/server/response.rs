use crate::proxy::ProxyBody;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use std::collections::HashMap;

pub struct ResponseBuilder {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn header_string(mut self, name: &str, value: String) -> Self {
        self.headers.insert(name.to_string(), value);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Response<Full<Bytes>> {
        let mut response = Response::builder().status(self.status);

        for (name, value) in self.headers {
            response = response.header(&name, value);
        }

        response
            .body(Full::new(self.body))
            .expect("Failed to build response")
    }

    pub fn build_boxed(self) -> Response<ProxyBody> {
        into_proxy_body(self.build())
    }
}

pub fn into_proxy_body(response: Response<Full<Bytes>>) -> Response<ProxyBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

pub struct ErrorResponse;

impl ErrorResponse {
    fn page(status: StatusCode) -> ResponseBuilder {
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<html><head><title>{code} {reason}</title></head><body><h1>{code} {reason}</h1></body></html>\n",
            code = status.as_u16(),
            reason = reason
        );

        ResponseBuilder::new(status)
            .header("content-type", "text/html; charset=utf-8")
            .header_string("content-length", body.len().to_string())
            .body(Bytes::from(body))
    }

    pub fn bad_request() -> ResponseBuilder {
        Self::page(StatusCode::BAD_REQUEST)
    }

    pub fn forbidden() -> ResponseBuilder {
        Self::page(StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> ResponseBuilder {
        Self::page(StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> ResponseBuilder {
        Self::page(StatusCode::METHOD_NOT_ALLOWED).header("allow", "GET, HEAD")
    }

    pub fn internal_server_error() -> ResponseBuilder {
        Self::page(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn bad_gateway() -> ResponseBuilder {
        Self::page(StatusCode::BAD_GATEWAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_page_has_matching_length() {
        let response = ErrorResponse::bad_gateway().build_boxed();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let declared: usize = response.headers()["content-length"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), declared);
        assert!(String::from_utf8_lossy(&body).contains("502 Bad Gateway"));
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let response = ErrorResponse::method_not_allowed().build();
        assert_eq!(response.headers()["allow"], "GET, HEAD");
    }
}
