//! Conversion between axum requests/responses and the engine's transport
//! types.

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request as HttpRequest},
    http::{header, HeaderName, HeaderValue, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
};
use shared::{
    domain::Method,
    error::EngineError,
    protocol::{Request, Response, UploadedFile},
};
use tracing::{trace, warn};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

pub(crate) fn engine_method(method: &HttpMethod) -> Option<Method> {
    if *method == HttpMethod::GET || *method == HttpMethod::HEAD {
        Some(Method::Get)
    } else if *method == HttpMethod::POST {
        Some(Method::Post)
    } else {
        None
    }
}

/// Query string, url-encoded and multipart bodies all become parameters.
/// Uploaded files are kept apart under their field name.
pub(crate) async fn engine_request(
    request: HttpRequest,
    method: Method,
    context_path: &str,
) -> Result<Request, EngineError> {
    let mut out = Request::new(method, request.uri().path());
    out.context_path = context_path.to_string();

    if let Some(query) = request.uri().query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            out.add_param(name, value);
        }
    }
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            out.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with(MULTIPART) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| EngineError::transport(err.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| EngineError::transport(err.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| EngineError::transport(err.body_text()))?;
                    trace!(%name, %filename, size = bytes.len(), "uploaded file");
                    out.files.insert(
                        name,
                        UploadedFile {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| EngineError::transport(err.body_text()))?;
                    out.add_param(name, value);
                }
            }
        }
    } else if content_type.starts_with(FORM_URLENCODED) {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|err| EngineError::transport(err.body_text()))?;
        for (name, value) in url::form_urlencoded::parse(&body) {
            out.add_param(name, value);
        }
    }

    Ok(out)
}

pub(crate) fn http_response(response: Response) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, Body::from(response.body)).into_response();
    let headers = http.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&response.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(location) = response.location {
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                headers.insert(header::LOCATION, value);
            }
            Err(_) => warn!(%location, "redirect location is not a valid header value"),
        }
    }
    for (name, value) in response.headers {
        if let (Ok(name), Ok(value)) =
            (HeaderName::try_from(name.as_str()), HeaderValue::from_str(&value))
        {
            headers.insert(name, value);
        }
    }
    http
}

#[cfg(test)]
mod tests {
    use axum::body;

    use super::*;

    #[tokio::test]
    async fn merges_query_and_form_body() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/customer?tab=main")
            .header(header::CONTENT_TYPE, FORM_URLENCODED)
            .header("X-Requested-With", "XMLHttpRequest")
            .body(Body::from("name=Ada+Lovelace&tag=a&tag=b"))
            .expect("request");

        let request = engine_request(request, Method::Post, "/app").await.expect("convert");

        assert_eq!(request.path, "/customer");
        assert_eq!(request.context_path, "/app");
        assert_eq!(request.param("tab"), Some("main"));
        assert_eq!(request.param("name"), Some("Ada Lovelace"));
        assert_eq!(request.param_values("tag"), ["a", "b"]);
        assert!(request.is_out_of_band());
    }

    #[tokio::test]
    async fn multipart_files_are_kept_apart_from_params() {
        let body = "--XX\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            report\r\n\
            --XX\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --XX--\r\n";
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XX")
            .body(Body::from(body))
            .expect("request");

        let request = engine_request(request, Method::Post, "").await.expect("convert");

        assert_eq!(request.param("title"), Some("report"));
        let file = request.file("upload").expect("file");
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.bytes, b"hello");
    }

    #[tokio::test]
    async fn redirect_sets_location() {
        let response = http_response(Response::redirect("/app/done"));

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/app/done");
        let body = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert!(body.is_empty());
    }

    #[test]
    fn only_get_and_post_are_served() {
        assert_eq!(engine_method(&HttpMethod::HEAD), Some(Method::Get));
        assert_eq!(engine_method(&HttpMethod::PUT), None);
    }
}
