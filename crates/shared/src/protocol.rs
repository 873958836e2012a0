use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Method;

/// Request parameter naming the control that triggered the submission.
pub const ACTING_CONTROL_PARAM: &str = "actionLink";
/// Request parameter flagging a targeted partial update.
pub const OUT_OF_BAND_PARAM: &str = "ajax";
/// Hidden parameter identifying which form was submitted.
pub const FORM_NAME_PARAM: &str = "form_name";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";
pub const REQUESTED_WITH_XHR: &str = "XMLHttpRequest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub context_path: String,
    #[serde(default)]
    pub params: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub files: BTreeMap<String, UploadedFile>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub out_of_band: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_param(name, value);
        self
    }

    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), vec![value.into()]);
    }

    pub fn with_file(mut self, name: impl Into<String>, file: UploadedFile) -> Self {
        self.files.insert(name.into(), file);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn param_values(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::Post
    }

    pub fn is_out_of_band(&self) -> bool {
        self.out_of_band
            || self.param(OUT_OF_BAND_PARAM).is_some_and(is_truthy)
            || self
                .header(REQUESTED_WITH_HEADER)
                .is_some_and(|value| value.eq_ignore_ascii_case(REQUESTED_WITH_XHR))
    }

    pub fn acting_control(&self) -> Option<&str> {
        self.param(ACTING_CONTROL_PARAM)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partial {
    pub content: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Partial {
    pub const TEXT: &'static str = "text/plain";
    pub const HTML: &'static str = "text/html";
    pub const XHTML: &'static str = "application/xhtml+xml";
    pub const JSON: &'static str = "application/json";
    pub const JAVASCRIPT: &'static str = "text/javascript";
    pub const XML: &'static str = "text/xml";

    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(content, Self::TEXT)
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self::new(content, Self::HTML)
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(value.to_string(), Self::JSON)
    }

    pub fn empty() -> Self {
        Self::text("")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Navigation {
    Forward { path: String },
    Redirect { location: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Response {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: format!("{}; charset=utf-8", Partial::HTML),
            body: body.into(),
            location: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            content_type: Partial::TEXT.to_string(),
            body: String::new(),
            location: Some(location.into()),
            headers: BTreeMap::new(),
        }
    }

    pub fn partial(partial: Partial) -> Self {
        Self {
            status: 200,
            content_type: partial.content_type,
            body: partial.content,
            location: None,
            headers: partial.headers,
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.location.is_some()
    }
}
