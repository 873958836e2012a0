use chrono::Utc;
use serde_json::json;
use shared::{
    domain::Mode,
    error::{EngineError, ErrorCode, ErrorView},
    protocol::Response,
};
use tracing::warn;

use crate::{engine::TemplateRenderer, page::Model, settings::EngineSettings};

/// Renders the diagnostic view for `error` raised while serving `path`.
pub fn render_error(
    renderer: &dyn TemplateRenderer,
    settings: &EngineSettings,
    error: &EngineError,
    path: &str,
) -> Response {
    render_view(renderer, settings, ErrorView::from(error.clone()), path)
}

pub fn render_not_found(
    renderer: &dyn TemplateRenderer,
    settings: &EngineSettings,
    path: &str,
) -> Response {
    let view = ErrorView::new(ErrorCode::NotFound, format!("no page is mapped to '{path}'"));
    render_view(renderer, settings, view, path)
}

pub fn render_view(
    renderer: &dyn TemplateRenderer,
    settings: &EngineSettings,
    view: ErrorView,
    path: &str,
) -> Response {
    let status = view.code.http_status();
    let model = error_model(settings.mode, &view, path);
    match renderer.render(&settings.error_template, &model) {
        Ok(body) => Response::html(status, body),
        Err(err) => {
            warn!(
                template = %settings.error_template,
                %err,
                "error template unavailable, using fallback"
            );
            Response::html(status, fallback_html(&model))
        }
    }
}

/// Production hides the failing path and the error text.
pub fn error_model(mode: Mode, view: &ErrorView, path: &str) -> Model {
    let mut model = Model::new();
    model.insert("code".into(), json!(view.code));
    model.insert("status".into(), json!(view.code.http_status()));
    model.insert("mode".into(), json!(mode.as_str()));
    model.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    if mode.is_production() {
        model.insert("message".into(), json!(generic_message(view.code)));
    } else {
        model.insert("message".into(), json!(view.message));
        model.insert("path".into(), json!(path));
    }
    model
}

fn generic_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::NotFound => "The requested page could not be found.",
        _ => "The application encountered an unexpected error.",
    }
}

fn fallback_html(model: &Model) -> String {
    let text = |key: &str| {
        model
            .get(key)
            .map(|value| match value.as_str() {
                Some(text) => text.to_string(),
                None => value.to_string(),
            })
            .unwrap_or_default()
    };

    let mut html = String::from("<!DOCTYPE html>\n<html><head><title>Error</title></head><body>\n");
    html.push_str(&format!(
        "<h1>{} {}</h1>\n",
        html_escape::encode_text(&text("status")),
        html_escape::encode_text(&text("code"))
    ));
    html.push_str(&format!("<p>{}</p>\n", html_escape::encode_text(&text("message"))));
    if model.contains_key("path") {
        html.push_str(&format!(
            "<p>Page: <code>{}</code></p>\n",
            html_escape::encode_text(&text("path"))
        ));
    }
    html.push_str("</body></html>\n");
    html
}
