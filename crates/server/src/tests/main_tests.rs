use super::*;
use axum::{body, body::Body, http::Request as HttpRequest};
use engine::{menu::Menu, ControlNode, Page, PageRegistry, RequestContext};
use tower::ServiceExt;

use crate::config::Settings;

const MENU: &str = r#"
[[items]]
label = "Home"
path = "/"

[[items]]
label = "Customer"
path = "/customer"
"#;

fn test_app(settings: Settings) -> Router {
    app_with_pages(settings, |pages| pages)
}

fn app_with_pages(settings: Settings, extra: impl FnOnce(PageRegistry) -> PageRegistry) -> Router {
    let templates = FileTemplates::from_sources([
        ("index", "<title>Home</title>$!{menu}<p>Hello ${visitor}</p>"),
        (
            "customer",
            "<form>$!{messages}<input name=\"name\" value=\"${customer.fields.name.value}\">\
             <span>${customer.fields.name.error}</span>$!{errors}</form>",
        ),
        ("customer/saved", "<p>Saved ${customer.name} in ${customer.address.state.code}</p>"),
        ("clock", "$!{head_elements}<p>visits=${visits} ticks=${ticks}</p>"),
        ("access-denied", "<h1>Access denied</h1>"),
        ("not-found", "<h1>Nothing at ${path}</h1>"),
        ("error", "<h1>${status} ${code}</h1><p>${message}</p>"),
    ]);
    let menu = Arc::new(MenuCatalog::from_menu(Menu::parse(MENU).expect("menu")));
    let engine = Engine::new(
        extra(pages::registry(menu)),
        Arc::new(templates),
        settings.engine_settings(),
    );
    build_router(Arc::new(AppState {
        engine: Arc::new(engine),
        sessions: Arc::new(InMemorySessions::default()),
        settings,
    }))
}

async fn text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn cookie(response: &Response) -> String {
    response.headers()[header::SET_COOKIE]
        .to_str()
        .expect("cookie")
        .split(';')
        .next()
        .expect("pair")
        .to_string()
}

fn form_post(uri: &str, body: &str) -> HttpRequest<Body> {
    HttpRequest::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = test_app(Settings::default());
    let request = HttpRequest::get("/healthz").body(Body::empty()).expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await, "ok");
}

#[tokio::test]
async fn home_renders_menu_with_selection_and_sets_cookie() {
    let app = test_app(Settings::default());
    let request = HttpRequest::get("/").body(Body::empty()).expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie(&response).starts_with("SESSION="));
    let body = text(response).await;
    assert!(body.contains("<li class=\"selected\"><a href=\"/\">Home</a>"));
    assert!(body.contains("Hello guest"));
}

#[tokio::test]
async fn valid_customer_is_forwarded_to_saved_page() {
    let app = test_app(Settings::default());
    let request = form_post("/customer", "name=Ada&age=36&address.state.code=WA&actionLink=save");

    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let session = cookie(&response);
    assert_eq!(text(response).await, "<p>Saved Ada in WA</p>");

    let request = HttpRequest::get("/")
        .header(header::COOKIE, session)
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(text(response).await.contains("Hello Ada"));
}

#[tokio::test]
async fn invalid_customer_shows_field_errors() {
    let app = test_app(Settings::default());
    let request = form_post("/customer", "name=&age=old&address.state.code=TX&actionLink=save");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = text(response).await;
    assert!(body.contains("<span>Name is required</span>"));
    assert!(body.contains("Please correct the highlighted fields."));
    assert!(body.contains("'old' is not a whole number"));
    assert!(body.contains("'TX' is not a valid choice for State"));
}

#[tokio::test]
async fn saved_page_without_customer_redirects_under_context_path() {
    let settings = Settings {
        context_path: "/shop".into(),
        ..Settings::default()
    };
    let app = test_app(settings);
    let request = HttpRequest::get("/customer/saved").body(Body::empty()).expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/shop/customer");
    assert!(cookie(&response).contains("SESSION="));
    assert!(response.headers()[header::SET_COOKIE]
        .to_str()
        .expect("cookie")
        .contains("Path=/shop"));
}

#[tokio::test]
async fn clock_is_kept_in_session_and_answers_ajax() {
    let app = test_app(Settings::default());

    let first = app
        .clone()
        .oneshot(HttpRequest::get("/clock").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let session = cookie(&first);
    let body = text(first).await;
    assert!(body.contains("visits=1 ticks=0"));
    assert!(body.contains("src=\"/static/clock.js\""));

    let ajax = HttpRequest::post("/clock")
        .header(header::COOKIE, session.clone())
        .header("X-Requested-With", "XMLHttpRequest")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("actionLink=tick"))
        .expect("request");
    let response = app.clone().oneshot(ajax).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    assert!(text(response).await.starts_with("<span id=\"time\">"));

    let again = HttpRequest::get("/clock")
        .header(header::COOKIE, session)
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(again).await.expect("response");
    assert!(text(response).await.contains("visits=2 ticks=1"));
}

#[tokio::test]
async fn admin_without_role_sees_access_denied() {
    let app = test_app(Settings::default());
    let request = HttpRequest::get("/admin").body(Body::empty()).expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await, "<h1>Access denied</h1>");
}

#[tokio::test]
async fn unknown_path_renders_not_found_page() {
    let app = test_app(Settings::default());
    let request = HttpRequest::get("/nowhere").body(Body::empty()).expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(response).await, "<h1>Nothing at /nowhere</h1>");
}

#[tokio::test]
async fn unsupported_method_is_rejected() {
    let app = test_app(Settings::default());
    let request = HttpRequest::put("/customer").body(Body::empty()).expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let view: ErrorView = serde_json::from_slice(
        &body::to_bytes(response.into_body(), usize::MAX).await.expect("body"),
    )
    .expect("json");
    assert_eq!(view.code, shared::error::ErrorCode::Transport);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let settings = Settings {
        max_body_bytes: 16,
        ..Settings::default()
    };
    let app = test_app(settings);
    let body = "name=x&".repeat(10);
    let request = HttpRequest::post("/customer")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

struct Fragile;

impl Page for Fragile {
    fn on_get(
        &mut self,
        _root: &mut ControlNode<Self>,
        cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        if cx.request().has_param("boom") {
            panic!("page blew up");
        }
        Ok(())
    }

    fn template(&self) -> Option<String> {
        Some("index".into())
    }
}

#[tokio::test]
async fn session_survives_a_panicking_page() {
    let app = app_with_pages(Settings::default(), |pages| pages.with_page("/fragile", || Fragile));
    let get = |uri: &str, session: &str| {
        HttpRequest::get(uri)
            .header(header::COOKIE, session)
            .body(Body::empty())
            .expect("request")
    };

    let first = app
        .clone()
        .oneshot(HttpRequest::get("/fragile").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let session = cookie(&first);

    let panicked = app
        .clone()
        .oneshot(get("/fragile?boom=1", &session))
        .await
        .expect("response");
    assert_eq!(panicked.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let after = app.oneshot(get("/", &session)).await.expect("response");
    assert_eq!(after.status(), StatusCode::OK);
    assert!(after.headers().get(header::SET_COOKIE).is_none());
    assert!(text(after).await.contains("Hello guest"));
}
