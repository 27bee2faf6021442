/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `store`.)
*/
use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use axum::{
    extract::Extension,
    Form,
    http::{header, StatusCode},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    response::{Html, IntoResponse, Redirect, Response},
    Router,
    routing::{get, post},
};
use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;

use crate::{
    auth::{self, Flash, SESSION_COOKIE},
    config::Glob,
    form::{FormErrors, LoginForm, RegistrationForm},
    user::User,
};

pub mod admin;
pub mod faculty;
pub mod student;

static TEMPLATES: OnceCell<Handlebars> = OnceCell::new();

static HTML_500: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>campus | Error</title>
<link rel="stylesheet" href="/static/campus.css">
</head>
<body>
<h1>Internal Server Error</h1>
<p>(Error 500)</p>
<p>Something went wrong on our end. No further or more
helpful information is available about the problem.</p>
</body>
</html>"#;

static INVALID_LOGIN: &str = "Invalid username or password, or account not yet approved.";

trait AddHeaders: IntoResponse + Sized {
    fn add_headers(self, mut new_headers: Vec<(HeaderName, HeaderValue)>) -> Response {
        let mut r = self.into_response();
        let r_headers = r.headers_mut();
        for (name, value) in new_headers.drain(..) {
            r_headers.append(name, value);
        }

        r
    }
}

impl<T: IntoResponse + Sized> AddHeaders for T {}

/**
Initializes the resources used in this module. This function should be called
before any functionality of this module or any of its submodules is used.

Currently the only thing that happens here is loading the templates used by
`serve_template()`, which will respond with an error page until `init()` has
been called.

The argument is the path to the directory where the templates used by
`serve_template()` can be found.
*/
pub fn init<P: AsRef<Path>>(template_dir: P) -> Result<(), String> {
    let template_dir = template_dir.as_ref();

    TEMPLATES.get_or_try_init(|| {
        let mut h = Handlebars::new();
        #[cfg(debug_assertions)]
        h.set_dev_mode(true);
        h.register_templates_directory(".html", template_dir)
            .map_err(|e| format!(
                "Error registering templates directory {}: {}",
                template_dir.display(), &e
            ))?;
        log::info!(
            "Registered {} templates from {}.",
            h.get_templates().len(), template_dir.display()
        );
        Ok::<Handlebars, String>(h)
    })?;

    Ok(())
}

/// All the routes, with `glob` attached for the handlers.
pub fn router<P: AsRef<Path>>(glob: Arc<RwLock<Glob>>, static_dir: P) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/dashboard") }))
        .route("/login", get(login_page).post(login))
        .route("/register", get(register_page).post(register))
        .route("/logout", get(logout))
        .route("/dashboard", get(dashboard))
        .route("/admin", get(admin::dashboard))
        .route("/admin/requests", get(admin::requests))
        .route("/admin/requests/:id/approve", post(admin::approve))
        .route("/admin/requests/:id/reject", post(admin::reject))
        .route("/admin/students/add", get(admin::add_student_page).post(admin::add_student))
        .route("/admin/faculty/add", get(admin::add_faculty_page).post(admin::add_faculty))
        .route("/admin/courses", get(admin::courses).post(admin::add_course))
        .route("/admin/courses/:id/delete", post(admin::delete_course))
        .route("/faculty", get(faculty::dashboard))
        .route("/student", get(student::dashboard))
        .nest_service("/static", ServeDir::new(static_dir.as_ref()))
        .layer(Extension(glob))
}

/**
Return an HTML response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn html_500() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(HTML_500)
    ).into_response()
}

pub fn serve_template<S>(
    code: StatusCode,
    template_name: &str,
    data: &S,
    addl_headers: Vec<(HeaderName, HeaderValue)>
) -> Response
where
    S: Serialize + Debug
{
    log::trace!("serve_template( {}, {:?}, ... ) called.", &code, template_name);

    let templates = match TEMPLATES.get() {
        Some(t) => t,
        None => {
            log::error!("serve_template() called before inter::init().");
            return html_500();
        },
    };

    match templates.render(template_name, data) {
        Ok(response_body) => (
            code,
            Html(response_body)
        ).add_headers(addl_headers),
        Err(e) => {
            log::error!(
                "Error rendering template {:?} with data {:?}:\n{}",
                template_name, data, &e
            );
            html_500()
        },
    }
}

pub fn respond_not_found(what: &str) -> Response {
    log::trace!("respond_not_found( {:?} ) called.", what);

    let data = json!({ "title": "Not Found", "what": what });
    serve_template(StatusCode::NOT_FOUND, "not_found", &data, vec![])
}

/// Pull the session key out of the request's `Cookie` header(s).
pub fn session_key(headers: &HeaderMap) -> Option<String> {
    for val in headers.get_all(header::COOKIE).iter() {
        let val = match val.to_str() {
            Ok(s) => s,
            Err(_) => { continue; },
        };
        for pair in val.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !value.is_empty() {
                    return Some(value.to_owned());
                }
            }
        }
    }
    None
}

fn set_session_cookie(key: &str) -> (HeaderName, HeaderValue) {
    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, key);
    // Keys are alphanumeric, so this is always a valid header value.
    let value = HeaderValue::from_str(&cookie)
        .unwrap_or_else(|_| HeaderValue::from_static(""));
    (header::SET_COOKIE, value)
}

fn clear_session_cookie() -> (HeaderName, HeaderValue) {
    (
        header::SET_COOKIE,
        HeaderValue::from_static("campus_session=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
    )
}

/**
The logged-in account making this request, along with its session key.

`Ok(None)` means an anonymous visitor (or one whose session has expired or
whose account is gone or deactivated); `Err` carries the 500 response to
return if the database couldn't be asked.
*/
pub async fn current_user(
    headers: &HeaderMap,
    glob: &Glob,
) -> Result<Option<(String, User)>, Response> {
    let key = match session_key(headers) {
        Some(k) => k,
        None => { return Ok(None); },
    };
    let uname = match glob.sessions.write().await.uname_for(&key) {
        Some(u) => u,
        None => { return Ok(None); },
    };

    match glob.store().get_user_by_uname(&uname).await {
        Err(e) => {
            log::error!("Error looking up session user {:?}: {}", &uname, &e);
            Err(html_500())
        },
        Ok(Some(u)) if u.is_active() => Ok(Some((key, u))),
        Ok(_) => {
            log::warn!("Session user {:?} is missing or inactive; ending session.", &uname);
            glob.sessions.write().await.logout(&key);
            Ok(None)
        },
    }
}

/**
Gatekeeper for role-specific pages.

Anonymous visitors are sent to the login page; logged-in users of some
other role are sent to their own dashboard.
*/
pub async fn require_role(
    headers: &HeaderMap,
    glob: &Glob,
    role: crate::user::Role,
) -> Result<(String, User), Response> {
    match current_user(headers, glob).await? {
        None => Err(Redirect::to("/login").into_response()),
        Some((key, u)) => {
            if u.role() == role {
                Ok((key, u))
            } else {
                log::warn!(
                    "{} {:?} attempted to access a {} page.",
                    &u.role(), u.uname(), &role
                );
                Err(Redirect::to(u.role().dashboard()).into_response())
            }
        },
    }
}

/// Remove and return the session's pending flash messages.
pub async fn take_flash(glob: &Glob, key: Option<&str>) -> Vec<Flash> {
    match key {
        Some(k) => glob.sessions.write().await.take_flash(k),
        None => Vec::new(),
    }
}

/// Queue `flash` on the visitor's session and redirect to `to`.
pub async fn redirect_with_flash(
    glob: &Glob,
    key: Option<&str>,
    flash: Flash,
    to: &str,
) -> Response {
    let new_key = glob.sessions.write().await.push_flash(key, flash);
    let headers = if Some(new_key.as_str()) != key {
        vec![set_session_cookie(&new_key)]
    } else {
        vec![]
    };
    Redirect::to(to).add_headers(headers)
}

/// Template data for the navigation bar of a logged-in user.
pub fn user_data(u: &User) -> serde_json::Value {
    json!({
        "uname": u.uname(),
        "name": u.full_name(),
        "email": u.email(),
        "role": u.role().to_string(),
        "dashboard": u.role().dashboard(),
    })
}

fn render_login(
    code: StatusCode,
    form: &LoginForm,
    errors: &FormErrors,
    flash: &[Flash],
) -> Response {
    let data = json!({
        "title": "Log In",
        "form": form,
        "errors": errors,
        "flash": flash,
    });
    serve_template(code, "login", &data, vec![])
}

pub async fn login_page(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("login_page() called.");

    let glob = glob.read().await;
    let key = session_key(&headers);
    match current_user(&headers, &glob).await {
        Err(r) => { return r; },
        Ok(Some(_)) => { return Redirect::to("/dashboard").into_response(); },
        Ok(None) => {},
    }

    let flash = take_flash(&glob, key.as_deref()).await;
    render_login(StatusCode::OK, &LoginForm::default(), &FormErrors::default(), &flash)
}

pub async fn login(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<LoginForm>,
) -> Response {
    log::trace!("login( {:?} ) called.", &form.uname);

    let glob = glob.read().await;
    let key = session_key(&headers);
    match current_user(&headers, &glob).await {
        Err(r) => { return r; },
        Ok(Some(_)) => { return Redirect::to("/dashboard").into_response(); },
        Ok(None) => {},
    }

    if let Err(errs) = form.validate() {
        return render_login(StatusCode::UNPROCESSABLE_ENTITY, &form, &errs, &[]);
    }

    let uname = form.uname.trim();
    let creds = match glob.store().get_credentials(uname).await {
        Ok(creds) => creds,
        Err(e) => {
            log::error!("Error retrieving credentials for {:?}: {}", uname, &e);
            return html_500();
        },
    };

    let user = match creds {
        Some((u, hash)) if u.is_active() => {
            if auth::spawn_verify(form.password.clone(), hash).await {
                Some(u)
            } else {
                None
            }
        },
        _ => None,
    };

    match user {
        Some(u) => {
            let new_key = glob.sessions.write().await.login(key.as_deref(), u.uname());
            log::info!("{} {:?} logged in.", &u.role(), u.uname());
            Redirect::to("/dashboard").add_headers(vec![set_session_cookie(&new_key)])
        },
        None => {
            log::info!("Failed login attempt for {:?}.", uname);
            let mut errs = FormErrors::default();
            errs.add_form(INVALID_LOGIN);
            render_login(StatusCode::UNAUTHORIZED, &form, &errs, &[])
        },
    }
}

fn render_register(code: StatusCode, form: &RegistrationForm, errors: &FormErrors) -> Response {
    let data = json!({
        "title": "Register",
        "form": form,
        "errors": errors,
    });
    serve_template(code, "register", &data, vec![])
}

pub async fn register_page(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("register_page() called.");

    let glob = glob.read().await;
    match current_user(&headers, &glob).await {
        Err(r) => r,
        Ok(Some(_)) => Redirect::to("/dashboard").into_response(),
        Ok(None) => render_register(
            StatusCode::OK, &RegistrationForm::default(), &FormErrors::default()
        ),
    }
}

/// Public sign-up: records a request for an Admin to approve.
pub async fn register(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<RegistrationForm>,
) -> Response {
    log::trace!("register( {:?} ) called.", &form.account.uname);

    let glob = glob.read().await;
    let key = session_key(&headers);
    match current_user(&headers, &glob).await {
        Err(r) => { return r; },
        Ok(Some(_)) => { return Redirect::to("/dashboard").into_response(); },
        Ok(None) => {},
    }

    let reg = match form.validate() {
        Ok(reg) => reg,
        Err(errs) => {
            return render_register(StatusCode::UNPROCESSABLE_ENTITY, &form, &errs);
        },
    };

    match glob.store().uname_in_use(&reg.account.uname).await {
        Err(e) => {
            log::error!("Error checking uname {:?}: {}", &reg.account.uname, &e);
            return html_500();
        },
        Ok(true) => {
            let mut errs = FormErrors::default();
            errs.add("uname", "A user with that username already exists.");
            return render_register(StatusCode::UNPROCESSABLE_ENTITY, &form, &errs);
        },
        Ok(false) => {},
    }

    let acct = &reg.account;
    let hash = match auth::spawn_hash(acct.password.clone()).await {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("Error hashing password for {:?}: {}", &acct.uname, &e);
            return html_500();
        },
    };
    if let Err(e) = glob.store().insert_request(
        &acct.uname,
        &hash,
        &acct.email,
        &acct.first,
        &acct.last,
        reg.role,
    ).await {
        log::error!("Error recording registration request for {:?}: {}", &acct.uname, &e);
        return html_500();
    }

    redirect_with_flash(
        &glob,
        key.as_deref(),
        Flash::success("Registration successful! Your request is pending admin approval."),
        "/login",
    ).await
}

pub async fn logout(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("logout() called.");

    if let Some(key) = session_key(&headers) {
        glob.read().await.sessions.write().await.logout(&key);
    }
    Redirect::to("/login").add_headers(vec![clear_session_cookie()])
}

/// Send each user to the dashboard for their role.
pub async fn dashboard(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("dashboard() called.");

    let glob = glob.read().await;
    match current_user(&headers, &glob).await {
        Err(r) => r,
        Ok(None) => Redirect::to("/login").into_response(),
        Ok(Some((_, u))) => Redirect::to(u.role().dashboard()).into_response(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Cfg;
    use crate::tests::ensure_logging;

    /// Global state whose database can't be reached, so any handler that
    /// gets as far as the database answers with a 500.
    pub fn offline_glob() -> Arc<RwLock<Glob>> {
        ensure_logging();
        init("templates").unwrap();
        let cfg = Cfg {
            db_connect_string: "host=127.0.0.1 port=1 user=nobody dbname=nothing connect_timeout=2".to_owned(),
            ..Cfg::default()
        };
        Arc::new(RwLock::new(Glob::from_cfg(&cfg).unwrap()))
    }

    pub fn cookie_headers(key: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}", SESSION_COOKIE, key)).unwrap()
        );
        h
    }

    pub fn location(r: &Response) -> &str {
        r.headers().get(header::LOCATION).unwrap().to_str().unwrap()
    }

    pub async fn body_text(r: Response) -> String {
        let bytes = hyper::body::to_bytes(r.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn session_key_from_cookies() {
        assert_eq!(session_key(&HeaderMap::new()), None);
        assert_eq!(session_key(&cookie_headers("abc123")).as_deref(), Some("abc123"));

        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("campus_session="));
        assert_eq!(session_key(&h), None);

        h.insert(header::COOKIE, HeaderValue::from_static("other_campus_session=x"));
        assert_eq!(session_key(&h), None);
    }

    #[tokio::test]
    async fn login_page_renders() {
        let glob = offline_glob();
        let r = login_page(HeaderMap::new(), Extension(glob)).await;
        assert_eq!(r.status(), StatusCode::OK);
        let body = body_text(r).await;
        assert!(body.contains("<form"));
        assert!(body.contains("name=\"uname\""));
    }

    #[tokio::test]
    async fn login_requires_fields() {
        let glob = offline_glob();
        let r = login(HeaderMap::new(), Extension(glob), Form(LoginForm::default())).await;
        assert_eq!(r.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(r).await.contains("This field is required."));
    }

    #[tokio::test]
    async fn overlong_login_password_never_reaches_hashing() {
        let glob = offline_glob();
        let form = LoginForm {
            uname: "root".to_owned(),
            password: "x".repeat(crate::form::PASSWORD_MAX_LENGTH + 1),
        };
        // The database is down, so anything past validation would be a 500.
        let r = login(HeaderMap::new(), Extension(glob), Form(form)).await;
        assert_eq!(r.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(r).await.contains("Ensure this value has at most 4096 characters."));
    }

    #[tokio::test]
    async fn login_with_database_down_is_500() {
        let glob = offline_glob();
        let form = LoginForm { uname: "jdoe".to_owned(), password: "hunter22".to_owned() };
        let r = login(HeaderMap::new(), Extension(glob), Form(form)).await;
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn anonymous_visitors_go_to_login() {
        let glob = offline_glob();

        let r = dashboard(HeaderMap::new(), Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&r), "/login");

        // An unknown session key is as good as none.
        let r = admin::dashboard(cookie_headers("stale"), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/login");

        let r = faculty::dashboard(HeaderMap::new(), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/login");

        let r = student::dashboard(HeaderMap::new(), Extension(glob)).await;
        assert_eq!(location(&r), "/login");
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let glob = offline_glob();
        let key = glob.read().await.sessions.write().await.login(None, "jdoe");

        let r = logout(cookie_headers(&key), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/login");
        let cookie = r.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        assert_eq!(glob.read().await.sessions.write().await.uname_for(&key), None);
    }

    #[tokio::test]
    async fn flash_shows_once() {
        let glob = offline_glob();
        let key = glob.read().await.sessions.write().await
            .push_flash(None, Flash::success("Registration successful!"));

        let r = login_page(cookie_headers(&key), Extension(glob.clone())).await;
        assert!(body_text(r).await.contains("Registration successful!"));

        let r = login_page(cookie_headers(&key), Extension(glob)).await;
        assert!(!body_text(r).await.contains("Registration successful!"));
    }

    #[tokio::test]
    async fn invalid_registration_rerenders() {
        let glob = offline_glob();
        let mut form = RegistrationForm::default();
        form.account.uname = "jdoe".to_owned();
        form.account.email = "not an email".to_owned();
        form.role = "1".to_owned();

        let r = register(HeaderMap::new(), Extension(glob), Form(form)).await;
        assert_eq!(r.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_text(r).await;
        assert!(body.contains("Enter a valid email address."));
        assert!(body.contains("Select a valid choice."));
        // Submitted values are kept; passwords are not.
        assert!(body.contains("value=\"jdoe\""));
    }

    #[tokio::test]
    async fn redirect_with_flash_sets_cookie_only_when_needed() {
        let glob = offline_glob();
        let glob = glob.read().await;

        let r = redirect_with_flash(&glob, None, Flash::info("hi"), "/login").await;
        assert!(r.headers().get(header::SET_COOKIE).is_some());

        let key = glob.sessions.write().await.login(None, "jdoe");
        let r = redirect_with_flash(&glob, Some(&key), Flash::info("hi"), "/admin").await;
        assert_eq!(location(&r), "/admin");
        assert!(r.headers().get(header::SET_COOKIE).is_none());
    }
}
