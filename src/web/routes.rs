use anyhow::Result;
use std::net::TcpStream;
use std::time::Duration;

use crate::auth::{login_redirect, post_login_target};
use crate::clock;
use crate::pipeline::detect_upload;
use crate::session::{Flash, FlashCategory, SessionRef, SESSION_COOKIE};
use crate::storage::ContactMessage;
use crate::upload::{accept_filename, UploadRejection};

use super::http::{content_type_for, read_request, write_response, HttpRequest, HttpResponse, PayloadTooLarge};
use super::pages::{self, PageContext};
use super::{AppState, WebConfig};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn handle_connection(
    mut stream: TcpStream,
    state: &AppState,
    cfg: &WebConfig,
) -> Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let request = match read_request(&mut stream, cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(err) => {
            let response = if err.is::<PayloadTooLarge>() {
                HttpResponse::text(413, "upload too large")
            } else {
                HttpResponse::text(400, "bad request")
            };
            write_response(&mut stream, &response)?;
            return Err(err);
        }
    };

    let response = match route(&request, state) {
        Ok(response) => response,
        Err(err) => {
            log::error!("{} {} failed: {:#}", request.method, request.path, err);
            HttpResponse::text(500, "internal server error")
        }
    };
    log::debug!("{} {} -> {}", request.method, request.raw_path, response.status);
    write_response(&mut stream, &response)
}

/// Dispatch one request and attach the session cookie if a session was created.
fn route(request: &HttpRequest, state: &AppState) -> Result<HttpResponse> {
    let cookie = request.cookie(SESSION_COOKIE);
    let session = state.sessions.resolve(cookie.as_deref())?;

    let method = request.method.as_str();
    let path = request.path.as_str();
    let response = match (method, path) {
        ("GET", "/health") => health(state)?,
        ("GET", "/") => render(state, &session, pages::index_page)?,
        ("GET", "/home") => render(state, &session, pages::home_page)?,
        ("GET", "/about") => render(state, &session, pages::about_page)?,
        ("GET", "/login") => login_form(request, state, &session)?,
        ("POST", "/login") => login(request, state, &session)?,
        ("GET", "/logout") => logout(state, &session)?,
        ("GET", "/upload") | ("POST", "/upload") => upload(request, state, &session)?,
        ("GET", "/results") => results(state, &session)?,
        ("GET", "/results.json") => results_json(state, &session)?,
        ("POST", "/contact") => contact(request, state, &session)?,
        ("GET", p) if p.starts_with("/uploads/") => {
            serve(state.storage.resolve_upload(&p["/uploads/".len()..]))?
        }
        ("GET", p) if p.starts_with("/yolo/") => {
            serve(state.storage.resolve_output(&p["/yolo/".len()..]))?
        }
        (
            _,
            "/" | "/home" | "/about" | "/login" | "/logout" | "/upload" | "/results"
            | "/results.json" | "/contact" | "/health",
        ) => HttpResponse::text(405, "method not allowed"),
        _ => HttpResponse::not_found(),
    };

    if session.is_new && state.sessions.contains(&session.id)? {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE,
            state.sessions.cookie_value(&session.id)?
        );
        return Ok(response.with_header("Set-Cookie", &cookie));
    }
    Ok(response)
}

fn page_context(state: &AppState, session: &SessionRef) -> Result<PageContext> {
    let snapshot = state.sessions.get(&session.id)?;
    Ok(PageContext {
        logged_in: snapshot.logged_in,
        username: snapshot.username,
        flashes: state.sessions.take_flashes(&session.id)?,
    })
}

fn render(
    state: &AppState,
    session: &SessionRef,
    page: fn(&PageContext) -> String,
) -> Result<HttpResponse> {
    let ctx = page_context(state, session)?;
    Ok(HttpResponse::html(200, page(&ctx)))
}

fn health(state: &AppState) -> Result<HttpResponse> {
    let body = serde_json::json!({
        "status": "ok",
        "model": if state.model.is_loaded() { "loaded" } else { "unavailable" },
    });
    Ok(HttpResponse::json(200, serde_json::to_vec(&body)?))
}

fn login_form(request: &HttpRequest, state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    let ctx = page_context(state, session)?;
    let next = request.query_param("next");
    Ok(HttpResponse::html(200, pages::login_page(&ctx, next.as_deref())))
}

fn login(request: &HttpRequest, state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    let form = request.form();
    let email = form.get("email").map(String::as_str).unwrap_or("");
    let password = form.get("password").map(String::as_str).unwrap_or("");

    if state.credentials.verify(email, password) {
        state.sessions.login(&session.id, email)?;
        state
            .sessions
            .flash(&session.id, FlashCategory::Success, "Login Successful")?;
        log::info!("login succeeded for {}", email);
        let next = request.query_param("next");
        return Ok(HttpResponse::redirect(&post_login_target(next.as_deref())));
    }

    log::warn!("login failed for {:?}", email);
    state
        .sessions
        .flash(&session.id, FlashCategory::Error, "Invalid Credentials")?;
    login_form(request, state, session)
}

fn logout(state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    state.sessions.logout(
        &session.id,
        Some(Flash {
            category: FlashCategory::Info,
            message: "Logged out".to_string(),
        }),
    )?;
    Ok(HttpResponse::redirect("/"))
}

fn reject_upload(
    request: &HttpRequest,
    state: &AppState,
    session: &SessionRef,
    rejection: UploadRejection,
) -> Result<HttpResponse> {
    log::info!("upload rejected: {}", rejection);
    state
        .sessions
        .flash(&session.id, FlashCategory::Error, &rejection.to_string())?;
    Ok(HttpResponse::redirect(&request.raw_path))
}

fn upload(request: &HttpRequest, state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    if !state.sessions.is_logged_in(&session.id)? {
        return Ok(HttpResponse::redirect(&login_redirect(&request.raw_path)));
    }
    if request.method == "GET" {
        return render(state, session, pages::upload_page);
    }

    let parts = match request.multipart() {
        Ok(parts) => parts,
        Err(err) => {
            log::warn!("unreadable upload form: {:#}", err);
            return reject_upload(request, state, session, UploadRejection::NoFilePart);
        }
    };
    let Some(file) = parts.into_iter().find(|part| part.name == "file") else {
        return reject_upload(request, state, session, UploadRejection::NoFilePart);
    };
    let filename = match accept_filename(file.filename.as_deref().unwrap_or("")) {
        Ok(filename) => filename,
        Err(rejection) => return reject_upload(request, state, session, rejection),
    };

    let run = detect_upload(&state.model, &state.storage, &filename, &file.data)?;
    if let Some(warning) = &run.warning {
        state
            .sessions
            .flash(&session.id, FlashCategory::Warning, warning)?;
    }
    state.sessions.set_results(&session.id, run.result)?;
    Ok(HttpResponse::redirect("/results"))
}

fn results(state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    let ctx = page_context(state, session)?;
    let results = state.sessions.results(&session.id)?;
    Ok(HttpResponse::html(
        200,
        pages::results_page(&ctx, results.as_ref()),
    ))
}

fn results_json(state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    let results = state.sessions.results(&session.id)?;
    Ok(HttpResponse::json(200, serde_json::to_vec(&results)?))
}

fn contact(request: &HttpRequest, state: &AppState, session: &SessionRef) -> Result<HttpResponse> {
    let form = request.form();
    let field = |name: &str| form.get(name).map(|v| v.trim().to_string()).unwrap_or_default();
    let msg = ContactMessage {
        name: field("firstName"),
        email: field("emailAddress"),
        message: field("message"),
    };
    if msg.name.is_empty() || msg.email.is_empty() || msg.message.is_empty() {
        state
            .sessions
            .flash(&session.id, FlashCategory::Error, "All fields are required")?;
        return Ok(HttpResponse::redirect("/home"));
    }

    state
        .storage
        .append_contact(&clock::format_log(clock::now()), &msg)?;
    state
        .sessions
        .flash(&session.id, FlashCategory::Success, "Message received")?;
    Ok(HttpResponse::redirect("/home"))
}

fn serve(path: Option<std::path::PathBuf>) -> Result<HttpResponse> {
    let Some(path) = path else {
        return Ok(HttpResponse::not_found());
    };
    let bytes = std::fs::read(&path)?;
    Ok(HttpResponse::new(200, content_type_for(&path), bytes))
}
