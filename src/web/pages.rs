//! HTML rendering for the site pages.

use crate::assemble::{BoxField, DetectionResult, DetectionStatus};
use crate::session::Flash;

/// Per-request values every page layout needs.
#[derive(Clone, Debug, Default)]
pub struct PageContext {
    pub logged_in: bool,
    pub username: Option<String>,
    pub flashes: Vec<Flash>,
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{font-family:sans-serif;margin:0;background:#f5f6f8;color:#222}\
nav{background:#1f2a38;padding:12px 24px}nav a{color:#fff;margin-right:16px;text-decoration:none}\
main{max-width:960px;margin:24px auto;padding:0 16px}\
.flash{padding:10px 14px;border-radius:6px;margin-bottom:10px}\
.flash.success{background:#d9f2e1}.flash.error{background:#f8d7da}\
.flash.info{background:#dbe9f7}.flash.warning{background:#fff3cd}\
table{border-collapse:collapse;width:100%}td,th{border:1px solid #ccc;padding:6px 10px;text-align:left}\
img.result{max-width:100%;border:1px solid #ccc}";

fn layout(title: &str, ctx: &PageContext, body: &str) -> String {
    let account = if ctx.logged_in {
        format!(
            "<a href=\"/logout\">Logout ({})</a>",
            escape_html(ctx.username.as_deref().unwrap_or(""))
        )
    } else {
        "<a href=\"/login\">Login</a>".to_string()
    };
    let flashes: String = ctx
        .flashes
        .iter()
        .map(|f| {
            format!(
                "<div class=\"flash {}\">{}</div>",
                f.category.as_str(),
                escape_html(&f.message)
            )
        })
        .collect();
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{title} | PPE Vision</title><style>{STYLE}</style></head><body>\
<nav><a href=\"/\">Index</a><a href=\"/home\">Home</a><a href=\"/about\">About</a>\
<a href=\"/upload\">Upload</a><a href=\"/results\">Results</a>{account}</nav>\
<main>{flashes}{body}</main></body></html>",
        title = escape_html(title),
    )
}

pub fn index_page(ctx: &PageContext) -> String {
    layout(
        "Welcome",
        ctx,
        "<h1>PPE Vision</h1>\
<p>Upload a site photo and check helmets, vests, gloves, goggles and boots at a glance.</p>\
<p><a href=\"/upload\">Start a detection</a></p>",
    )
}

pub fn home_page(ctx: &PageContext) -> String {
    layout(
        "Home",
        ctx,
        "<h1>Home</h1>\
<p>Detections cover ten classes: each item of protective equipment and its absence.</p>\
<h2>Contact us</h2>\
<form method=\"post\" action=\"/contact\">\
<p><input name=\"firstName\" placeholder=\"Name\"></p>\
<p><input name=\"emailAddress\" type=\"email\" placeholder=\"Email\"></p>\
<p><textarea name=\"message\" placeholder=\"Message\"></textarea></p>\
<p><button type=\"submit\">Send</button></p></form>",
    )
}

pub fn about_page(ctx: &PageContext) -> String {
    layout(
        "About",
        ctx,
        "<h1>About</h1>\
<p>A YOLOv8 model trained on construction-site imagery runs over each uploaded image. \
The annotated result and the list of detections are kept for your current session only.</p>",
    )
}

pub fn login_page(ctx: &PageContext, next: Option<&str>) -> String {
    let action = match next {
        Some(next) => crate::auth::login_redirect(next),
        None => "/login".to_string(),
    };
    let body = format!(
        "<h1>Login</h1>\
<form method=\"post\" action=\"{action}\">\
<p><input name=\"email\" type=\"email\" placeholder=\"Email\" required></p>\
<p><input name=\"password\" type=\"password\" placeholder=\"Password\" required></p>\
<p><button type=\"submit\">Login</button></p></form>",
        action = escape_html(&action)
    );
    layout("Login", ctx, &body)
}

pub fn upload_page(ctx: &PageContext) -> String {
    layout(
        "Upload",
        ctx,
        "<h1>Upload an image</h1>\
<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
<p><input type=\"file\" name=\"file\" accept=\".png,.jpg,.jpeg,.gif\"></p>\
<p><button type=\"submit\">Detect</button></p></form>",
    )
}

fn status_text(status: DetectionStatus) -> &'static str {
    match status {
        DetectionStatus::Processing => "Processing",
        DetectionStatus::Complete => "Complete",
        DetectionStatus::Failed => "Failed",
        DetectionStatus::ModelUnavailable => "Model unavailable",
    }
}

pub fn results_page(ctx: &PageContext, results: Option<&DetectionResult>) -> String {
    let Some(results) = results else {
        return layout(
            "Results",
            ctx,
            "<h1>Results</h1><p>No results yet. <a href=\"/upload\">Upload an image</a>.</p>",
        );
    };
    let rows: String = results
        .detections
        .iter()
        .map(|det| {
            let bbox = match &det.bbox {
                BoxField::Coords(coords) if coords.is_empty() => "-".to_string(),
                BoxField::Coords(coords) => format!(
                    "[{}]",
                    coords
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                BoxField::Message(msg) if msg.is_empty() => "-".to_string(),
                BoxField::Message(msg) => escape_html(msg),
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&det.label),
                det.confidence,
                bbox
            )
        })
        .collect();
    let body = format!(
        "<h1>Results</h1>\
<p><strong>{filename}</strong> &middot; {time} &middot; {status}</p>\
<p><img class=\"result\" src=\"{url}\" alt=\"{filename}\"></p>\
<table><thead><tr><th>Label</th><th>Confidence</th><th>Box</th></tr></thead>\
<tbody>{rows}</tbody></table>\
<p><a href=\"/upload\">Upload another</a></p>",
        filename = escape_html(&results.filename),
        time = crate::clock::format_display(results.timestamp),
        status = status_text(results.status),
        url = escape_html(&results.image_url),
    );
    layout("Results", ctx, &body)
}
