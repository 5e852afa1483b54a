// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Content-negotiated rendering of authentication rejections.
//!
//! `application/json` and `application/xml` are honoured when present in the
//! `Accept` header; anything else gets a small HTML error page.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_XML: &str = "application/xml";

/// Body format of a rejection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    Json,
    Xml,
    #[default]
    Html,
}

#[derive(Serialize)]
struct AuthErrorBody<'a> {
    message: &'a str,
}

impl ResponseFormat {
    /// Pick a format from a raw `Accept` header value.
    pub fn from_accept(accept: Option<&str>) -> Self {
        let accept = accept.unwrap_or_default();
        if accept.contains(APPLICATION_JSON) {
            ResponseFormat::Json
        } else if accept.contains(APPLICATION_XML) {
            ResponseFormat::Xml
        } else {
            ResponseFormat::Html
        }
    }

    pub fn render(self, status: StatusCode, message: &str) -> Response {
        match self {
            ResponseFormat::Json => (status, Json(AuthErrorBody { message })).into_response(),
            ResponseFormat::Xml => {
                let body = format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
                     <AuthError><message>{}</message></AuthError>",
                    escape_markup(message)
                );
                with_content_type(status, body, APPLICATION_XML)
            }
            ResponseFormat::Html => {
                let reason = status.canonical_reason().unwrap_or("Error");
                let body = format!(
                    "<!doctype html><html><head><title>{code} {reason}</title></head>\
                     <body><h1>{code} {reason}</h1><p>{message}</p></body></html>",
                    code = status.as_u16(),
                    message = escape_markup(message),
                );
                with_content_type(status, body, "text/html; charset=utf-8")
            }
        }
    }
}

fn with_content_type(status: StatusCode, body: String, content_type: &'static str) -> Response {
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn escape_markup(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
