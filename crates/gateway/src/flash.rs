//! One-shot notices carried across the post/redirect/get cycle
//!
//! The notice is a short code in a `flash` cookie. The form handler reads
//! it once and clears it on the same response.

use axum::http::{header, HeaderMap, HeaderValue};

const COOKIE_NAME: &str = "flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    Processed,
    UnsupportedFile,
    ProcessingFailed,
}

impl Flash {
    pub fn code(&self) -> &'static str {
        match self {
            Flash::Processed => "processed",
            Flash::UnsupportedFile => "unsupported",
            Flash::ProcessingFailed => "failed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "processed" => Some(Flash::Processed),
            "unsupported" => Some(Flash::UnsupportedFile),
            "failed" => Some(Flash::ProcessingFailed),
            _ => None,
        }
    }

    /// Display category, used as the CSS class of the notice
    pub fn category(&self) -> &'static str {
        match self {
            Flash::Processed => "success",
            Flash::UnsupportedFile | Flash::ProcessingFailed => "error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Flash::Processed => "Image uploaded and processed successfully!",
            Flash::UnsupportedFile => "Unsupported file type. Upload a PDF, PNG or JPEG receipt.",
            Flash::ProcessingFailed => "The receipt could not be processed. Please try again.",
        }
    }

    /// `Set-Cookie` value storing this notice
    pub fn set_cookie(&self) -> HeaderValue {
        HeaderValue::from_static(match self {
            Flash::Processed => "flash=processed; Path=/; Max-Age=60; HttpOnly; SameSite=Lax",
            Flash::UnsupportedFile => "flash=unsupported; Path=/; Max-Age=60; HttpOnly; SameSite=Lax",
            Flash::ProcessingFailed => "flash=failed; Path=/; Max-Age=60; HttpOnly; SameSite=Lax",
        })
    }

    /// Pending notice in the request cookies, if any
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == COOKIE_NAME)
            .and_then(|(_, value)| Self::from_code(value))
    }
}

/// `Set-Cookie` value removing any pending notice
pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}
