//! Upload form

use crate::flash::{self, Flash};
use axum::{
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Response},
};

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Form page with an optional notice above the form
pub fn render_index(notice: Option<Flash>) -> String {
    let notice = notice
        .map(|f| format!(r#"<div class="flash {}">{}</div>"#, f.category(), f.message()))
        .unwrap_or_default();
    INDEX_TEMPLATE.replace("{{flash}}", &notice)
}

/// `GET /`: shows and consumes any pending flash notice
pub async fn index(headers: HeaderMap) -> Response {
    match Flash::from_headers(&headers) {
        Some(notice) => (
            [(header::SET_COOKIE, flash::clear_cookie())],
            Html(render_index(Some(notice))),
        )
            .into_response(),
        None => Html(render_index(None)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_notice() {
        let page = render_index(None);
        assert!(page.contains(r#"enctype="multipart/form-data""#));
        assert!(page.contains(r#"name="file""#));
        assert!(!page.contains("{{flash}}"));
        assert!(!page.contains("class=\"flash"));
    }

    #[test]
    fn test_render_with_notice() {
        let page = render_index(Some(Flash::Processed));
        assert!(page.contains(r#"<div class="flash success">Image uploaded and processed successfully!</div>"#));
    }
}
