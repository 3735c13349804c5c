//! HTML served to the browser.
//!
use common::protocol::{DEFAULT_CONFIDENCE, DEFAULT_IOU, THRESHOLD_STEP};
use lazy_static::lazy_static;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

const ERROR_TEMPLATE: &str = include_str!("../static/error.html");

lazy_static! {
    /// Page with threshold sliders, camera capture and result panels.
    pub static ref INDEX: String = INDEX_TEMPLATE
        .replace("{{confidence}}", &format!("{DEFAULT_CONFIDENCE:.2}"))
        .replace("{{iou}}", &format!("{DEFAULT_IOU:.2}"))
        .replace("{{step}}", &format!("{THRESHOLD_STEP:.2}"));
}

/// Page with an error banner in place of the controls.
pub fn error_page(message: &str) -> String {
    ERROR_TEMPLATE.replace("{{error}}", &escape_html(message))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
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
