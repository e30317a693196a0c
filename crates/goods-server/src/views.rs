//! View Rendering
//!
//! Handlers pick a template name and pass a JSON context; the renderer turns
//! that into a page. `HtmlViews` is a minimal built-in renderer.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
}

/// View renderer trait
pub trait ViewRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String, ViewError>;
}

/// Escape text for HTML element content and quoted attributes
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escaped string field of a context object, empty if absent
fn field(context: &Value, name: &str) -> String {
    match context.get(name) {
        Some(Value::String(s)) => escape_html(s),
        Some(Value::Null) | None => String::new(),
        Some(other) => escape_html(&other.to_string()),
    }
}

/// Built-in HTML views
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlViews;

impl HtmlViews {
    fn catalog(context: &Value) -> String {
        let sid = field(context, "sid");
        let mut body = format!("<p>Signed in as {}</p>\n<ul>\n", field(context, "username"));

        let products = context
            .get("products")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for product in products {
            let id = field(product, "id");
            let description = field(product, "description");
            let owned = product.get("purchased").and_then(Value::as_bool).unwrap_or(false);

            if owned {
                body.push_str(&format!(
                    "<li>{description} <a href=\"/purchases?sid={sid}&amp;item_id={id}\">Already purchased</a></li>\n"
                ));
            } else {
                body.push_str(&format!(
                    "<li>{description} \
                     <form method=\"post\" action=\"/set_ec\">\
                     <input type=\"hidden\" name=\"sid\" value=\"{sid}\">\
                     <input type=\"hidden\" name=\"item_id\" value=\"{id}\">\
                     <button type=\"submit\">Buy for ${}</button></form></li>\n",
                    field(product, "price")
                ));
            }
        }
        body.push_str("</ul>");
        body
    }
}

impl ViewRenderer for HtmlViews {
    fn render(&self, template: &str, context: &Value) -> Result<String, ViewError> {
        let body = match template {
            "root" => "<p><a href=\"/login\">Sign in</a> to browse the catalog.</p>".to_string(),
            "digital_goods" => Self::catalog(context),
            "successful_payment" => format!(
                "<p>Thank you for purchasing {}.</p>\n\
                 <p><a href=\"/purchases?sid={}&amp;item_id={}\">Download your purchase</a></p>",
                field(context, "description"),
                field(context, "sid"),
                field(context, "item_id"),
            ),
            "session_expired" => {
                "<p>Your session has expired. <a href=\"/login\">Sign in again</a>.</p>".to_string()
            }
            "unknown_error" => format!(
                "<p>Something went wrong during {}.</p>\n<p>{}</p>",
                field(context, "operation"),
                field(context, "message"),
            ),
            "cancel_purchase" => "<p>Your purchase was cancelled. You have not been charged.</p>".to_string(),
            "payment_pending" => format!(
                "<p>Your payment for {} was received and will be credited to your account shortly.</p>",
                field(context, "description"),
            ),
            "purchased_item" => format!(
                "<article data-item=\"{}\"><h2>{}</h2></article>",
                field(context, "item_id"),
                field(context, "title"),
            ),
            other => return Err(ViewError::UnknownTemplate(other.to_string())),
        };

        let title = field(context, "title");
        Ok(format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
             <body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n"
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_context_is_escaped() {
        let page = HtmlViews
            .render(
                "unknown_error",
                &json!({"title": "Error", "operation": "<script>alert(1)</script>"}),
            )
            .unwrap();
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_catalog_marks_owned_items() {
        let page = HtmlViews
            .render(
                "digital_goods",
                &json!({
                    "title": "Legal Templates: Catalog",
                    "sid": "abc123",
                    "username": "alice",
                    "products": [
                        {"id": "invoice_template1", "description": "Invoice", "price": "3.00", "purchased": true},
                        {"id": "letter_of_resignation1", "description": "Letter", "price": "2.50", "purchased": false},
                    ],
                }),
            )
            .unwrap();
        assert!(page.contains("/purchases?sid=abc123&amp;item_id=invoice_template1"));
        assert!(page.contains("name=\"item_id\" value=\"letter_of_resignation1\""));
        assert!(page.contains("Buy for $2.50"));
    }

    #[test]
    fn test_unknown_template() {
        assert!(matches!(
            HtmlViews.render("nope", &json!({})),
            Err(ViewError::UnknownTemplate(_))
        ));
    }
}
