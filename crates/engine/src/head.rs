use serde::{Deserialize, Serialize};

/// Resource a control contributes to the `<head>` of the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HeadElement {
    JsImport(String),
    CssImport(String),
    JsScript(String),
    CssStyle(String),
}

impl HeadElement {
    pub fn to_html(&self) -> String {
        match self {
            HeadElement::JsImport(src) => format!(
                "<script type=\"text/javascript\" src=\"{}\"></script>",
                html_escape::encode_double_quoted_attribute(src)
            ),
            HeadElement::CssImport(href) => format!(
                "<link type=\"text/css\" rel=\"stylesheet\" href=\"{}\"/>",
                html_escape::encode_double_quoted_attribute(href)
            ),
            HeadElement::JsScript(body) => {
                format!("<script type=\"text/javascript\">{}</script>", body)
            }
            HeadElement::CssStyle(body) => format!("<style type=\"text/css\">{}</style>", body),
        }
    }
}

/// Appends `element` unless an equal element is already present.
pub fn push_unique(elements: &mut Vec<HeadElement>, element: HeadElement) {
    if !elements.contains(&element) {
        elements.push(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_escape_attribute_values() {
        let element = HeadElement::JsImport("/js/app.js?a=1&b=\"2\"".into());
        assert_eq!(
            element.to_html(),
            "<script type=\"text/javascript\" src=\"/js/app.js?a=1&amp;b=&quot;2&quot;\"></script>"
        );
    }

    #[test]
    fn push_unique_skips_duplicates() {
        let mut elements = Vec::new();
        push_unique(&mut elements, HeadElement::CssImport("/a.css".into()));
        push_unique(&mut elements, HeadElement::CssImport("/a.css".into()));
        push_unique(&mut elements, HeadElement::CssStyle("p{}".into()));
        assert_eq!(elements.len(), 2);
    }
}
