//! HTML parsing for the layout engines.
//!
//! Markup is parsed with `scraper` (html5ever), which recovers from
//! unbalanced and misnested tags the way browsers do. The tree is flattened
//! into start/text/end events in document order. Input that ends inside a
//! tag or comment is reported as truncated.

use scraper::{ElementRef, Html, Node};

use crate::error::{Error, Result};

/// One event of the flattened document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Character data, entities already decoded.
    Text(String),
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End(String),
}

impl Token {
    /// Value of an attribute on a start tag.
    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            Token::Start { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Elements with no content and no end tag.
pub const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose content is raw text, never markup.
pub const RAW_TEXT: &[&str] = &["script", "style"];

/// Deeper elements contribute their text only.
const MAX_DEPTH: usize = 256;

/// A parsed HTML document.
pub struct Markup {
    document: Html,
}

impl Markup {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    /// The input ended inside a tag, attribute or comment.
    pub fn is_truncated(&self) -> bool {
        // html5ever reports end of input in any such state as "Unexpected EOF".
        self.document.errors.iter().any(|e| e.contains("EOF"))
    }

    /// Like [`Self::parse`], but truncated input is an [`Error::Render`].
    pub fn parse_strict(html: &str) -> Result<Self> {
        let markup = Self::parse(html);
        if markup.is_truncated() {
            let excerpt: String = html
                .chars()
                .rev()
                .take(40)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(Error::Render(format!(
                "malformed markup: input ends inside a tag near '{excerpt}'"
            )));
        }
        Ok(markup)
    }

    /// Events for the whole document, starting at `<html>`.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::new();
        walk(self.document.root_element(), 0, &mut tokens);
        tokens
    }
}

/// Parse `html` and flatten it, failing on truncated input.
pub fn tokenize(html: &str) -> Result<Vec<Token>> {
    Ok(Markup::parse_strict(html)?.tokens())
}

fn walk(element: ElementRef<'_>, depth: usize, tokens: &mut Vec<Token>) {
    let el = element.value();
    let name = el.name().to_string();
    tokens.push(Token::Start {
        name: name.clone(),
        attrs: el
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    });
    if depth >= MAX_DEPTH {
        push_text(tokens, &element.text().collect::<String>());
    } else {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => push_text(tokens, text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        walk(child, depth + 1, tokens);
                    }
                }
                _ => {}
            }
        }
    }
    tokens.push(Token::End(name));
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }
    match tokens.last_mut() {
        Some(Token::Text(prev)) => prev.push_str(text),
        _ => tokens.push(Token::Text(text.to_string())),
    }
}

/// Write `tokens` back out as markup.
///
/// `rewrite` sees every attribute value (with its attribute name) and the
/// text of every `<style>` element, and may return a replacement.
pub fn serialize(tokens: &[Token], rewrite: impl Fn(&str, &str) -> Option<String>) -> String {
    let mut out = String::new();
    let mut open: Vec<&str> = Vec::new();
    for token in tokens {
        match token {
            Token::Start { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    let value = rewrite(key, value).unwrap_or_else(|| value.clone());
                    out.push_str(&format!(" {key}=\"{}\"", escape(&value, true)));
                }
                out.push('>');
                open.push(name.as_str());
            }
            Token::End(name) => {
                open.pop();
                if !VOID.contains(&name.as_str()) {
                    out.push_str(&format!("</{name}>"));
                }
            }
            Token::Text(text) => match open.last() {
                Some(&"style") => out.push_str(&rewrite("style", text).unwrap_or_else(|| text.clone())),
                Some(parent) if RAW_TEXT.contains(parent) => out.push_str(text),
                _ => out.push_str(&escape(text, false)),
            },
        }
    }
    out
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(tokens: &[Token]) -> &[Token] {
        let start = tokens
            .iter()
            .position(|t| matches!(t, Token::Start { name, .. } if name == "body"))
            .unwrap();
        &tokens[start + 1..tokens.len() - 2]
    }

    #[test]
    fn test_tokens_in_document_order() {
        let tokens = tokenize("<p class=\"x\">Hi <b>there</b></p>").unwrap();
        let body = body(&tokens);
        assert_eq!(body.len(), 6);
        assert_eq!(body[0].attr("class"), Some("x"));
        assert_eq!(body[1], Token::Text("Hi ".into()));
        assert_eq!(body[5], Token::End("p".into()));
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let tokens = tokenize(r#"<img alt="a > b" src='x.png'>"#).unwrap();
        let img = body(&tokens).first().unwrap();
        assert_eq!(img.attr("alt"), Some("a > b"));
        assert_eq!(img.attr("src"), Some("x.png"));
    }

    #[test]
    fn test_named_entities_decoded() {
        let tokens = tokenize("<p>Se&ntilde;or Jos&eacute; &amp; &hearts; &#8364; &#x41;</p>").unwrap();
        assert_eq!(
            body(&tokens)[1],
            Token::Text("Se\u{f1}or Jos\u{e9} & \u{2665} \u{20ac} A".into())
        );
    }

    #[test]
    fn test_misnested_tags_are_recovered() {
        let tokens = tokenize("<b><i>both</b> italic</i><p>next").unwrap();
        let text: String = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "both italicnext");
        let starts = tokens.iter().filter(|t| matches!(t, Token::Start { .. })).count();
        let ends = tokens.iter().filter(|t| matches!(t, Token::End(_))).count();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_truncated_tag_is_error() {
        let err = tokenize("<p>ok</p><div class=\"broken").unwrap_err();
        assert!(matches!(err, Error::Render(_)));
        assert!(tokenize("text <!-- never closed").is_err());
        assert!(!Markup::parse("<p>ok</p><div class=\"broken").tokens().is_empty());
    }

    #[test]
    fn test_bare_less_than_is_text() {
        let tokens = tokenize("1 < 2").unwrap();
        assert_eq!(body(&tokens), &[Token::Text("1 < 2".into())]);
    }

    #[test]
    fn test_style_content_is_not_markup() {
        let tokens = tokenize("<style>p > a { color: red }</style><p>x</p>").unwrap();
        let style = tokens
            .iter()
            .position(|t| matches!(t, Token::Start { name, .. } if name == "style"))
            .unwrap();
        assert_eq!(tokens[style + 1], Token::Text("p > a { color: red }".into()));
    }

    #[test]
    fn test_serialize_rewrites_and_escapes() {
        let tokens = tokenize("<p title='a \"q\"'>x &lt; y<br>z</p><style>b{c:d}</style>").unwrap();
        let out = serialize(&tokens, |key, value| {
            (key == "style").then(|| value.replace('d', "e"))
        });
        assert!(out.contains("<p title=\"a &quot;q&quot;\">x &lt; y<br>z</p>"));
        assert!(out.contains("<style>b{c:e}</style>"));
        assert!(!out.contains("</br>"));
    }

    #[test]
    fn test_deep_nesting_keeps_text() {
        let html = "<div>".repeat(2000) + "deep" + &"</div>".repeat(2000);
        let tokens = tokenize(&html).unwrap();
        assert!(tokens.contains(&Token::Text("deep".into())));
    }
}
