use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::manifest::PageKey;

/// A resolved page image, as shown in the preview gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub key: PageKey,
    pub book_title: String,
    pub page_number: i64,
    pub url: String,
}

impl Preview {
    pub fn new(key: PageKey, book_title: &str, page_number: i64, url: &str) -> Self {
        Self {
            key,
            book_title: book_title.to_string(),
            page_number,
            url: url.to_string(),
        }
    }

    pub fn caption(&self) -> String {
        format!("Book: {}, Page: {}", self.book_title, self.page_number)
    }
}

const GALLERY_COLUMNS: usize = 3;

/// Renders a static HTML page with a three-column grid per book.
pub fn render_gallery(previews: &[Preview]) -> String {
    let mut by_book: IndexMap<&str, Vec<&Preview>> = IndexMap::new();
    for preview in previews {
        by_book
            .entry(preview.book_title.as_str())
            .or_default()
            .push(preview);
    }

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Image Previews</title>\n<style>\n");
    html.push_str(&format!(
        ".grid {{ display: grid; grid-template-columns: repeat({GALLERY_COLUMNS}, 1fr); gap: 16px; }}\n"
    ));
    html.push_str("figure { margin: 0; } img { width: 100%; }\n</style>\n</head>\n<body>\n");
    html.push_str("<h1>Image Previews</h1>\n");
    if by_book.is_empty() {
        html.push_str("<p>No images were resolved.</p>\n");
    }
    for (title, rows) in by_book {
        html.push_str(&format!("<h2>{}</h2>\n<div class=\"grid\">\n", escape_html(title)));
        for preview in rows {
            html.push_str(&format!(
                "<figure><img src=\"{}\" alt=\"{caption}\"><figcaption>{caption}</figcaption></figure>\n",
                escape_html(&preview.url),
                caption = escape_html(&preview.caption()),
            ));
        }
        html.push_str("</div>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

pub fn write_gallery(path: &Path, previews: &[Preview]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_gallery(previews))?;
    Ok(())
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
