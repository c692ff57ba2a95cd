use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Value the storybook authoring tool writes into `imageUrl` before illustration.
pub const PLACEHOLDER_IMAGE_URL: &str = "TBD";

/// Stable identity of a page for the whole run: (book index, page index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageKey {
    pub book: usize,
    pub page: usize,
}

impl PageKey {
    pub fn new(book: usize, page: usize) -> Self {
        Self { book, page }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "book {}, page {}", self.book, self.page)
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("manifest must be a JSON array of books")]
    NotAnArray,
    #[error("book {book}: {detail}")]
    InvalidBook { book: usize, detail: String },
    #[error("book {book}, page {page}: {detail}")]
    InvalidPage {
        book: usize,
        page: usize,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub key: PageKey,
    pub page_number: i64,
    pub image_prompt: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookView {
    pub title: String,
    pub pages: Vec<PageView>,
}

/// A storybook manifest.
///
/// The original JSON document is kept as-is so that writing the manifest back
/// reproduces it exactly (key order and unknown fields included); the typed
/// views only cover the fields the pipeline reads. `set_image_url` is the only
/// mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    document: Value,
    books: Vec<BookView>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let document: Value = serde_json::from_str(raw)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self, ManifestError> {
        let rows = document.as_array().ok_or(ManifestError::NotAnArray)?;
        let mut books = Vec::with_capacity(rows.len());
        for (book_idx, row) in rows.iter().enumerate() {
            books.push(read_book(book_idx, row)?);
        }
        Ok(Self { document, books })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading manifest {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn books(&self) -> &[BookView] {
        &self.books
    }

    pub fn pages(&self) -> impl Iterator<Item = (&BookView, &PageView)> {
        self.books
            .iter()
            .flat_map(|book| book.pages.iter().map(move |page| (book, page)))
    }

    pub fn page(&self, key: PageKey) -> Option<&PageView> {
        self.books.get(key.book)?.pages.get(key.page)
    }

    pub fn page_count(&self) -> usize {
        self.books.iter().map(|book| book.pages.len()).sum()
    }

    pub fn as_value(&self) -> &Value {
        &self.document
    }

    /// Writes `url` into the page's `imageUrl`, keeping the key's position when
    /// it already exists. Returns false when the key does not address a page.
    pub fn set_image_url(&mut self, key: PageKey, url: &str) -> bool {
        let Some(page) = self
            .document
            .get_mut(key.book)
            .and_then(|book| book.get_mut("pages"))
            .and_then(Value::as_array_mut)
            .and_then(|pages| pages.get_mut(key.page))
            .and_then(Value::as_object_mut)
        else {
            return false;
        };
        page.insert("imageUrl".to_string(), Value::String(url.to_string()));
        if let Some(view) = self
            .books
            .get_mut(key.book)
            .and_then(|book| book.pages.get_mut(key.page))
        {
            view.image_url = Some(url.to_string());
        }
        true
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.document)?)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)
            .with_context(|| format!("failed writing manifest {}", path.display()))?;
        Ok(())
    }
}

fn read_book(book_idx: usize, row: &Value) -> Result<BookView, ManifestError> {
    let invalid = |detail: &str| ManifestError::InvalidBook {
        book: book_idx,
        detail: detail.to_string(),
    };
    let obj = row
        .as_object()
        .ok_or_else(|| invalid("book must be an object"))?;
    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing string field `title`"))?;
    let pages = obj
        .get("pages")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing array field `pages`"))?;

    let mut views = Vec::with_capacity(pages.len());
    for (page_idx, page) in pages.iter().enumerate() {
        views.push(read_page(PageKey::new(book_idx, page_idx), page)?);
    }
    Ok(BookView {
        title: title.to_string(),
        pages: views,
    })
}

fn read_page(key: PageKey, row: &Value) -> Result<PageView, ManifestError> {
    let invalid = |detail: &str| ManifestError::InvalidPage {
        book: key.book,
        page: key.page,
        detail: detail.to_string(),
    };
    let obj = row
        .as_object()
        .ok_or_else(|| invalid("page must be an object"))?;
    let page_number = obj
        .get("pageNumber")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("missing integer field `pageNumber`"))?;
    let image_prompt = obj
        .get("imagePrompt")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing string field `imagePrompt`"))?;
    Ok(PageView {
        key,
        page_number,
        image_prompt: image_prompt.to_string(),
        image_url: obj
            .get("imageUrl")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
