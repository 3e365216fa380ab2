#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use md_pdf::{Document, Item, Paragraph};

pub fn init() {
    let _ = env_logger::try_init();
}

/// Write `text` to `dir/name`, creating parent directories.
pub fn write_md(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    path
}

/// Parse `text` as the only file of a fresh temporary directory.
pub fn parse(text: &str) -> Document {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = write_md(dir.path(), "doc.md", text);
    md_pdf::parse_markdown(&path, false).unwrap()
}

/// Document items without the leading file anchor.
pub fn content(doc: &Document) -> &[Item] {
    match doc.items.first() {
        Some(Item::Anchor(_)) => &doc.items[1..],
        _ => &doc.items,
    }
}

/// Concatenated text of the plain runs of a paragraph, joined by spaces.
pub fn plain_text(p: &Paragraph) -> String {
    p.items
        .iter()
        .filter_map(|i| match i {
            Item::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Page count from the `/Count` entry of the page tree.
pub fn page_count(pdf: &[u8]) -> usize {
    let text = String::from_utf8_lossy(pdf);
    let Some(pos) = text.find("/Count ") else {
        return 0;
    };
    text[pos + 7..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

pub fn occurrences(pdf: &[u8], needle: &str) -> usize {
    String::from_utf8_lossy(pdf).matches(needle).count()
}
