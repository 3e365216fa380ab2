mod common;

use md_pdf::{Item, Parser};

use common::write_md;

fn anchors(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .filter_map(|i| match i {
            Item::Anchor(path) => Some(path.clone()),
            _ => None,
        })
        .collect()
}

fn page_breaks(items: &[Item]) -> usize {
    items.iter().filter(|i| matches!(i, Item::PageBreak)).count()
}

#[test]
fn linked_files_are_appended_once() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let main = write_md(dir.path(), "main.md", "# Main\n\nSee [chapter](docs/chapter.md).\n");
    let chapter = write_md(
        dir.path(),
        "docs/chapter.md",
        "# Chapter\n\nBack to [main](../main.md).\n",
    );

    let doc = md_pdf::parse_markdown(&main, true).unwrap();
    assert_eq!(
        anchors(&doc.items),
        vec![main.display().to_string(), chapter.display().to_string()]
    );
    assert_eq!(page_breaks(&doc.items), 1);

    let break_at = doc.items.iter().position(|i| *i == Item::PageBreak).unwrap();
    assert_eq!(doc.items[break_at + 1], Item::Anchor(chapter.display().to_string()));
}

#[test]
fn links_point_at_the_included_file() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let main = write_md(dir.path(), "main.md", "Read [the rest](rest.md).\n");
    let rest = write_md(dir.path(), "rest.md", "More.\n");

    let doc = md_pdf::parse_markdown(&main, true).unwrap();
    let url = doc
        .items
        .iter()
        .find_map(|i| match i {
            Item::Paragraph(p) => p.items.iter().find_map(|i| match i {
                Item::Link(l) => Some(l.url.clone()),
                _ => None,
            }),
            _ => None,
        })
        .expect("link");
    assert_eq!(url, rest.display().to_string());
}

#[test]
fn without_recursion_only_the_input_is_parsed() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let main = write_md(dir.path(), "main.md", "See [other](other.md).\n");
    write_md(dir.path(), "other.md", "# Other\n");

    let doc = md_pdf::parse_markdown(&main, false).unwrap();
    assert_eq!(anchors(&doc.items).len(), 1);
    assert_eq!(page_breaks(&doc.items), 0);
}

#[test]
fn only_markdown_files_are_followed() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let main = write_md(dir.path(), "main.md", "Data in [here](data.txt).\n");
    write_md(dir.path(), "data.txt", "# not markdown\n");

    let doc = md_pdf::parse_markdown(&main, true).unwrap();
    assert_eq!(anchors(&doc.items).len(), 1);
}

#[test]
fn parser_can_be_reused() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let a = write_md(dir.path(), "a.md", "[b](b.md)\n");
    write_md(dir.path(), "b.md", "b\n");

    let mut parser = Parser::new();
    let first = parser.parse(&a, true).unwrap();
    let second = parser.parse(&a, true).unwrap();
    assert_eq!(first.items, second.items);
    assert_eq!(anchors(&second.items).len(), 2);
}

#[test]
fn error_in_included_file_aborts_the_parse() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let main = write_md(dir.path(), "main.md", "[broken](broken.md)\n");
    write_md(dir.path(), "broken.md", "~~~\nnever closed\n");

    assert!(md_pdf::parse_markdown(&main, true).is_err());
}
