mod common;

use md_pdf::{Alignment, Item, ListKind, ListStart, ParseError};

use common::{content, parse, plain_text};

#[test]
fn atx_heading_is_labeled_and_registered() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_md(dir.path(), "doc.md", "# Hello World\n\nBody text.\n");
    let doc = md_pdf::parse_markdown(&path, false).unwrap();

    let label = format!("#hello-world/{}", path.display());
    match content(&doc) {
        [Item::Heading(h), Item::Paragraph(p)] => {
            assert_eq!(h.level, 1);
            assert_eq!(plain_text(&h.text), "Hello World");
            assert_eq!(h.label, label);
            assert_eq!(plain_text(p), "Body text.");
        }
        other => panic!("{other:?}"),
    }
    assert!(doc.labeled_headings.contains_key(&label));
}

#[test]
fn explicit_heading_label_wins_over_slug() {
    let doc = parse("## Install {#setup}\n");
    match content(&doc) {
        [Item::Heading(h)] => {
            assert_eq!(h.level, 2);
            assert!(h.label.starts_with("#setup/"), "{}", h.label);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn setext_heading() {
    let doc = parse("Title\n=====\n\nafter\n");
    match content(&doc) {
        [Item::Heading(h), Item::Paragraph(_)] => {
            assert_eq!(h.level, 1);
            assert_eq!(plain_text(&h.text), "Title");
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn emphasis_styles() {
    let doc = parse("plain *italic* **bold** ~~struck~~\n");
    let [Item::Paragraph(p)] = content(&doc) else {
        panic!("{:?}", doc.items);
    };
    let styled: Vec<(&str, bool, bool, bool)> = p
        .items
        .iter()
        .filter_map(|i| match i {
            Item::Text(t) => {
                let o = t.opts;
                Some((t.text.as_str(), o.bold, o.italic, o.strikethrough))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        styled,
        vec![
            ("plain", false, false, false),
            ("italic", false, true, false),
            ("bold", true, false, false),
            ("struck", false, false, true),
        ]
    );
}

#[test]
fn unmatched_markers_degrade_to_text() {
    for src in ["a * b", "**open only", "`unclosed code", "[not a link"] {
        let doc = parse(src);
        let [Item::Paragraph(p)] = content(&doc) else {
            panic!("{src}: {:?}", doc.items);
        };
        assert!(p.items.iter().all(|i| matches!(i, Item::Text(_))), "{src}");
        assert_eq!(plain_text(p), src);
    }
}

#[test]
fn fenced_code_keeps_lines_and_syntax() {
    let doc = parse("```rust\nfn main() {}\n    let x = 1;\n```\n");
    match content(&doc) {
        [Item::Code(c)] => {
            assert_eq!(c.syntax, "rust");
            assert!(!c.inlined);
            assert_eq!(c.text, "fn main() {}\n    let x = 1;");
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn shorter_fence_does_not_close_longer_one() {
    let doc = parse("````\n```\ninside\n````\nafter\n");
    match content(&doc) {
        [Item::Code(c), Item::Paragraph(p)] => {
            assert_eq!(c.text, "```\ninside");
            assert_eq!(plain_text(p), "after");
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn unterminated_fence_is_fatal() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_md(dir.path(), "doc.md", "text\n\n```cpp\nint x;\n");
    let err = md_pdf::parse_markdown(&path, false).unwrap_err();
    match &err {
        ParseError::UnterminatedFence { line } => assert_eq!(line, "```cpp"),
        other => panic!("{other:?}"),
    }
    assert!(err.to_string().contains("```cpp"));
}

#[test]
fn math_fence_becomes_formula() {
    let doc = parse("```math\nE = mc^2\n```\n");
    match content(&doc) {
        [Item::Math(m)] => {
            assert_eq!(m.expr, "E = mc^2");
            assert!(!m.inlined);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn table_rows_never_exceed_columns() {
    let doc = parse("| a | b |\n|:--|--:|\n| 1 | 2 | 3 |\n| x |\n");
    let [Item::Table(t)] = content(&doc) else {
        panic!("{:?}", doc.items);
    };
    assert_eq!(t.alignments, vec![Alignment::Left, Alignment::Right]);
    assert_eq!(t.rows.len(), 3);
    for row in &t.rows {
        assert!(row.cells.len() <= t.columns_count());
    }
    assert_eq!(t.rows[1].cells.len(), 2);
}

#[test]
fn table_followed_by_blockquote() {
    let doc = parse("| a | b |\n|---|---|\n| 1 | 2 |\n> bar\n");
    match content(&doc) {
        [Item::Table(t), Item::Blockquote(q)] => {
            assert_eq!(t.columns_count(), 2);
            assert_eq!(t.rows.len(), 2);
            match q.items.as_slice() {
                [Item::Paragraph(p)] => assert_eq!(plain_text(p), "bar"),
                other => panic!("{other:?}"),
            }
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn star_without_space_is_not_a_list() {
    let doc = parse("*text\n\n- item\n");
    match content(&doc) {
        [Item::Paragraph(p), Item::List(list)] => {
            assert_eq!(plain_text(p), "*text");
            assert_eq!(list.items.len(), 1);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn list_kinds_and_numbering() {
    let doc = parse("1. one\n2. two\n- three\n");
    let [Item::List(list)] = content(&doc) else {
        panic!("{:?}", doc.items);
    };
    let kinds: Vec<(ListKind, ListStart)> = list.items.iter().map(|i| (i.kind, i.start)).collect();
    assert_eq!(
        kinds,
        vec![
            (ListKind::Ordered, ListStart::Start),
            (ListKind::Ordered, ListStart::Continue),
            (ListKind::Unordered, ListStart::Start),
        ]
    );
    assert_eq!(list.items[1].number, 2);
}

#[test]
fn blockquote_wraps_its_paragraph() {
    let doc = parse("> quoted\n> more\n");
    match content(&doc) {
        [Item::Blockquote(q)] => match q.items.as_slice() {
            [Item::Paragraph(p)] => assert_eq!(plain_text(p), "quoted more"),
            other => panic!("{other:?}"),
        },
        other => panic!("{other:?}"),
    }
}

#[test]
fn footnote_reference_matches_definition() {
    let doc = parse("Claim[^src].\n\n[^src]: Where it comes from.\n");
    let [Item::Paragraph(p)] = content(&doc) else {
        panic!("{:?}", doc.items);
    };
    let id = p
        .items
        .iter()
        .find_map(|i| match i {
            Item::FootnoteRef(r) => Some(r.id.clone()),
            _ => None,
        })
        .expect("footnote reference");
    assert!(id.starts_with("#^src/"), "{id}");
    assert!(doc.footnotes.contains_key(&id));
}

#[test]
fn external_link_keeps_url() {
    let doc = parse("Visit [the site](https://example.com).\n");
    let [Item::Paragraph(p)] = content(&doc) else {
        panic!("{:?}", doc.items);
    };
    let link = p
        .items
        .iter()
        .find_map(|i| match i {
            Item::Link(l) => Some(l),
            _ => None,
        })
        .expect("link");
    assert_eq!(link.url, "https://example.com");
    assert_eq!(link.text, "the site");
}

#[test]
fn html_comments_are_dropped() {
    let doc = parse("before\n<!--\nhidden\n-->\nafter\n");
    let text: Vec<String> = content(&doc)
        .iter()
        .filter_map(|i| match i {
            Item::Paragraph(p) => Some(plain_text(p)),
            _ => None,
        })
        .collect();
    assert!(text.iter().all(|t| !t.contains("hidden")), "{text:?}");
    assert!(text.join(" ").contains("before"));
    assert!(text.join(" ").contains("after"));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = md_pdf::parse_markdown(&dir.path().join("absent.md"), false).unwrap_err();
    assert!(matches!(err, ParseError::Io { .. }));
}
