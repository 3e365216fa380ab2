//! Index of installed font files, keyed by family and style.
//!
//! Scanning every font directory on each run is slow, so the index is
//! persisted as a small TSV file and a directory is only re-read when its
//! modification time changes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use memmap2::Mmap;
use ttf_parser::Face;

/// (lowercase family, bold, italic) -> (file, face index inside a collection)
type FontLookup = HashMap<(String, bool, bool), (PathBuf, u32)>;

static FONT_INDEX: OnceLock<FontLookup> = OnceLock::new();

const FONTS_ENV: &str = "MD_PDF_FONTS";
const NO_CACHE_ENV: &str = "MD_PDF_NO_FONT_CACHE";
const CACHE_VERSION: &str = "md-pdf-fonts v1";

#[derive(Clone)]
struct FaceRecord {
    family: String,
    bold: bool,
    italic: bool,
    face_index: u32,
}

#[derive(Default)]
struct IndexCache {
    dir_mtimes: HashMap<PathBuf, i64>,
    /// Empty vector marks a file without usable faces.
    files: HashMap<PathBuf, Vec<FaceRecord>>,
}

fn family_name(face: &Face) -> Option<String> {
    face.names()
        .into_iter()
        .filter(|n| n.name_id == ttf_parser::name_id::FAMILY && n.is_unicode())
        .find_map(|n| n.to_string())
}

fn read_faces(path: &Path) -> Vec<FaceRecord> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    // SAFETY: the mapping is read-only and dropped before returning.
    let Ok(data) = (unsafe { Mmap::map(&file) }) else {
        return Vec::new();
    };
    let count = if has_extension(path, &["ttc"]) {
        ttf_parser::fonts_in_collection(&data).unwrap_or(1)
    } else {
        1
    };
    (0..count)
        .filter_map(|face_index| {
            let face = Face::parse(&data, face_index).ok()?;
            Some(FaceRecord {
                family: family_name(&face)?,
                bold: face.is_bold(),
                italic: face.is_italic(),
                face_index,
            })
        })
        .collect()
}

fn font_directories() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    if let Some(val) = std::env::var_os(FONTS_ENV) {
        dirs.extend(std::env::split_paths(&val).filter(|p| !p.as_os_str().is_empty()));
    }

    #[cfg(target_os = "macos")]
    {
        dirs.extend([
            "/Library/Fonts".into(),
            "/System/Library/Fonts".into(),
            "/System/Library/Fonts/Supplemental".into(),
        ]);
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            dirs.push(home.join("Library/Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.extend(["/usr/share/fonts".into(), "/usr/local/share/fonts".into()]);
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            dirs.push(home.join(".local/share/fonts"));
            dirs.push(home.join(".fonts"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        let windir = std::env::var_os("WINDIR").map_or_else(|| "C:\\Windows".into(), PathBuf::from);
        dirs.push(windir.join("Fonts"));
    }

    dirs
}

fn cache_path() -> Option<PathBuf> {
    let dir = if cfg!(target_os = "macos") {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("Library/Caches"))
    } else if cfg!(target_os = "windows") {
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
    };
    dir.map(|d| d.join("md-pdf").join("font-index.tsv"))
}

fn load_cache(path: &Path) -> IndexCache {
    let mut cache = IndexCache::default();
    let Ok(content) = std::fs::read_to_string(path) else {
        return cache;
    };
    let mut lines = content.lines();
    if lines.next() != Some(CACHE_VERSION) {
        log::debug!("Ignoring font cache {} with unknown version", path.display());
        return cache;
    }
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            ["D", dir, mtime] => {
                if let Ok(mtime) = mtime.parse() {
                    cache.dir_mtimes.insert(PathBuf::from(dir), mtime);
                }
            }
            ["F", file, "-"] => {
                cache.files.entry(PathBuf::from(file)).or_default();
            }
            ["F", file, family, bold, italic, index] => {
                let Ok(face_index) = index.parse() else {
                    continue;
                };
                cache.files.entry(PathBuf::from(file)).or_default().push(FaceRecord {
                    family: family.to_string(),
                    bold: *bold == "1",
                    italic: *italic == "1",
                    face_index,
                });
            }
            _ => {}
        }
    }
    cache
}

fn save_cache(path: &Path, cache: &IndexCache) {
    let flag = |b: bool| if b { "1" } else { "0" };
    let mut out = format!("{CACHE_VERSION}\n");
    for (dir, mtime) in &cache.dir_mtimes {
        out.push_str(&format!("D\t{}\t{mtime}\n", dir.display()));
    }
    for (file, faces) in &cache.files {
        if faces.is_empty() {
            out.push_str(&format!("F\t{}\t-\n", file.display()));
        }
        for f in faces {
            out.push_str(&format!(
                "F\t{}\t{}\t{}\t{}\t{}\n",
                file.display(),
                f.family,
                flag(f.bold),
                flag(f.italic),
                f.face_index
            ));
        }
    }
    let written = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, out));
    if let Err(e) = written {
        log::debug!("Font cache not written to {}: {e}", path.display());
    }
}

fn mtime_secs(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

fn scan() -> FontLookup {
    let t0 = std::time::Instant::now();
    let cache_file = if std::env::var_os(NO_CACHE_ENV).is_some() {
        None
    } else {
        cache_path()
    };
    let old = cache_file.as_deref().map(load_cache).unwrap_or_default();
    let mut fresh = IndexCache::default();
    let mut index = FontLookup::new();
    let (mut reused, mut rescanned, mut parsed) = (0u32, 0u32, 0u32);

    let mut visited = HashSet::new();
    let mut pending = font_directories();
    while let Some(dir) = pending.pop() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut files = Vec::new();
        for path in entries.flatten().map(|e| e.path()) {
            if path.is_dir() {
                pending.push(path);
            } else if has_extension(&path, &["ttf", "otf", "ttc"]) {
                files.push(path);
            }
        }
        if files.is_empty() {
            continue;
        }

        let mtime = mtime_secs(&dir);
        let unchanged = old.dir_mtimes.get(&dir) == Some(&mtime);
        if unchanged {
            reused += 1;
        } else {
            rescanned += 1;
        }
        fresh.dir_mtimes.insert(dir, mtime);

        for file in files {
            let faces = match old.files.get(&file) {
                Some(faces) if unchanged => faces.clone(),
                _ => {
                    parsed += 1;
                    read_faces(&file)
                }
            };
            for f in &faces {
                index
                    .entry((f.family.to_lowercase(), f.bold, f.italic))
                    .or_insert_with(|| (file.clone(), f.face_index));
            }
            fresh.files.insert(file, faces);
        }
    }

    if let Some(path) = &cache_file {
        save_cache(path, &fresh);
    }

    log::info!(
        "Font scan: {:.1}ms, {reused} dirs cached / {rescanned} scanned, {parsed} files parsed, {} faces",
        t0.elapsed().as_secs_f64() * 1000.0,
        index.len(),
    );
    index
}

/// Locate an installed face. A missing bold/italic variant falls back to the
/// regular face of the same family.
pub(crate) fn find_font_file(family: &str, bold: bool, italic: bool) -> Option<(PathBuf, u32)> {
    let index = FONT_INDEX.get_or_init(scan);
    let family = family.to_lowercase();
    index
        .get(&(family.clone(), bold, italic))
        .or_else(|| index.get(&(family, false, false)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.tsv");
        let mut cache = IndexCache::default();
        cache.dir_mtimes.insert(PathBuf::from("/fonts"), 42);
        cache.files.insert(PathBuf::from("/fonts/broken.ttf"), Vec::new());
        cache.files.insert(
            PathBuf::from("/fonts/Sans-Bold.ttf"),
            vec![FaceRecord {
                family: "Sans".into(),
                bold: true,
                italic: false,
                face_index: 0,
            }],
        );
        save_cache(&path, &cache);

        let loaded = load_cache(&path);
        assert_eq!(loaded.dir_mtimes.get(Path::new("/fonts")), Some(&42));
        assert!(loaded.files[Path::new("/fonts/broken.ttf")].is_empty());
        let faces = &loaded.files[Path::new("/fonts/Sans-Bold.ttf")];
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].family, "Sans");
        assert!(faces[0].bold && !faces[0].italic);
    }

    #[test]
    fn stale_cache_version_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tsv");
        std::fs::write(&path, "v0\nD\t/fonts\t1\n").unwrap();
        assert!(load_cache(&path).dir_mtimes.is_empty());
    }

    #[test]
    fn recognizes_font_extensions() {
        assert!(has_extension(Path::new("a/B.TTF"), &["ttf", "otf"]));
        assert!(!has_extension(Path::new("a/b.woff"), &["ttf", "otf"]));
    }
}
