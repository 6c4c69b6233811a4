//! Extension-based content classification.
//!
//! Binary detection is an allow-list: anything not listed is treated as text.
//! MIME inference uses a small fixed table and falls back to
//! [`DEFAULT_MIME_TYPE`].

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "pdf", "zip", "gz", "tgz", "tar",
    "bz2", "xz", "7z", "rar", "zst", "exe", "dll", "so", "dylib", "bin", "dat", "db", "sqlite",
    "wasm", "mp3", "mp4", "wav", "ogg", "avi", "mov", "mkv", "webm", "woff", "woff2", "ttf", "otf",
    "eot", "class", "jar",
];

const MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("toml", "application/toml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("wasm", "application/wasm"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Binary,
    Text,
}

/// Lowercased extension of the last path segment, if any.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn classify(path: &str) -> ContentClass {
    match extension_of(path) {
        Some(ext) if BINARY_EXTENSIONS.contains(&ext.as_str()) => ContentClass::Binary,
        _ => ContentClass::Text,
    }
}

pub fn mime_type_for(path: &str) -> &'static str {
    extension_of(path)
        .and_then(|ext| {
            MIME_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_MIME_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("images/logo.PNG"), ContentClass::Binary);
        assert_eq!(classify("notes/a.txt"), ContentClass::Text);
        assert_eq!(classify("Makefile"), ContentClass::Text);
        assert_eq!(classify("archive.unknownext"), ContentClass::Text);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type_for("b.png"), "image/png");
        assert_eq!(mime_type_for("dir/data.json"), "application/json");
        assert_eq!(mime_type_for("noext"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_for(".bashrc"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b.tar.GZ").as_deref(), Some("gz"));
        assert_eq!(extension_of("dir.d/file"), None);
        assert_eq!(extension_of("trailing."), None);
    }
}
