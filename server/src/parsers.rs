//! Content parsers, routing project files into indexable chunks.
//!
//! Each parser handles one content family (code, documents, PDFs, tabular
//! data, images). Routing is first-match over a fixed priority order. All
//! parsers read with lossy UTF-8 replacement and recover from per-file
//! errors by returning an empty chunk list; no error crosses a file
//! boundary.

use crate::types::{Chunk, ContentType, FileMetadata, MAX_PDF_PAGES};
use std::path::Path;
use tracing::warn;

// ---------------------------------------------------------------------------
// Parser trait and routing
// ---------------------------------------------------------------------------

pub trait Parser: Send + Sync {
    /// Does this parser handle the given file?
    fn handles(&self, path: &Path) -> bool;

    /// Parse a file into chunks. Empty on I/O failure or empty content.
    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk>;

    /// File metadata for the manifest. `None` when the file cannot be stat'd.
    fn metadata(&self, path: &Path) -> Option<FileMetadata>;

    /// Extensions this parser accepts, without the leading dot.
    fn supported_extensions(&self) -> &'static [&'static str];
}

/// Parsers in routing priority order. First accepting parser wins.
pub fn default_parsers() -> Vec<Box<dyn Parser>> {
    vec![
        Box::new(CodeParser),
        Box::new(DocumentParser),
        Box::new(PdfParser),
        Box::new(TabularParser),
        Box::new(ImageParser),
    ]
}

pub fn parser_for<'a>(parsers: &'a [Box<dyn Parser>], path: &Path) -> Option<&'a dyn Parser> {
    parsers.iter().find(|p| p.handles(path)).map(|p| p.as_ref())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn extension(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase()
}

fn file_name(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string()
}

/// Human-readable path, relative to the project root where possible.
fn display_path(path: &Path, project_root: &Path) -> String {
    path.strip_prefix(project_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Read a file as text with permissive UTF-8 replacement.
fn read_text_lossy(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Split into lines for 1-based accounting. The empty tail a trailing
/// newline would produce is dropped so line spans match the file.
fn split_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

fn stat_metadata(
    path: &Path,
    content_type: ContentType,
    language: Option<String>,
) -> Option<FileMetadata> {
    let meta = std::fs::metadata(path).ok()?;
    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Some(FileMetadata {
        path: path.to_string_lossy().to_string(),
        content_type,
        language,
        size_bytes: meta.len(),
        last_modified,
        content_hash: String::new(),
        chunk_count: 0,
    })
}

// ---------------------------------------------------------------------------
// Code parser
// ---------------------------------------------------------------------------

/// Extension to language table. Routing and metadata both consult this.
const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "c_sharp"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("sh", "bash"),
    ("bash", "bash"),
    ("zsh", "bash"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("xml", "xml"),
    ("html", "html"),
    ("css", "css"),
    ("sql", "sql"),
];

fn language_for(ext: &str) -> Option<&'static str> {
    LANGUAGE_TABLE.iter().find(|(e, _)| *e == ext).map(|(_, lang)| *lang)
}

/// Lines a running chunk accumulates before the next logical boundary splits it.
const CODE_CHUNK_TARGET_LINES: usize = 50;

/// Source code parser with line-based chunking at logical boundaries.
///
/// Chunks split on blank lines or definition starts once the running chunk
/// reaches the target size, and the trailing partial chunk is emitted at
/// EOF. AST-based chunking can replace this under the same contract.
pub struct CodeParser;

impl Parser for CodeParser {
    fn handles(&self, path: &Path) -> bool {
        language_for(&extension(path)).is_some()
    }

    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk> {
        let Some(content) = read_text_lossy(path) else { return Vec::new() };
        if content.trim().is_empty() {
            return Vec::new();
        }

        let language = language_for(&extension(path)).map(|s| s.to_string());
        let source_path = display_path(path, project_root);
        let lines = split_lines(&content);

        let mut chunks = Vec::new();
        let mut chunk_lines: Vec<&str> = Vec::new();
        let mut chunk_start = 1usize;

        for (i, &line) in lines.iter().enumerate() {
            let line_no = i + 1;
            chunk_lines.push(line);

            let is_boundary = chunk_lines.len() >= CODE_CHUNK_TARGET_LINES
                && (line.trim().is_empty()
                    || line.starts_with("class ")
                    || line.starts_with("def ")
                    || line.starts_with("function ")
                    || line.starts_with("export "));

            if is_boundary || line_no == lines.len() {
                let content = chunk_lines.join("\n");
                if !content.trim().is_empty() {
                    chunks.push(Chunk {
                        content,
                        source_path: source_path.clone(),
                        start_line: chunk_start,
                        end_line: line_no,
                        content_type: ContentType::Code,
                        language: language.clone(),
                        heading: None,
                        embedding_id: None,
                    });
                }
                chunk_lines.clear();
                chunk_start = line_no + 1;
            }
        }

        chunks
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        let language = language_for(&extension(path)).map(|s| s.to_string());
        stat_metadata(path, ContentType::Code, language)
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        const EXTS: &[&str] = &[
            "py", "js", "jsx", "ts", "tsx", "java", "go", "rs", "rb", "c", "h", "cpp", "hpp",
            "cs", "swift", "kt", "scala", "sh", "bash", "zsh", "toml", "yaml", "yml", "json",
            "xml", "html", "css", "sql",
        ];
        EXTS
    }
}

// ---------------------------------------------------------------------------
// Document parser
// ---------------------------------------------------------------------------

const PLAIN_TEXT_TARGET_LINES: usize = 30;

/// Markdown and plain text parser.
///
/// Markdown splits at headings with the heading text attached to each
/// section; plain text splits on blank lines once a chunk reaches the
/// target size.
pub struct DocumentParser;

/// Heading text when the line's first non-whitespace token is one or more
/// `#` followed by a space.
fn markdown_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 {
        return None;
    }
    let rest = &trimmed[hashes..];
    rest.strip_prefix(' ').map(|text| text.trim().to_string())
}

impl DocumentParser {
    fn parse_markdown(&self, source_path: &str, content: &str) -> Vec<Chunk> {
        let lines = split_lines(content);
        let mut chunks = Vec::new();
        let mut section_lines: Vec<&str> = Vec::new();
        let mut section_start = 1usize;
        let mut current_heading: Option<String> = None;

        for (i, &line) in lines.iter().enumerate() {
            let line_no = i + 1;
            match markdown_heading(line) {
                Some(heading) if !section_lines.is_empty() => {
                    let text = section_lines.join("\n");
                    if !text.trim().is_empty() {
                        chunks.push(Chunk {
                            content: text,
                            source_path: source_path.to_string(),
                            start_line: section_start,
                            end_line: line_no - 1,
                            content_type: ContentType::Document,
                            language: None,
                            heading: current_heading.clone(),
                            embedding_id: None,
                        });
                    }
                    section_lines = vec![line];
                    section_start = line_no;
                    current_heading = Some(heading);
                }
                Some(heading) => {
                    current_heading = Some(heading);
                    section_lines.push(line);
                }
                None => section_lines.push(line),
            }
        }

        if !section_lines.is_empty() {
            let text = section_lines.join("\n");
            if !text.trim().is_empty() {
                chunks.push(Chunk {
                    content: text,
                    source_path: source_path.to_string(),
                    start_line: section_start,
                    end_line: lines.len(),
                    content_type: ContentType::Document,
                    language: None,
                    heading: current_heading,
                    embedding_id: None,
                });
            }
        }

        chunks
    }

    fn parse_plain_text(&self, source_path: &str, content: &str) -> Vec<Chunk> {
        let lines = split_lines(content);
        let mut chunks = Vec::new();
        let mut para_lines: Vec<&str> = Vec::new();
        let mut para_start = 1usize;

        for (i, &line) in lines.iter().enumerate() {
            let line_no = i + 1;
            para_lines.push(line);

            let is_boundary = (para_lines.len() >= PLAIN_TEXT_TARGET_LINES
                && line.trim().is_empty())
                || line_no == lines.len();

            if is_boundary {
                let text = para_lines.join("\n");
                if !text.trim().is_empty() {
                    chunks.push(Chunk {
                        content: text,
                        source_path: source_path.to_string(),
                        start_line: para_start,
                        end_line: line_no,
                        content_type: ContentType::Document,
                        language: None,
                        heading: None,
                        embedding_id: None,
                    });
                }
                para_lines.clear();
                para_start = line_no + 1;
            }
        }

        chunks
    }
}

impl Parser for DocumentParser {
    fn handles(&self, path: &Path) -> bool {
        self.supported_extensions().contains(&extension(path).as_str())
    }

    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk> {
        let Some(content) = read_text_lossy(path) else { return Vec::new() };
        if content.trim().is_empty() {
            return Vec::new();
        }

        let source_path = display_path(path, project_root);
        match extension(path).as_str() {
            "md" | "markdown" => self.parse_markdown(&source_path, &content),
            _ => self.parse_plain_text(&source_path, &content),
        }
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        stat_metadata(path, ContentType::Document, Some(extension(path)))
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "txt", "rst", "adoc", "org"]
    }
}

// ---------------------------------------------------------------------------
// PDF parser
// ---------------------------------------------------------------------------

/// PDF parser emitting one chunk per page.
///
/// The page number is recorded as both start and end line. Extraction tries
/// `pdf-extract` first and falls back to `lopdf` before giving up.
pub struct PdfParser;

impl PdfParser {
    fn extract_pages(&self, path: &Path) -> Option<Vec<String>> {
        // pdf-extract panics on some malformed inputs; the panic must stay
        // contained to this file like any other extractor error.
        let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path));
        match extracted {
            Ok(Ok(pages)) => Some(pages),
            Ok(Err(e)) => {
                warn!(
                    file = file_name(path).as_str(),
                    error = %e,
                    "pdf-extract failed, trying lopdf"
                );
                self.extract_pages_lopdf(path)
            }
            Err(_) => {
                warn!(file = file_name(path).as_str(), "pdf-extract panicked, trying lopdf");
                self.extract_pages_lopdf(path)
            }
        }
    }

    fn extract_pages_lopdf(&self, path: &Path) -> Option<Vec<String>> {
        let doc = match lopdf::Document::load(path) {
            Ok(d) => d,
            Err(e) => {
                warn!(file = file_name(path).as_str(), error = %e, "Failed to parse PDF");
                return None;
            }
        };
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let pages = page_numbers
            .iter()
            .map(|&n| doc.extract_text(&[n]).unwrap_or_default())
            .collect();
        Some(pages)
    }
}

impl Parser for PdfParser {
    fn handles(&self, path: &Path) -> bool {
        extension(path) == "pdf"
    }

    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk> {
        let Some(pages) = self.extract_pages(path) else { return Vec::new() };

        if pages.len() > MAX_PDF_PAGES {
            warn!(
                file = file_name(path).as_str(),
                pages = pages.len(),
                kept = MAX_PDF_PAGES,
                "PDF exceeds page limit, truncating"
            );
        }

        let source_path = display_path(path, project_root);
        pages
            .into_iter()
            .take(MAX_PDF_PAGES)
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| {
                let page = i + 1;
                Chunk {
                    content: text,
                    source_path: source_path.clone(),
                    start_line: page,
                    end_line: page,
                    content_type: ContentType::Document,
                    language: None,
                    heading: Some(format!("Page {page}")),
                    embedding_id: None,
                }
            })
            .collect()
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        stat_metadata(path, ContentType::Document, Some("pdf".to_string()))
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }
}

// ---------------------------------------------------------------------------
// Tabular parser
// ---------------------------------------------------------------------------

/// Sample rows kept beyond the header row.
const TABULAR_SAMPLE_ROWS: usize = 10;

/// Delimited file and workbook parser.
///
/// Emits a single schema chunk per file (or per sheet for workbooks) with
/// column names, column count, and up to ten sample rows. Cell data beyond
/// the sample window is never read.
pub struct TabularParser;

impl TabularParser {
    fn schema_text(prefix: &str, rows: &[Vec<String>]) -> String {
        let headers = rows.first().cloned().unwrap_or_default();
        let mut text = String::new();
        text.push_str(prefix);
        text.push_str(&format!("Schema: {}\n", headers.join(", ")));
        text.push_str(&format!("Columns: {}\n", headers.len()));
        if rows.len() > 1 {
            let sample = (rows.len() - 1).min(TABULAR_SAMPLE_ROWS);
            text.push_str(&format!("Sample rows ({sample}):\n"));
            for row in &rows[1..] {
                text.push_str(&format!("  {}\n", row.join(", ")));
            }
        }
        text
    }

    fn parse_delimited(&self, path: &Path, source_path: &str, delimiter: u8) -> Vec<Chunk> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_path(path);
        let mut reader = match reader {
            Ok(r) => r,
            Err(e) => {
                warn!(file = file_name(path).as_str(), error = %e, "Failed to open delimited file");
                return Vec::new();
            }
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            match record {
                Ok(rec) => rows.push(rec.iter().map(|c| c.to_string()).collect()),
                Err(e) => {
                    warn!(file = file_name(path).as_str(), error = %e, "Failed to parse delimited file");
                    return Vec::new();
                }
            }
            if rows.len() > TABULAR_SAMPLE_ROWS {
                break;
            }
        }

        if rows.is_empty() {
            return Vec::new();
        }

        vec![Chunk {
            content: Self::schema_text("", &rows),
            source_path: source_path.to_string(),
            start_line: 1,
            end_line: rows.len(),
            content_type: ContentType::Data,
            language: None,
            heading: Some(format!("Schema: {}", file_name(path))),
            embedding_id: None,
        }]
    }

    fn parse_workbook(&self, path: &Path, source_path: &str) -> Vec<Chunk> {
        use calamine::Reader;

        let mut workbook = match calamine::open_workbook_auto(path) {
            Ok(wb) => wb,
            Err(e) => {
                warn!(file = file_name(path).as_str(), error = %e, "Failed to open workbook");
                return Vec::new();
            }
        };

        let mut chunks = Vec::new();
        let sheet_names = workbook.sheet_names().to_owned();
        for sheet in sheet_names {
            let range = match workbook.worksheet_range(&sheet) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        file = file_name(path).as_str(),
                        sheet = sheet.as_str(),
                        error = %e,
                        "Failed to read sheet"
                    );
                    continue;
                }
            };

            let rows: Vec<Vec<String>> = range
                .rows()
                .take(TABULAR_SAMPLE_ROWS + 1)
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            if rows.is_empty() {
                continue;
            }

            chunks.push(Chunk {
                content: Self::schema_text(&format!("Sheet: {sheet}\n"), &rows),
                source_path: source_path.to_string(),
                start_line: 1,
                end_line: rows.len(),
                content_type: ContentType::Data,
                language: None,
                heading: Some(format!("Schema: {} / {sheet}", file_name(path))),
                embedding_id: None,
            });
        }

        chunks
    }
}

impl Parser for TabularParser {
    fn handles(&self, path: &Path) -> bool {
        self.supported_extensions().contains(&extension(path).as_str())
    }

    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk> {
        let source_path = display_path(path, project_root);
        match extension(path).as_str() {
            "csv" => self.parse_delimited(path, &source_path, b','),
            "tsv" => self.parse_delimited(path, &source_path, b'\t'),
            "xlsx" => self.parse_workbook(path, &source_path),
            _ => Vec::new(),
        }
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        stat_metadata(path, ContentType::Data, Some(extension(path)))
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv", "xlsx"]
    }
}

// ---------------------------------------------------------------------------
// Image parser
// ---------------------------------------------------------------------------

/// EXIF tags worth indexing. Everything else is noise or binary.
const EXIF_TAG_ALLOWLIST: &[(exif::Tag, &str)] = &[
    (exif::Tag::ImageDescription, "ImageDescription"),
    (exif::Tag::Artist, "Artist"),
    (exif::Tag::Copyright, "Copyright"),
    (exif::Tag::DateTime, "DateTime"),
    (exif::Tag::Software, "Software"),
];

/// Image parser indexing metadata only. Visual content is out of scope;
/// the single chunk exists so images are discoverable by text search.
pub struct ImageParser;

impl ImageParser {
    fn decode_lines(&self, path: &Path, lines: &mut Vec<String>) {
        let reader = match image::ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
            Ok(r) => r,
            Err(e) => {
                warn!(file = file_name(path).as_str(), error = %e, "Failed to open image");
                return;
            }
        };
        let format = reader.format();

        match reader.decode() {
            Ok(img) => {
                lines.push(format!("Dimensions: {}x{}", img.width(), img.height()));
                if let Some(f) = format {
                    lines.push(format!("Format: {f:?}"));
                }
                lines.push(format!("Mode: {:?}", img.color()));
            }
            Err(e) => {
                warn!(file = file_name(path).as_str(), error = %e, "Failed to decode image");
                // Dimensions are often still recoverable from the header
                if let Ok(r) = image::ImageReader::open(path).and_then(|r| r.with_guessed_format())
                {
                    if let Ok((w, h)) = r.into_dimensions() {
                        lines.push(format!("Dimensions: {w}x{h}"));
                    }
                }
                if let Some(f) = format {
                    lines.push(format!("Format: {f:?}"));
                }
            }
        }
    }

    fn exif_lines(&self, path: &Path, lines: &mut Vec<String>) {
        let Ok(file) = std::fs::File::open(path) else { return };
        let mut reader = std::io::BufReader::new(file);
        let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else { return };

        for (tag, name) in EXIF_TAG_ALLOWLIST {
            if let Some(field) = exif.get_field(*tag, exif::In::PRIMARY) {
                lines.push(format!("{name}: {}", field.display_value()));
            }
        }
    }
}

impl Parser for ImageParser {
    fn handles(&self, path: &Path) -> bool {
        self.supported_extensions().contains(&extension(path).as_str())
    }

    fn parse(&self, path: &Path, project_root: &Path) -> Vec<Chunk> {
        let name = file_name(path);
        let mut lines = vec![format!("Image: {name}")];

        if let Ok(meta) = std::fs::metadata(path) {
            lines.push(format!("Size: {} bytes", meta.len()));
        }
        lines.push(format!("Path: {}", display_path(path, project_root)));

        let ext = extension(path);
        if ext != "svg" {
            self.decode_lines(path, &mut lines);
            if matches!(ext.as_str(), "jpg" | "jpeg" | "tiff") {
                self.exif_lines(path, &mut lines);
            }
        }

        vec![Chunk {
            content: lines.join("\n"),
            source_path: display_path(path, project_root),
            start_line: 0,
            end_line: 0,
            content_type: ContentType::Image,
            language: None,
            heading: Some(format!("Image metadata: {name}")),
            embedding_id: None,
        }]
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        stat_metadata(path, ContentType::Image, Some(extension(path)))
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp", "svg"]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn code_parser_emits_trailing_chunk_with_line_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hello.py", "def greet():\n    return \"hi\"\n");

        let chunks = CodeParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_path, "hello.py");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].content_type, ContentType::Code);
        assert_eq!(chunks[0].language.as_deref(), Some("python"));
    }

    #[test]
    fn code_parser_splits_long_files_at_boundaries() {
        let dir = TempDir::new().unwrap();
        let mut body = String::new();
        for i in 0..60 {
            body.push_str(&format!("x{i} = {i}\n"));
        }
        body.push('\n');
        for i in 0..10 {
            body.push_str(&format!("y{i} = {i}\n"));
        }
        let path = write(&dir, "long.py", &body);

        let chunks = CodeParser.parse(&path, dir.path());
        assert!(chunks.len() >= 2, "expected a split, got {} chunk(s)", chunks.len());
        // Chunks tile the file without overlap
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn code_parser_returns_empty_for_blank_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.rs", "\n\n   \n");
        assert!(CodeParser.parse(&path, dir.path()).is_empty());
    }

    #[test]
    fn markdown_splits_on_headings() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "README.md",
            "# Title\ntext\n## Section A\nalpha\n## Section B\nbravo\n",
        );

        let chunks = DocumentParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading.as_deref(), Some("Title"));
        assert_eq!(chunks[1].heading.as_deref(), Some("Section A"));
        assert_eq!(chunks[2].heading.as_deref(), Some("Section B"));
        assert!(chunks[2].content.contains("bravo"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[1].start_line, 3);
    }

    #[test]
    fn heading_requires_space_after_hashes() {
        assert_eq!(markdown_heading("# Title"), Some("Title".to_string()));
        assert_eq!(markdown_heading("  ## Indented"), Some("Indented".to_string()));
        assert_eq!(markdown_heading("#hashtag"), None);
        assert_eq!(markdown_heading("plain"), None);
    }

    #[test]
    fn plain_text_chunks_on_blank_lines_past_target() {
        let dir = TempDir::new().unwrap();
        let mut body = String::new();
        for i in 0..35 {
            body.push_str(&format!("line {i}\n"));
        }
        body.push('\n');
        body.push_str("tail\n");
        let path = write(&dir, "notes.txt", &body);

        let chunks = DocumentParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.contains("tail"));
    }

    #[test]
    fn csv_emits_single_schema_chunk() {
        let dir = TempDir::new().unwrap();
        let mut body = String::from("name,age,city\n");
        for i in 0..20 {
            body.push_str(&format!("person{i},{i},town{i}\n"));
        }
        let path = write(&dir, "people.csv", &body);

        let chunks = TabularParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.content_type, ContentType::Data);
        assert!(chunk.content.contains("Schema: name, age, city"));
        assert!(chunk.content.contains("Columns: 3"));
        assert!(chunk.content.contains("Sample rows (10):"));
        assert!(chunk.content.contains("person0"));
        // Only the sample window is read
        assert!(!chunk.content.contains("person15"));
        assert_eq!(chunk.heading.as_deref(), Some("Schema: people.csv"));
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "data.tsv", "a\tb\n1\t2\n");

        let chunks = TabularParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("Schema: a, b"));
    }

    #[test]
    fn unparseable_pdf_yields_no_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "broken.pdf", "this is not a pdf");
        // Both extractors fail; the error stays contained to this file
        assert!(PdfParser.parse(&path, dir.path()).is_empty());
        assert!(PdfParser.metadata(&path).is_some());
    }

    #[test]
    fn image_chunk_has_zero_line_span() {
        let dir = TempDir::new().unwrap();
        // Smallest valid 1x1 transparent PNG
        let png: &[u8] = &[
            0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
            0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78,
            0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00,
            0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
        ];
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, png).unwrap();

        let chunks = ImageParser.parse(&path, dir.path());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.start_line, 0);
        assert_eq!(chunk.end_line, 0);
        assert_eq!(chunk.content_type, ContentType::Image);
        assert!(chunk.content.contains("Image: pixel.png"));
        assert!(chunk.content.contains("Dimensions: 1x1"));
    }

    #[test]
    fn routing_prefers_code_over_document() {
        let parsers = default_parsers();
        let code = parser_for(&parsers, Path::new("src/lib.rs")).unwrap();
        assert!(code.handles(Path::new("src/lib.rs")));

        let doc = parser_for(&parsers, Path::new("README.md")).unwrap();
        assert!(doc.supported_extensions().contains(&"md"));

        assert!(parser_for(&parsers, Path::new("binary.exe")).is_none());
    }

    #[test]
    fn metadata_reports_stat_fields() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "mod.rs", "pub fn f() {}\n");

        let meta = CodeParser.metadata(&path).unwrap();
        assert_eq!(meta.content_type, ContentType::Code);
        assert_eq!(meta.language.as_deref(), Some("rust"));
        assert_eq!(meta.size_bytes, 14);
        assert!(meta.last_modified > 0);

        assert!(CodeParser.metadata(&dir.path().join("missing.rs")).is_none());
    }
}
