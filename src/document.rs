//! Document loading: turn a path into an immutable [`Document`].
//!
//! [`PlainTextLoader`] reads UTF-8 text files and [`DocxLoader`] extracts the body text of Word
//! documents. [`FileLoader`] picks between them by extension; other formats plug in by
//! implementing [`DocumentLoader`].

use async_trait::async_trait;
use quick_xml::{Reader, events::Event};
use serde::Serialize;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions accepted by [`PlainTextLoader`].
const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "text", "rst"];

/// Archive member holding the main body of a Word document.
const DOCX_BODY: &str = "word/document.xml";

/// Failures raised while reading a document.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The file extension is not handled by the loader.
    #[error("unsupported document format: {}", path.display())]
    UnsupportedFormat {
        /// Offending path.
        path: PathBuf,
    },
    /// The file could not be read.
    #[error("failed to read document {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid UTF-8.
    #[error("document {} is not valid UTF-8", path.display())]
    InvalidEncoding {
        /// Offending path.
        path: PathBuf,
    },
    /// The file has the right extension but its contents cannot be parsed.
    #[error("document {} is malformed: {reason}", path.display())]
    Malformed {
        /// Offending path.
        path: PathBuf,
        /// What the parser rejected.
        reason: String,
    },
}

/// Source identifier plus extracted plain text. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    source: String,
    text: String,
}

impl Document {
    /// Wrap already extracted text.
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    /// Opaque identifier of where the text came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Extracted plain text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Narrow interface to whatever turns a path into plain text.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Read the document at `path`.
    async fn load(&self, path: &Path) -> Result<Document, LoaderError>;
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, LoaderError> {
    tokio::fs::read(path).await.map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loader used by the reader service: Word documents go to [`DocxLoader`], everything else to
/// [`PlainTextLoader`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self, path: &Path) -> Result<Document, LoaderError> {
        if DocxLoader::is_supported(path) {
            DocxLoader.load(path).await
        } else {
            PlainTextLoader.load(path).await
        }
    }
}

/// Loader for UTF-8 plain-text and Markdown files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextLoader;

impl PlainTextLoader {
    fn is_supported(path: &Path) -> bool {
        has_extension(path, PLAIN_TEXT_EXTENSIONS)
    }
}

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    async fn load(&self, path: &Path) -> Result<Document, LoaderError> {
        if !Self::is_supported(path) {
            return Err(LoaderError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }

        let bytes = read_bytes(path).await?;
        let text = String::from_utf8(bytes).map_err(|_| LoaderError::InvalidEncoding {
            path: path.to_path_buf(),
        })?;

        tracing::debug!(path = %path.display(), bytes = text.len(), "Loaded document");
        Ok(Document::new(path.display().to_string(), text))
    }
}

/// Loader for Office Open XML word-processing files (`.docx`).
///
/// Only the main body is read: the text runs of every paragraph, one paragraph per line, with
/// tabs and line breaks kept. Headers, footers, comments and embedded objects are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxLoader;

impl DocxLoader {
    fn is_supported(path: &Path) -> bool {
        has_extension(path, &["docx"])
    }
}

#[async_trait]
impl DocumentLoader for DocxLoader {
    async fn load(&self, path: &Path) -> Result<Document, LoaderError> {
        if !Self::is_supported(path) {
            return Err(LoaderError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }

        let bytes = read_bytes(path).await?;
        let malformed = |reason: String| LoaderError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let xml = read_docx_body(bytes).map_err(malformed)?;
        let text = extract_docx_text(&xml).map_err(malformed)?;

        tracing::debug!(path = %path.display(), chars = text.chars().count(), "Loaded Word document");
        Ok(Document::new(path.display().to_string(), text))
    }
}

fn read_docx_body(bytes: Vec<u8>) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let mut body = archive
        .by_name(DOCX_BODY)
        .map_err(|err| format!("{DOCX_BODY}: {err}"))?;
    let mut xml = String::new();
    body.read_to_string(&mut xml)
        .map_err(|err| format!("{DOCX_BODY}: {err}"))?;
    Ok(xml)
}

/// Collect the `w:t` runs of a WordprocessingML body, ending each `w:p` with a newline.
fn extract_docx_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(tag) if tag.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(tag) => match tag.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" | b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Text(run) if in_run_text => {
                text.push_str(&run.unescape().map_err(|err| err.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let trimmed = text.trim_end_matches('\n').len();
    text.truncate(trimmed);
    Ok(text)
}
