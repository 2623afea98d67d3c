//! File classification
//!
//! A classifier is an ordered list of small predicates; the first one that
//! recognizes a URL decides its extension.

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Returns the file extension when a URL (plus optional content type) is a downloadable file
pub type FilePredicate = Arc<dyn Fn(&Url, Option<&str>) -> Option<String> + Send + Sync>;

/// Where a URL should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Page,
    DownloadableFile(String),
}

impl Classification {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::DownloadableFile(_))
    }
}

/// MIME types recognized for each default extension
const MIME_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("text/csv", "csv"),
    ("application/zip", "zip"),
    ("application/x-zip-compressed", "zip"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
];

/// Lowercased extension of the last path segment, if any
pub fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Matches URLs whose path ends in an allowed extension
pub fn by_extension(extensions: &HashSet<String>) -> FilePredicate {
    let extensions = extensions.clone();
    Arc::new(move |url: &Url, _content_type: Option<&str>| {
        url_extension(url).filter(|ext| extensions.contains(ext))
    })
}

/// Matches responses whose content type maps to an allowed extension
pub fn by_mime_type(extensions: &HashSet<String>) -> FilePredicate {
    let extensions = extensions.clone();
    Arc::new(move |_url: &Url, content_type: Option<&str>| {
        let mime = content_type?
            .split(';')
            .next()?
            .trim()
            .to_ascii_lowercase();
        MIME_TYPES
            .iter()
            .find(|(candidate, ext)| *candidate == mime && extensions.contains(*ext))
            .map(|(_, ext)| ext.to_string())
    })
}

/// Routes URLs to the page frontier or the download queue
#[derive(Clone)]
pub struct FileClassifier {
    predicates: Vec<FilePredicate>,
}

impl FileClassifier {
    /// Extension allow-list first, then content type
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions: HashSet<String> = extensions
            .iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self::from_predicates(vec![by_extension(&extensions), by_mime_type(&extensions)])
    }

    pub fn from_predicates(predicates: Vec<FilePredicate>) -> Self {
        Self { predicates }
    }

    pub fn classify(&self, url: &Url, content_type: Option<&str>) -> Classification {
        self.predicates
            .iter()
            .find_map(|predicate| predicate(url, content_type))
            .map(Classification::DownloadableFile)
            .unwrap_or(Classification::Page)
    }
}
