//! Polymorphic attachment handles for outbound notifications.
//!
//! An [`Attachment`] is one of four variants — file, in-memory, HTTP, or
//! data-URL — constructed eagerly (metadata only) and read lazily. An
//! [`AttachmentSet`] is the ordered collection a [`NotificationRequest`] (see
//! `notifyhub-types`) carries, with an optional aggregate size cap enforced
//! at add-time against *declared* sizes.
//!
//! HTTP probing and fetching use a blocking client, mirroring the rest of
//! this codebase's synchronous HTTP helpers; the async dispatcher offloads
//! attachment reads onto a blocking-safe executor when needed.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced by attachment construction or content access.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment source not found: {0}")]
    NotFound(String),
    #[error("malformed data URL: {0}")]
    MalformedDataUrl(String),
    #[error("adding this attachment would exceed the {limit} byte aggregate limit (declared size {declared})")]
    SizeLimitExceeded { limit: u64, declared: u64 },
    #[error("I/O error reading attachment: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error fetching attachment: {0}")]
    Http(#[from] reqwest::Error),
}

/// Default timeout for HTTP-variant HEAD probes and fetches.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One attachment, one of four content sources.
#[derive(Debug, Clone)]
pub enum Attachment {
    File(FileAttachment),
    Memory(MemoryAttachment),
    Http(HttpAttachment),
    DataUrl(DataUrlAttachment),
}

impl Attachment {
    pub fn name(&self) -> &str {
        match self {
            Attachment::File(a) => &a.name,
            Attachment::Memory(a) => &a.name,
            Attachment::Http(a) => &a.name,
            Attachment::DataUrl(a) => &a.name,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Attachment::File(a) => &a.mime_type,
            Attachment::Memory(a) => &a.mime_type,
            Attachment::Http(a) => &a.mime_type,
            Attachment::DataUrl(a) => &a.mime_type,
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Attachment::File(a) => a.exists,
            Attachment::Memory(_) => true,
            Attachment::Http(a) => a.exists,
            Attachment::DataUrl(_) => true,
        }
    }

    /// Declared size, known without reading content.
    pub fn size(&self) -> u64 {
        match self {
            Attachment::File(a) => a.size,
            Attachment::Memory(a) => a.bytes.len() as u64,
            Attachment::Http(a) => a.size,
            Attachment::DataUrl(a) => a.bytes.len() as u64,
        }
    }

    /// Read the full content, fetching/opening lazily for File and Http
    /// variants.
    pub fn open(&self) -> Result<Vec<u8>, AttachmentError> {
        match self {
            Attachment::File(a) => {
                let mut file = fs::File::open(&a.path)?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
            Attachment::Memory(a) => Ok(a.bytes.clone()),
            Attachment::Http(a) => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(a.timeout)
                    .build()?;
                let response = client.get(&a.url).send()?.error_for_status()?;
                Ok(response.bytes()?.to_vec())
            }
            Attachment::DataUrl(a) => Ok(a.bytes.clone()),
        }
    }

    /// Standard base64 of the content (triggers a read).
    pub fn base64(&self) -> Result<String, AttachmentError> {
        Ok(BASE64.encode(self.open()?))
    }

    /// SHA-256 hex digest of the content (triggers a read).
    pub fn hash(&self) -> Result<String, AttachmentError> {
        let bytes = self.open()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex_encode(&hasher.finalize()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryAttachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpAttachment {
    pub name: String,
    pub mime_type: String,
    pub url: String,
    pub exists: bool,
    pub size: u64,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DataUrlAttachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

fn infer_mime_from_extension(path: &Path) -> String {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn default_name_for(path_or_url: &str) -> String {
    path_or_url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

/// Ordered collection of attachments with an optional aggregate size cap.
#[derive(Debug, Clone, Default)]
pub struct AttachmentSet {
    items: Vec<Attachment>,
    max_total_size: u64,
    http_timeout: Duration,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            max_total_size: 0,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn set_max_size(&mut self, n: u64) {
        self.max_total_size = n;
    }

    pub fn set_timeout(&mut self, d: Duration) {
        self.http_timeout = d;
    }

    /// Classify `path_or_url` by prefix and add it:
    /// `data:` → DATA_URL; `http://`/`https://` → HTTP; otherwise FILE.
    pub fn add(
        &mut self,
        path_or_url: &str,
        name_override: Option<&str>,
    ) -> Result<(), AttachmentError> {
        if let Some(rest) = path_or_url.strip_prefix("data:") {
            return self.add_data_url(rest, name_override);
        }
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return self.add_http(path_or_url, name_override);
        }
        self.add_file(path_or_url, name_override)
    }

    fn add_file(
        &mut self,
        path_str: &str,
        name_override: Option<&str>,
    ) -> Result<(), AttachmentError> {
        let path = PathBuf::from(path_str);
        let metadata = fs::metadata(&path);
        let (exists, size) = match &metadata {
            Ok(m) => (true, m.len()),
            Err(_) => (false, 0),
        };
        let name = name_override
            .map(str::to_string)
            .unwrap_or_else(|| default_name_for(path_str));
        let mime_type = infer_mime_from_extension(&path);

        self.reserve_budget(size)?;
        self.items.push(Attachment::File(FileAttachment {
            name,
            mime_type,
            path,
            exists,
            size,
        }));
        Ok(())
    }

    fn add_http(
        &mut self,
        url: &str,
        name_override: Option<&str>,
    ) -> Result<(), AttachmentError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.http_timeout)
            .build()?;

        let (exists, size, content_type) = match client.head(url).send() {
            Ok(resp) if resp.status().is_success() => {
                let size = resp
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                (true, size, content_type)
            }
            _ => (false, 0, None),
        };

        let name = name_override
            .map(str::to_string)
            .unwrap_or_else(|| default_name_for(url));
        let mime_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

        self.reserve_budget(size)?;
        self.items.push(Attachment::Http(HttpAttachment {
            name,
            mime_type,
            url: url.to_string(),
            exists,
            size,
            timeout: self.http_timeout,
        }));
        Ok(())
    }

    fn add_data_url(
        &mut self,
        rest: &str,
        name_override: Option<&str>,
    ) -> Result<(), AttachmentError> {
        // rest is `<mimeType>[;base64],<payload>`
        let comma = rest
            .find(',')
            .ok_or_else(|| AttachmentError::MalformedDataUrl(rest.to_string()))?;
        let (header, payload) = rest.split_at(comma);
        let payload = &payload[1..];

        let is_base64 = header.ends_with(";base64");
        let mime_type = if is_base64 {
            header.trim_end_matches(";base64")
        } else {
            header
        };
        let mime_type = if mime_type.is_empty() {
            "text/plain".to_string()
        } else {
            mime_type.to_string()
        };

        let bytes = if is_base64 {
            BASE64
                .decode(payload)
                .map_err(|e| AttachmentError::MalformedDataUrl(e.to_string()))?
        } else {
            urlencoding_decode(payload).into_bytes()
        };

        let name = name_override
            .map(str::to_string)
            .unwrap_or_else(|| "data-url-attachment".to_string());

        self.reserve_budget(bytes.len() as u64)?;
        self.items.push(Attachment::DataUrl(DataUrlAttachment {
            name,
            mime_type,
            bytes,
        }));
        Ok(())
    }

    /// Construct a MEMORY attachment from raw bytes.
    pub fn add_data(
        &mut self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<(), AttachmentError> {
        self.reserve_budget(bytes.len() as u64)?;
        self.items.push(Attachment::Memory(MemoryAttachment {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }));
        Ok(())
    }

    fn reserve_budget(&self, declared_size: u64) -> Result<(), AttachmentError> {
        if self.max_total_size == 0 {
            return Ok(());
        }
        let projected = self.total_size() + declared_size;
        if projected > self.max_total_size {
            return Err(AttachmentError::SizeLimitExceeded {
                limit: self.max_total_size,
                declared: declared_size,
            });
        }
        Ok(())
    }

    pub fn get_all(&self) -> &[Attachment] {
        &self.items
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn total_size(&self) -> u64 {
        self.items.iter().map(Attachment::size).sum()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Minimal percent-decoding for non-base64 data URLs; data URLs in practice
/// almost always use the base64 form, but the grammar permits raw text.
fn urlencoding_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                out.push(byte as char);
                continue;
            }
            out.push('%');
            out.push_str(&hex);
        } else {
            out.push(c);
        }
    }
    out
}
