//! Multimedia content descriptor

use bytes::Bytes;
use std::fmt;

/// Where the content bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    /// Resolved through the content resolver when the transfer starts
    Url(String),
    /// Already in memory
    Data(Bytes),
}

/// Content to share, stream or receive
#[derive(Debug, Clone, PartialEq)]
pub struct MmContent {
    source: ContentSource,
    encoding: String,
    size: Option<u64>,
    name: Option<String>,
}

impl MmContent {
    /// Content backed by a URL, size still unknown
    pub fn from_url(url: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self {
            source: ContentSource::Url(url.into()),
            encoding: encoding.into(),
            size: None,
            name: None,
        }
    }

    /// Content backed by a URL with a known size
    pub fn from_url_with_size(url: impl Into<String>, encoding: impl Into<String>, size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::from_url(url, encoding)
        }
    }

    /// In-memory content; the size is the buffer length
    pub fn from_bytes(name: impl Into<String>, encoding: impl Into<String>, data: Bytes) -> Self {
        Self {
            size: Some(data.len() as u64),
            source: ContentSource::Data(data),
            encoding: encoding.into(),
            name: Some(name.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn url(&self) -> Option<&str> {
        match &self.source {
            ContentSource::Url(url) => Some(url),
            ContentSource::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match &self.source {
            ContentSource::Data(data) => Some(data),
            ContentSource::Url(_) => None,
        }
    }

    /// Replace the data source with received bytes
    pub fn set_data(&mut self, data: Bytes) {
        self.size = Some(data.len() as u64);
        self.source = ContentSource::Data(data);
    }

    /// Size in bytes, `None` while unknown
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Size in bytes with `-1` standing for unknown, as carried in signalling
    pub fn size_or_unknown(&self) -> i64 {
        self.size.map(|s| s as i64).unwrap_or(-1)
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    pub fn kb_size(&self) -> Option<u64> {
        self.size.map(|s| s / 1024)
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// MIME subtype ("image/jpeg" gives "jpeg")
    pub fn codec(&self) -> &str {
        match self.encoding.split_once('/') {
            Some((_, subtype)) => subtype,
            None => &self.encoding,
        }
    }

    /// Display name, falling back to the last path segment of the URL
    pub fn name(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        match &self.source {
            ContentSource::Url(url) => url.rsplit('/').next().unwrap_or(url),
            ContentSource::Data(_) => "",
        }
    }
}

impl fmt::Display for MmContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ContentSource::Url(url) => write!(f, "{} ({} bytes)", url, self.size_or_unknown()),
            ContentSource::Data(_) => write!(f, "{} ({} bytes)", self.name(), self.size_or_unknown()),
        }
    }
}
