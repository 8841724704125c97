//! Multipart form builder.
//!
//! Parts are kept as owned bytes so a form can be cloned and re-sent on
//! retry; the reqwest transport converts it into `reqwest::multipart::Form`
//! at send time.

use std::path::Path;

use reqwest::header::HeaderMap;

use crate::error::{Error, Result};

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
}

/// An ordered list of multipart parts.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plain text field.
    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: key.into(),
            data: value.into().into_bytes(),
            filename: None,
            content_type: None,
            headers: HeaderMap::new(),
        });
        self
    }

    /// Appends raw bytes with extra part headers.
    pub fn bytes(mut self, key: impl Into<String>, data: impl Into<Vec<u8>>, headers: HeaderMap) -> Self {
        self.parts.push(FormPart {
            name: key.into(),
            data: data.into(),
            filename: None,
            content_type: None,
            headers,
        });
        self
    }

    /// Appends a file part with `Content-Disposition` filename and content type.
    pub fn file(
        mut self,
        key: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts.push(FormPart {
            name: key.into(),
            data: data.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            headers: HeaderMap::new(),
        });
        self
    }

    /// Reads a file from disk and appends it as a file part named after the file.
    pub async fn file_from_path(
        self,
        key: impl Into<String>,
        path: impl AsRef<Path>,
        content_type: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Path has no file name: {}", path.display()),
                ))
            })?
            .to_string();
        Ok(self.file(key, filename, content_type, data))
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Converts into a reqwest form. An unparseable content type is an
    /// [`Error::InvalidRequest`].
    pub(crate) fn into_reqwest(self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for part in self.parts {
            let mut reqwest_part = reqwest::multipart::Part::bytes(part.data).headers(part.headers);
            if let Some(filename) = part.filename {
                reqwest_part = reqwest_part.file_name(filename);
            }
            if let Some(content_type) = part.content_type {
                reqwest_part = reqwest_part.mime_str(&content_type).map_err(|e| {
                    Error::InvalidRequest(format!(
                        "part {:?} has invalid content type {:?}: {}",
                        part.name, content_type, e
                    ))
                })?;
            }
            form = form.part(part.name, reqwest_part);
        }
        Ok(form)
    }
}
