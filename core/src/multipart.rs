//! `multipart/form-data` bodies.
//!
//! # Design
//! Binary parts hold a `ContentSource`, a handle that is opened only when the
//! body is encoded. The length of the content is not known until then, and a
//! source that has disappeared in the meantime surfaces as
//! `ClientError::Encoding` through the call's failure continuation.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

const DEFAULT_BINARY_TYPE: &str = "application/octet-stream";

/// A handle to binary content that can be streamed into a part.
pub trait ContentSource: Send + Sync + fmt::Debug {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    fn file_name(&self) -> Option<String> {
        None
    }

    fn content_type(&self) -> Option<String> {
        None
    }
}

/// A file on disk, reopened on every encode.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    content_type: Option<String>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }
}

/// In-memory content with an optional filename.
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Arc<[u8]>,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            bytes: bytes.into(),
            file_name: None,
            content_type: None,
        }
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.file_name = Some(file_name.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }
}

impl ContentSource for BytesSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }

    fn file_name(&self) -> Option<String> {
        self.file_name.clone()
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }
}

/// The payload of a single part.
#[derive(Debug, Clone)]
pub enum PartContent {
    Text(String),
    Binary(Arc<dyn ContentSource>),
}

impl From<&str> for PartContent {
    fn from(s: &str) -> Self {
        PartContent::Text(s.to_string())
    }
}

impl From<String> for PartContent {
    fn from(s: String) -> Self {
        PartContent::Text(s)
    }
}

impl From<FileSource> for PartContent {
    fn from(source: FileSource) -> Self {
        PartContent::Binary(Arc::new(source))
    }
}

impl From<BytesSource> for PartContent {
    fn from(source: BytesSource) -> Self {
        PartContent::Binary(Arc::new(source))
    }
}

impl From<Arc<dyn ContentSource>> for PartContent {
    fn from(source: Arc<dyn ContentSource>) -> Self {
        PartContent::Binary(source)
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    content: PartContent,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &PartContent {
        &self.content
    }
}

/// The output of `Multipart::encode`.
#[derive(Debug, Clone)]
pub struct EncodedMultipart {
    pub body: Vec<u8>,
    pub boundary: String,
    pub content_type: String,
}

/// An ordered list of form parts.
#[derive(Debug, Clone, Default)]
pub struct Multipart {
    parts: Vec<Part>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a part. The field name must be non-empty.
    pub fn append_data(
        &mut self,
        name: &str,
        content: impl Into<PartContent>,
    ) -> ClientResult<&mut Self> {
        if name.is_empty() {
            return Err(ClientError::InvalidRequest(
                "multipart field name is empty".to_string(),
            ));
        }
        self.parts.push(Part {
            name: name.to_string(),
            content: content.into(),
        });
        Ok(self)
    }

    pub fn append_text(&mut self, name: &str, value: impl ToString) -> ClientResult<&mut Self> {
        self.append_data(name, PartContent::Text(value.to_string()))
    }

    pub fn append_file(&mut self, name: &str, path: impl Into<PathBuf>) -> ClientResult<&mut Self> {
        self.append_data(name, FileSource::new(path))
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn prepend_text_fields(&mut self, fields: &[(String, String)]) {
        let leading = fields.iter().map(|(k, v)| Part {
            name: k.clone(),
            content: PartContent::Text(v.clone()),
        });
        self.parts.splice(0..0, leading);
    }

    /// Serialize every part under a freshly generated boundary.
    pub fn encode(&self) -> ClientResult<EncodedMultipart> {
        self.encode_with_boundary(&generate_boundary())
    }

    pub(crate) fn encode_with_boundary(&self, boundary: &str) -> ClientResult<EncodedMultipart> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match &part.content {
                PartContent::Text(text) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape(&part.name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(text.as_bytes());
                }
                PartContent::Binary(source) => {
                    let file_name = source.file_name().unwrap_or_else(|| part.name.clone());
                    let content_type = source
                        .content_type()
                        .unwrap_or_else(|| DEFAULT_BINARY_TYPE.to_string());
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape(&part.name),
                            escape(&file_name),
                            escape_line(&content_type)
                        )
                        .as_bytes(),
                    );
                    let encoding_error = |err: io::Error| ClientError::Encoding {
                        field: part.name.clone(),
                        source: err,
                    };
                    let mut reader = source.open().map_err(encoding_error)?;
                    reader.read_to_end(&mut body).map_err(encoding_error)?;
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Ok(EncodedMultipart {
            body,
            boundary: boundary.to_string(),
            content_type: format!("multipart/form-data; boundary={boundary}"),
        })
    }
}

fn generate_boundary() -> String {
    format!("gridmi-{}", Uuid::new_v4().simple())
}

/// Percent-escape the characters that would break a quoted header parameter.
fn escape(value: &str) -> String {
    escape_line(&value.replace('"', "%22"))
}

/// Keep a header value on one line.
fn escape_line(value: &str) -> String {
    value.replace('\r', "%0D").replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A parsed part as a form-data server would see it.
    #[derive(Debug)]
    struct ReceivedPart {
        name: String,
        file_name: Option<String>,
        content: Vec<u8>,
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn disposition_param(headers: &str, key: &str) -> Option<String> {
        let marker = format!("{key}=\"");
        let start = headers.find(&marker)? + marker.len();
        let end = headers[start..].find('"')? + start;
        Some(headers[start..end].to_string())
    }

    fn parse(body: &[u8], boundary: &str) -> Vec<ReceivedPart> {
        let delimiter = format!("--{boundary}");
        let closing = format!("--{boundary}--\r\n");
        assert!(body.ends_with(closing.as_bytes()), "missing closing boundary");

        let mut parts = Vec::new();
        let mut rest = body;
        loop {
            assert!(rest.starts_with(delimiter.as_bytes()));
            rest = &rest[delimiter.len()..];
            if rest.starts_with(b"--") {
                break;
            }
            rest = &rest[2..];
            let header_end = find(rest, b"\r\n\r\n").unwrap();
            let headers = String::from_utf8(rest[..header_end].to_vec()).unwrap();
            rest = &rest[header_end + 4..];
            let next = find(rest, format!("\r\n{delimiter}").as_bytes()).unwrap();
            parts.push(ReceivedPart {
                name: disposition_param(&headers, "name").unwrap(),
                file_name: disposition_param(&headers, "filename"),
                content: rest[..next].to_vec(),
            });
            rest = &rest[next + 2..];
        }
        parts
    }

    #[derive(Debug)]
    struct Vanished;

    impl ContentSource for Vanished {
        fn open(&self) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "content removed"))
        }
    }

    #[test]
    fn empty_field_name_is_rejected() {
        let mut mp = Multipart::new();
        let err = mp.append_text("", "x").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
        assert!(mp.is_empty());
    }

    #[test]
    fn n_parts_produce_n_sections() {
        let mut mp = Multipart::new();
        mp.append_text("a", "1").unwrap();
        mp.append_text("b", "2").unwrap();
        mp.append_data("c", BytesSource::new(vec![0u8, 1, 2]).with_file_name("c.bin"))
            .unwrap();

        let encoded = mp.encode().unwrap();
        let opening = format!("--{}\r\n", encoded.boundary);
        let body = String::from_utf8_lossy(&encoded.body);
        assert_eq!(body.matches(&opening).count(), 3);
        assert!(body.ends_with(&format!("--{}--\r\n", encoded.boundary)));
        assert_eq!(
            encoded.content_type,
            format!("multipart/form-data; boundary={}", encoded.boundary)
        );
    }

    #[test]
    fn binary_part_roundtrips() {
        let photo: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut mp = Multipart::new();
        mp.append_data("photo", BytesSource::new(photo.clone()).with_file_name("cat.jpg"))
            .unwrap();

        let encoded = mp.encode().unwrap();
        let parts = parse(&encoded.body, &encoded.boundary);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "photo");
        assert_eq!(parts[0].file_name.as_deref(), Some("cat.jpg"));
        assert_eq!(parts[0].content, photo);
    }

    #[test]
    fn text_part_layout_is_exact() {
        let mut mp = Multipart::new();
        mp.append_text("id", 10).unwrap();
        let encoded = mp.encode_with_boundary("XYZ").unwrap();
        assert_eq!(
            String::from_utf8(encoded.body).unwrap(),
            "--XYZ\r\nContent-Disposition: form-data; name=\"id\"\r\n\r\n10\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn binary_without_filename_uses_field_name() {
        let mut mp = Multipart::new();
        mp.append_data("blob", BytesSource::new(b"hi".to_vec())).unwrap();
        let encoded = mp.encode_with_boundary("B").unwrap();
        let body = String::from_utf8(encoded.body).unwrap();
        assert!(body.contains("name=\"blob\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\nhi\r\n"));
    }

    #[test]
    fn boundaries_are_unique() {
        let mp = Multipart::new();
        assert_ne!(mp.encode().unwrap().boundary, mp.encode().unwrap().boundary);
    }

    #[test]
    fn quotes_in_names_are_escaped() {
        let mut mp = Multipart::new();
        mp.append_text("a\"b", "v").unwrap();
        let encoded = mp.encode_with_boundary("B").unwrap();
        let body = String::from_utf8(encoded.body).unwrap();
        assert!(body.contains("name=\"a%22b\""));
    }

    #[test]
    fn content_type_cannot_add_part_headers() {
        let mut mp = Multipart::new();
        mp.append_data(
            "photo",
            BytesSource::new(b"x".to_vec()).with_content_type("image/jpeg\r\nX-Extra: 1"),
        )
        .unwrap();
        let encoded = mp.encode_with_boundary("B").unwrap();
        let body = String::from_utf8(encoded.body).unwrap();
        assert!(body.contains("Content-Type: image/jpeg%0D%0AX-Extra: 1\r\n\r\nx\r\n"));
        assert!(!body.contains("\r\nX-Extra"));
    }

    #[test]
    fn unreadable_source_is_encoding_error() {
        let mut mp = Multipart::new();
        mp.append_data("photo", Arc::new(Vanished) as Arc<dyn ContentSource>)
            .unwrap();
        let err = mp.encode().unwrap_err();
        match err {
            ClientError::Encoding { field, source } => {
                assert_eq!(field, "photo");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected Encoding, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_encoding_error() {
        let mut mp = Multipart::new();
        mp.append_file("photo", "/definitely/not/here.jpg").unwrap();
        assert!(matches!(mp.encode(), Err(ClientError::Encoding { .. })));
    }

    #[test]
    fn file_source_reads_from_disk() {
        let path = std::env::temp_dir().join(format!("gridmi-{}.txt", Uuid::new_v4().simple()));
        std::fs::write(&path, b"on disk").unwrap();

        let mut mp = Multipart::new();
        mp.append_file("doc", &path).unwrap();
        let encoded = mp.encode().unwrap();
        let parts = parse(&encoded.body, &encoded.boundary);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(parts[0].content, b"on disk");
        assert_eq!(
            parts[0].file_name.as_deref(),
            path.file_name().and_then(|n| n.to_str())
        );
    }

    #[test]
    fn prepended_fields_come_first() {
        let mut mp = Multipart::new();
        mp.append_text("photo", "p").unwrap();
        mp.prepend_text_fields(&[("id".to_string(), "10".to_string())]);
        let names: Vec<_> = mp.parts().iter().map(Part::name).collect();
        assert_eq!(names, ["id", "photo"]);
    }
}
