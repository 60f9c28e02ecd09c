//! File-to-image conversion.
//!
//! Defines the [`ImageConverter`] trait so different PDF rendering backends
//! (external helper process, HTTP sidecar, native embedded-scan extraction)
//! can be swapped via configuration. Plain images never reach a backend.

pub mod embedded;
pub mod process;
pub mod sidecar;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// A user-selected file before conversion.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    /// Declared MIME type; may be empty when the client did not send one.
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One page image ready to send to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    pub image_data: Vec<u8>,
}

/// Async trait implemented by each PDF rendering backend.
#[async_trait::async_trait]
pub trait ImageConverter: Send + Sync {
    fn name(&self) -> &str;
    async fn convert_pdf(&self, file: &UploadedFile) -> Result<Vec<FileDescriptor>>;
}

/// Known converter identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    Process,
    Sidecar,
    Embedded,
}

impl ConverterKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(Self::Process),
            "sidecar" => Some(Self::Sidecar),
            "embedded" => Some(Self::Embedded),
            _ => None,
        }
    }
}

/// What an uploaded file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image(&'static str),
}

/// Sniff the file type from its bytes, trusting the declared type only for PDFs.
pub fn classify(file: &UploadedFile) -> Result<FileKind> {
    if file.data.starts_with(b"%PDF") || file.mime_type == "application/pdf" {
        return Ok(FileKind::Pdf);
    }

    match image::guess_format(&file.data) {
        Ok(ImageFormat::Png) => Ok(FileKind::Image("image/png")),
        Ok(ImageFormat::Jpeg) => Ok(FileKind::Image("image/jpeg")),
        Ok(ImageFormat::Gif) => Ok(FileKind::Image("image/gif")),
        Ok(ImageFormat::WebP) => Ok(FileKind::Image("image/webp")),
        _ => anyhow::bail!(
            "Unsupported file type for file {} (declared '{}'); expected a PDF or PNG/JPEG/GIF/WebP image",
            digest(&file.data),
            file.mime_type
        ),
    }
}

/// Convert every file of one group, in order. The first failure aborts the group.
///
/// Errors identify files by content digest only; names stay out of messages
/// because they end up in logs.
pub async fn convert_files(
    converter: &dyn ImageConverter,
    files: &[UploadedFile],
) -> Result<Vec<FileDescriptor>> {
    let mut images = Vec::new();

    for file in files {
        match classify(file)? {
            FileKind::Pdf => {
                let pages = converter
                    .convert_pdf(file)
                    .await
                    .with_context(|| {
                        format!("{} converter failed on file {}", converter.name(), digest(&file.data))
                    })?;
                debug!(
                    "Converted PDF {} into {} page image(s) via {}",
                    digest(&file.data),
                    pages.len(),
                    converter.name()
                );
                images.extend(pages);
            }
            FileKind::Image(mime_type) => images.push(FileDescriptor {
                name: file.name.clone(),
                mime_type: mime_type.to_string(),
                image_data: file.data.clone(),
            }),
        }
    }

    Ok(images)
}

/// Short content fingerprint for logs, so file names never need to be logged.
pub fn digest(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{:x}", hash)[..12].to_string()
}

// ── Wire format shared by the process and sidecar converters ────────────────

#[derive(Debug, Serialize, Deserialize)]
struct WireFile {
    name: String,
    #[serde(rename = "type")]
    mime_type: String,
    base64: String,
}

impl WireFile {
    fn from_upload(file: &UploadedFile) -> Self {
        Self {
            name: file.name.clone(),
            mime_type: "application/pdf".to_string(),
            base64: BASE64.encode(&file.data),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConvertRequest {
    files: Vec<WireFile>,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    success: bool,
    #[serde(default)]
    images: Vec<WireFile>,
    #[serde(default)]
    error: Option<String>,
}

impl ConvertResponse {
    fn into_descriptors(self) -> Result<Vec<FileDescriptor>> {
        if !self.success {
            anyhow::bail!(
                "Converter reported failure: {}",
                self.error.unwrap_or_else(|| "no error message".to_string())
            );
        }

        self.images
            .into_iter()
            .enumerate()
            .map(|(i, img)| {
                let image_data = BASE64
                    .decode(img.base64.as_bytes())
                    .with_context(|| format!("Converter returned invalid base64 for image {}", i + 1))?;
                Ok(FileDescriptor {
                    name: img.name,
                    mime_type: img.mime_type,
                    image_data,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    fn upload(name: &str, mime_type: &str, data: &[u8]) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data: data.to_vec(),
        }
    }

    struct TwoPages {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ImageConverter for TwoPages {
        fn name(&self) -> &str {
            "two_pages"
        }

        async fn convert_pdf(&self, file: &UploadedFile) -> Result<Vec<FileDescriptor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((1..=2)
                .map(|n| FileDescriptor {
                    name: format!("{} (Page {})", file.name, n),
                    mime_type: "image/png".to_string(),
                    image_data: vec![n as u8],
                })
                .collect())
        }
    }

    #[test]
    fn test_classify_sniffs_bytes() {
        assert_eq!(classify(&upload("a.pdf", "", b"%PDF-1.7 ...")).unwrap(), FileKind::Pdf);
        assert_eq!(
            classify(&upload("scan", "application/octet-stream", PNG_MAGIC)).unwrap(),
            FileKind::Image("image/png")
        );
        assert_eq!(
            classify(&upload("scan.png", "image/png", JPEG_MAGIC)).unwrap(),
            FileKind::Image("image/jpeg")
        );
    }

    #[test]
    fn test_classify_rejects_unknown() {
        let err = classify(&upload("Jane_Doe_notes.txt", "text/plain", b"hello")).unwrap_err();
        assert!(!err.to_string().contains("Jane_Doe"));
        assert!(err.to_string().contains(&digest(b"hello")));
    }

    #[tokio::test]
    async fn test_backend_failure_names_file_by_digest() {
        struct Failing;

        #[async_trait::async_trait]
        impl ImageConverter for Failing {
            fn name(&self) -> &str {
                "failing"
            }

            async fn convert_pdf(&self, _file: &UploadedFile) -> Result<Vec<FileDescriptor>> {
                anyhow::bail!("Failed to load PDF: Invalid file header")
            }
        }

        let file = upload("Jane_Doe_SIN_123456789_T4.pdf", "application/pdf", b"%PDF-garbage");
        let err = convert_files(&Failing, &[file]).await.unwrap_err();
        let message = format!("{:#}", err);

        assert!(!message.contains("Jane_Doe"));
        assert!(message.contains(&digest(b"%PDF-garbage")));
        assert!(message.contains("Invalid file header"));
    }

    #[tokio::test]
    async fn test_images_pass_through_without_backend() {
        let converter = TwoPages { calls: AtomicUsize::new(0) };
        let files = vec![upload("slip.jpg", "image/jpeg", JPEG_MAGIC)];

        let images = convert_files(&converter, &files).await.unwrap();

        assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "slip.jpg");
        assert_eq!(images[0].image_data, JPEG_MAGIC);
    }

    #[tokio::test]
    async fn test_pdf_pages_keep_file_order() {
        let converter = TwoPages { calls: AtomicUsize::new(0) };
        let files = vec![
            upload("t4.pdf", "application/pdf", b"%PDF-1.4"),
            upload("t5.png", "image/png", PNG_MAGIC),
        ];

        let images = convert_files(&converter, &files).await.unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();

        assert_eq!(names, vec!["t4.pdf (Page 1)", "t4.pdf (Page 2)", "t5.png"]);
    }

    #[test]
    fn test_convert_response_failure() {
        let response: ConvertResponse =
            serde_json::from_str(r#"{"success":false,"error":"Error converting PDF: broken"}"#).unwrap();
        let err = response.into_descriptors().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_convert_response_decodes_images() {
        let response: ConvertResponse = serde_json::from_str(
            r#"{"success":true,"images":[{"name":"t4.pdf (Page 1)","type":"image/png","base64":"YWJj"}]}"#,
        )
        .unwrap();
        let images = response.into_descriptors().unwrap();
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!(images[0].image_data, b"abc");
    }

    #[test]
    fn test_digest_is_short_and_stable() {
        assert_eq!(digest(b"abc"), "ba7816bf8f01");
    }
}
