//! HTTP sidecar converter.

use super::{ConvertResponse, FileDescriptor, ImageConverter, UploadedFile};
use anyhow::Result;
use tracing::info;

pub struct SidecarConverter {
    url: String,
    client: reqwest::Client,
}

impl SidecarConverter {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl ImageConverter for SidecarConverter {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn convert_pdf(&self, file: &UploadedFile) -> Result<Vec<FileDescriptor>> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(file.data.clone())
            .file_name(file.name.clone())
            .mime_str("application/pdf")?;

        let form = Form::new().part("file", part);

        info!("SidecarConverter: posting {} bytes to {}/convert", file.data.len(), self.url);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Converter sidecar error ({}): {}", status, error_text);
        }

        let converted: ConvertResponse = response.json().await?;
        converted.into_descriptors()
    }
}
