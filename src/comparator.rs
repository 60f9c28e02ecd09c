//! Reference-vs-data-entry comparison pipeline.
//!
//! Converts both document groups to page images, sends them with the fixed
//! review policy to the vision model in a single request, and packages the
//! answer with cost and timing. Every failure becomes a failed
//! [`ComparisonResult`]; nothing is raised past [`Comparator::compare`].

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::convert::{self, FileDescriptor, ImageConverter, UploadedFile};
use crate::error::{CompareError, DocumentGroup, GroupFailure};
use crate::openai::{ChatBackend, TokenUsage};
use crate::pricing::PricingTable;
use crate::prompt;
use crate::report::ReportShape;

/// Converted inputs for one comparison.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub reference_images: Vec<FileDescriptor>,
    pub candidate_images: Vec<FileDescriptor>,
    pub user_instructions: String,
}

impl ComparisonRequest {
    pub fn is_empty(&self) -> bool {
        self.reference_images.is_empty() && self.candidate_images.is_empty()
    }
}

/// Successful comparison payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    /// Model answer, verbatim.
    pub text: String,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub elapsed_seconds: f64,
    pub token_usage: TokenUsage,
    pub model: String,
    pub report_shape: ReportShape,
    pub debug: ComparisonDebug,
}

/// Which page images were sent, per group.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonDebug {
    pub reference_images: Vec<String>,
    pub candidate_images: Vec<String>,
}

/// Outcome handed back to the caller: either a report or an error message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub success: bool,
    #[serde(flatten)]
    pub report: Option<ComparisonReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ComparisonResult {
    pub fn completed(report: ComparisonReport) -> Self {
        Self {
            success: true,
            report: Some(report),
            error_message: None,
        }
    }

    pub fn failed(err: &CompareError) -> Self {
        Self {
            success: false,
            report: None,
            error_message: Some(err.to_string()),
        }
    }
}

/// Comparison orchestrator. Stateless between calls; share it behind an `Arc`.
pub struct Comparator {
    backend: Arc<dyn ChatBackend>,
    converter: Arc<dyn ImageConverter>,
    pricing: PricingTable,
    api_key: Option<String>,
    model: String,
}

impl Comparator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        converter: Arc<dyn ImageConverter>,
        pricing: PricingTable,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            converter,
            pricing,
            api_key,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Compare data-entry documents against reference documents.
    pub async fn compare(
        &self,
        reference_files: &[UploadedFile],
        candidate_files: &[UploadedFile],
        user_instructions: &str,
    ) -> ComparisonResult {
        let request_id = Uuid::new_v4();
        info!(
            "Comparison {}: {} reference file(s), {} data-entry file(s), converter={}",
            request_id,
            reference_files.len(),
            candidate_files.len(),
            self.converter.name()
        );

        match self
            .run(reference_files, candidate_files, user_instructions)
            .await
        {
            Ok(report) => {
                info!(
                    "Comparison {} complete in {:.1}s: {} input / {} output tokens, ${:.4}",
                    request_id,
                    report.elapsed_seconds,
                    report.token_usage.input,
                    report.token_usage.output,
                    report.cost_usd
                );
                ComparisonResult::completed(report)
            }
            Err(err) => {
                error!("Comparison {} failed: {}", request_id, err);
                ComparisonResult::failed(&err)
            }
        }
    }

    async fn run(
        &self,
        reference_files: &[UploadedFile],
        candidate_files: &[UploadedFile],
        user_instructions: &str,
    ) -> Result<ComparisonReport, CompareError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(CompareError::MissingCredential)?;

        if reference_files.is_empty() && candidate_files.is_empty() {
            return Err(CompareError::NoFiles);
        }

        for file in reference_files.iter().chain(candidate_files) {
            debug!("Input {} ({} bytes)", convert::digest(&file.data), file.data.len());
        }

        let (reference, candidate) = tokio::join!(
            convert::convert_files(self.converter.as_ref(), reference_files),
            convert::convert_files(self.converter.as_ref(), candidate_files),
        );

        let (reference_images, candidate_images) = match (reference, candidate) {
            (Ok(reference), Ok(candidate)) => (reference, candidate),
            (reference, candidate) => {
                let failures = [
                    (DocumentGroup::Reference, reference.err()),
                    (DocumentGroup::Candidate, candidate.err()),
                ]
                .into_iter()
                .filter_map(|(group, cause)| cause.map(|cause| GroupFailure { group, cause }))
                .collect();
                return Err(CompareError::Conversion(failures));
            }
        };

        let request = ComparisonRequest {
            reference_images,
            candidate_images,
            user_instructions: user_instructions.to_string(),
        };

        if request.is_empty() {
            return Err(CompareError::NoFiles);
        }

        self.submit(api_key, &request).await
    }

    /// Send one already-converted request and price the answer.
    async fn submit(
        &self,
        api_key: &str,
        request: &ComparisonRequest,
    ) -> Result<ComparisonReport, CompareError> {
        let messages = prompt::build_messages(
            &request.reference_images,
            &request.candidate_images,
            &request.user_instructions,
        );

        debug!(
            "Sending {} reference and {} data-entry image(s) to {}",
            request.reference_images.len(),
            request.candidate_images.len(),
            self.model
        );

        let started = Instant::now();
        let reply = self.backend.chat(api_key, &self.model, messages).await?;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        let report_shape = ReportShape::classify(&reply.text);
        if !report_shape.is_well_formed() {
            warn!("Model answer does not follow the report format: {:?}", report_shape);
        }

        Ok(ComparisonReport {
            cost_usd: self.pricing.cost(&self.model, reply.usage),
            text: reply.text,
            elapsed_seconds,
            token_usage: reply.usage,
            model: self.model.clone(),
            report_shape,
            debug: ComparisonDebug {
                reference_images: names(&request.reference_images),
                candidate_images: names(&request.candidate_images),
            },
        })
    }
}

fn names(images: &[FileDescriptor]) -> Vec<String> {
    images.iter().map(|img| img.name.clone()).collect()
}
