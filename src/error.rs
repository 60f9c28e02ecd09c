use std::fmt;
use thiserror::Error;

use crate::openai::ChatError;

/// Which side of the comparison a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentGroup {
    Reference,
    Candidate,
}

impl fmt::Display for DocumentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentGroup::Reference => f.write_str("reference"),
            DocumentGroup::Candidate => f.write_str("data-entry"),
        }
    }
}

/// One document group that could not be converted.
#[derive(Debug)]
pub struct GroupFailure {
    pub group: DocumentGroup,
    pub cause: anyhow::Error,
}

fn group_list(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(|f| f.group.to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}

fn cause_list(failures: &[GroupFailure]) -> String {
    match failures {
        [only] => format!("{:#}", only.cause),
        many => many
            .iter()
            .map(|f| format!("{}: {:#}", f.group, f.cause))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

/// Every way a comparison can fail. `Display` is the user-facing message.
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("OpenAI API key is not configured. Set OPENAI_API_KEY and restart the application.")]
    MissingCredential,

    #[error("No documents to compare. Add at least one reference or data-entry document.")]
    NoFiles,

    #[error("Could not convert the {} documents to images: {}", group_list(.0), cause_list(.0))]
    Conversion(Vec<GroupFailure>),

    #[error("OpenAI quota exceeded. Check your plan and billing details, then try again.")]
    Quota,

    #[error("Invalid OpenAI API key. Check the configured key and try again.")]
    Authentication,

    #[error("OpenAI rate limit reached. Please wait a moment and try again.")]
    RateLimited,

    #[error("The OpenAI service is unavailable. Please try again later. ({0})")]
    Service(String),
}

impl From<ChatError> for CompareError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Api { message, .. } if message.to_lowercase().contains("quota") => {
                CompareError::Quota
            }
            ChatError::Api { status: 429, .. } => CompareError::RateLimited,
            ChatError::Api { status: 401, .. } => CompareError::Authentication,
            other => CompareError::Service(other.to_string()),
        }
    }
}
