use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("field name has no namespace qualifier: {0}")]
    MalformedField(String),

    #[error("{organization}: file name does not match any known pattern: {name}")]
    UnparsedFilename { organization: String, name: String },

    #[error(
        "variant type annotation {annotated:?} on {file_id} ({name}) disagrees with file name ({derived})"
    )]
    VariantTypeConflict {
        file_id: String,
        name: String,
        annotated: String,
        derived: String,
    },

    #[error("{organization}: no sample index entry for identifier {id}")]
    UnmappedIdentifier { organization: String, id: String },

    #[error("invalid canonical identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid variant type: {0}")]
    InvalidVariantType(String),

    #[error("invalid id space: {0}")]
    InvalidIdSpace(String),

    #[error("invalid organization rule: {0}")]
    InvalidRule(String),

    #[error("unknown organization: {0}")]
    UnknownOrganization(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("sample index error: {0}")]
    SampleIndex(String),

    #[error("missing Synapse credentials (set SYNAPSE_AUTH_TOKEN)")]
    MissingCredentials,

    #[error("Synapse request failed: {0}")]
    SynapseHttp(String),

    #[error("Synapse returned status {status}: {message}")]
    SynapseStatus { status: u16, message: String },

    #[error("Synapse job failed: {0}")]
    SynapseJob(String),

    #[error(
        "{table_id}: append failed after clearing {rows} rows and they could not be restored: {message}"
    )]
    TableCleared {
        table_id: String,
        rows: usize,
        message: String,
    },

    #[error("cancelled before {0}")]
    Cancelled(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TrackerError {
    /// Errors caused by inconsistent upstream data rather than by the environment.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            TrackerError::MalformedField(_)
                | TrackerError::UnparsedFilename { .. }
                | TrackerError::VariantTypeConflict { .. }
                | TrackerError::UnmappedIdentifier { .. }
        )
    }
}
