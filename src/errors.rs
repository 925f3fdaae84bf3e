//! Typed error hierarchy for the generation pipeline.
//!
//! Three enums cover the three failure surfaces:
//! - `PlanError` — planner output unusable (always fatal to the job)
//! - `PublishError` — repository host failures during publish (fatal)
//! - `PipelineError` — everything the orchestrator can fail a job with
//!
//! Module-level generation failures have no error type of their own: they
//! are non-fatal by design and surface only as missing files plus a
//! progress warning.

use thiserror::Error;

/// Rejections from the plan validator.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner output contains no JSON object or array")]
    NoJson,

    #[error("failed to decode plan JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("plan has no 'file_structure' array")]
    MissingFileStructure,

    #[error("plan 'file_structure' is empty")]
    EmptyFileStructure,

    #[error("plan contains a file task with an empty path")]
    EmptyPath,

    #[error("file path '{0}' escapes the project root")]
    UnsafePath(String),
}

/// Failures while publishing the generated files to the repository host.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("credential lacks write access to the repository host")]
    Unauthorized,

    #[error("ref update conflict on '{reference}': branch no longer points at {expected}")]
    Conflict { reference: String, expected: String },

    #[error("repository host error: {0}")]
    Remote(#[source] anyhow::Error),
}

/// Fatal errors caught at the orchestrator boundary. Each is converted to a
/// persisted `error_message` and a terminal error progress event; none
/// escapes to the job's caller synchronously.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("plan rejected: {0}")]
    PlanMalformed(#[from] PlanError),

    #[error("no files were generated for any module")]
    NothingGenerated,

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn record_not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::RecordNotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_no_json_message() {
        let err = PlanError::NoJson;
        assert!(err.to_string().contains("no JSON"));
    }

    #[test]
    fn publish_conflict_carries_ref_and_expected_tip() {
        let err = PublishError::Conflict {
            reference: "heads/main".to_string(),
            expected: "abc123".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("conflict"));
        assert!(msg.contains("heads/main"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn pipeline_error_wraps_plan_error() {
        let err: PipelineError = PlanError::EmptyFileStructure.into();
        match &err {
            PipelineError::PlanMalformed(PlanError::EmptyFileStructure) => {}
            _ => panic!("Expected PlanMalformed(EmptyFileStructure)"),
        }
        assert!(err.to_string().contains("plan rejected"));
    }

    #[test]
    fn pipeline_error_wraps_publish_error() {
        let err: PipelineError = PublishError::Unauthorized.into();
        assert!(matches!(
            err,
            PipelineError::Publish(PublishError::Unauthorized)
        ));
    }

    #[test]
    fn record_not_found_carries_kind_and_id() {
        let err = PipelineError::record_not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job abc-123 not found");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PlanError::NoJson);
        assert_std_error(&PublishError::Unauthorized);
        assert_std_error(&PipelineError::NothingGenerated);
    }
}
