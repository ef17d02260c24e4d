use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::batch::ArgumentError;
use crate::columns::ParseError;
use crate::engine::EngineError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    NotFound,
    MalformedArguments,
    ParseContractViolation,
    Engine,
    Io,
}

impl CodedErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "RECORD_NOT_FOUND",
            Self::MalformedArguments => "MALFORMED_ARGUMENTS",
            Self::ParseContractViolation => "PARSE_CONTRACT_VIOLATION",
            Self::Engine => "ENGINE_FAILURE",
            Self::Io => "IO_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn new(kind: CodedErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
            details: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn from_store(error: &StoreError) -> CodedError {
    match error {
        StoreError::NotFound(name) => CodedError::new(CodedErrorKind::NotFound, error.to_string())
            .with_details(json!({ "record": name })),
        StoreError::InvalidName(_) => {
            CodedError::new(CodedErrorKind::MalformedArguments, error.to_string())
        }
        StoreError::Io { path, .. } | StoreError::Format { path, .. } => {
            CodedError::new(CodedErrorKind::Io, error.to_string())
                .with_details(json!({ "path": path.display().to_string() }))
        }
    }
}

fn from_parse(error: &ParseError) -> CodedError {
    let line = match error {
        ParseError::TooFewFields { line, .. } | ParseError::InvalidNumber { line, .. } => line,
    };
    CodedError::new(CodedErrorKind::ParseContractViolation, error.to_string())
        .with_details(json!({ "line": line }))
}

/// Walks the cause chain for the first error with a stable code. The
/// message is the full context chain of `error`.
pub fn find_coded_error(error: &Error) -> Option<CodedError> {
    let message = format!("{error:#}");
    error.chain().find_map(|cause| {
        let coded = if let Some(coded) = cause.downcast_ref::<CodedError>() {
            coded.clone()
        } else if let Some(store) = cause.downcast_ref::<StoreError>() {
            from_store(store)
        } else if let Some(parse) = cause.downcast_ref::<ParseError>() {
            from_parse(parse)
        } else if cause.downcast_ref::<ArgumentError>().is_some() {
            CodedError::new(CodedErrorKind::MalformedArguments, String::new())
        } else if cause.downcast_ref::<EngineError>().is_some() {
            CodedError::new(CodedErrorKind::Engine, String::new())
        } else if cause.downcast_ref::<std::io::Error>().is_some() {
            CodedError::new(CodedErrorKind::Io, String::new())
        } else {
            return None;
        };
        Some(CodedError {
            message: message.clone(),
            ..coded
        })
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{find_coded_error, CodedErrorKind};
    use crate::batch::ArgumentError;
    use crate::columns::{LineKind, ParseError};
    use crate::store::StoreError;

    #[test]
    fn store_not_found_maps_to_record_code() {
        let error = anyhow::Error::new(StoreError::NotFound("natal".to_owned()))
            .context("failed to open record");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.kind, CodedErrorKind::NotFound);
        assert_eq!(coded.code, "RECORD_NOT_FOUND");
        assert!(coded.message.starts_with("failed to open record: "));
        assert_eq!(coded.details.expect("details")["record"], "natal");
    }

    #[test]
    fn parse_errors_carry_offending_line() {
        let error = anyhow::Error::new(ParseError::TooFewFields {
            kind: LineKind::Planet,
            needed: 5,
            found: 2,
            line: "Sun 1".to_owned(),
        });
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, "PARSE_CONTRACT_VIOLATION");
        let envelope = serde_json::to_value(coded.envelope()).expect("serialize");
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["details"]["line"], "Sun 1");
    }

    #[test]
    fn argument_errors_are_malformed_arguments() {
        let result: anyhow::Result<()> = Err(ArgumentError::Resolution("800".to_owned()))
            .context("invalid capture resolution");
        let coded = find_coded_error(&result.expect_err("error")).expect("coded");
        assert_eq!(coded.code, "MALFORMED_ARGUMENTS");
        assert!(coded.details.is_none());
    }

    #[test]
    fn uncoded_errors_yield_none() {
        assert!(find_coded_error(&anyhow::anyhow!("plain failure")).is_none());
    }
}
