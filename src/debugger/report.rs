use crate::debugger::breakpoint::BreakpointOutcome;
use serde::Serialize;

/// Message of a breakpoint requested for a source reference that is not (or no longer) known.
/// Callers match this text literally.
pub const INVALID_SOURCE_REFERENCE: &str = "Invalid sourceReference.";

/// Externally visible breakpoint record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub verified: bool,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Formats reconciliation outcomes into breakpoint records.
pub struct ResultReporter;

impl ResultReporter {
    pub fn report(outcomes: &[BreakpointOutcome]) -> Vec<BreakpointRecord> {
        outcomes.iter().map(Self::record).collect()
    }

    pub fn record(outcome: &BreakpointOutcome) -> BreakpointRecord {
        match outcome {
            BreakpointOutcome::InvalidSourceReference { line } => BreakpointRecord {
                id: None,
                verified: false,
                line: *line,
                message: Some(INVALID_SOURCE_REFERENCE.to_string()),
            },
            BreakpointOutcome::Resolved(brkpt) => BreakpointRecord {
                id: brkpt.id.map(|id| id.as_u64()),
                verified: brkpt.is_verified(),
                line: brkpt.line,
                message: brkpt.resolution.message().map(ToString::to_string),
            },
        }
    }

    /// Records for a request that is rejected as a whole because of an invalid source reference.
    pub fn invalid_source_reference(lines: &[i64]) -> Vec<BreakpointRecord> {
        lines
            .iter()
            .map(|&line| Self::record(&BreakpointOutcome::InvalidSourceReference { line }))
            .collect()
    }

    /// Render records as a body of a protocol `setBreakpoints` response.
    pub fn to_response_body(records: &[BreakpointRecord]) -> serde_json::Value {
        serde_json::json!({ "breakpoints": records })
    }
}
