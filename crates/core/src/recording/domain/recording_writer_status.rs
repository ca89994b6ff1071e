use serde::Serialize;

/// Lifecycle of one in-progress recording: `Open → Finalizing → Closed`,
/// or `Failed` from any non-closed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    Open,
    Finalizing,
    Closed,
    Failed,
}
