use serde::Serialize;

/// `Idle → Watching → Recording → Watching → … → Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Watching,
    Recording,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Watching => "watching",
            SessionState::Recording => "recording",
        };
        f.write_str(name)
    }
}
