use serde::{Deserialize, Serialize};

/// Lifecycle state of a thread.
///
/// `Running` is exclusive: at most one execution holds it. `Dead` is only
/// ever set from outside the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    #[default]
    Stopped,
    Running,
    Dead,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Stopped => "STOPPED",
            ThreadState::Running => "RUNNING",
            ThreadState::Dead => "DEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(ThreadState::Stopped),
            "RUNNING" => Some(ThreadState::Running),
            "DEAD" => Some(ThreadState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
