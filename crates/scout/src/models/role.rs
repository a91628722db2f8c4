use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation.
///
/// The system instruction is not a role: it is passed alongside the
/// conversation on every provider call rather than stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}
