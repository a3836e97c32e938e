use serde::{Deserialize, Serialize};

/// The kind of generative workload a job requests or a worker can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "capability", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Image,
    Text,
    Audio,
    Video,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Image => "image",
            Capability::Text => "text",
            Capability::Audio => "audio",
            Capability::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Capability::Image),
            "text" => Some(Capability::Text),
            "audio" => Some(Capability::Audio),
            "video" => Some(Capability::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
