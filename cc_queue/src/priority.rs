use serde::Deserialize;
use serde::Serialize;

/// Scheduling precedence; lower value is served first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}
