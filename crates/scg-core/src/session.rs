use serde::{Deserialize, Serialize};

/// Lifecycle status of a measurement session. `Ended` is terminal and set
/// only by the end-session operation. `Active` is representable for wire
/// compatibility but the server never transitions into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}
