use serde::{Deserialize, Serialize};

/// Runtime state shared by hosting units and process pools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ObjectState {
    /// Whether the backend may move directly from `self` to `to`.
    pub fn can_transition_to(self, to: ObjectState) -> bool {
        matches!(
            (self, to),
            (ObjectState::Stopped, ObjectState::Starting)
                | (ObjectState::Starting, ObjectState::Started)
                | (ObjectState::Started, ObjectState::Stopping)
                | (ObjectState::Stopping, ObjectState::Stopped)
                // A start that fails to come up falls back to stopped.
                | (ObjectState::Starting, ObjectState::Stopped)
        )
    }
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectState::Stopped => write!(f, "stopped"),
            ObjectState::Starting => write!(f, "starting"),
            ObjectState::Started => write!(f, "started"),
            ObjectState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Managed runtime a process pool loads for the application.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeVariant {
    #[serde(rename = "v2.0")]
    V2,
    #[default]
    #[serde(rename = "v4.0")]
    V4,
}

impl RuntimeVariant {
    /// Version string the hosting backend expects on the process pool.
    pub fn runtime_version(self) -> &'static str {
        match self {
            RuntimeVariant::V2 => "v2.0",
            RuntimeVariant::V4 => "v4.0",
        }
    }
}

impl std::fmt::Display for RuntimeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.runtime_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        assert!(ObjectState::Stopped.can_transition_to(ObjectState::Starting));
        assert!(ObjectState::Starting.can_transition_to(ObjectState::Started));
        assert!(ObjectState::Started.can_transition_to(ObjectState::Stopping));
        assert!(ObjectState::Stopping.can_transition_to(ObjectState::Stopped));
        assert!(ObjectState::Starting.can_transition_to(ObjectState::Stopped));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!ObjectState::Stopped.can_transition_to(ObjectState::Started));
        assert!(!ObjectState::Started.can_transition_to(ObjectState::Stopped));
        assert!(!ObjectState::Stopping.can_transition_to(ObjectState::Started));
    }

    #[test]
    fn serde_matches_display() {
        for state in [
            ObjectState::Stopped,
            ObjectState::Starting,
            ObjectState::Started,
            ObjectState::Stopping,
        ] {
            let encoded = toml::Value::try_from(state).unwrap();
            assert_eq!(encoded.as_str(), Some(state.to_string().as_str()));
        }
    }

    #[test]
    fn runtime_variant_strings() {
        assert_eq!(RuntimeVariant::default(), RuntimeVariant::V4);
        assert_eq!(RuntimeVariant::V2.runtime_version(), "v2.0");
        assert_eq!(RuntimeVariant::V4.to_string(), "v4.0");
    }
}
