//! Ambient configuration, deserialized from TOML.

use serde::Deserialize;

use crate::error::{Result, TaskQueueError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Retained for forward compatibility with a future dynamic loader; the
    /// core never reads this field itself — see [`crate::registry::JobRegistry`],
    /// which is populated by explicit registration at process init instead.
    pub task_paths: Vec<String>,
    pub schedule_periodic: bool,
    /// Maximum number of tasks a worker may have in flight at once.
    pub backlog: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            task_paths: Vec::new(),
            schedule_periodic: false,
            backlog: 8,
        }
    }
}

impl TaskQueueConfig {
    pub fn validate(self) -> Result<Self> {
        if self.backlog == 0 {
            return Err(TaskQueueError::InvalidConfig {
                reason: "backlog must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| TaskQueueError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TaskQueueConfig::default().validate().unwrap();
        assert_eq!(config.backlog, 8);
        assert!(!config.schedule_periodic);
    }

    #[test]
    fn zero_backlog_is_rejected() {
        let config = TaskQueueConfig { backlog: 0, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(TaskQueueError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn parses_from_toml() {
        let raw = r#"
            schedule_periodic = true
            backlog = 16
        "#;
        let config = TaskQueueConfig::from_toml_str(raw).unwrap();
        assert!(config.schedule_periodic);
        assert_eq!(config.backlog, 16);
    }
}
