use std::time::Duration;

/// Execution settings shared by every endpoint a [`Pipeline`] runs.
///
/// [`Pipeline`]: super::Pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a response waits for event publication before returning
    /// with the publish task still running in the background.
    pub event_publish_wait: Duration,
    /// Upper bound on handler execution. `None` disables the limit; when
    /// exceeded the call fails with 504.
    pub handler_timeout: Option<Duration>,
    /// Include `error` details in 5xx response bodies. Off in production.
    pub expose_error_details: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_publish_wait: Duration::from_secs(2),
            handler_timeout: None,
            expose_error_details: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.event_publish_wait, Duration::from_secs(2));
        assert!(config.handler_timeout.is_none());
        assert!(!config.expose_error_details);
    }
}
