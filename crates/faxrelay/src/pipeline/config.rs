use crate::config::Config;
use crate::retry::RetryPolicy;

/// Per-job settings shared by every worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub conversion_retry: RetryPolicy,
    pub notification_retry: RetryPolicy,
    pub subject_template: String,
    pub failure_subject_template: String,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            conversion_retry: RetryPolicy::conversion(&config.conversion),
            notification_retry: RetryPolicy::notification(&config.notification),
            subject_template: config.notification.subject_template.clone(),
            failure_subject_template: config.notification.failure_subject_template.clone(),
        }
    }
}
