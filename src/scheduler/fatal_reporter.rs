use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::error;

/// Receives locations that stopped being polled after a fatal error
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FatalReporter: Send + Sync + 'static {
    async fn report_fatal(
        &self,
        location: &str,
        reason: &str,
    );
}

/// Reports fatal errors to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFatalReporter;

#[async_trait]
impl FatalReporter for LogFatalReporter {
    async fn report_fatal(
        &self,
        location: &str,
        reason: &str,
    ) {
        error!(
            %location,
            "location suspended after fatal error: {}. Fix the configuration or wait for the site, then resume it.",
            reason
        );
    }
}
