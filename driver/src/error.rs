/// The only two ways `Driver::run` can fail.
///
/// Everything else, iteration failures and missed deadlines, is folded into
/// the report rather than surfaced as an error.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("workload setup failed")]
    SetupFailed(#[source] anyhow::Error),
    #[error("workload teardown failed")]
    TeardownFailed(#[source] anyhow::Error),
}
