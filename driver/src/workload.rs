use async_trait::async_trait;

/// Capability set a workload must expose to the driver.
///
/// The driver is generic over any implementer, so a workload can be swapped
/// in without the driver depending on its concrete type.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// One-shot preparation; called before any worker starts. Its failure aborts the run.
    async fn setup(&self) -> anyhow::Result<()>;

    /// One-shot finalization; called after all workers finish, even on error.
    async fn teardown(&self) -> anyhow::Result<()>;

    /// Perform one unit of work. May fail; must be independently callable.
    async fn perform_iteration(&self) -> anyhow::Result<()>;

    /// Number of work items each iteration represents. Defaults to 1.
    fn items_per_iteration(&self) -> u64 {
        1
    }

    /// Opaque configuration dictionary embedded in the final report.
    fn test_run_data(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}
