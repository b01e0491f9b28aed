use crate::jobs::context::TaskContext;
use crate::jobs::error::JobResult;

pub const HELLO: &str = "hello";

/// Demonstration task: writes `"hi"` to the entry's log.
pub async fn hello(ctx: TaskContext) -> JobResult<()> {
    tracing::info!("hi");
    ctx.log("hi").await
}
