use super::CommandContext;
use crate::config::Profile;
use crate::error::Result;
use crate::registry::stop_or_terminate;

/// Handle `canon stop` and `canon terminate`
pub async fn handle_stop(ctx: &CommandContext, profile: &Profile, all: bool, terminate: bool) -> Result<()> {
    let targets = stop_or_terminate(ctx.engine.as_ref(), &profile.key(), all, terminate).await?;
    let verb = if terminate { "terminated" } else { "stopped" };
    for target in &targets {
        (ctx.out)(&format!("{} {}", verb, target.profile));
    }
    if targets.is_empty() {
        (ctx.out)(&format!("No canon containers found for {}", profile.key()));
    }
    Ok(())
}
