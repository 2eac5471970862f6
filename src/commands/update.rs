use super::CommandContext;
use crate::config::{Config, Profile};
use crate::error::Result;

/// Handle `canon update`
///
/// Pulls the active profile's images regardless of when they were last
/// checked; with `all`, every configured profile's images too.
pub async fn handle_update(ctx: &CommandContext, config: &Config, profile: &Profile, all: bool) -> Result<()> {
    let mut profiles = vec![profile.clone()];
    if all {
        profiles.extend(config.profiles()?);
    }

    let queued = ctx.updater().check_update(&profiles, true).await?;
    if queued.is_empty() {
        (ctx.out)("No images to update");
    }
    Ok(())
}
