use crate::config::Profile;
use crate::error::Result;

/// Handle `canon config`
pub fn handle_config(profile: &Profile) -> Result<String> {
    Ok(format!("Profile:\n{}", profile.to_yaml()?))
}
