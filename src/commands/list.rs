use super::CommandContext;
use crate::error::Result;
use crate::registry::{list_managed, ManagedContainer};

/// Handle `canon list`
pub async fn handle_list(ctx: &CommandContext) -> Result<()> {
    let containers = list_managed(ctx.engine.as_ref()).await?;
    for line in render_table(&containers) {
        (ctx.out)(&line);
    }
    Ok(())
}

/// Column-aligned listing, or a notice when there is nothing to list
pub fn render_table(containers: &[ManagedContainer]) -> Vec<String> {
    if containers.is_empty() {
        return vec!["No canon containers found.".to_string()];
    }

    let mut rows: Vec<[&str; 4]> = vec![
        ["State", "Profile/Arch", "Image", "ContainerID"],
        ["-----", "------------", "-----", "-----------"],
    ];
    for c in containers {
        rows.push([c.state.as_str(), c.profile.as_str(), c.image.as_str(), c.id.as_str()]);
    }

    let mut widths = [0usize; 4];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    rows.iter()
        .map(|row| {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i + 1 == row.len() {
                    line.push_str(cell);
                } else {
                    line.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
                }
            }
            line
        })
        .collect()
}
