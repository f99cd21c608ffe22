//! Tank command.

use anyhow::{Result, anyhow, bail};

use aquamon_store::TankRepository;
use aquamon_types::{Tank, TankConstruction, TankDraft};

use super::Context;
use crate::cli::{OutputFormat, TankAction};
use crate::format::{format_json, format_tanks};
use crate::style;
use crate::util::{lock_store, open_monitor};

/// Find a tank by exact id, name, or unique id prefix.
fn resolve<'a>(tanks: &'a [Tank], key: &str) -> Result<&'a Tank> {
    let key = key.trim();
    if let Some(tank) = tanks
        .iter()
        .find(|t| t.id == key || t.name.eq_ignore_ascii_case(key))
    {
        return Ok(tank);
    }
    let matches: Vec<&Tank> = tanks.iter().filter(|t| t.id.starts_with(key)).collect();
    match matches.as_slice() {
        [tank] if !key.is_empty() => Ok(tank),
        [] | [_] => bail!("No tank matches '{}'", key),
        _ => bail!("'{}' matches {} tanks; use more of the id", key, matches.len()),
    }
}

pub fn cmd_tank(ctx: &Context, action: TankAction) -> Result<()> {
    let monitor = open_monitor(&ctx.config)?;
    let store = lock_store(&monitor)?;
    let tanks = TankRepository::new(&store);

    match action {
        TankAction::Add {
            name,
            construction,
            species,
            fish_count,
            average_weight,
            area,
        } => {
            let construction: TankConstruction =
                construction.parse().map_err(|e| anyhow!("{}", e))?;
            if tanks.find_by_name(&name)?.is_some() {
                bail!("A tank named '{}' already exists", name.trim());
            }
            let draft = TankDraft {
                name,
                construction,
                species,
                fish_count,
                average_weight_g: average_weight,
                area_m2: area,
            };
            draft.validate().map_err(|e| anyhow!("{}", e))?;
            let tank = tanks.add(draft)?;
            ctx.status(&style::format_success(
                &format!("Registered tank '{}' ({})", tank.name, tank.id),
                ctx.opts.no_color,
            ));
            if ctx.json {
                ctx.emit(&format_json(&tank)?)?;
            }
            Ok(())
        }
        TankAction::List { output } => {
            let list = tanks.list()?;
            let content = match ctx.format(&output) {
                OutputFormat::Json => format_json(&list)?,
                OutputFormat::Text => format_tanks(&list),
            };
            ctx.emit(&content)
        }
        TankAction::Remove { tank } => {
            let list = tanks.list()?;
            let target = resolve(&list, &tank)?;
            tanks.remove(&target.id)?;
            ctx.status(&style::format_success(
                &format!("Removed tank '{}'", target.name),
                ctx.opts.no_color,
            ));
            Ok(())
        }
    }
}
