//! `rigging state` - inspect and edit recorded state

use anyhow::{Context as AnyhowContext, Result, anyhow, bail};
use colored::Colorize;
use declarative::{FileStateStore, LiveResource, ResourceId, Snapshot, StateStore};

use crate::Context;
use crate::cli::StateCommand;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, cmd: &StateCommand) -> Result<i32> {
    let store = FileStateStore::new(paths::state_file(&ctx.config, ctx.state.as_deref()));
    match cmd {
        StateCommand::List => list(&store),
        StateCommand::Show { id } => show(&store, &parse_id(id)?),
        StateCommand::Rm { id } => rm(&store, &parse_id(id)?),
    }
}

fn parse_id(raw: &str) -> Result<ResourceId> {
    raw.parse().map_err(|e: String| anyhow!(e))
}

fn load(store: &FileStateStore) -> Result<Snapshot> {
    store
        .load()
        .with_context(|| format!("Could not load state {}", store.path().display()))
}

fn list(store: &FileStateStore) -> Result<i32> {
    let snapshot = load(store)?;
    if snapshot.is_empty() {
        ui::dim(&format!("No resources recorded in {}", store.path().display()));
        return Ok(0);
    }

    ui::header(&format!("State ({})", ui::count(snapshot.len(), "resource")));
    for resource in snapshot.iter() {
        println!(
            "  {:<36} {:<24} {}",
            resource.id.to_string().bold(),
            resource.provider_id,
            resource.applied_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    Ok(0)
}

fn show(store: &FileStateStore, id: &ResourceId) -> Result<i32> {
    let snapshot = load(store)?;
    let resource = find(&snapshot, id)?;
    println!("{}", serde_json::to_string_pretty(resource)?);
    Ok(0)
}

fn rm(store: &FileStateStore, id: &ResourceId) -> Result<i32> {
    let _lock = store.lock()?;
    let snapshot = load(store)?;
    find(&snapshot, id)?;

    store
        .remove(id)
        .with_context(|| format!("Could not remove {id} from state"))?;
    ui::success(&format!(
        "Removed {id} from state; the provider object is left in place"
    ));
    Ok(0)
}

fn find<'a>(snapshot: &'a Snapshot, id: &ResourceId) -> Result<&'a LiveResource> {
    match snapshot.get(id) {
        Some(resource) => Ok(resource),
        None => bail!("{id} is not in state"),
    }
}
