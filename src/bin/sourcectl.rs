//! sourcectl - inspect and edit the 48-slot source store
//!
//! Subcommands:
//! - `list`: print every slot
//! - `set`: configure a slot (network URL or local device)
//! - `enable` / `disable`: toggle a slot
//! - `test`: one-shot connection probe of a slot or an ad-hoc source
//!
//! A running ingestd picks up store changes on its next poll.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use tuyere_capture::store::DEFAULT_STORE_PATH;
use tuyere_capture::{
    test_connection, DefaultOpener, SourceConfigStore, SourceDescriptor, SourceKind, MAX_SOURCES,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and edit Tuyere capture sources")]
struct Args {
    /// Path to the source store.
    #[arg(long, env = "TUYERE_SOURCES_PATH", default_value = DEFAULT_STORE_PATH)]
    sources: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every slot.
    List {
        /// Only show enabled slots.
        #[arg(long)]
        enabled: bool,
    },
    /// Configure a slot. Slot numbers are 1-based.
    Set {
        slot: usize,
        /// Source type (rtsp|local).
        #[arg(long = "type", default_value = "rtsp")]
        source_type: SourceKind,
        /// Stream URL for rtsp sources.
        #[arg(long)]
        url: Option<String>,
        /// Device ordinal for local sources.
        #[arg(long)]
        device: Option<u32>,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        /// Leave the slot disabled after writing it.
        #[arg(long)]
        disabled: bool,
    },
    /// Enable a slot.
    Enable { slot: usize },
    /// Disable a slot.
    Disable { slot: usize },
    /// Probe a slot, or an ad-hoc source given by --url / --device.
    Test {
        slot: Option<usize>,
        #[arg(long, conflicts_with = "device")]
        url: Option<String>,
        #[arg(long)]
        device: Option<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut store = SourceConfigStore::open(&args.sources)?;

    match args.command {
        Command::List { enabled } => {
            for index in 0..MAX_SOURCES {
                let desc = store.get_descriptor(index);
                if enabled && !desc.enabled {
                    continue;
                }
                println!(
                    "{:>2}  {:<8} {:<6} {:<20} {}",
                    index + 1,
                    if desc.enabled { "enabled" } else { "disabled" },
                    desc.kind,
                    desc.display_name,
                    desc.display_target()
                );
            }
            println!("{} of {} slots enabled", store.enabled_count(), MAX_SOURCES);
        }
        Command::Set {
            slot,
            source_type,
            url,
            device,
            name,
            disabled,
        } => {
            let index = slot_index(slot)?;
            let current = store.get_descriptor(index);
            let target = match source_type {
                SourceKind::Network => url.ok_or_else(|| anyhow!("--url is required for rtsp sources"))?,
                SourceKind::Local => device
                    .ok_or_else(|| anyhow!("--device is required for local sources"))?
                    .to_string(),
            };
            let desc = SourceDescriptor {
                enabled: !disabled,
                kind: source_type,
                target,
                display_name: name.unwrap_or(current.display_name),
            };
            store.set_descriptor(index, &desc)?;
            println!("slot {} saved: {} {}", slot, desc.kind, desc.display_target());
        }
        Command::Enable { slot } => {
            store.set_enabled(slot_index(slot)?, true)?;
            println!("slot {} enabled", slot);
        }
        Command::Disable { slot } => {
            store.set_enabled(slot_index(slot)?, false)?;
            println!("slot {} disabled", slot);
        }
        Command::Test { slot, url, device } => {
            let desc = match (slot, url, device) {
                (_, Some(url), _) => SourceDescriptor::network(url, "ad-hoc"),
                (_, None, Some(device)) => SourceDescriptor::local(device, "ad-hoc"),
                (Some(slot), None, None) => store.get_descriptor(slot_index(slot)?),
                (None, None, None) => bail!("give a slot number, --url or --device"),
            };
            let outcome = {
                let mut stage = ui.stage(&format!("Probe {}", desc.display_target()));
                let outcome = test_connection(&DefaultOpener, &desc);
                if !outcome.success {
                    stage.fail();
                }
                outcome
            };
            match outcome.dimensions {
                Some((width, height)) => println!("{} ({}x{})", outcome.message, width, height),
                None => println!("{}", outcome.message),
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn slot_index(slot: usize) -> Result<usize> {
    if slot == 0 || slot > MAX_SOURCES {
        bail!("slot must be between 1 and {}", MAX_SOURCES);
    }
    Ok(slot - 1)
}
