//! `keyb` — diagnostic loader for DOS keyboard layouts and code pages.
//!
//! Stands in for the emulator module that owns the engine: it loads the
//! configured (or argument-given) layout and code page against a
//! directory of `.KL`/`.KCL`/`.CPI`/`.CPX` files, reports what the
//! engine resolved, and can probe single scan-code translations — which
//! makes layout files debuggable without booting anything.
//!
//! ```text
//! keyb gr 858 --resource-dir ./freedos-keyb
//! keyb fr --probe 1a:00 --probe 12:00
//! ```
//!
//! The BIOS key buffer, video font memory, and conventional memory are
//! the recording simulations from `keyb_core::host::sim`; probe output
//! shows exactly which 16-bit words a real BIOS buffer would receive.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keyb_core::format::kl;
use keyb_core::host::sim::{RecordingKeyBuffer, SimDos, SimVideo};
use keyb_core::KeyboardSession;
use keyb_host::config;
use keyb_host::resources::DirResourceStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DOS keyboard-layout and code-page loader.
#[derive(Debug, Parser)]
#[command(name = "keyb", about = "Load and inspect DOS keyboard layouts", version)]
struct Cli {
    /// Layout id to load (e.g. `gr`, `fr`, `us`); overrides the config.
    layout: Option<String>,

    /// Code page id to load; 0 extracts the page from the layout file.
    codepage: Option<u16>,

    /// Code-page file name; `auto` picks the bundled archive, `none`
    /// skips code-page loading.
    #[arg(long, env = "KEYB_CODEPAGE_FILE")]
    codepage_file: Option<String>,

    /// Directory searched for layout and code-page files.
    #[arg(long, env = "KEYB_RESOURCE_DIR")]
    resource_dir: Option<std::path::PathBuf>,

    /// Explicit config file path instead of the platform default.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Scan-code probes to translate after loading, as hex
    /// `scan:flags1[:flags2[:flags3]]` (e.g. `10:01`).
    #[arg(long = "probe")]
    probes: Vec<String>,
}

/// One parsed `--probe` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    scan: u8,
    flags1: u8,
    flags2: u8,
    flags3: u8,
}

/// Parses `scan:flags1[:flags2[:flags3]]` with hex fields.
fn parse_probe(spec: &str) -> anyhow::Result<Probe> {
    let mut fields = spec.split(':');
    let mut next = |name: &str, required: bool| -> anyhow::Result<u8> {
        match fields.next() {
            Some(field) => u8::from_str_radix(field, 16)
                .with_context(|| format!("invalid hex {name} in probe '{spec}'")),
            None if required => anyhow::bail!("probe '{spec}' is missing its {name} field"),
            None => Ok(0),
        }
    };
    let scan = next("scan", true)?;
    let flags1 = next("flags1", true)?;
    let flags2 = next("flags2", false)?;
    let flags3 = next("flags3", false)?;
    Ok(Probe { scan, flags1, flags2, flags3 })
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config::load_config().unwrap_or_else(|e| {
            warn!("config unavailable ({e}); using defaults");
            config::AppConfig::default()
        }),
    };

    let layout = cli.layout.unwrap_or_else(|| cfg.keyboard.layout.clone());
    let codepage_file = cli
        .codepage_file
        .unwrap_or_else(|| cfg.keyboard.codepage_file.clone());
    let resource_dir = cli
        .resource_dir
        .unwrap_or_else(|| cfg.keyboard.resource_dir.clone());

    let resources = Arc::new(DirResourceStore::new(&resource_dir));
    let keys = Arc::new(RecordingKeyBuffer::new());
    let video = Arc::new(SimVideo::new());
    let dos = Arc::new(SimDos::new());

    // A codepage of 0 (from config or argument) means "whatever the
    // layout file was built for".
    let mut codepage = cli.codepage.unwrap_or(cfg.keyboard.codepage);
    if codepage == 0 {
        codepage = kl::extract_codepage(&layout, resources.as_ref());
        info!("auto-selected codepage {codepage} for layout {layout}");
    }

    let mut session = KeyboardSession::new(
        Arc::clone(&resources) as Arc<dyn keyb_core::host::ResourceStore>,
        Arc::clone(&keys) as Arc<dyn keyb_core::host::KeyBuffer>,
        Arc::clone(&video) as Arc<dyn keyb_core::host::VideoAdapter>,
        Arc::clone(&dos) as Arc<dyn keyb_core::host::DosMemory>,
    );

    match session.load_layout(&layout, codepage, &codepage_file) {
        Ok(()) => {
            println!(
                "layout:   {} (language code {})",
                session.loaded_layout_name().unwrap_or("none"),
                session.main_language_code().unwrap_or("-"),
            );
            println!("codepage: {}", session.loaded_codepage());
        }
        Err(err) => {
            // A failed load is non-fatal for the emulator too: the US
            // pass-through layout stays in effect.
            eprintln!("error loading keyboard layout {layout}: {err}");
            eprintln!("staying on the US pass-through layout");
        }
    }

    for spec in &cli.probes {
        let probe = parse_probe(spec)?;
        keys.clear();
        let handled = session.translate_key(probe.scan, probe.flags1, probe.flags2, probe.flags3);
        let emitted: Vec<String> = keys
            .keys()
            .iter()
            .map(|word| format!("{word:04X}"))
            .collect();
        println!(
            "probe {spec}: {} [{}]",
            if handled { "handled" } else { "pass-through" },
            emitted.join(", "),
        );
    }

    session.shutdown();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
