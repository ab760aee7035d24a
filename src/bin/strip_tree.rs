//! strip_tree: print the strip tree of a timeline document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use stripgraph::config::Config;
use stripgraph::entities::{EditingContext, Strip, TimelineDocument};

/// Inspect a timeline document
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Timeline document (JSON)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Editing config (JSON); defaults are used when omitted
    #[arg(short = 'c', long = "config", value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Show payload parameters and modifiers
    #[arg(short = 'd', long = "detail")]
    detail: bool,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
    debug!("Command-line args: {:?}", args);

    let config = match &args.config {
        Some(path) => Config::from_json(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::default(),
    };
    let ctx = TimelineDocument::from_json(&args.file)
        .and_then(|doc| doc.restore(config))
        .with_context(|| format!("loading timeline {}", args.file.display()))?;
    info!("Loaded {} strips from {}", ctx.len(), args.file.display());

    for strip in ctx.strips() {
        print_strip(&ctx, strip, 0, args.detail);
    }
    if let Some(active) = ctx.active_strip().and_then(|id| ctx.find(id)) {
        println!("active: {}", active.name());
    }
    let path: Vec<&str> = ctx
        .navigation()
        .iter()
        .filter_map(|f| ctx.find(f.container))
        .map(|s| s.name())
        .collect();
    if !path.is_empty() {
        println!("viewing: {}", path.join(" > "));
    }
    Ok(())
}

fn name_of(ctx: &EditingContext, id: stripgraph::StripId) -> String {
    ctx.find(id).map(|s| s.name().to_string()).unwrap_or_else(|| id.to_string())
}

fn print_strip(ctx: &EditingContext, strip: &Strip, depth: usize, detail: bool) {
    let indent = "  ".repeat(depth);
    let mut line = format!(
        "{}{} [{:?}] ch{} {}..{}",
        indent,
        strip.name(),
        strip.kind(),
        strip.channel,
        strip.left_handle(),
        strip.right_handle()
    );
    if let Some(effect) = strip.effect() {
        line.push_str(&format!(" effect={}", effect));
    }
    let operands: Vec<String> = strip
        .inputs()
        .iter()
        .flatten()
        .map(|id| name_of(ctx, *id))
        .collect();
    if !operands.is_empty() {
        line.push_str(&format!(" inputs=({})", operands.join(", ")));
    }
    let partners: Vec<String> = strip.connections().iter().map(|id| name_of(ctx, *id)).collect();
    if !partners.is_empty() {
        line.push_str(&format!(" connected=[{}]", partners.join(", ")));
    }
    if ctx.is_strip_muted(strip.id()) {
        line.push_str(" muted");
    }
    if ctx.is_strip_locked(strip.id()) {
        line.push_str(" locked");
    }
    println!("{}", line);

    if detail {
        let mut params: Vec<_> = strip.payload.params.iter().collect();
        params.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in params {
            println!("{}    {} = {:?}", indent, key, value);
        }
        for m in strip.modifiers() {
            let mask = m.mask().map(|id| name_of(ctx, id)).unwrap_or_else(|| "-".into());
            println!("{}    modifier {} (mask {})", indent, m.name, mask);
        }
    }
    for child in strip.children() {
        print_strip(ctx, child, depth + 1, detail);
    }
}
