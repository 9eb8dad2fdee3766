use anyhow::{Context, Result};
use clap::Parser;
use physarum_core::{Board, ColonyManager, GridBoard, seeded_rng};
use physarum_scout::FsmScouter;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Slime-mold colony foraging simulation.
#[derive(Debug, Parser)]
#[command(name = "physarum")]
struct Args {
    /// Path to the knowledge JSON file.
    #[arg(long)]
    knowledge: PathBuf,

    /// Board width in cells.
    #[arg(long, default_value_t = 100)]
    width: u32,

    /// Board height in cells.
    #[arg(long, default_value_t = 100)]
    height: u32,

    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 500)]
    ticks: u32,

    /// Seed for the colony generator; drawn from entropy when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the knowledge snapshot here on exit.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut board = bootstrap_board(args.width, args.height)?;
    let mut colony = ColonyManager::from_path(
        &board,
        &args.knowledge,
        FsmScouter::spawner(),
        seeded_rng(args.seed),
    )
    .with_context(|| format!("loading colony from {}", args.knowledge.display()))?;
    info!(
        scouters = colony.scouter_count(),
        known_food = colony.state().known_food().len(),
        "colony ready"
    );

    for tick in 0..args.ticks {
        let report = colony.step(&mut board);
        debug!(
            tick,
            target = report.target,
            discovered = report.discovered,
            replaced = report.replaced,
            "tick complete"
        );
    }
    info!(
        scouters = colony.scouter_count(),
        known_food = colony.state().known_food().len(),
        blob_total = board.blob_total(),
        cover = board.cover(),
        "simulation finished"
    );

    if let Some(path) = args.save {
        let snapshot = colony.save()?;
        fs::write(&path, snapshot)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!(path = %path.display(), "knowledge saved");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Seed a board the way the upstream image analysis would: food sources
/// scattered along the rim and a blob footprint in the middle.
fn bootstrap_board(width: u32, height: u32) -> Result<GridBoard> {
    let mut board = GridBoard::new(width, height)?;

    let margin_x = width / 10;
    let margin_y = height / 10;
    for (x, y) in [
        (margin_x, margin_y),
        (width - 1 - margin_x, margin_y),
        (margin_x, height - 1 - margin_y),
        (width - 1 - margin_x, height - 1 - margin_y),
    ] {
        board.set_food(x, y)?;
    }

    let cx = width / 2;
    let cy = height / 2;
    for x in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
        for y in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
            board.drop_blob(x, y, 1.0);
        }
    }
    Ok(board)
}
