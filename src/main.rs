// src/main.rs
//
// =============================================================================
// SPORELAB: COMMANDER & ENTRY POINT (v 0.1 )
// =============================================================================
//
// The wiring center of the planner, CLI edition.
//
// Modes:
// 1. EVOLVE: Seed the goal + candidate field, drive every candidate to
//    death or completion, snapshot the resulting graph.
// 2. TREE:   Build the ghost tree at a cursor state, optionally run the
//    pair optimizer and commit the result into the real graph.
// 3. PICK:   Report the closest spore and its neighborhood for a look point.
// 4. EXEC:   Run raw commands from the stable command surface.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sporelab::config::Config;
use sporelab::session::{Command, Session};
use sporelab::snapshot::GraphSnapshot;

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "sporelab",
    version,
    about = "Spore-graph trajectory planner for a controlled pendulum"
)]
struct Cli {
    /// Path to a JSON configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed candidates and evolve them all to completion.
    Evolve {
        /// Override the Poisson-disk radius for the candidate field.
        #[arg(long)]
        radius: Option<f64>,

        /// Extra single evolution steps to run after the candidate sweep.
        #[arg(long, default_value_t = 0)]
        extra_steps: usize,
    },

    /// Build (and optionally optimize + commit) a ghost tree at a state.
    Tree {
        /// Cursor theta.
        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        /// Cursor theta_dot.
        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// Tree depth (1 or 2).
        #[arg(long, default_value_t = 2)]
        depth: u8,

        /// Run the pair optimizer before committing.
        #[arg(long)]
        optimize: bool,

        /// Commit the tree into the real graph (buffer merge + materialize).
        #[arg(long)]
        commit: bool,
    },

    /// Report the nearest spore and its neighborhood at a look point.
    Pick {
        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// Override the close-spore threshold.
        #[arg(long)]
        threshold: Option<f64>,

        /// Read the graph from a snapshot file instead of an empty session.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Execute raw commands, e.g. "dt.stats" or "tree.set_depth 1".
    Exec {
        commands: Vec<String>,
    },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Evolve {
            radius,
            extra_steps,
        } => run_evolve(config, radius, extra_steps),
        Commands::Tree {
            x,
            y,
            depth,
            optimize,
            commit,
        } => run_tree(config, [x, y], depth, optimize, commit),
        Commands::Pick {
            x,
            y,
            threshold,
            snapshot,
        } => run_pick(config, [x, y], threshold, snapshot),
        Commands::Exec { commands } => run_exec(config, commands),
    }
}

// ============================================================================
// 3. EVOLVE MODE
// ============================================================================

fn run_evolve(config: Config, radius: Option<f64>, extra_steps: usize) -> Result<()> {
    let mut session = Session::new(config)?;

    if let Some(r) = radius {
        session.spore_manager.min_radius = r;
    }
    let _ = session.spore_manager.ensure_goal_spore();

    let candidates = session.spore_manager.generate_candidate_spores();
    log::info!("🚀 evolving {candidates} candidates...");
    let (processed, steps) = session.spore_manager.evolve_all_candidates_to_completion();

    for _ in 0..extra_steps {
        if session.spore_manager.generate_new_spore().is_none() {
            break;
        }
    }

    let stats = session.spore_manager.graph.stats();
    log::info!(
        "evolution done: {processed} candidates, {steps} steps, {} spores, {} links",
        stats.nodes,
        stats.edges
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

// ============================================================================
// 4. TREE MODE
// ============================================================================

fn run_tree(config: Config, cursor: [f64; 2], depth: u8, optimize: bool, commit: bool) -> Result<()> {
    let mut session = Session::new(config)?;
    session.execute(Command::TreeSetDepth(depth))?;
    session.update_cursor(cursor)?;

    let ghost_stats = session.prediction.ghost_stats();
    log::info!(
        "ghost tree at ({:.3}, {:.3}): {} nodes, {} links",
        cursor[0],
        cursor[1],
        ghost_stats.nodes,
        ghost_stats.edges
    );

    if optimize {
        let summary = session.execute(Command::TreeApplyOptimalPairs)?;
        log::info!("{summary}");
    }

    if commit {
        let summary = session.execute(Command::MergeBufferAndMaterialize)?;
        log::info!("{summary}");
        println!(
            "{}",
            serde_json::to_string_pretty(&session.spore_manager.graph.stats())?
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&ghost_stats)?);
    }
    Ok(())
}

// ============================================================================
// 5. PICK MODE
// ============================================================================

fn run_pick(
    config: Config,
    look: [f64; 2],
    threshold: Option<f64>,
    snapshot: Option<PathBuf>,
) -> Result<()> {
    let mut session = Session::new(config)?;

    if let Some(path) = snapshot {
        // Rebuild a real graph from a previous materialization so the picker
        // has something to look at.
        let snap = GraphSnapshot::load(&path)?;
        for record in &snap.spores {
            session
                .spore_manager
                .create_spore(record.position, sporelab::spore::SporeRole::Normal);
        }
        log::info!("loaded {} spores from {}", snap.spores.len(), path.display());
    }

    if let Some(t) = threshold {
        session.execute(Command::PickerSetThreshold(t))?;
    }

    session.update_look_point(look);
    match session.picker.report() {
        Some(report) => {
            log::info!(
                "closest: {:?}, close spores: {}",
                report.closest.as_ref().map(|c| c.id),
                report.close_spores.len()
            );
            println!(
                "closest = {:?}",
                report.closest.as_ref().map(|c| (c.id, c.distance))
            );
            println!("hop-1 routes = {}", report.neighbors_1.len());
            println!("hop-2 routes = {}", report.neighbors_2.len());
        }
        None => println!("no spores in graph"),
    }
    Ok(())
}

// ============================================================================
// 6. EXEC MODE
// ============================================================================

fn run_exec(config: Config, commands: Vec<String>) -> Result<()> {
    let mut session = Session::new(config)?;
    for raw in commands {
        let command = Command::parse(&raw)?;
        let outcome = session.execute(command)?;
        println!("{raw}: {outcome}");
    }
    Ok(())
}
