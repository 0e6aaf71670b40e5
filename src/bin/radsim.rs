use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use radsim::output::{create_timestamped_output_dir, write_run_outputs};
use radsim::{RunOptions, SimulationOutput, Simulator, Sweep};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Polarimetric radar variables of hydrometeor scenes")]
struct Cli {
    /// Box file (YAML, may carry %sens(start, end, n) tags)
    #[arg(long)]
    boxes: PathBuf,

    /// Simulation config (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replacement for the built-in box defaults
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Output base directory; each run gets a timestamped subdirectory
    #[arg(long, default_value = "output-radsim")]
    output: PathBuf,

    /// Also derive the variables of all boxes combined
    #[arg(long)]
    integrated: bool,

    /// Frequency [GHz] for the combined result when boxes disagree
    #[arg(long)]
    frequency: Option<f64>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut simulator = Simulator::from_files(
        cli.config.as_deref(),
        &cli.boxes,
        cli.defaults.as_deref(),
    )
    .with_context(|| format!("failed to set up simulation from {}", cli.boxes.display()))?;

    let options = RunOptions {
        integrated: cli.integrated || cli.frequency.is_some(),
        frequency: cli.frequency,
    };
    let output = simulator.run(options).context("simulation failed")?;
    print_report(&output);

    let output_dir = create_timestamped_output_dir(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let files = write_run_outputs(&output_dir, &output).context("failed to write outputs")?;

    println!("Output directory: {}", output_dir.display());
    for file in files {
        println!("  {file}");
    }
    Ok(())
}

fn print_report(output: &SimulationOutput) {
    let (reference, sweep) = match output {
        SimulationOutput::Single { boxes, integrated } => {
            for (name, vars) in boxes {
                println!("Box {name}:\n{vars}");
            }
            if let Some(vars) = integrated {
                println!("All boxes:\n{vars}");
            }
            return;
        }
        SimulationOutput::Sensitivity(sens) => (&sens.reference, &sens.sweep),
    };

    for (name, vars) in reference {
        println!("Reference {name}:\n{vars}");
    }
    match sweep {
        Sweep::Serial(traces) => {
            for trace in traces {
                println!("Serial sweep of {} ({} targets)", trace.parameter, trace.targets.len());
            }
        }
        Sweep::Parallel(grids) => {
            if let Some(array) = grids.first().and_then(|(_, arrays)| arrays.values().next()) {
                println!(
                    "Parallel sweep over {:?}, grid shape {:?}",
                    array.axis_names(),
                    array.shape()
                );
            }
        }
    }
}
