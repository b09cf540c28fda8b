#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI for building precomputed heatmap aggregates.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use heatmap_aggregate::BoundingBox;
use heatmap_aggregate::binner::{DEFAULT_CHUNK_SIZE, PointColumns};
use heatmap_cli_utils::IndicatifProgress;
use heatmap_generate::{AggregateJob, build_aggregates};

#[derive(Parser)]
#[command(name = "heatmap_generate", about = "Heatmap aggregate builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bin a raw point CSV into a precomputed aggregate CSV
    Aggregates {
        /// Raw point CSV
        #[arg(long)]
        input: PathBuf,

        /// Destination for the precomputed table
        #[arg(long)]
        out: PathBuf,

        /// H3 resolutions to aggregate
        #[arg(long, num_args = 1.., default_values_t = [7u8, 8, 9])]
        res: Vec<u8>,

        /// k-anonymity threshold recorded per cell
        #[arg(long, default_value_t = 20)]
        k: u64,

        /// Rows per binning chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Only keep points inside `minLat,minLng,maxLat,maxLng`
        #[arg(long)]
        bbox: Option<BoundingBox>,

        /// Entity id column name
        #[arg(long, default_value = "randomized_id")]
        id_column: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = heatmap_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregates {
            input,
            out,
            res,
            k,
            chunk_size,
            bbox,
            id_column,
        } => {
            let job = AggregateJob {
                input,
                output: out,
                resolutions: res,
                k,
                chunk_size,
                bbox,
                columns: PointColumns {
                    id: id_column,
                    ..PointColumns::default()
                },
            };

            log::info!(
                "Binning {} at resolutions {:?}",
                job.input.display(),
                job.resolutions
            );
            let progress = IndicatifProgress::rows_bar(&multi, "Binning points");
            let summary = build_aggregates(&job, &progress)?;

            log::info!(
                "{} rows read, {} binned, {} dropped, {} outside bbox; {} cells written",
                summary.stats.rows_read,
                summary.stats.points_binned,
                summary.stats.rows_dropped,
                summary.stats.rows_filtered,
                summary.rows_written
            );
        }
    }

    Ok(())
}
