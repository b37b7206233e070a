use anyhow::Result;
use clap::{Parser, Subcommand};
use demand::{
    commands::{fields, history, predict, rank_features, stats, train},
    config::{load_schema, PipelineSettings},
    history::HistoryFilter,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "demand")]
#[command(about = "Energy demand forecasting with train/serve consistent feature pipelines")]
struct Cli {
    /// JSON object of pipeline settings (WINDOW_LENGTH, TRAIN_FRACTION, FOREST_TREES, ...)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,
    /// JSON table schema (defaults to the built-in energy schema)
    #[arg(long, global = true, value_name = "PATH")]
    schema: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit encoders, scalers and the sequence model, then save the artifact bundle
    Train {
        /// Training table (CSV with header)
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
        /// Destination directory for the artifact bundle
        #[arg(long, value_name = "DIR")]
        bundle: PathBuf,
        /// Where to write the JSON training summary (defaults to the bundle directory)
        #[arg(long, value_name = "PATH")]
        summary: Option<PathBuf>,
        /// Number of consecutive rows per sequence
        #[arg(long)]
        window_length: Option<usize>,
        /// Share of sequences used for training (0..=1)
        #[arg(long)]
        train_fraction: Option<f64>,
        /// Number of trees in the sequence model
        #[arg(long)]
        trees: Option<usize>,
        /// Base seed for the tree ensemble
        #[arg(long)]
        seed: Option<u64>,
        /// Rank features before training and include the ranking in the summary
        #[arg(long = "rank-features")]
        rank: bool,
        /// Encoded feature columns to drop, comma separated
        #[arg(long = "drop", value_delimiter = ',')]
        drop_features: Vec<String>,
    },
    /// Predict energy consumption for one row using a saved bundle
    Predict {
        /// Artifact bundle directory
        #[arg(long, value_name = "DIR")]
        bundle: PathBuf,
        /// Historical table used for drift checks
        #[arg(long, value_name = "PATH")]
        history: Option<PathBuf>,
        /// JSON request file ({"group", "timestamp", "fields"})
        #[arg(long, value_name = "PATH")]
        request: Option<PathBuf>,
        /// Grouping key, e.g. the country
        #[arg(long)]
        group: Option<String>,
        /// Row timestamp, needed when a cyclic field is derived from it
        #[arg(long)]
        timestamp: Option<String>,
        /// Input field as NAME=VALUE, repeatable
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
    },
    /// Rank encoded features by importance without training a bundle
    RankFeatures {
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
    },
    /// Describe the inference input fields of a bundle
    Fields {
        #[arg(long, value_name = "DIR")]
        bundle: PathBuf,
    },
    /// Browse historical rows with optional group, year and month filters
    History {
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        /// Maximum number of rows to print
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Column summaries, target histogram and correlation matrix
    Stats {
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
        /// Number of histogram bins
        #[arg(long)]
        bins: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli {
        settings,
        schema,
        command,
    } = Cli::parse();

    let mut settings = PipelineSettings::load(settings.as_deref())?;
    info!("Starting demand pipeline");

    match command {
        Commands::Train {
            data,
            bundle,
            summary,
            window_length,
            train_fraction,
            trees,
            seed,
            rank,
            drop_features,
        } => {
            let training = &mut settings.training;
            if let Some(window_length) = window_length {
                training.window_length = window_length;
            }
            if let Some(train_fraction) = train_fraction {
                training.train_fraction = train_fraction;
            }
            if let Some(trees) = trees {
                training.model.n_estimators = trees;
            }
            if let Some(seed) = seed {
                training.model.seed = seed;
                training.ranker.seed = seed;
            }
            training.rank_features |= rank;
            training.dropped_features.extend(drop_features);
            let schema = load_schema(schema.as_deref())?;
            train::run(&settings, schema, &data, &bundle, summary)?;
        }
        Commands::Predict {
            bundle,
            history,
            request,
            group,
            timestamp,
            fields,
        } => {
            let request = predict::build_request(request.as_deref(), group, timestamp, &fields)?;
            predict::run(&settings, &bundle, history.as_deref(), &request)?;
        }
        Commands::RankFeatures { data } => {
            let schema = load_schema(schema.as_deref())?;
            rank_features::run(&settings, schema, &data)?;
        }
        Commands::Fields { bundle } => {
            fields::run(&bundle)?;
        }
        Commands::History {
            data,
            group,
            year,
            month,
            limit,
        } => {
            let schema = load_schema(schema.as_deref())?;
            let filter = HistoryFilter { group, year, month };
            history::run(
                schema,
                &data,
                &filter,
                limit.unwrap_or(settings.history_limit),
            )?;
        }
        Commands::Stats { data, bins } => {
            let schema = load_schema(schema.as_deref())?;
            stats::run(schema, &data, bins.unwrap_or(settings.histogram_bins))?;
        }
    }

    Ok(())
}
