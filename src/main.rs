use clap::{Parser, Subcommand};

mod cli;

use cli::params::{cmd_params, ParamsArgs};
use cli::paths::{cmd_paths, PathsArgs};
use cli::predict::{cmd_predict, PredictArgs};

#[derive(Parser)]
#[command(
    name = "blockcost",
    version,
    about = "Basic-block throughput prediction with graph-structured recurrent models"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Predict the cost of one basic block
    Predict(PredictArgs),
    /// Export a model's named parameters to a JSON file
    Params(ParamsArgs),
    /// Show a block's dependency structure: roots, terminals and paths
    Paths(PathsArgs),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Predict(args) => cmd_predict(args),
        Command::Params(args) => cmd_params(args),
        Command::Paths(args) => cmd_paths(args),
    }
}
