use clap::{Parser, Subcommand};
use querykit::cli::{self as prog_cli, parse_data_arg};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "querykit", version, about = "Aggregation pipeline builder CLI", long_about = None)]
struct Cli {
    /// Log level for this run (off|error|warn|info|debug|trace)
    #[arg(long, help = "Log level override. Takes precedence over QUERYKIT_LOG_LEVEL.")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(name = "pipeline", about = "Print the pipeline a select spec (JSON file or inline JSON) expands to")]
    Pipeline {
        #[arg(long, help = "Path to a JSON select spec, or the JSON itself")]
        spec: String,
    },
    #[command(name = "group-pipeline", about = "Print the group-count pipeline for a field")]
    GroupPipeline {
        #[arg(long)]
        field: String,
        #[arg(long, help = "Optional filter as (extended) JSON")]
        filter: Option<String>,
    },
    #[command(name = "select", about = "Run a select spec against NDJSON files loaded in memory")]
    Select {
        #[arg(long, help = "Path to a JSON select spec, or the JSON itself")]
        spec: String,
        #[arg(long, help = "Collection the select runs on")]
        collection: String,
        #[arg(long = "data", help = "collection=path.ndjson; repeat for lookup targets")]
        data: Vec<String>,
    },
    #[command(name = "uri", about = "Print the connection string from config and environment")]
    Uri {
        #[arg(long, help = "Path to a connection config file (TOML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Print the password instead of masking it")]
        show_password: bool,
    },
}

fn to_command(cmd: Commands) -> Result<prog_cli::Command, querykit::DbError> {
    Ok(match cmd {
        Commands::Pipeline { spec } => prog_cli::Command::Pipeline { spec },
        Commands::GroupPipeline { field, filter } => prog_cli::Command::GroupPipeline { field, filter_json: filter },
        Commands::Select { spec, collection, data } => prog_cli::Command::Select {
            spec,
            collection,
            data: data.iter().map(|d| parse_data_arg(d)).collect::<Result<_, _>>()?,
        },
        Commands::Uri { config, show_password } => prog_cli::Command::Uri { config, show_password },
    })
}

fn main() {
    let cli = Cli::parse();
    let level = cli.log_level.or_else(|| std::env::var("QUERYKIT_LOG_LEVEL").ok());
    let dir = std::env::var("QUERYKIT_LOG_DIR").ok().map(PathBuf::from);
    if let Err(e) = querykit::logger::configure_logging(dir.as_deref(), level.as_deref(), None) {
        eprintln!("warning: logging disabled: {e}");
    }

    let r = to_command(cli.command).and_then(|cmd| prog_cli::run(cmd, &mut std::io::stdout().lock()));
    if let Err(e) = r {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
