//! nestcat - concatenate granules of hierarchical scientific data along a shared dimension

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nestcat::{collect_history, resolve_input_paths, Config, Stitcher};

#[derive(Debug, Parser)]
#[command(name = "nestcat", version, about = "Concatenate hierarchical data containers")]
struct Cli {
    /// Container files, a directory of them, or a text file listing one path per line
    #[arg(value_name = "INPUT", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Where to write the concatenated container
    #[arg(short = 'o', long = "output-path")]
    output_path: PathBuf,

    /// axis-concat or coordinate-combine
    #[arg(long)]
    concat_method: Option<String>,

    /// Dimension to concatenate along, required for axis-concat
    #[arg(long)]
    concat_dim: Option<String>,

    /// Variable whose first value orders the inputs
    #[arg(long)]
    sorting_variable: Option<String>,

    /// Delimiter between group names in flattened variable names
    #[arg(long)]
    group_delimiter: Option<String>,

    /// equals, identical or override
    #[arg(long)]
    compat: Option<String>,

    /// override, drop, drop_conflicts, no_conflicts or identical
    #[arg(long)]
    combine_attrs: Option<String>,

    /// exact or override
    #[arg(long)]
    join: Option<String>,

    /// JSON file with settings; flags given here take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reference URL recorded in the history of the output
    #[arg(long)]
    program_ref: Option<String>,

    /// Also write the flattened, concatenated data next to the output
    #[arg(long)]
    write_flat_intermediate: bool,

    /// Skip checking that all inputs have the same groups
    #[arg(long)]
    no_structure_check: bool,

    /// Replace the output file if it exists
    #[arg(short = 'O', long)]
    overwrite: bool,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Settings given on the command line, as config keys and values
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = vec![];
        let options = [
            ("concat_method", &self.concat_method),
            ("concat_dim", &self.concat_dim),
            ("sorting_variable", &self.sorting_variable),
            ("group_delimiter", &self.group_delimiter),
            ("compat", &self.compat),
            ("combine_attrs", &self.combine_attrs),
            ("join", &self.join),
        ];
        for (key, value) in options {
            if let Some(value) = value {
                overrides.push((key, value.clone()));
            }
        }

        if self.write_flat_intermediate {
            overrides.push(("write_flat_intermediate", "true".into()));
        }
        if self.no_structure_check {
            overrides.push(("check_structure", "false".into()));
        }
        if self.overwrite {
            overrides.push(("overwrite_output", "true".into()));
        }

        overrides
    }

    fn config(&self) -> nestcat::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json(&fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        for (key, value) in self.overrides() {
            config.set(key, &value)?;
        }

        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli) -> nestcat::Result<Option<PathBuf>> {
    let mut config = cli.config()?;
    config.validate()?;
    info!(
        method = %config.concat_method,
        dim = config.concat_dim.as_deref().unwrap_or("N/A"),
        "Concatenation settings"
    );

    let files = resolve_input_paths(&cli.inputs)?;
    info!("Input files found: {}", files.len());

    if config.history_json.is_none() {
        info!("Collecting history from {} input files", files.len());
        config.history_json = Some(collect_history(&files, cli.program_ref.as_deref())?);
    }

    Stitcher::new(config)?.run(&files, &cli.output_path)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(Some(output)) => {
            info!(output = %output.display(), "Concatenation completed");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            info!("No output generated, no workable input files");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
