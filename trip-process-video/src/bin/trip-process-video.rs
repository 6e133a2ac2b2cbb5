use anyhow::{Context as ContextTrait, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, layer::SubscriberExt};

use movie_writer::{BgMovieWriter, Y4mOptions};
use overlay_render::OverlayResources;
use trip_process_video::{
    load_events_csv, load_trace_csv, run_export, CancelFlag, ExportConfig, ExportPlan,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export overlay video using a TOML file as configuration.
    Export {
        /// Input configuration TOML file
        #[arg(short, long, value_name = "CONFIG_TOML")]
        config: std::path::PathBuf,
    },

    /// Print an example configuration TOML.
    PrintExampleConfig,
}

fn init_logging() -> Result<()> {
    let console_layer = fmt::layer().with_file(true).with_line_number(true);
    let collector = tracing_subscriber::registry()
        .with(console_layer)
        .with(tracing_subscriber::filter::EnvFilter::from_default_env());
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    init_logging()?;

    let cli = Cli::parse();

    let cfg = match &cli.command {
        Some(Commands::Export { config }) => {
            // Get directory of configuration file. Works if the path is
            // relative or absolute.
            let abs_cfg_path = config.canonicalize()?;
            let cfg_dir = abs_cfg_path.parent();

            let cfg_str = std::fs::read_to_string(config)
                .with_context(|| format!("Reading config file '{}'", config.display()))?;

            let cfg: ExportConfig = toml::from_str(&cfg_str).with_context(|| {
                format!(
                    "Parse error reading config toml file at \"{}\"",
                    config.display()
                )
            })?;

            cfg.validate(cfg_dir).with_context(|| {
                format!(
                    "Validation error with config toml file at \"{}\"",
                    config.display()
                )
            })?
        }
        Some(Commands::PrintExampleConfig) => {
            let default_buf = toml::to_string_pretty(&ExportConfig::default())?;
            println!("{}", default_buf);
            return Ok(());
        }
        None => {
            tracing::warn!("Nothing to do: no subcommand given.");
            return Ok(());
        }
    };

    let samples = load_trace_csv(&cfg.valid().input_trace)?;
    let events = match &cfg.valid().input_events {
        Some(path) => load_events_csv(path)?,
        None => Vec::new(),
    };
    let resources = OverlayResources::load(cfg.valid().logo.as_deref(), &cfg.valid().event_icons)?;

    let plan = ExportPlan::new(samples, events, resources, &cfg)?;

    let output = &cfg.valid().output;
    let out_fd = std::fs::File::create(output)
        .with_context(|| format!("Creating output file \"{output}\""))?;
    let opts = Y4mOptions {
        raten: plan.frame_rate().round() as usize,
        rated: 1,
        quality: cfg.valid().quality.clone(),
    };
    let mut sink = BgMovieWriter::new(
        Box::new(std::io::BufWriter::new(out_fd)),
        opts,
        cfg.valid().sink_queue_frames(),
    );

    // Custom progress bar with space at right end to prevent obscuring last
    // digit with cursor.
    let style = ProgressStyle::with_template("{wide_bar} {pos}/{len} ETA: {msg} ")?;
    let pb = ProgressBar::new(plan.frame_count()).with_style(style);

    let cancel = CancelFlag::new();
    let summary = run_export(&plan, &mut sink, &cancel, |progress| {
        pb.set_position(progress.frames_delivered);
        match progress.remaining {
            Some(remaining) => pb.set_message(format!("{:.0}s", remaining.as_secs_f64())),
            None => pb.set_message("-"),
        }
    })
    .await?;
    pb.finish_and_clear();

    tracing::info!(
        "wrote {} frames to \"{output}\" in {:.1}s",
        summary.frames_delivered,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
