use std::{path::PathBuf, time::Instant};

use clap::{Args, Parser, Subcommand};
use runtime::{
    image_io, logging, DeviceRequest, LoggingSettings, Override, RunConfig, RuntimeConfig,
    RuntimeError, WorkerCount,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("isanet-segment failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "ISANet semantic segmentation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment one image and write the colourised label mask.
    Segment(SegmentArgs),
    /// Print the detected runtime configuration.
    Env(EnvArgs),
    /// Write freshly initialised weights for a configuration.
    InitWeights(InitWeightsArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(short, long, value_name = "PATH", help = "Path to run config file")]
    config: PathBuf,

    #[arg(
        long = "override",
        value_name = "KEY=VALUE",
        help = "Override configuration value using dot-separated paths"
    )]
    overrides: Vec<Override>,
}

#[derive(Args, Debug)]
struct SegmentArgs {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long, value_name = "PATH", help = "Input image")]
    image: PathBuf,

    #[arg(long, value_name = "PATH", help = "Where to write the colour mask")]
    output: PathBuf,

    #[arg(long, value_name = "PATH", help = "Safetensors weights to load")]
    weights: Option<PathBuf>,

    #[arg(long, value_names = ["HEIGHT", "WIDTH"], num_args = 2, help = "Resize the input first")]
    resize: Option<Vec<u32>>,

    #[arg(long, help = "Force CPU execution")]
    cpu: bool,
}

#[derive(Args, Debug)]
struct EnvArgs {
    #[arg(long, default_value = "auto", help = "Requested device: auto, cpu or gpu")]
    device: DeviceRequest,

    #[arg(long, default_value = "auto", help = "Worker count: auto or a number")]
    workers: WorkerCount,
}

#[derive(Args, Debug)]
struct InitWeightsArgs {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long, value_name = "PATH", help = "Destination safetensors file")]
    output: PathBuf,
}

fn run() -> Result<(), RuntimeError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Segment(args) => segment(args),
        Command::Env(args) => env(args),
        Command::InitWeights(args) => init_weights(args),
    }
}

/// Reads the run config, applies overrides and installs the logger from the
/// resulting settings.
fn load_config(args: &ConfigArgs) -> Result<RunConfig, RuntimeError> {
    let config = RunConfig::from_path(&args.config)?.with_overrides(&args.overrides)?;
    config.validate()?;
    logging::init(&config.logging)?;
    log::debug!("loaded {}", args.config.display());
    for item in &args.overrides {
        log::info!("override {item}");
    }
    Ok(config)
}

fn segment(args: SegmentArgs) -> Result<(), RuntimeError> {
    let mut config = load_config(&args.config)?;
    if args.cpu {
        config.runtime.device = DeviceRequest::Cpu;
    }
    if let Some(weights) = args.weights {
        config.model.pretrained = Some(weights);
    }

    let runtime = RuntimeConfig::from_process(config.runtime.device)?;
    log::info!(
        "place={} num={} workers={}",
        runtime.place(),
        runtime.num(),
        runtime.num_workers(config.runtime.num_workers)
    );
    let device = runtime.device(0)?;
    if let Some(seed) = config.runtime.seed {
        if let Err(err) = device.set_seed(seed) {
            log::debug!("seed {seed} not applied: {err}");
        }
    }

    let (model, _varmap) = isanet::build(&config.model, &device)?;
    if config.model.pretrained.is_none() {
        log::warn!("no pretrained weights configured; predictions come from random weights");
    }

    let resize = match args.resize.as_deref() {
        Some([height, width]) => Some((*height, *width)),
        _ => None,
    };
    let image = image_io::load_image(&args.image, &device, resize)?;

    let started = Instant::now();
    let labels = model.predict(&image)?;
    log::info!("inference took {:.1?}", started.elapsed());

    let palette = image_io::color_map(config.model.num_classes);
    image_io::save_mask(&labels, &palette, &args.output)?;
    println!("{}", args.output.display());
    Ok(())
}

fn env(args: EnvArgs) -> Result<(), RuntimeError> {
    logging::init(&LoggingSettings::default())?;
    let runtime = RuntimeConfig::from_process(args.device)?;
    println!("place: {}", runtime.place());
    println!("num: {}", runtime.num());
    println!("gpu_nums: {}", runtime.gpu_nums());
    println!("hide_accelerators: {}", runtime.hide_accelerators());
    println!("num_workers: {}", runtime.num_workers(args.workers));
    Ok(())
}

fn init_weights(args: InitWeightsArgs) -> Result<(), RuntimeError> {
    let mut config = load_config(&args.config)?;
    config.model.pretrained = None;
    let (_model, varmap) = isanet::build(&config.model, &candle_core::Device::Cpu)?;
    isanet::save_weights(&varmap, &args.output)?;
    println!("{}", args.output.display());
    Ok(())
}
