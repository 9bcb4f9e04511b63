//! GrowNet demo driver.
//!
//! Builds a small region, drives it for a number of ticks and logs metrics.
//! Set `RUST_LOG=debug` to see growth and wiring events.

use std::process::ExitCode;

use grownet::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Options {
    command: String,
    ticks: usize,
    json: bool,
    config: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            return ExitCode::from(2);
        }
    };

    let result = match opts.command.as_str() {
        "help" | "--help" | "-h" => {
            print_help();
            return ExitCode::SUCCESS;
        }
        "scalar" => run_scalar(&opts),
        "image" => run_image(&opts),
        "growth" => run_growth(&opts),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(region) => {
            if opts.json {
                let snapshot = RegionAdapter::new(&region).snapshot();
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(text) => println!("{text}"),
                    Err(err) => {
                        error!(%err, "failed to serialize snapshot");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        command: "scalar".to_string(),
        ticks: 200,
        json: false,
        config: None,
    };
    let mut iter = args.iter();
    let mut command_seen = false;
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ticks" => {
                let value = iter.next().ok_or("--ticks needs a value")?;
                opts.ticks = value
                    .parse()
                    .map_err(|_| format!("invalid tick count: {value}"))?;
            }
            "--json" => opts.json = true,
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                opts.config = Some(path.clone());
            }
            other if !command_seen && !other.starts_with("--") || other == "--help" => {
                opts.command = other.to_string();
                command_seen = true;
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
    }
    Ok(opts)
}

fn print_help() {
    println!("grownet (growing neural substrate demo)");
    println!("usage:");
    println!("  grownet [scalar|image|growth|help] [--ticks N] [--json] [--config FILE]");
    println!();
    println!("  scalar   one hidden layer on port 'x', driven with a slow sine");
    println!("  image    8x8 input -> topographic 3x3 DoG -> 8x8 output, moving dot");
    println!("  growth   aggressive growth policy, watch layers appear");
    println!();
    println!("  --config FILE   RegionConfig as JSON");
    println!("  --json          print the final region snapshot as JSON");
}

fn load_config(opts: &Options, fallback: RegionConfig) -> grownet::Result<RegionConfig> {
    let Some(path) = &opts.config else {
        return Ok(fallback);
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| GrowNetError::Configuration(format!("cannot read {path}: {err}")))?;
    serde_json::from_str(&text)
        .map_err(|err| GrowNetError::Configuration(format!("cannot parse {path}: {err}")))
}

fn run_scalar(opts: &Options) -> grownet::Result<Region> {
    let config = load_config(opts, RegionConfig::default())?;
    let mut region = Region::with_config("scalar", config)?;
    let hidden = region.add_layer(8, 1, 1);
    region.wire_layer_random(hidden, 0.2, false)?;
    region.bind_input("x", &[hidden])?;

    for t in 0..opts.ticks {
        let value = 0.5 + 0.4 * (t as f64 * 0.05).sin();
        let metrics = region.tick("x", value)?;
        if t % 25 == 0 {
            info!(
                t,
                value,
                delivered = metrics.delivered_events,
                slots = metrics.total_slots,
                synapses = metrics.total_synapses,
                "scalar"
            );
        }
    }

    let summary = region.prune(100, 0.05)?;
    info!(pruned = summary.total(), "done");
    Ok(region)
}

fn run_image(opts: &Options) -> grownet::Result<Region> {
    const SIDE: usize = 8;
    let config = load_config(opts, RegionConfig::default().with_spatial_metrics(true))?;
    let mut region = Region::with_config("image", config)?;
    let edge = region.bind_input_2d("pixels", SIDE, SIDE, 1.0, 0.01, &[])?;
    let out = region.add_output_layer_2d(SIDE, SIDE, 0.2);
    let topo = TopographicConfig::default()
        .with_kernel(3, 3)
        .with_difference_of_gaussians(1.0, 2.0, 0.5);
    let unique = region.connect_layers_topographic(edge, out, &topo)?;
    info!(unique, "topographic tract wired");

    let mut frame = vec![0.0; SIDE * SIDE];
    for t in 0..opts.ticks {
        frame.iter_mut().for_each(|v| *v = 0.0);
        let row = (t / SIDE) % SIDE;
        let col = t % SIDE;
        frame[row * SIDE + col] = 1.0;

        let metrics = region.tick_2d("pixels", &frame, SIDE, SIDE)?;
        if t % 16 == 0 {
            if let Some(spatial) = metrics.spatial {
                info!(
                    t,
                    active = spatial.active_pixels,
                    centroid = ?spatial.centroid,
                    bbox = ?spatial.bbox,
                    delivered = metrics.delivered_events,
                    "image"
                );
            }
        }
    }
    Ok(region)
}

fn run_growth(opts: &Options) -> grownet::Result<Region> {
    let policy = GrowthPolicy::default()
        .with_avg_slots_threshold(2.0)
        .with_layer_cooldown(20)
        .with_max_layers(6)
        .with_percent_at_cap_fallback(10.0);
    let slots = SlotConfig::default()
        .with_slot_limit(4)
        .with_fallback_growth_threshold(2);
    let fallback = RegionConfig::default()
        .with_slot_config(slots)
        .with_growth_policy(Some(policy))
        .with_layer_neuron_limit(Some(16));
    let config = load_config(opts, fallback)?;

    let mut region = Region::with_config("growth", config)?;
    let hidden = region.add_layer(4, 0, 0);
    region.bind_input("x", &[hidden])?;

    let mut layers = region.layers().len();
    for t in 0..opts.ticks {
        // Sweep widely so neurons keep falling back at capacity.
        let value = 1.0 + (t % 40) as f64 * 0.5;
        let metrics = region.tick("x", value)?;
        if region.layers().len() != layers {
            layers = region.layers().len();
            info!(t, layers, "region grew a layer");
        }
        if t % 50 == 0 {
            info!(
                t,
                layers,
                neurons = region.neuron_count(),
                slots = metrics.total_slots,
                mean_slots = region.mean_slots_per_neuron(),
                "growth"
            );
        }
    }
    Ok(region)
}
