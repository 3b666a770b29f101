//! `afu-dma` — stream an array of ones through the DMA pipeline AFU and
//! print one sum per 16 inputs.
//!
//! ```text
//! USAGE:
//!   afu-dma <size>            size: number of inputs, a multiple of 128
//!   afu-dma --sim <size>      run against the software model
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use afu_dma::backends::SimAfu;
use afu_dma::backends::SYSFS_REGIONS;
use afu_dma::pipeline::first_mismatch;
use afu_dma::pipeline::parse_num_inputs;
use afu_dma::pipeline::EXPECTED_OUTPUT;
use afu_dma::regs::PIPELINE_AFU_ID;
use afu_dma::Afu;
use afu_dma::AfuId;
use afu_dma::Pipeline;
use afu_dma::PollConfig;

#[derive(Parser, Debug)]
#[command(name = "afu-dma", about = "DMA pipeline AFU demo", version)]
struct Cli {
    /// Number of inputs to test (positive integer, must be a multiple of 128).
    #[arg(value_parser = parse_num_inputs)]
    size: u64,

    /// Id of the AFU to open.
    #[arg(long, env = "AFU_ACCEL_UUID", default_value_t = PIPELINE_AFU_ID)]
    afu_id: AfuId,

    /// Directory the FPGA driver lists its regions in.
    #[arg(long, hide = true, default_value = SYSFS_REGIONS)]
    sysfs_root: PathBuf,

    /// Sleep this many milliseconds between polls of the done flag.
    #[arg(long)]
    sleep_ms: Option<u64>,

    /// Use the software model instead of an FPGA.
    #[arg(long)]
    sim: bool,

    /// Polls the software model stays busy after a start.
    #[arg(long, default_value_t = 0, requires = "sim")]
    sim_latency: u32,

    /// Fail unless every output is 16.
    #[arg(long)]
    check: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            if !e.render().to_string().contains("Usage:") {
                eprintln!("\n{}", Cli::command().render_usage());
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            // --help and --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut afu = if cli.sim {
        Afu::from_backend(SimAfu::new(cli.afu_id).with_latency(cli.sim_latency))
    } else {
        Afu::open_in(&cli.sysfs_root, cli.afu_id)?
    };
    tracing::debug!("{:?}", afu);

    let poll = match cli.sleep_ms {
        Some(ms) => PollConfig::sleep(Duration::from_millis(ms)),
        None => PollConfig::spin(),
    };

    let num_inputs = usize::try_from(cli.size)?;
    let outputs = Pipeline::run(&mut afu, num_inputs, &poll)?;
    for v in &outputs {
        println!("{v}");
    }

    if cli.check {
        if let Some((i, v)) = first_mismatch(&outputs) {
            anyhow::bail!("output {i} is {v}, expected {EXPECTED_OUTPUT}");
        }
    }

    println!("All DMA Tests Successful!!!");
    Ok(())
}
