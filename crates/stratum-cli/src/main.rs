use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use prost::Message;

use stratum_codegen::{optimize, proto as cfg_proto, OptimizeOptions};
use stratum_ir::proto as ir_proto;

/// Stratum block-IR optimizer for memory-hierarchical accelerators
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input program (binary protobuf Block)
    input: PathBuf,

    /// Pass pipeline (binary protobuf Config); empty pipeline if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output path for the optimized program (default: stdout as text IR)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the textual IR after every pass
    #[arg(long)]
    dump_passes: bool,

    /// Directory for per-pass dumps
    #[arg(long, default_value = "stratum_dbg")]
    dbg_dir: PathBuf,

    /// Print the textual IR to stderr after optimization
    #[arg(long)]
    emit_ir: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    // 1. Decode the input program.
    let bytes = std::fs::read(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let message = ir_proto::Block::decode(bytes.as_slice())
        .into_diagnostic()
        .wrap_err("failed to decode program")?;
    let mut program = ir_proto::block_from_proto(&message)
        .into_diagnostic()
        .wrap_err("malformed program")?;

    // 2. Decode the pass pipeline.
    let config = match &cli.config {
        Some(path) => {
            let bytes = std::fs::read(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", path.display()))?;
            cfg_proto::Config::decode(bytes.as_slice())
                .into_diagnostic()
                .wrap_err("failed to decode pass configuration")?
        }
        None => cfg_proto::Config::default(),
    };

    // 3. Run the pipeline.
    let options = OptimizeOptions {
        dump_passes: cli.dump_passes,
        dbg_dir: cli.dbg_dir.clone(),
    };
    optimize(&mut program, &config, &options)
        .into_diagnostic()
        .wrap_err("optimization failed")?;

    if cli.emit_ir {
        eprintln!("{program}");
    }

    // 4. Emit the result.
    match &cli.output {
        Some(path) => {
            let encoded = ir_proto::block_to_proto(&program).encode_to_vec();
            std::fs::write(path, encoded)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        }
        None => print!("{program}"),
    }
    Ok(())
}
