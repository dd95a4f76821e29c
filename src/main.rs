use std::error::Error;
use std::path::Path;

use clap::Parser;

use shinycannon::args::{self, PlayerArgs};
use shinycannon::output::RunInfo;
use shinycannon::{app, logger, output};

fn main() -> Result<(), Box<dyn Error>> {
    let args = PlayerArgs::parse();
    let credentials = args::credentials_from_env()?;

    let output_dir = output::prepare_output_dir(
        Path::new(&args.output_dir),
        args.overwrite_output,
        &args.recording_path,
    )?;
    let debug_log_path = if args.debug_log {
        Some(output_dir.root.join("debug.log"))
    } else {
        None
    };
    logger::init_logging(args.log_level, debug_log_path.as_deref())?;

    let run_info = RunInfo {
        argv: std::env::args().collect::<Vec<_>>().join(" "),
        args_json: serde_json::to_string(&args)?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let code = match runtime.block_on(app::run(&args, &run_info, credentials, &output_dir)) {
        Ok(stats) => {
            println!("{}", stats.progress_line());
            0
        }
        Err(err) => {
            eprintln!("shinycannon: {}", err);
            1
        }
    };

    // The WebSocket client can leave reader tasks parked on open
    // connections; exit without waiting for runtime teardown.
    std::process::exit(code)
}
