use cbg_closed_loop::config::{load_config, save_config, Config};
use cbg_closed_loop::local::run_simulation::{geometry_report, run_simulation};
use cbg_closed_loop::utils::log::init_tracing;
use cbg_closed_loop::Result;

use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage:
  neurostim run <config.yaml> [output_dir] [--verbose]
  neurostim geometry <config.yaml>
  neurostim default-config <path.yaml>";

fn run(args: &[String]) -> Result<()> {
    match args {
        [command, config_path, rest @ ..] if command == "run" => {
            let config = load_config(config_path)?;
            let output_dir = rest
                .first()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output.directory.clone());
            let summary = run_simulation(&config, &output_dir)?;
            println!("{}", "Run complete".green().bold());
            println!("{}", summary);
        }
        [command, config_path] if command == "geometry" => {
            let config = load_config(config_path)?;
            println!("{}", geometry_report(&config)?);
        }
        [command, path] if command == "default-config" => {
            save_config(&Config::default(), path)?;
            println!("Wrote default configuration to {}", path);
        }
        _ => println!("{}", USAGE),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|arg| arg == "--verbose" || arg == "-v");
    let args: Vec<String> = args
        .into_iter()
        .filter(|arg| arg != "--verbose" && arg != "-v")
        .collect();

    init_tracing(verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
