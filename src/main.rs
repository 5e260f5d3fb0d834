use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{command, Arg, ArgAction};
use megalinker::{write_outputs, Input};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("megalinker: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let matches = command!()
        .args(&[
            Arg::new("inputs")
                .required(true)
                .num_args(1..)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Input files: .rel objects, .lib archives, and one .rom output path"),
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("level")
                .value_parser(clap::value_parser!(u8))
                .default_value("2")
                .help("0=error 1=warn 2=info 3=debug 4=trace"),
        ])
        .get_matches();

    let level = match matches.get_one::<u8>("log-level").copied().unwrap_or(2) {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Debug,
        4 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level).init();

    let mut rom_path: Option<PathBuf> = None;
    let mut inputs: Vec<Input> = Vec::new();

    for path in matches.get_many::<PathBuf>("inputs").unwrap_or_default() {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rom") => rom_path = Some(path.clone()),
            Some("rel") => inputs.push(Input::Object(path.clone())),
            Some("lib") => inputs.push(Input::Archive(path.clone())),
            _ => {
                anyhow::bail!(
                    "{}: unrecognized extension, expected .rel, .lib, or .rom",
                    path.display()
                )
            }
        }
    }
    let rom_path = rom_path.unwrap_or_else(|| PathBuf::from("out.rom"));

    let result = megalinker::link(&inputs)
        .with_context(|| "link failed")?;
    write_outputs(&result, &rom_path)
        .with_context(|| format!("failed to write output to '{}'", rom_path.display()))?;

    log::info!("wrote {} bytes to {}", result.rom.len(), rom_path.display());
    Ok(())
}
