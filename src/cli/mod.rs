mod run;
mod serve;

use std::path::PathBuf;

use anyhow::{Result, bail};
use console::style;

use crate::core::config::{AppConfig, default_config_path};
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Commands")
        .command("serve", "Start the HTTP API and job runner")
        .command("run", "Build one demo in-process and print the result")
        .command("config", "Print the effective configuration")
        .command("help", "Show this screen")
        .print();

    GuideSection::new("serve")
        .command("--host <addr>", "Bind address (default 127.0.0.1)")
        .command("--port <port>", "Bind port (default 17890)")
        .command("--config <file>", "Config file to load")
        .print();

    GuideSection::new("run")
        .command("--url <url>", "Company website to research (required)")
        .command("--requester <name>", "Who asked for the demo")
        .command("--project <id>", "Warehouse project to provision into")
        .command("--config <file>", "Config file to load")
        .print();

    let default_path = default_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    GuideSection::new("Environment")
        .status("DEMOFORGE_CONFIG", "config file path")
        .status("DEMOFORGE_HOST / DEMOFORGE_PORT", "server bind overrides")
        .status("DEMOFORGE_LOG", "log level")
        .blank()
        .status("Default config", &default_path)
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("demoforge").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunArgs {
    pub url: String,
    pub requester: Option<String>,
    pub project: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Serve(ServeArgs),
    Run(RunArgs),
    Config(Option<PathBuf>),
    Help,
}

/// Value following the flag at `i`, or an error naming the flag.
fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(value) if !value.starts_with("--") => Ok(value.as_str()),
        _ => bail!("{} expects a value", args[i]),
    }
}

pub(crate) fn parse_serve_args(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => parsed.host = Some(flag_value(args, i)?.to_string()),
            "--port" | "-p" => {
                let raw = flag_value(args, i)?;
                match raw.parse::<u16>() {
                    Ok(port) if port > 0 => parsed.port = Some(port),
                    _ => bail!("--port '{}' is not a port number", raw),
                }
            }
            "--config" | "-c" => parsed.config = Some(PathBuf::from(flag_value(args, i)?)),
            other => bail!("Unknown flag for serve: {}", other),
        }
        i += 2;
    }
    Ok(parsed)
}

pub(crate) fn parse_run_args(args: &[String], start: usize) -> Result<RunArgs> {
    let mut parsed = RunArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--url" | "-u" => parsed.url = flag_value(args, i)?.to_string(),
            "--requester" | "-r" => parsed.requester = Some(flag_value(args, i)?.to_string()),
            "--project" => parsed.project = Some(flag_value(args, i)?.to_string()),
            "--config" | "-c" => parsed.config = Some(PathBuf::from(flag_value(args, i)?)),
            other => bail!("Unknown flag for run: {}", other),
        }
        i += 2;
    }
    if parsed.url.trim().is_empty() {
        bail!("--url is required for run");
    }
    Ok(parsed)
}

pub(crate) fn parse_command(args: &[String]) -> Result<Command> {
    let Some(cmd) = args.get(1) else {
        return Ok(Command::Help);
    };
    match cmd.as_str() {
        "serve" => Ok(Command::Serve(parse_serve_args(args, 2)?)),
        "run" => Ok(Command::Run(parse_run_args(args, 2)?)),
        "config" => {
            let parsed = parse_serve_args(args, 2)?;
            Ok(Command::Config(parsed.config))
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("Unknown command '{}'", other),
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            print_error(&e.to_string());
            print_help();
            bail!("Invalid command line");
        }
    };

    match command {
        Command::Serve(serve_args) => serve::run_serve(serve_args).await,
        Command::Run(run_args) => run::run_job(run_args).await,
        Command::Config(path) => {
            let config = AppConfig::load(path.as_deref()).await?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
    }
}
