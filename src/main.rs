use std::process::exit;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use arm_guard::commands::analyze::Analyze;
use arm_guard::commands::{Executable, APP_NAME, APP_VERSION, ERROR_STATUS_CODE};
use arm_guard::utils::writer::{WriteBuffer, Writer};

#[derive(Parser)]
#[command(name = APP_NAME, version = APP_VERSION)]
#[command(about = r#"
  arm-guard statically analyzes Azure Resource Manager deployment templates
  against a catalog of security and best-practice rules authored in a
  declarative JSON syntax, and reports every failed check with the line
  number of the offending value in the source template."#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Analyze(Analyze),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut writer = Writer::new(WriteBuffer::Stdout(std::io::stdout()));
    let outcome = match &cli.command {
        Commands::Analyze(command) => command.execute(&mut writer),
    };
    match outcome {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{} {}", "Error occurred".red(), err);
            exit(ERROR_STATUS_CODE);
        }
    }
}
