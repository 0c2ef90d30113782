// Copyright 2025 Cornell University
// released under MIT License

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use lucyc::diagnostic::DiagnosticHandler;
use lucyc::parser::parse_file;
use lucyc::serialize::serialize;
use lucyc::{compile_file, CompileOptions, RuntimeSource};

/// Args for the compiler CLI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a Lucy file
    #[arg(value_name = "LUCY_FILE")]
    input: PathBuf,

    /// Write the generated JavaScript to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Import XState from the CDN instead of the `xstate` package
    #[arg(long)]
    remote: bool,

    /// Print the parsed syntax tree instead of compiling
    #[arg(long)]
    dump_ast: bool,

    /// When to color diagnostics
    #[arg(long, value_enum, value_name = "WHEN", default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

/// Example:
/// `cargo run -- tests/login.lucy -o login.js -v`
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let color = match cli.color {
        ColorChoice::Auto if !std::io::stderr().is_terminal() => ColorChoice::Never,
        choice => choice,
    };
    let mut handler = DiagnosticHandler::new(color);

    if cli.dump_ast {
        let program = parse_file(&cli.input, &mut handler)?;
        serialize(&mut std::io::stdout().lock(), &program.ast)?;
        return Ok(());
    }

    let options = CompileOptions {
        runtime: if cli.remote {
            RuntimeSource::Remote
        } else {
            RuntimeSource::default()
        },
    };
    let js = compile_file(&cli.input, &options, &mut handler)
        .with_context(|| format!("could not compile `{}`", cli.input.display()))?;

    match &cli.output {
        Some(path) => std::fs::write(path, format!("{js}\n"))
            .with_context(|| format!("could not write `{}`", path.display()))?,
        None => println!("{js}"),
    }
    log::info!(
        "{} warning(s) while compiling `{}`",
        handler.warning_count(),
        cli.input.display()
    );
    Ok(())
}
