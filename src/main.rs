use anyhow::Context;
use asmbp::config::{AsmSyntax, Config};
use asmbp::debugger::disasm::ObjectDisassembler;
use asmbp::debugger::engine::DryRunEngine;
use asmbp::debugger::report::ResultReporter;
use asmbp::debugger::Session;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (default: ~/.config/asmbp/config.toml)
    #[arg(long, env = "ASMBP_CONFIG")]
    config: Option<PathBuf>,

    /// Assembler syntax: att or intel (overrides configuration)
    #[arg(long)]
    syntax: Option<AsmSyntax>,

    /// Executable or shared library
    object: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List function symbols
    Functions,
    /// Print numbered disassembly of a function
    Source { function: String },
    /// Show how breakpoints on disassembly lines of a function would be resolved
    Plan {
        function: String,
        #[arg(required = false)]
        lines: Vec<i64>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env().init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref());
    if let Some(syntax) = args.syntax {
        config.syntax = syntax;
    }
    info!(target: "asmbp", "use {} syntax", config.syntax);

    let disasm = ObjectDisassembler::open(&args.object, config.syntax)
        .with_context(|| format!("open {}", args.object.display()))?;

    match args.command {
        Command::Functions => {
            for function in disasm.functions()? {
                println!("{} - {} {}", function.start, function.end, function.demangled);
            }
        }
        Command::Source { function } => {
            let identity = disasm.identity_for(&function)?;
            let mut session = Session::new(DryRunEngine::default(), disasm);
            let reference = session.source_for(identity)?;
            let source = session
                .mapper()
                .source(reference)
                .context("disassembly source not created")?;
            for (idx, instruction) in source.instructions().iter().enumerate() {
                println!("{:>5}  {instruction}", idx + 1);
            }
        }
        Command::Plan { function, lines } => {
            let identity = disasm.identity_for(&function)?;
            let engine = DryRunEngine::new(vec![(identity.start, identity.end)]);
            let mut session = Session::new(engine, disasm);
            let reference = session.source_for(identity)?;
            let records = session.set_breakpoints(reference.as_i64(), &lines);
            let body = ResultReporter::to_response_body(&records);
            println!("{}", serde_json::to_string_pretty(&body)?);
            for (handle, addr) in session.engine().installed() {
                info!(target: "asmbp", "breakpoint {handle} at {addr}");
            }
        }
    }

    Ok(())
}
