// ==============================================================================
// CLI for the Configuration Compiler
// ==============================================================================
//
//   pconf <PROJECT_ROOT> <SOURCE>...
//
// Sources are named relative to `<PROJECT_ROOT>/src` and are compiled
// sequentially, fail-fast: outputs of sources that completed before a failure
// stay on disk, later sources are not attempted.

use lexopt::prelude::*;
use pconf::Compiler;

// ==============================================================================
// CLI Help Text
// ==============================================================================

const MAIN_HELP: &str = "\
pconf - typed configuration compiler

Usage: pconf <PROJECT_ROOT> <SOURCE>...

Arguments:
  PROJECT_ROOT  Directory holding src/ and materialized_config/
  SOURCE        Configuration source (.pconf or .mpconf), relative to src/

Options:
  -h, --help    Print help";

// ==============================================================================
// Argument Parsing
// ==============================================================================

/// Parsed CLI arguments.
struct Args {
    project_root: String,
    sources: Vec<String>,
}

fn parse_args(parser: &mut lexopt::Parser) -> Result<Args, lexopt::Error> {
    let mut positionals: Vec<String> = Vec::new();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                println!("{MAIN_HELP}");
                std::process::exit(0);
            }
            Value(val) => {
                positionals.push(val.string()?);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let mut positionals = positionals.into_iter();
    let project_root = positionals.next().ok_or_else(|| lexopt::Error::MissingValue {
        option: Some("PROJECT_ROOT".to_string()),
    })?;
    let sources: Vec<String> = positionals.collect();
    if sources.is_empty() {
        return Err(lexopt::Error::MissingValue {
            option: Some("SOURCE".to_string()),
        });
    }

    Ok(Args {
        project_root,
        sources,
    })
}

// ==============================================================================
// Entry Point
// ==============================================================================

fn main() -> miette::Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(miette::MietteHandlerOpts::new().build())
    }))?;

    let mut parser = lexopt::Parser::from_env();
    let args = match parse_args(&mut parser) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}\n\n{MAIN_HELP}");
            std::process::exit(2);
        }
    };

    let compiler = Compiler::new(&args.project_root);
    for source in &args.sources {
        compiler
            .compile(source)
            .map_err(|e| miette::Report::new(e).wrap_err(format!("failed to compile `{source}`")))?;
    }

    Ok(())
}
