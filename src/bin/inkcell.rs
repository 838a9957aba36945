use clap::{command, Parser};
use inkcell::eval::{calculate_with, NoopSink};
use inkcell::{parse, Calculation, EvalConfig, Error, Key, Object, SymbolTable};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Expression to evaluate; reads stdin when absent
    expression: Option<String>,

    /// Print every intermediate result, not only the final value
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> Result<(), Error> {
    let config: EvalConfig = if cli.config.exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        serde_json::from_str(&content)?
    } else {
        EvalConfig::default()
    };

    info!("config loaded.");
    debug!("config: {:?}", config);

    let source = match &cli.expression {
        Some(expression) => expression.clone(),
        None => std::io::read_to_string(std::io::stdin())?,
    };

    let mut table = SymbolTable::standard();
    let verbose = cli.verbose;
    let mut observer = |origin: Option<&Key>, value: &Object| {
        if verbose {
            match origin {
                Some(origin) => println!("{} = {}", origin, value),
                None => println!(".. = {}", value),
            }
        }
        true
    };

    // Blank lines separate cells; cells share one symbol table.
    let mut last: Option<Calculation> = None;
    for cell in source.split("\n\n").filter(|cell| !cell.trim().is_empty()) {
        let parsed = parse(cell, &mut table, None);
        last = Some(calculate_with(
            &parsed.root,
            &mut table,
            &mut observer,
            &NoopSink,
            config.clone(),
        ));
    }

    match last {
        Some(Calculation {
            value: Object::Error(diag),
            ..
        }) => Err(Error::Diagnostic(diag)),
        Some(Calculation {
            value: Object::Stopped,
            ..
        }) => Err(Error::Stopped),
        Some(calculation) => {
            match calculation.origin {
                Some(origin) => println!("{} = {}", origin, calculation.value),
                None => println!("{}", calculation.value),
            }
            Ok(())
        }
        None => Ok(()),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}
