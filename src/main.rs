use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stitch_notation::{format_rows, CompileOptions, Compiler};

mod compilebridge;

use compilebridge::{list_stitches, Diagnostic};

#[derive(Parser)]
#[command(name = "stitchgraph")]
#[command(about = "Compile crochet patterns into stitch graphs", long_about = None)]
struct Cli {
    /// JSON file with compile options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log each compile phase
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the pattern comes from; stdin when neither is given
#[derive(Args)]
struct Input {
    /// Pattern text
    #[arg(conflicts_with = "file")]
    pattern: Option<String>,

    /// Read the pattern from a file
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a pattern and report the first error, if any
    Validate {
        #[command(flatten)]
        input: Input,
    },
    /// Print the pattern after repeat expansion and index evaluation
    Expand {
        #[command(flatten)]
        input: Input,
    },
    /// Show the parsed rows of a pattern
    Rows {
        #[command(flatten)]
        input: Input,

        /// Output format (debug, json or notation)
        #[arg(short, long, default_value = "debug")]
        output_format: String,
    },
    /// Compile a pattern to a stitch graph
    Compile {
        #[command(flatten)]
        input: Input,

        /// Output format (json or text)
        #[arg(long, default_value = "json")]
        format: String,

        /// Write the graph to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the built-in stitch templates
    Stitches {
        /// Include descriptions and template specs
        #[arg(short, long)]
        all: bool,
    },
}

impl Input {
    fn read(&self) -> Result<String> {
        if let Some(pattern) = &self.pattern {
            return Ok(pattern.clone());
        }
        if let Some(path) = &self.file {
            log::info!("Reading pattern from: {}", path.display());
            return fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", path.display()));
        }
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read pattern from stdin")?;
        Ok(source)
    }
}

fn load_options(path: Option<&PathBuf>) -> Result<CompileOptions> {
    let Some(path) = path else {
        return Ok(CompileOptions::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config '{}'", path.display()))
}

fn fail(err: &stitch_notation::CompileError, source: &str) -> ! {
    eprintln!("✗ {}", Diagnostic::new(err, source).render(source));
    std::process::exit(1);
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let options = load_options(cli.config.as_ref())?;
    let compiler = Compiler::new(options.clone()).context("Failed to load the built-in stitches")?;

    match cli.command {
        Commands::Validate { input } => {
            let source = input.read()?;
            match compiler.compile(&source) {
                Ok(pattern) => {
                    let stitches: usize = pattern.rows.iter().map(|r| r.counts.values().sum::<usize>()).sum();
                    println!("✓ Pattern is valid ({} rows, {} stitches)", pattern.rows.len(), stitches);
                    Ok(())
                }
                Err(e) => fail(&e, &source),
            }
        }
        Commands::Expand { input } => {
            let source = input.read()?;
            match compiler.expand(&source) {
                Ok(expanded) => {
                    println!("{}", expanded);
                    Ok(())
                }
                Err(e) => fail(&e, &source),
            }
        }
        Commands::Rows { input, output_format } => {
            let source = input.read()?;
            let rows = match compiler.rows(&source) {
                Ok(rows) => rows,
                Err(e) => fail(&e, &source),
            };
            match output_format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
                "notation" => println!("{}", format_rows(&rows, &options.default_color)),
                _ => println!("{:#?}", rows),
            }
            Ok(())
        }
        Commands::Compile { input, format, output } => {
            let source = input.read()?;
            let pattern = match compiler.compile(&source) {
                Ok(pattern) => pattern,
                Err(e) => fail(&e, &source),
            };
            let rendered = match format.as_str() {
                "text" => pattern.to_text(),
                _ => pattern.to_json()?,
            };
            match output {
                Some(path) => {
                    fs::write(&path, rendered).with_context(|| format!("Failed to write '{}'", path.display()))?;
                    log::info!(
                        "Wrote {} nodes and {} edges to {}",
                        pattern.graph.nodes.len(),
                        pattern.graph.edges.len(),
                        path.display()
                    );
                }
                None => println!("{}", rendered),
            }
            Ok(())
        }
        Commands::Stitches { all } => {
            let stitches = list_stitches(compiler.registry());
            println!("{} stitch(es)\n", stitches.len());
            for stitch in stitches {
                if all {
                    println!(
                        "  {:<12} {} top(s), {} bottom(s)  {}",
                        stitch.name, stitch.tops, stitch.bottoms, stitch.description
                    );
                    println!("  {:<12} {}", "", stitch.spec);
                } else {
                    println!("  {}", stitch.name);
                }
            }
            Ok(())
        }
    }
}
