use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "cardex-cmd")]
#[command(about = "Command-line utility for building and inspecting cardex indexes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from parsed-document input files
    Build {
        /// Output index directory
        #[arg(long)]
        index_dir: String,

        /// Path to the pre-built lexicon file
        #[arg(long)]
        lexicon: String,

        /// Optional JSON subindex configuration; one "main" subindex
        /// matching everything is used when omitted
        #[arg(long)]
        subindexes: Option<String>,

        /// ID batch rows per flush (0 auto-computes from a byte budget)
        #[arg(long, default_value_t = 0)]
        batch_size: usize,

        /// Worker thread count
        #[arg(long, default_value_t = 1)]
        threads: usize,

        /// Card record alignment shift (power of two)
        #[arg(long, default_value_t = cardex_format::records::DEFAULT_ALIGN_SHIFT)]
        align_shift: u32,

        /// Input file(s), one parsed document as JSON per line
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Inspect an index directory and display summary information
    Inspect {
        /// Index directory to inspect
        index_dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            index_dir,
            lexicon,
            subindexes,
            batch_size,
            threads,
            align_shift,
            inputs,
        } => commands::build::run(
            index_dir, lexicon, subindexes, batch_size, threads, align_shift, inputs,
        ),
        Commands::Inspect { index_dir } => commands::inspect::run(index_dir),
    }
}
