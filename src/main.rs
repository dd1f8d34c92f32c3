use clap::{Parser, ValueEnum};
use scrawl::{AnalysisResult, HandwritingAnalyzer, PipelineConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scrawl")]
#[command(about = "Scrawl - handwriting recognition with per-letter shape feedback", long_about = None)]
struct Cli {
    /// Input image path
    image: PathBuf,

    /// Language hint (ISO 639-1, e.g. en, es, fr)
    #[arg(short, long, default_value = "en")]
    language: String,

    /// JSON file with pipeline configuration overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Also apply whole-word spelling corrections
    #[arg(long)]
    correct: bool,

    /// Directory for the annotated overlay image
    #[arg(long)]
    overlay_dir: Option<PathBuf>,

    /// Skip writing the overlay image
    #[arg(long)]
    no_overlay: bool,

    /// Font used for overlay labels
    #[arg(long)]
    font: Option<PathBuf>,

    /// Path to the tesseract executable
    #[arg(long)]
    tesseract: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    /// JSON output with full details
    Json,
    /// Plain text transcript followed by feedback lines
    Text,
    /// TSV format: word\tconfidence\tx,y,w,h
    Tsv,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.overlay_dir {
        config.overlay.output_dir = Some(dir);
    }
    if let Some(font) = cli.font {
        config.overlay.font_path = Some(font);
    }
    if let Some(cmd) = cli.tesseract {
        config.recognition.tesseract_cmd = cmd;
    }
    if cli.no_overlay {
        config.overlay.enabled = false;
    }

    let analyzer = HandwritingAnalyzer::new(config)?;
    let result = if cli.correct {
        analyzer.correct_path(&cli.image, &cli.language)
    } else {
        analyzer.recognize_path(&cli.image, &cli.language)
    };

    match cli.format {
        OutputFormat::Json => println!("{}", result.to_json()?),
        OutputFormat::Text => print_text(&result),
        OutputFormat::Tsv => {
            for token in &result.tokens {
                let b = token.bbox;
                println!("{}\t{:.1}\t{},{},{},{}", token.text, token.confidence, b.x, b.y, b.w, b.h);
            }
        }
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_text(result: &AnalysisResult) {
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
        return;
    }
    println!("{}", result.corrected_text.as_deref().unwrap_or(&result.recognized_text));
    for word in &result.word_feedback {
        for issue in &word.issues {
            println!(
                "{} #{} '{}': {} - {}",
                word.word_text, issue.char_index, issue.letter_hint, issue.description, issue.suggestion
            );
        }
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
}
