//! Turns exported Freshdesk tickets into training and validation JSONL files.

use std::path::PathBuf;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use freshdesk_harvest::logging;
use freshdesk_harvest::text::TextNormalizer;
use freshdesk_harvest::tokenize::{ApproxTokenizer, HfTokenizer, Tokenizer};
use freshdesk_harvest::training::{
    build_dataset, load_tickets, log_stats, DatasetOptions, FormatPolicy,
};

/// Format exported tickets as JSONL training data.
#[derive(Parser, Debug)]
#[command(name = "learning-data")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Exported tickets: JSONL or a JSON array
    input: PathBuf,

    /// Directory for training_data.jsonl and validation_data.jsonl
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Fraction of tickets that go to the training partition (0.0-1.0)
    #[arg(long, default_value = "0.8")]
    split_ratio: f64,

    /// Seed for a reproducible shuffle
    #[arg(long)]
    seed: Option<u64>,

    /// How tickets are flattened into records
    #[arg(long, value_enum, default_value_t = FormatPolicy::TurnWithContext)]
    policy: FormatPolicy,

    /// HuggingFace tokenizer.json used for token statistics
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Regex for the promotional footer stripped from every body
    #[arg(long)]
    footer_pattern: Option<String>,

    /// Keep footers in place
    #[arg(long, conflicts_with = "footer_pattern")]
    keep_footer: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn load_tokenizer(path: Option<&PathBuf>) -> Result<Box<dyn Tokenizer>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            logging::info(format!("loading tokenizer from {}", path.display()));
            let tokenizer = HfTokenizer::from_file(path)
                .map_err(|err| format!("failed to load tokenizer {}: {}", path.display(), err))?;
            Ok(Box::new(tokenizer))
        }
        None => {
            logging::info("using approximate token counts");
            Ok(Box::new(ApproxTokenizer))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.debug);

    let normalizer = if args.keep_footer {
        TextNormalizer::without_footer()
    } else if let Some(pattern) = &args.footer_pattern {
        TextNormalizer::with_footer_pattern(pattern)?
    } else {
        TextNormalizer::default()
    };
    let tokenizer = load_tokenizer(args.tokenizer.as_ref())?;

    let tickets = load_tickets(&args.input)?;
    logging::info(format!(
        "loaded {} ticket(s) from {}",
        tickets.len(),
        args.input.display()
    ));

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().next_u64());
    logging::debug(format!("shuffle seed {}", seed));
    let mut rng = StdRng::seed_from_u64(seed);

    let options = DatasetOptions {
        output_dir: args.out_dir,
        split_ratio: args.split_ratio,
        policy: args.policy,
    };
    let summary = build_dataset(tickets, &options, &normalizer, tokenizer.as_ref(), &mut rng)?;

    log_stats("Training data", &summary.training);
    log_stats("Validation data", &summary.validation);
    logging::info(format!(
        "wrote {} and {}",
        summary.training.path.display(),
        summary.validation.path.display()
    ));
    Ok(())
}
