use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sng_core::model::generator::SamplingParams;
use sng_core::wordlist::{load_builtin_wordlist, read_wordlist, show_builtin_wordlists};
use sng_core::{Config, Session};

/// Generates startup name suggestions from a word list.
///
/// Either trains a new model on a word list (a file or a builtin list)
/// or reuses a saved one, then prints the generated names.
#[derive(Parser, Debug)]
#[command(name = "sng", version, about)]
struct Args {
    /// Text file to learn from
    wordlist: Option<PathBuf>,

    /// Builtin word list to learn from, see --list-builtin
    #[arg(long, conflicts_with = "wordlist")]
    builtin: Option<String>,

    /// Print the builtin word lists and exit
    #[arg(long)]
    list_builtin: bool,

    /// Directory to save the trained session into
    #[arg(short, long)]
    savepath: Option<PathBuf>,

    /// Directory of a saved session to generate from, skips training
    #[arg(short, long, conflicts_with_all = ["wordlist", "builtin"])]
    modelpath: Option<PathBuf>,

    /// Replace the content of --savepath if it is not empty
    #[arg(long)]
    overwrite: bool,

    /// Sampling temperature, lower is more conservative
    #[arg(short, long, default_value_t = 1.0)]
    temperature: f64,

    /// Number of names to generate
    #[arg(short, long, default_value_t = 10)]
    nwords: usize,

    /// Training epochs
    #[arg(short, long, default_value_t = 100)]
    epochs: usize,

    /// Shortest generated name
    #[arg(long, default_value_t = 4)]
    min_len: usize,

    /// Longest generated name, also the training word length
    #[arg(long, default_value_t = 12)]
    max_len: usize,

    /// Seed of the random source, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Log the corpus and training progress
    #[arg(short, long)]
    verbose: bool,

    /// Word printed after every name, separated by a space, e.g. "Labs"
    #[arg(long)]
    suffix: Option<String>,
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Joins a name and the `--suffix` word with a space.
fn with_suffix(name: String, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{name} {suffix}"),
        None => name,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if args.list_builtin {
        for name in show_builtin_wordlists() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut session = if let Some(path) = &args.modelpath {
        let session = Session::load_with_rng(path, rng(args.seed))
            .with_context(|| format!("cannot load session from {}", path.display()))?;
        info!("loaded session from {}", path.display());
        session
    } else {
        let words = match (&args.wordlist, &args.builtin) {
            (Some(path), _) => read_wordlist(path)?,
            (None, Some(name)) => load_builtin_wordlist(name)?,
            (None, None) => bail!("a word list, --builtin or --modelpath is required"),
        };

        let config = Config::builder()
            .epochs(args.epochs)
            .temperature(args.temperature)
            .min_word_len(args.min_len)
            .max_word_len(args.max_len)
            .verbose(args.verbose)
            .debug(false)
            .build()?;

        let mut session = Session::with_rng(config, words, rng(args.seed))?;
        session.fit().context("training failed")?;
        session
    };

    if let Some(path) = &args.savepath {
        session
            .save(path, args.overwrite)
            .with_context(|| format!("cannot save session to {}", path.display()))?;
    }

    // Length bounds are fixed at training time, only the temperature can change
    let params = SamplingParams { temperature: args.temperature, ..session.config().sampling_params() };
    let words = session.simulate_with(args.nwords, &params)?;

    for word in words {
        println!("{}", with_suffix(word, args.suffix.as_deref()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_separated_by_a_space() {
        assert_eq!(with_suffix("Velora".to_owned(), Some("Labs")), "Velora Labs");
        assert_eq!(with_suffix("Velora".to_owned(), None), "Velora");
    }

    #[test]
    fn suffix_flag_is_optional() {
        let args = Args::try_parse_from(["sng", "--builtin", "latin", "--suffix", "Software"]).unwrap();
        assert_eq!(args.suffix.as_deref(), Some("Software"));
        let args = Args::try_parse_from(["sng", "words.txt"]).unwrap();
        assert_eq!(args.suffix, None);
        assert_eq!(args.nwords, 10);
    }
}
