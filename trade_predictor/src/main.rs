use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use feature_processing::WINDOW_SIZE;
use log::{info, warn};
use market_data::LabeledDataset;
use market_data::logger::init_logger;
use serde::Serialize;
use std::path::PathBuf;
use std::process;

use trade_predictor::config::DEFAULT_CONFIG_FILE;
use trade_predictor::suggestion::{SuggestionError, TradeSuggestion};
use trade_predictor::{
    FailedPrediction, HISTORY_FILE, InferenceEngine, PredictionOutcome, PredictorConfig,
    SUGGESTIONS_FILE, SuggestionBook, TokenInfo, Trainer, predict_trade,
};

#[derive(Parser)]
#[command(name = "trade_predictor")]
#[command(version, about = "Predict whether a token trade will be profitable", long_about = None)]
struct Cli {
    /// Directory holding trade_model.bin and scaler.bin
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Predict from a JSON object of features, or a JSON array of them
    Predict { features: String },
    /// Train on a labelled CSV and save the model
    Train {
        dataset: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Build a trade suggestion for a token JSON object and record it
    Suggest { token: String },
    /// Accept a pending suggestion
    Accept { id: String },
    /// Reject a suggestion
    Reject {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List pending, unexpired suggestions
    Pending,
    /// Show recorded suggestions, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show suggestion statistics
    Stats,
}

fn load_config(cli: &Cli) -> Result<PredictorConfig> {
    let mut config = PredictorConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    Ok(config)
}

fn run_predict(cli: &Cli, raw: &str) {
    let outcome = match load_config(cli) {
        Ok(config) => predict_trade(&config.model_dir, raw),
        Err(e) => PredictionOutcome::failed(format!("{e:#}")),
    };
    println!("{}", outcome.to_json());
}

fn run_train(config: &PredictorConfig, dataset: Option<&PathBuf>, epochs: Option<usize>) -> Result<()> {
    let Some(path) = dataset else {
        println!("Training model with kaggle dataset...");
        return Ok(());
    };

    let dataset = LabeledDataset::from_csv(path, &config.label_column)
        .with_context(|| format!("failed to load dataset {}", path.display()))?;
    let (train, test) = dataset.split_chronological(config.test_fraction)?;
    info!(
        "Loaded {} rows from {} ({} train, {} test)",
        dataset.len(),
        path.display(),
        train.len(),
        test.len()
    );

    let mut training = config.training.clone();
    if let Some(epochs) = epochs {
        training.epochs = epochs;
    }

    let run = Trainer::new(config.network.clone(), training)
        .fit(&train)
        .context("training failed")?;

    if test.len() > WINDOW_SIZE {
        let evaluation = Trainer::evaluate(&run.engine, &test)?;
        info!(
            "Test loss: {:.4} - accuracy: {:.4} - auc: {}",
            evaluation.loss,
            evaluation.accuracy,
            evaluation
                .auc
                .map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.4}"))
        );
    } else {
        warn!("Test split has {} rows, skipping evaluation", test.len());
    }

    run.engine
        .save(&config.model_dir)
        .with_context(|| format!("failed to save model to {}", config.model_dir.display()))?;
    run.history.write_csv(config.model_dir.join(HISTORY_FILE))?;
    info!("Model training completed");
    Ok(())
}

/// Book stored next to the model, with overdue suggestions already expired.
struct StoredBook {
    book: SuggestionBook,
    path: PathBuf,
}

impl StoredBook {
    fn open(config: &PredictorConfig) -> Result<Self> {
        let path = config.model_dir.join(SUGGESTIONS_FILE);
        let mut book = SuggestionBook::load(config.suggestion.clone(), &path)
            .with_context(|| format!("failed to read suggestions from {}", path.display()))?;
        let expired = book.cleanup_expired(Utc::now());
        let stored = Self { book, path };
        if expired > 0 {
            stored.save()?;
        }
        Ok(stored)
    }

    fn save(&self) -> Result<()> {
        self.book
            .save(&self.path)
            .with_context(|| format!("failed to write suggestions to {}", self.path.display()))
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn run_suggest(config: &PredictorConfig, raw: &str) -> Result<()> {
    let token = match TokenInfo::from_json_str(raw) {
        Ok(token) => token,
        Err(e) => {
            println!("{}", PredictionOutcome::failed(e).to_json());
            return Ok(());
        }
    };

    let prediction = match InferenceEngine::load(&config.model_dir) {
        Ok(engine) => PredictionOutcome::from(engine.predict(&token.features)),
        Err(e) => PredictionOutcome::failed(e),
    };

    let mut stored = StoredBook::open(config)?;
    let outcome = stored.book.generate(&token, &prediction, Utc::now());
    stored.save()?;
    print_json(&outcome)
}

/// Print the updated suggestion, or the lifecycle error as a failed record.
fn report(result: Result<TradeSuggestion, SuggestionError>) -> Result<()> {
    match result {
        Ok(suggestion) => print_json(&suggestion),
        Err(e) => print_json(&FailedPrediction::new(e.to_string())),
    }
}

fn run_accept(config: &PredictorConfig, id: &str) -> Result<()> {
    let mut stored = StoredBook::open(config)?;
    let result = stored.book.accept(id, Utc::now()).cloned();
    // An expired suggestion changes state even though acceptance fails.
    stored.save()?;
    report(result)
}

fn run_reject(config: &PredictorConfig, id: &str, reason: Option<String>) -> Result<()> {
    let mut stored = StoredBook::open(config)?;
    let result = stored.book.reject(id, reason, Utc::now()).cloned();
    stored.save()?;
    report(result)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logger();

    let cli = Cli::parse();
    let Some(command) = &cli.command else {
        println!("{}", Cli::command().render_help());
        process::exit(1);
    };

    match command {
        Command::Predict { features } => run_predict(&cli, features),
        Command::Train { dataset, epochs } => {
            let config = load_config(&cli)?;
            run_train(&config, dataset.as_ref(), *epochs)?;
        }
        Command::Suggest { token } => run_suggest(&load_config(&cli)?, token)?,
        Command::Accept { id } => run_accept(&load_config(&cli)?, id)?,
        Command::Reject { id, reason } => run_reject(&load_config(&cli)?, id, reason.clone())?,
        Command::Pending => {
            let stored = StoredBook::open(&load_config(&cli)?)?;
            print_json(&stored.book.pending(Utc::now()))?;
        }
        Command::History { limit } => {
            let stored = StoredBook::open(&load_config(&cli)?)?;
            print_json(&stored.book.history(*limit))?;
        }
        Command::Stats => {
            let stored = StoredBook::open(&load_config(&cli)?)?;
            print_json(&stored.book.statistics(Utc::now()))?;
        }
    }

    Ok(())
}
