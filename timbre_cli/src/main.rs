mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use timbre_core::audio::{DirSource, Mfcc};
use timbre_core::model::load_classifier;
use timbre_core::{CacheArtifact, Config, FeatureParams, LabelTable, Mode, Predictor};

#[derive(Debug, Parser)]
#[command(name = "timbre")]
#[command(about = "Instrument classification: inference and dataset reports.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify every clip in a directory with a trained model.
    Predict {
        #[arg(long, default_value = "conv")]
        mode: Mode,

        /// Label table supplying ground truth for each clip.
        #[arg(long, default_value = "instruments.csv")]
        labels: PathBuf,

        #[arg(long, default_value = "clean")]
        audio_dir: PathBuf,

        /// Directory under which `models/` and `cache/` live.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Output table: label columns, per-class probabilities and `y_pred`.
        #[arg(long, default_value = "predictions.csv")]
        out: PathBuf,
    },

    /// Print mean clip duration and sampling probability per class.
    Distribution {
        #[arg(long, default_value = "instruments.csv")]
        labels: PathBuf,

        /// Needed only when the table has no `length` column.
        #[arg(long, default_value = "clean")]
        audio_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Predict {
            mode,
            labels,
            audio_dir,
            root,
            out,
        } => predict(mode, labels, audio_dir, root, out),
        Command::Distribution { labels, audio_dir } => distribution(labels, audio_dir),
    }
}

fn predict(mode: Mode, labels: PathBuf, audio_dir: PathBuf, root: PathBuf, out: PathBuf) -> Result<()> {
    let table = LabelTable::from_csv(&labels)
        .with_context(|| format!("failed to load label table {}", labels.display()))?;

    let config = Config::with_params(mode, FeatureParams::default(), &root);
    let artifact = CacheArtifact::load_for(&config)?.with_context(|| {
        format!(
            "no cached dataset at {}; train the {mode} model first",
            config.cache_path.display()
        )
    })?;

    let model = load_classifier(&artifact, &artifact.config.model_path)?;
    let extractor = Mfcc::new(artifact.config.features);
    let predictor = Predictor::new(&artifact, &extractor, model.as_ref());

    let predictions = predictor.predict_dir(&audio_dir, &table.file_to_class(), &artifact.classes)?;
    info!(
        "Window accuracy: {:.4} over {} windows",
        predictions.accuracy(),
        predictions.true_labels.len()
    );

    report::write_predictions(&out, &table, &artifact.classes, &predictions)?;
    info!("Wrote {}", out.display());
    Ok(())
}

fn distribution(labels: PathBuf, audio_dir: PathBuf) -> Result<()> {
    let sample_rate = FeatureParams::default().sample_rate;
    let mut table = LabelTable::from_csv(&labels)
        .with_context(|| format!("failed to load label table {}", labels.display()))?;
    table.enrich_durations(&DirSource::new(&audio_dir, sample_rate), sample_rate)?;

    let dist = table.class_distribution()?;
    println!("{:<24} {:>10} {:>8}", "class", "mean (s)", "share");
    for (class, p) in dist.classes().zip(dist.probabilities()) {
        let mean = dist.mean(class).unwrap_or_default();
        println!("{class:<24} {mean:>10.3} {:>7.1}%", p * 100.0);
    }
    println!("default sample count: {}", table.default_sample_count()?);
    Ok(())
}
