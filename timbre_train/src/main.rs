mod trainer;

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use timbre_core::audio::{DirSource, Mfcc};
use timbre_core::model::{conv_config, recurrent_config};
use timbre_core::{Config, DatasetBuilder, FeatureParams, LabelTable, Mode};

use crate::trainer::{kept_epoch, train, TrainOptions};

type TrainBackend = Autodiff<NdArray>;

#[derive(Debug, Parser)]
#[command(name = "timbre-train")]
#[command(about = "Builds (or reloads) the feature dataset and trains a classifier.")]
struct Args {
    /// Tensor layout and network family: conv or time.
    #[arg(long, default_value = "conv")]
    mode: Mode,

    /// Label table with `fname,label[,length]` columns.
    #[arg(long, default_value = "instruments.csv")]
    labels: PathBuf,

    /// Directory holding the labeled clips.
    #[arg(long, default_value = "clean")]
    audio_dir: PathBuf,

    /// Directory under which `models/` and `cache/` live.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Windows to draw. Defaults to two per tenth of a second of audio.
    #[arg(long)]
    samples: Option<usize>,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::with_params(args.mode, FeatureParams::default(), &args.root);
    config.validate()?;
    config.ensure_dirs()?;

    let source = DirSource::new(&args.audio_dir, config.features.sample_rate);
    let mut table = LabelTable::from_csv(&args.labels)
        .with_context(|| format!("failed to load label table {}", args.labels.display()))?;
    table.enrich_durations(&source, config.features.sample_rate)?;

    let classes = table.classes();
    let distribution = table.class_distribution()?;
    let probabilities = distribution.probabilities();
    for (class, p) in distribution.classes().zip(&probabilities) {
        info!("{class}: {:.1}%", p * 100.0);
    }

    let samples = match args.samples {
        Some(n) => n,
        None => table.default_sample_count()?,
    };

    let extractor = Mfcc::new(config.features);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let artifact = DatasetBuilder::new(&config, &source, &extractor).build(
        &mut rng,
        samples,
        &distribution,
        &probabilities,
        &table,
        &classes,
    )?;
    info!(
        "Dataset: {} samples of shape {:?}, range [{}, {}]",
        artifact.dataset.len(),
        artifact.dataset.sample_shape(),
        artifact.normalization.min,
        artifact.normalization.max
    );

    let options = TrainOptions {
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        seed: args.seed,
        ..TrainOptions::default()
    };
    let device = Default::default();
    let history = match config.mode {
        Mode::Conv => {
            let model = conv_config(&artifact)?.init::<TrainBackend>(&device);
            train::<TrainBackend, _, 4>(model, &artifact.dataset, &options, &config.model_path, &device)?
        }
        Mode::Time => {
            let model = recurrent_config(&artifact)?.init::<TrainBackend>(&device);
            train::<TrainBackend, _, 3>(model, &artifact.dataset, &options, &config.model_path, &device)?
        }
    };

    if let Some(kept) = kept_epoch(&history) {
        match kept.valid_accuracy {
            Some(acc) => info!("Kept epoch {} (val_acc {acc:.4})", kept.epoch),
            None => info!("Kept epoch {} (loss {:.4})", kept.epoch, kept.train_loss),
        }
    }
    Ok(())
}
