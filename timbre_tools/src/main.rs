use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use timbre_core::audio::DirSource;
use timbre_core::{FeatureParams, LabelTable};

#[derive(Debug, Parser)]
#[command(name = "timbre-tools")]
#[command(about = "Label table maintenance.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode every clip missing a duration and write the `length` column (seconds).
    Durations {
        #[arg(long, default_value = "instruments.csv")]
        labels: PathBuf,

        #[arg(long, default_value = "clean")]
        audio_dir: PathBuf,

        /// Output table; defaults to rewriting the input.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn load(labels: &Path) -> Result<LabelTable> {
    LabelTable::from_csv(labels)
        .with_context(|| format!("Failed to open label table: {}", labels.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Durations {
            labels,
            audio_dir,
            out,
        } => {
            let sample_rate = FeatureParams::default().sample_rate;
            let mut table = load(&labels)?;
            table.enrich_durations(&DirSource::new(&audio_dir, sample_rate), sample_rate)?;

            let out = out.unwrap_or(labels);
            table.write_csv(&out)?;
            info!(
                "Wrote {} rows ({:.1} s of audio) to {}",
                table.len(),
                table.total_secs()?,
                out.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn durations_is_the_only_subcommand() {
        let names: Vec<_> = Args::command()
            .get_subcommands()
            .map(|c| c.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["durations"]);

        let args = Args::try_parse_from(["timbre-tools", "durations", "--out", "x.csv"]).unwrap();
        match args.command {
            Command::Durations { labels, out, .. } => {
                assert_eq!(labels, PathBuf::from("instruments.csv"));
                assert_eq!(out, Some(PathBuf::from("x.csv")));
            }
        }
    }
}
