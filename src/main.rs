use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

use fakenews_features::{
    build_cooccurrence_tensor, load_corpus, tucker, EmbeddingAggregator, EmbeddingTable,
    IndexingContext, PipelineConfig, Representation,
};

#[derive(Parser, Debug)]
#[command(about = "Build fake-news article features from a labelled corpus")]
struct Args {
    /// TOML pipeline configuration; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut ctx = IndexingContext::new()?;
    let corpus = load_corpus(
        &mut ctx,
        &config.dataset_path,
        config.number_fake,
        config.number_real,
        &mut rng,
    )
    .context("Dataset could not be loaded.")?;

    match config.representation {
        Representation::Cooccurrence => {
            let word_index = ctx.build_word_to_index(config.in_freq_order, config.max_words());
            info!(words = word_index.len(), "word index built");
            let result = build_cooccurrence_tensor(
                &ctx,
                &word_index,
                &corpus,
                &config.cooccurrence(),
                &config.masking(),
                &mut rng,
            )?;
            let decomposition = tucker(&result.features, &config.tucker())?;
            info!(
                core = ?decomposition.core.dim(),
                words = ?decomposition.factors[0].dim(),
                articles = ?decomposition.factors[2].dim(),
                labels = result.labels.len(),
                "co-occurrence features ready"
            );
        }
        Representation::Glove => {
            let glove_path = config
                .glove_path
                .as_deref()
                .context("glove representation requires glove_path")?;
            let table = EmbeddingTable::load(glove_path)?;
            let aggregator = EmbeddingAggregator::new(table, config.seed);
            let result = aggregator.build_embedding_tensor(
                &ctx,
                &corpus,
                config.ratio,
                config.embedding_method,
                &config.masking(),
                &mut rng,
            );
            info!(
                shape = ?result.features.dim(),
                labels = result.labels.len(),
                "embedding features ready"
            );
        }
    }
    Ok(())
}
