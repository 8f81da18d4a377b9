use anyhow::Result;
use rand::Rng;
use std::collections::HashMap;
use tracing::info;

use crate::labels::{split_and_mask, LabeledFeatures, MaskingParams};
use crate::prepare_dataset::Corpus;
use crate::preprocess::{IndexingContext, WordIndex};
use crate::tensor::SparseTensor3;

#[derive(Debug, Clone, PartialEq)]
pub struct CooccurrenceParams {
    /// Total width of the context window, split evenly left and right.
    pub window: usize,
    /// Words present in `ratio * total_articles` files or more are skipped.
    pub ratio: f64,
    /// Accumulate counts per coordinate instead of storing one unit entry per occurrence.
    pub use_frequency: bool,
}

impl Default for CooccurrenceParams {
    fn default() -> Self {
        CooccurrenceParams {
            window: 4,
            ratio: 0.5,
            use_frequency: true,
        }
    }
}

/// Co-occurrence entries of a single article, as parallel coordinate and value lists.
pub fn article_cooccurrences(
    ctx: &IndexingContext,
    word_index: &WordIndex,
    article: &[String],
    article_index: usize,
    params: &CooccurrenceParams,
    total_articles: usize,
) -> (Vec<[usize; 3]>, Vec<f64>) {
    let half_window = params.window / 2;
    let mut coordinates: Vec<[usize; 3]> = Vec::new();
    let mut data: Vec<f64> = Vec::new();
    let mut positions: HashMap<[usize; 3], usize> = HashMap::new();

    for (k, word) in article.iter().enumerate() {
        if !ctx.is_informative(word, params.ratio, total_articles) {
            continue;
        }
        let left = &article[k.saturating_sub(half_window)..k];
        let right = &article[k + 1..article.len().min(k + 1 + half_window)];
        let word_key = word_index.index_of(word);

        for neighbour in left.iter().chain(right.iter()) {
            let coord = [word_key, word_index.index_of(neighbour), article_index];
            if params.use_frequency {
                if let Some(&position) = positions.get(&coord) {
                    data[position] += 1.;
                    continue;
                }
                positions.insert(coord, coordinates.len());
            }
            coordinates.push(coord);
            data.push(1.);
        }
    }
    (coordinates, data)
}

/// Shuffles and masks the corpus, then stacks every article's co-occurrences into
/// a `(|word index|, |word index|, |articles|)` tensor in the shuffled order.
pub fn build_cooccurrence_tensor<R: Rng + ?Sized>(
    ctx: &IndexingContext,
    word_index: &WordIndex,
    corpus: &Corpus,
    params: &CooccurrenceParams,
    masking: &MaskingParams,
    rng: &mut R,
) -> Result<LabeledFeatures<SparseTensor3>> {
    let split = split_and_mask(corpus, masking, rng);
    let total_articles = corpus.total_articles();
    let mut tensor = SparseTensor3::new([word_index.len(), word_index.len(), split.articles.len()]);

    for (k, article) in split.articles.iter().enumerate() {
        let (coords, data) =
            article_cooccurrences(ctx, word_index, &article.content, k, params, total_articles);
        tensor.extend(coords, data)?;
    }
    info!(shape = ?tensor.shape(), nnz = tensor.nnz(), "co-occurrence tensor assembled");

    Ok(split.with_features(tensor))
}
