//! Dense article features built from pretrained GloVe vectors.
//!
//! Two aggregations are available: the mean of the vectors of the informative
//! words of an article, or the final hidden state of a GRU cell fed with the
//! whole article in order.

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{s, Array1, Array2, ArrayView1};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

use crate::labels::{split_and_mask, LabeledFeatures, MaskingParams};
use crate::prepare_dataset::Corpus;
use crate::preprocess::IndexingContext;

/// Reserved GloVe entry used for words missing from the table.
pub const UNKNOWN_EMBEDDING: &str = "unk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Mean,
    #[serde(alias = "rnn", alias = "RNN")]
    Recurrent,
}

/// Word vectors keyed by stemmed token, all of the same dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    dimension: usize,
    vectors: HashMap<String, Array1<f64>>,
}

impl EmbeddingTable {
    /// Builds a table from in-memory entries. The `unk` entry is mandatory.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        let mut dimension = None;
        let mut vectors = HashMap::new();
        for (token, values) in entries {
            let expected = *dimension.get_or_insert(values.len());
            if values.len() != expected {
                bail!(
                    "Embedding for '{token}' has {} values, expected {expected}",
                    values.len()
                );
            }
            vectors.insert(token, Array1::from(values));
        }
        let dimension = dimension.ok_or_else(|| anyhow!("Embedding table is empty"))?;
        if dimension == 0 {
            bail!("Embedding vectors have no components");
        }
        if !vectors.contains_key(UNKNOWN_EMBEDDING) {
            bail!("Embedding table has no '{UNKNOWN_EMBEDDING}' entry");
        }
        Ok(EmbeddingTable { dimension, vectors })
    }

    /// Loads a GloVe text file: one `token f1 f2 ... fd` entry per line.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open embedding table {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let Some(token) = fields.next() else {
                continue;
            };
            let values = fields
                .map(|field| field.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| {
                    format!("Invalid number on line {} of {}", line_no + 1, path.display())
                })?;
            entries.push((token.to_string(), values));
        }
        let table = Self::from_entries(entries)
            .with_context(|| format!("Invalid embedding table {}", path.display()))?;
        info!(
            words = table.len(),
            dimension = table.dimension,
            "embedding table loaded"
        );
        Ok(table)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.vectors.contains_key(word)
    }

    /// Vector of `word`, or the `unk` vector when the word is not in the table.
    pub fn lookup(&self, word: &str) -> &Array1<f64> {
        self.vectors
            .get(word)
            .unwrap_or_else(|| &self.vectors[UNKNOWN_EMBEDDING])
    }
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

/// Single GRU cell with frozen weights.
///
/// Gates are stacked reset, update, new along the first axis of the weights:
///
/// ```text
/// r  = σ(W_ir x + b_ir + W_hr h + b_hr)
/// z  = σ(W_iz x + b_iz + W_hz h + b_hz)
/// n  = tanh(W_in x + b_in + r * (W_hn h + b_hn))
/// h' = (1 - z) * n + z * h
/// ```
#[derive(Debug, Clone)]
pub struct GruCell {
    hidden_size: usize,
    w_ih: Array2<f64>,
    w_hh: Array2<f64>,
    b_ih: Array1<f64>,
    b_hh: Array1<f64>,
}

impl GruCell {
    /// Weights drawn once from `U(-1/sqrt(hidden), 1/sqrt(hidden))`.
    pub fn seeded(input_size: usize, hidden_size: usize, seed: u64) -> Self {
        let bound = 1. / (hidden_size as f64).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let mut rng = StdRng::seed_from_u64(seed);
        let gates = 3 * hidden_size;
        GruCell {
            hidden_size,
            w_ih: Array2::from_shape_fn((gates, input_size), |_| dist.sample(&mut rng)),
            w_hh: Array2::from_shape_fn((gates, hidden_size), |_| dist.sample(&mut rng)),
            b_ih: Array1::from_shape_fn(gates, |_| dist.sample(&mut rng)),
            b_hh: Array1::from_shape_fn(gates, |_| dist.sample(&mut rng)),
        }
    }

    pub fn from_weights(
        w_ih: Array2<f64>,
        w_hh: Array2<f64>,
        b_ih: Array1<f64>,
        b_hh: Array1<f64>,
    ) -> Result<Self> {
        let (gates, hidden_size) = w_hh.dim();
        if gates != 3 * hidden_size {
            bail!("Hidden weights must be (3 * hidden, hidden), got {:?}", w_hh.dim());
        }
        if w_ih.nrows() != gates || b_ih.len() != gates || b_hh.len() != gates {
            bail!(
                "GRU weights disagree: w_ih {:?}, b_ih {}, b_hh {}, expected {gates} rows",
                w_ih.dim(),
                b_ih.len(),
                b_hh.len()
            );
        }
        Ok(GruCell {
            hidden_size,
            w_ih,
            w_hh,
            b_ih,
            b_hh,
        })
    }

    pub fn input_size(&self) -> usize {
        self.w_ih.ncols()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn step(&self, x: ArrayView1<f64>, h: &Array1<f64>) -> Array1<f64> {
        let hs = self.hidden_size;
        let gi = self.w_ih.dot(&x) + &self.b_ih;
        let gh = self.w_hh.dot(h) + &self.b_hh;

        let r = (&gi.slice(s![..hs]) + &gh.slice(s![..hs])).mapv(sigmoid);
        let z = (&gi.slice(s![hs..2 * hs]) + &gh.slice(s![hs..2 * hs])).mapv(sigmoid);
        let n = (&gi.slice(s![2 * hs..]) + &(&r * &gh.slice(s![2 * hs..]))).mapv(f64::tanh);

        (1. - &z) * &n + &z * h
    }
}

pub struct EmbeddingAggregator {
    table: EmbeddingTable,
    gru: GruCell,
}

impl EmbeddingAggregator {
    /// Aggregator whose GRU, sized to the table dimension, is initialised from `seed`.
    pub fn new(table: EmbeddingTable, seed: u64) -> Self {
        let dimension = table.dimension();
        EmbeddingAggregator {
            table,
            gru: GruCell::seeded(dimension, dimension, seed),
        }
    }

    pub fn with_gru(table: EmbeddingTable, gru: GruCell) -> Result<Self> {
        if gru.input_size() != table.dimension() || gru.hidden_size() != table.dimension() {
            bail!(
                "GRU of size {}x{} does not match embedding dimension {}",
                gru.input_size(),
                gru.hidden_size(),
                table.dimension()
            );
        }
        Ok(EmbeddingAggregator { table, gru })
    }

    pub fn table(&self) -> &EmbeddingTable {
        &self.table
    }

    pub fn article_vector(
        &self,
        ctx: &IndexingContext,
        article: &[String],
        ratio: f64,
        total_articles: usize,
        method: AggregationMethod,
    ) -> Array1<f64> {
        let qualifies = |word: &str| ctx.is_informative(word, ratio, total_articles);
        match method {
            AggregationMethod::Mean => self.mean(article, qualifies),
            AggregationMethod::Recurrent => self.recurrent(article, qualifies),
        }
    }

    /// Articles without a single informative word get a zero vector.
    fn mean(&self, article: &[String], qualifies: impl Fn(&str) -> bool) -> Array1<f64> {
        let mut vector = Array1::zeros(self.table.dimension());
        let mut n = 0usize;
        for word in article.iter().filter(|w| qualifies(w.as_str())) {
            vector += self.table.lookup(word);
            n += 1;
        }
        if n == 0 {
            warn!(
                tokens = article.len(),
                "no informative word in article, using a zero vector"
            );
            return vector;
        }
        vector / n as f64
    }

    fn recurrent(&self, article: &[String], qualifies: impl Fn(&str) -> bool) -> Array1<f64> {
        let zeros: Array1<f64> = Array1::zeros(self.table.dimension());
        article
            .iter()
            .fold(Array1::zeros(self.gru.hidden_size()), |h, word| {
                let x = if qualifies(word.as_str()) {
                    self.table.lookup(word)
                } else {
                    &zeros
                };
                self.gru.step(x.view(), &h)
            })
    }

    /// Shuffles and masks the corpus, then returns a `(dimension, |articles|)`
    /// matrix whose columns follow the shuffled order.
    pub fn build_embedding_tensor<R: Rng + ?Sized>(
        &self,
        ctx: &IndexingContext,
        corpus: &Corpus,
        ratio: f64,
        method: AggregationMethod,
        masking: &MaskingParams,
        rng: &mut R,
    ) -> LabeledFeatures<Array2<f64>> {
        let split = split_and_mask(corpus, masking, rng);
        let total_articles = corpus.total_articles();
        let mut tensor = Array2::zeros((self.table.dimension(), split.articles.len()));
        for (k, article) in split.articles.iter().enumerate() {
            let vector = self.article_vector(ctx, &article.content, ratio, total_articles, method);
            tensor.column_mut(k).assign(&vector);
        }
        info!(shape = ?tensor.dim(), ?method, "embedding tensor assembled");

        split.with_features(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare_dataset::ArticleRecord;
    use ndarray::array;
    use std::io::Write;

    fn table() -> EmbeddingTable {
        EmbeddingTable::from_entries(vec![
            ("cat".to_string(), vec![1., 2.]),
            ("dog".to_string(), vec![3., -1.]),
            (UNKNOWN_EMBEDDING.to_string(), vec![0.5, 0.5]),
        ])
        .unwrap()
    }

    fn context(texts: &[&str]) -> IndexingContext {
        let mut ctx = IndexingContext::new().unwrap();
        for (i, text) in texts.iter().enumerate() {
            ctx.ingest_text(text, &format!("{i}.txt")).unwrap();
        }
        ctx
    }

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_lookup_falls_back_to_unk() {
        let table = table();
        assert_eq!(table.lookup("cat"), &array![1., 2.]);
        assert_eq!(table.lookup("fish"), &array![0.5, 0.5]);
    }

    #[test]
    fn test_table_requires_unk() {
        let err = EmbeddingTable::from_entries(vec![("cat".to_string(), vec![1.])]).unwrap_err();
        assert!(err.to_string().contains("unk"));
    }

    #[test]
    fn test_table_rejects_ragged_rows() {
        let result = EmbeddingTable::from_entries(vec![
            ("cat".to_string(), vec![1., 2.]),
            (UNKNOWN_EMBEDDING.to_string(), vec![1.]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_glove_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 0.1 0.2 0.3").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "unk 0 0 1").unwrap();
        let table = EmbeddingTable::load(file.path()).unwrap();
        assert_eq!(table.dimension(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("cat"), &array![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_load_rejects_bad_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 0.1 abc").unwrap();
        writeln!(file, "unk 0 0").unwrap();
        let err = EmbeddingTable::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_mean_of_single_known_word_is_its_vector() {
        let ctx = context(&["cat", "dog"]);
        let aggregator = EmbeddingAggregator::new(table(), 0);
        let vector = aggregator.article_vector(&ctx, &words("cat"), 1.0, 2, AggregationMethod::Mean);
        assert_eq!(vector, array![1., 2.]);
    }

    #[test]
    fn test_mean_uses_unk_for_words_missing_from_table() {
        let ctx = context(&["cat fish", "dog"]);
        let aggregator = EmbeddingAggregator::new(table(), 0);
        let vector =
            aggregator.article_vector(&ctx, &words("cat fish"), 1.0, 2, AggregationMethod::Mean);
        assert_eq!(vector, array![0.75, 1.25]);
    }

    #[test]
    fn test_mean_without_informative_word_is_zero() {
        let ctx = context(&["cat", "cat"]);
        let aggregator = EmbeddingAggregator::new(table(), 0);
        let vector = aggregator.article_vector(&ctx, &words("cat"), 1.0, 2, AggregationMethod::Mean);
        assert_eq!(vector, array![0., 0.]);
        let vector = aggregator.article_vector(&ctx, &[], 1.0, 2, AggregationMethod::Mean);
        assert_eq!(vector, array![0., 0.]);
    }

    #[test]
    fn test_gru_step_matches_hand_computation() {
        // input and hidden size 1, so every gate is a scalar
        let gru = GruCell::from_weights(
            array![[1.], [0.], [2.]],
            array![[0.], [1.], [1.]],
            array![0., 0., 0.],
            array![0., 0., 0.],
        )
        .unwrap();
        let x = array![0.5];
        let h = array![1.];
        let r = sigmoid(0.5);
        let z = sigmoid(1.);
        let n = (1. + r * 1.).tanh();
        let expected = (1. - z) * n + z * 1.;
        let out = gru.step(x.view(), &h);
        assert!((out[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_gru_rejects_bad_shapes() {
        let result = GruCell::from_weights(
            Array2::zeros((3, 2)),
            Array2::zeros((3, 2)),
            Array1::zeros(3),
            Array1::zeros(3),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_recurrent_feeds_every_position() {
        let ctx = context(&["cat the", "dog the"]);
        let gru = GruCell::seeded(2, 2, 42);
        let aggregator = EmbeddingAggregator::with_gru(table(), gru.clone()).unwrap();
        // "the" is in every file, so it is fed as a zero vector
        let vector = aggregator.article_vector(
            &ctx,
            &words("cat the"),
            1.0,
            2,
            AggregationMethod::Recurrent,
        );
        let h1 = gru.step(array![1., 2.].view(), &Array1::zeros(2));
        let h2 = gru.step(Array1::<f64>::zeros(2).view(), &h1);
        assert_eq!(vector, h2);
    }

    #[test]
    fn test_recurrent_of_empty_article_is_zero() {
        let ctx = context(&["cat"]);
        let aggregator = EmbeddingAggregator::new(table(), 1);
        let vector = aggregator.article_vector(&ctx, &[], 1.0, 1, AggregationMethod::Recurrent);
        assert_eq!(vector, array![0., 0.]);
    }

    #[test]
    fn test_seeded_gru_is_reproducible() {
        let a = GruCell::seeded(3, 3, 5);
        let b = GruCell::seeded(3, 3, 5);
        let x = array![0.1, -0.2, 0.3];
        let h = Array1::zeros(3);
        assert_eq!(a.step(x.view(), &h), b.step(x.view(), &h));
    }

    #[test]
    fn test_embedding_tensor_shape() {
        let mut ctx = IndexingContext::new().unwrap();
        let record = |ctx: &mut IndexingContext, text: &str, name: &str| ArticleRecord {
            name: name.to_string(),
            content: ctx.ingest_text(text, name).unwrap(),
            title: vec![],
        };
        let fake = vec![record(&mut ctx, "cat", "f0"), record(&mut ctx, "dog", "f1")];
        let real = vec![record(&mut ctx, "cat dog", "r0")];
        let corpus = Corpus::new(fake, real);
        let aggregator = EmbeddingAggregator::new(table(), 0);
        let mut rng = StdRng::seed_from_u64(8);
        let result = aggregator.build_embedding_tensor(
            &ctx,
            &corpus,
            1.0,
            AggregationMethod::Mean,
            &MaskingParams::default(),
            &mut rng,
        );
        assert_eq!(result.features.dim(), (2, 3));
        assert_eq!(result.labels.len(), 3);
        assert_eq!(result.labels_untouched.len(), 3);
    }
}
