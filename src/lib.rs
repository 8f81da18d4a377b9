//! Feature construction for fake-news classification.
//!
//! Articles are sampled from a labelled corpus and indexed, their labels are
//! shuffled and partly hidden, and every article becomes either a slice of a
//! sparse word co-occurrence tensor (later Tucker-decomposed) or a dense vector
//! aggregated from GloVe embeddings.

pub mod config;
pub mod cooccurrence;
pub mod decomposition;
pub mod embedding;
pub mod labels;
pub mod prepare_dataset;
pub mod preprocess;
pub mod tensor;

pub use config::{PipelineConfig, Representation};
pub use cooccurrence::{build_cooccurrence_tensor, CooccurrenceParams};
pub use decomposition::{tucker, DecompositionError, TuckerDecomposition, TuckerOptions};
pub use embedding::{AggregationMethod, EmbeddingAggregator, EmbeddingTable, GruCell};
pub use labels::{Label, LabelOrder, LabeledFeatures, MaskingParams};
pub use prepare_dataset::{load_corpus, ArticleRecord, Corpus};
pub use preprocess::{IndexingContext, WordIndex};
pub use tensor::SparseTensor3;
