use anyhow::{anyhow, Context, Result};
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tokenizers::pre_tokenizers::split::{Split, SplitPattern};
use tokenizers::{
    OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer, SplitDelimiterBehavior,
};

/// Token appended to every word index for out-of-vocabulary words.
pub const UNKNOWN_TOKEN: &str = "<unk>";

/// English word pattern, matched against lowercased text. In order: the stem
/// of an `n't` contraction, the `n't` itself, clitics (`'s`, `'ll`, ...),
/// dotted abbreviations, numbers with decimal or thousands separators,
/// hyphenated words, and runs of punctuation.
const WORD_PATTERN: &str = r"[a-z]+(?=n't\b)|n't\b|'(?:s|m|d|ll|re|ve)\b|(?:[a-z]\.){2,}|\d+(?:[.,]\d+)+|\w+(?:-\w+)*|[^\w\s]+";

/// Vocabulary and document-frequency state accumulated while a corpus is ingested.
///
/// One context is created per corpus load. The loader mutates it, the tensor
/// builders only ever borrow it immutably, which is what freezes the vocabulary.
pub struct IndexingContext {
    stemmer: Stemmer,
    pre_tokenizer: Split,
    vocabulary: HashMap<String, usize>,
    insertion_order: Vec<String>,
    frequency: HashMap<String, HashSet<String>>,
}

impl IndexingContext {
    pub fn new() -> Result<Self> {
        let pre_tokenizer = Split::new(
            SplitPattern::Regex(WORD_PATTERN.to_string()),
            SplitDelimiterBehavior::Removed,
            true,
        )
        .map_err(|e| anyhow!(e))
        .context("Invalid word pattern")?;
        Ok(IndexingContext {
            stemmer: Stemmer::create(Algorithm::English),
            pre_tokenizer,
            vocabulary: HashMap::new(),
            insertion_order: Vec::new(),
            frequency: HashMap::new(),
        })
    }

    /// Reads, tokenizes and stems a file, recording its words under the file path.
    pub fn ingest_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let text = read_article_text(path)?;
        self.ingest_text(&text, &path.display().to_string())
    }

    /// Tokenizes and stems `text`, counting every stem and recording `file_id`
    /// once in the frequency set of each stem it contains.
    pub fn ingest_text(&mut self, text: &str, file_id: &str) -> Result<Vec<String>> {
        let tokens = self.tokenize(text)?;
        for token in &tokens {
            match self.vocabulary.get_mut(token) {
                Some(count) => *count += 1,
                None => {
                    self.vocabulary.insert(token.clone(), 1);
                    self.insertion_order.push(token.clone());
                }
            }
            let files = self.frequency.entry(token.clone()).or_default();
            if !files.contains(file_id) {
                files.insert(file_id.to_string());
            }
        }
        Ok(tokens)
    }

    /// Lowercases and splits `text` into English words and punctuation.
    ///
    /// Contractions are split the way treebank tokenizers do (`don't` gives
    /// `do` and `n't`), while decimals, dotted abbreviations and hyphenated
    /// words stay whole. Whitespace is dropped.
    pub fn split_words(&self, text: &str) -> Result<Vec<String>> {
        let lowered = text.to_lowercase();
        let mut pretokenized = PreTokenizedString::from(lowered.as_str());
        self.pre_tokenizer
            .pre_tokenize(&mut pretokenized)
            .map_err(|e| anyhow!(e))?;
        Ok(pretokenized
            .get_splits(OffsetReferential::Original, OffsetType::Byte)
            .into_iter()
            .map(|(word, _, _)| word.to_string())
            .collect())
    }

    /// [`split_words`](Self::split_words) followed by stemming of every piece.
    pub fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let tokens = self
            .split_words(text)?
            .iter()
            .map(|word| self.stemmer.stem(word).into_owned())
            .collect();
        Ok(tokens)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.vocabulary.contains_key(word)
    }

    pub fn count(&self, word: &str) -> usize {
        self.vocabulary.get(word).copied().unwrap_or(0)
    }

    pub fn document_frequency(&self, word: &str) -> usize {
        self.frequency.get(word).map_or(0, HashSet::len)
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// A word takes part in feature construction when it was seen during ingestion
    /// and appears in fewer than `ratio * total_articles` files.
    pub fn is_informative(&self, word: &str, ratio: f64, total_articles: usize) -> bool {
        self.contains(word)
            && (self.document_frequency(word) as f64) < ratio * total_articles as f64
    }

    /// Builds the frozen word index.
    ///
    /// With `in_freq_order` words are ranked by descending count, ties keeping the
    /// order in which they were first seen. `Some(m)` keeps the `m - 1` first words
    /// so that the index, `<unk>` included, holds at most `m` entries.
    pub fn build_word_to_index(&self, in_freq_order: bool, max_words: Option<usize>) -> WordIndex {
        let mut words: Vec<&String> = self.insertion_order.iter().collect();
        if in_freq_order {
            words.sort_by(|a, b| self.vocabulary[*b].cmp(&self.vocabulary[*a]));
        }
        if let Some(max_words) = max_words {
            words.truncate(max_words.saturating_sub(1));
        }
        let mut index_to_word: Vec<String> = words.into_iter().cloned().collect();
        index_to_word.push(UNKNOWN_TOKEN.to_string());
        WordIndex::from_words(index_to_word)
    }
}

/// Reads an article leniently: malformed UTF-8 sequences are dropped and line
/// breaks are removed. Characters that were valid in the file, U+FFFD included,
/// are kept.
pub fn read_article_text(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("Cannot read article at {}", path.display()))?;
    let mut body = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        body.extend(chunk.valid().chars().filter(|&c| c != '\n' && c != '\r'));
    }
    Ok(body)
}

/// Frozen word ↔ index mapping, with `<unk>` as its last entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WordIndex {
    index_to_word: Vec<String>,
    word_to_index: HashMap<String, usize>,
}

impl WordIndex {
    fn from_words(index_to_word: Vec<String>) -> Self {
        let word_to_index = index_to_word
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        WordIndex {
            index_to_word,
            word_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.index_to_word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_word.is_empty()
    }

    pub fn sentinel_index(&self) -> usize {
        self.word_to_index[UNKNOWN_TOKEN]
    }

    /// Index of `word`, or of `<unk>` when the word was not kept.
    pub fn index_of(&self, word: &str) -> usize {
        match self.word_to_index.get(word) {
            Some(index) => *index,
            None => self.sentinel_index(),
        }
    }

    pub fn word_at(&self, index: usize) -> Option<&str> {
        self.index_to_word.get(index).map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.index_to_word
    }

    pub fn to_deindexer(&self) -> HashMap<usize, String> {
        self.word_to_index
            .iter()
            .map(|(s, i)| (*i, s.clone()))
            .collect()
    }
}
