//! Shuffled article order with signed labels, part of which are hidden.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::prepare_dataset::{ArticleRecord, Corpus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Fake,
    Unknown,
    Real,
}

impl Label {
    pub fn value(self) -> i8 {
        match self {
            Label::Fake => -1,
            Label::Unknown => 0,
            Label::Real => 1,
        }
    }
}

/// How labels are assigned to the `[real..., fake...]` concatenation before shuffling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOrder {
    /// The first `count(fake)` positions are labelled fake, the rest real,
    /// regardless of which partition the article came from.
    #[default]
    Positional,
    /// Every article is labelled with the class it was loaded as.
    ByClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskingParams {
    pub num_unknown: usize,
    /// Share of the known labels that should be real.
    pub proportion_true_fake_label: f64,
    pub label_order: LabelOrder,
}

impl Default for MaskingParams {
    fn default() -> Self {
        MaskingParams {
            num_unknown: 0,
            proportion_true_fake_label: 0.5,
            label_order: LabelOrder::Positional,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSplit<'a> {
    pub articles: Vec<&'a ArticleRecord>,
    pub labels: Vec<Label>,
    pub labels_untouched: Vec<Label>,
}

impl<'a> LabeledSplit<'a> {
    /// Attaches features computed over this split's articles.
    pub fn with_features<F>(self, features: F) -> LabeledFeatures<F> {
        LabeledFeatures {
            features,
            names: self.articles.iter().map(|a| a.name.clone()).collect(),
            labels: self.labels,
            labels_untouched: self.labels_untouched,
        }
    }
}

/// Features built over a [`LabeledSplit`], with the labels that go along with them.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFeatures<F> {
    pub features: F,
    /// Names of the articles, in the order their features are laid out.
    pub names: Vec<String>,
    pub labels: Vec<Label>,
    pub labels_untouched: Vec<Label>,
}

pub fn split_and_mask<'a, R: Rng + ?Sized>(
    corpus: &'a Corpus,
    params: &MaskingParams,
    rng: &mut R,
) -> LabeledSplit<'a> {
    let real: Vec<&ArticleRecord> = corpus.real.iter().collect();
    let fake: Vec<&ArticleRecord> = corpus.fake.iter().collect();
    let (articles, labels, labels_untouched) = assign_and_mask(real, fake, params, rng);
    LabeledSplit {
        articles,
        labels,
        labels_untouched,
    }
}

/// Labels, shuffles and masks any pair of class partitions.
///
/// Returns the shuffled items, the masked labels and the labels as they were
/// right after shuffling.
pub fn assign_and_mask<T, R: Rng + ?Sized>(
    real: Vec<T>,
    fake: Vec<T>,
    params: &MaskingParams,
    rng: &mut R,
) -> (Vec<T>, Vec<Label>, Vec<Label>) {
    let number_real = real.len() as i64;
    let number_fake = fake.len() as i64;
    let fake_count = fake.len();

    let mut pairs: Vec<(T, Label)> = real
        .into_iter()
        .map(|item| (item, Label::Real))
        .chain(fake.into_iter().map(|item| (item, Label::Fake)))
        .enumerate()
        .map(|(k, (item, class))| {
            let label = match params.label_order {
                LabelOrder::Positional if k < fake_count => Label::Fake,
                LabelOrder::Positional => Label::Real,
                LabelOrder::ByClass => class,
            };
            (item, label)
        })
        .collect();
    pairs.shuffle(rng);

    let (items, labels_untouched): (Vec<T>, Vec<Label>) = pairs.into_iter().unzip();
    let mut labels = labels_untouched.clone();

    let num_known = labels.len() as i64 - params.num_unknown as i64;
    let known_real = (params.proportion_true_fake_label * num_known as f64).round() as i64;
    let mut number_true_unknown = number_real - known_real;
    let mut number_false_unknown = number_fake - (num_known - known_real);
    debug!(
        num_known,
        number_true_unknown, number_false_unknown, "masking labels"
    );

    for label in labels.iter_mut() {
        if number_true_unknown > 0 && *label == Label::Real {
            *label = Label::Unknown;
            number_true_unknown -= 1;
        }
        if *label == Label::Fake && number_false_unknown > 0 {
            *label = Label::Unknown;
            number_false_unknown -= 1;
        }
    }

    (items, labels, labels_untouched)
}
