use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::{fs, io, path::*};
use tracing::{debug, info};

use crate::preprocess::IndexingContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleClass {
    Fake,
    Real,
}

impl ArticleClass {
    fn content_dir(self) -> &'static str {
        match self {
            ArticleClass::Fake => "Fake",
            ArticleClass::Real => "Real",
        }
    }

    fn titles_dir(self) -> &'static str {
        match self {
            ArticleClass::Fake => "Fake_titles",
            ArticleClass::Real => "Real_titles",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub name: String,
    pub content: Vec<String>,
    pub title: Vec<String>,
}

/// Sampled articles, partitioned by class.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub fake: Vec<ArticleRecord>,
    pub real: Vec<ArticleRecord>,
}

impl Corpus {
    pub fn new(fake: Vec<ArticleRecord>, real: Vec<ArticleRecord>) -> Self {
        Corpus { fake, real }
    }

    pub fn total_articles(&self) -> usize {
        self.fake.len() + self.real.len()
    }
}

/// File names of a class directory, sorted so that seeded sampling is reproducible.
fn list_article_names(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Cannot list articles in {}", dir.display()))?
        .map(|res| res.map(|e| e.path()))
        .collect::<Result<Vec<_>, io::Error>>()?;
    let mut names: Vec<String> = entries
        .into_iter()
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .collect();
    names.sort();
    Ok(names)
}

fn load_class<R: Rng + ?Sized>(
    ctx: &mut IndexingContext,
    root_dir: &Path,
    class: ArticleClass,
    number: usize,
    rng: &mut R,
) -> Result<Vec<ArticleRecord>> {
    let content_dir = root_dir.join(class.content_dir());
    let titles_dir = root_dir.join(class.titles_dir());
    let names = list_article_names(&content_dir)?;
    if number > names.len() {
        bail!(
            "Cannot sample {number} articles from {}: only {} available",
            content_dir.display(),
            names.len()
        );
    }

    let sampled: Vec<&String> = names.choose_multiple(rng, number).collect();
    let mut articles = Vec::with_capacity(number);
    for name in sampled {
        let title_path = titles_dir.join(name);
        if !title_path.is_file() {
            bail!(
                "Missing title file {} for article {name}",
                title_path.display()
            );
        }
        let content = ctx.ingest_file(&content_dir.join(name))?;
        let title = ctx.ingest_file(&title_path)?;
        debug!(?class, %name, tokens = content.len(), "loaded article");
        articles.push(ArticleRecord {
            name: name.clone(),
            content,
            title,
        });
    }
    Ok(articles)
}

/// Samples `number_fake` and `number_real` articles under `root_dir` and ingests
/// their contents and titles into `ctx`.
pub fn load_corpus<R: Rng + ?Sized>(
    ctx: &mut IndexingContext,
    root_dir: &Path,
    number_fake: usize,
    number_real: usize,
    rng: &mut R,
) -> Result<Corpus> {
    let fake = load_class(ctx, root_dir, ArticleClass::Fake, number_fake, rng)?;
    let real = load_class(ctx, root_dir, ArticleClass::Real, number_real, rng)?;
    info!(
        fake = fake.len(),
        real = real.len(),
        vocabulary = ctx.vocabulary_len(),
        "corpus loaded"
    );
    Ok(Corpus::new(fake, real))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn write(root: &Path, dir: &str, name: &str, text: &str) {
        let dir = root.join(dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), text).unwrap();
    }

    fn sample_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let name = format!("{i}.txt");
            write(root.path(), "Fake", &name, &format!("fake body {i}"));
            write(root.path(), "Fake_titles", &name, "fake title");
            write(root.path(), "Real", &name, &format!("real body {i}"));
            write(root.path(), "Real_titles", &name, "real title");
        }
        root
    }

    #[test]
    fn test_load_corpus_samples_requested_counts() {
        let root = sample_root();
        let mut ctx = IndexingContext::new().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let corpus = load_corpus(&mut ctx, root.path(), 2, 3, &mut rng).unwrap();
        assert_eq!(corpus.fake.len(), 2);
        assert_eq!(corpus.real.len(), 3);
        assert_eq!(corpus.total_articles(), 5);

        let names: HashSet<_> = corpus.fake.iter().map(|a| a.name.clone()).collect();
        assert_eq!(names.len(), 2, "sampling is without replacement");
        assert_eq!(corpus.real[0].title, vec!["real", "titl"]);
    }

    #[test]
    fn test_titles_are_indexed() {
        let root = sample_root();
        let mut ctx = IndexingContext::new().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        load_corpus(&mut ctx, root.path(), 1, 1, &mut rng).unwrap();
        assert_eq!(ctx.count("titl"), 2);
        assert_eq!(ctx.document_frequency("titl"), 2);
        assert_eq!(ctx.count("bodi"), 2);
    }

    #[test]
    fn test_same_seed_same_sample() {
        let root = sample_root();
        let names = |seed| {
            let mut ctx = IndexingContext::new().unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            let corpus = load_corpus(&mut ctx, root.path(), 2, 2, &mut rng).unwrap();
            corpus
                .fake
                .iter()
                .chain(corpus.real.iter())
                .map(|a| a.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(11), names(11));
    }

    #[test]
    fn test_missing_title_fails() {
        let root = sample_root();
        write(root.path(), "Real", "orphan.txt", "no title here");
        let mut ctx = IndexingContext::new().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let err = load_corpus(&mut ctx, root.path(), 0, 4, &mut rng).unwrap_err();
        assert!(err.to_string().contains("Missing title file"));
    }

    #[test]
    fn test_oversampling_fails() {
        let root = sample_root();
        let mut ctx = IndexingContext::new().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(load_corpus(&mut ctx, root.path(), 4, 0, &mut rng).is_err());
    }

    #[test]
    fn test_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = IndexingContext::new().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(load_corpus(&mut ctx, root.path(), 0, 0, &mut rng).is_err());
    }
}
