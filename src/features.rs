//! Feature pipeline: text normalization, TF-IDF vectorization, scaling and
//! synthetic labels.
//!
//! ```text
//! raw text ─▶ normalize ─▶ vectorize (1-2 grams, tf-idf, l2) ─▶ scale ─▶ + labels
//! ```
//!
//! The vectorizer and the scaler are stateful: a `fit = true` call learns the
//! vocabulary / column scales, a `fit = false` call reuses them. Calling with
//! `fit = false` before anything was learned is an error.
//!
//! # Synthetic labels
//!
//! Text corpora acquired from archives, pages or crawls carry no ground truth.
//! [`synthesize_labels`] produces a shuffled 0/1 vector with a fixed share of
//! ones so that the trainer has *something* to fit. These labels carry no
//! signal whatsoever; models trained on them are demos, not classifiers.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::errors::PipelineError;
use crate::matrix::{CsrMatrix, LabeledDataset};
use crate::stopwords::is_stop_word;

struct Patterns {
    url: Regex,
    tag: Regex,
    non_word: Regex,
    digits: Regex,
    spaces: Regex,
    token: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        url: Regex::new(r"https?://\S+|www\.\S+").expect("url pattern is valid"),
        tag: Regex::new(r"<.*?>").expect("tag pattern is valid"),
        non_word: Regex::new(r"[^\w\s]").expect("non-word pattern is valid"),
        digits: Regex::new(r"\d+").expect("digit pattern is valid"),
        spaces: Regex::new(r"\s+").expect("space pattern is valid"),
        token: Regex::new(r"\b\w\w+\b").expect("token pattern is valid"),
    })
}

/// Lowercase, drop URLs, markup, punctuation and digits, and collapse
/// whitespace. Idempotent.
pub fn normalize(text: &str) -> String {
    let p = patterns();
    let text = text.to_lowercase();
    let text = p.url.replace_all(&text, "");
    let text = p.tag.replace_all(&text, "");
    let text = p.non_word.replace_all(&text, "");
    let text = p.digits.replace_all(&text, "");
    let text = p.spaces.replace_all(&text, " ");
    text.trim().to_string()
}

/// Unigrams and bigrams of the non-stop-word tokens of `text`.
fn ngrams(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = patterns()
        .token
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|t| !is_stop_word(t))
        .collect();

    let mut grams: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    grams.extend(tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])));
    grams
}

#[derive(Debug, Clone)]
struct Vocabulary {
    /// Term to column index; columns are in alphabetical term order.
    terms: HashMap<String, usize>,
    idf: Vec<f64>,
}

/// TF-IDF vectorizer limited to the `max_features` most frequent terms.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    max_features: usize,
    vocabulary: Option<Vocabulary>,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vocabulary: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.vocabulary.is_some()
    }

    /// Learned terms in column order.
    pub fn feature_names(&self) -> Vec<String> {
        let Some(vocab) = &self.vocabulary else {
            return Vec::new();
        };
        let mut names = vec![String::new(); vocab.terms.len()];
        for (term, &col) in &vocab.terms {
            names[col] = term.clone();
        }
        names
    }

    pub fn vectorize(&mut self, texts: &[String], fit: bool) -> Result<CsrMatrix, PipelineError> {
        let counted: Vec<HashMap<String, usize>> = texts
            .iter()
            .map(|text| {
                let mut counts = HashMap::new();
                for gram in ngrams(text) {
                    *counts.entry(gram).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        if fit {
            tracing::info!("Fitting vectorizer on {} texts", texts.len());
            self.vocabulary = Some(self.learn(&counted)?);
        } else {
            tracing::info!("Transforming {} texts with pre-fitted vectorizer", texts.len());
        }
        let vocab = self
            .vocabulary
            .as_ref()
            .ok_or(PipelineError::NotFitted("vectorizer"))?;

        let mut matrix = CsrMatrix::new(vocab.idf.len());
        for counts in &counted {
            matrix.push_row(counts.iter().filter_map(|(term, &tf)| {
                vocab
                    .terms
                    .get(term)
                    .map(|&col| (col, tf as f64 * vocab.idf[col]))
            }));
        }
        matrix.normalize_rows_l2();

        tracing::info!(
            rows = matrix.n_rows(),
            cols = matrix.n_cols(),
            "Vectorized texts"
        );
        Ok(matrix)
    }

    fn learn(&self, counted: &[HashMap<String, usize>]) -> Result<Vocabulary, PipelineError> {
        let mut totals: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for counts in counted {
            for (term, &tf) in counts {
                let entry = totals.entry(term.as_str()).or_insert((0, 0));
                entry.0 += tf;
                entry.1 += 1;
            }
        }
        if totals.is_empty() {
            return Err(PipelineError::EmptyVocabulary);
        }

        // Most frequent first, ties alphabetical.
        let mut ranked: Vec<(&str, usize, usize)> =
            totals.into_iter().map(|(t, (tf, df))| (t, tf, df)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features);
        ranked.sort_by(|a, b| a.0.cmp(b.0));

        let n = counted.len() as f64;
        let mut terms = HashMap::with_capacity(ranked.len());
        let mut idf = Vec::with_capacity(ranked.len());
        for (col, (term, _, df)) in ranked.into_iter().enumerate() {
            terms.insert(term.to_string(), col);
            idf.push(((1.0 + n) / (1.0 + df as f64)).ln() + 1.0);
        }
        Ok(Vocabulary { terms, idf })
    }
}

/// Divides every column by its standard deviation. No centering, so sparse
/// input stays sparse.
#[derive(Debug, Clone, Default)]
pub struct FeatureScaler {
    scale: Option<Vec<f64>>,
}

impl FeatureScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scale(&mut self, mut matrix: CsrMatrix, fit: bool) -> Result<CsrMatrix, PipelineError> {
        if fit {
            self.scale = Some(column_scales(&matrix));
        }
        let scale = self
            .scale
            .as_ref()
            .ok_or(PipelineError::NotFitted("scaler"))?;

        let inverse: Vec<f64> = scale.iter().map(|s| 1.0 / s).collect();
        matrix.scale_columns(&inverse)?;
        Ok(matrix)
    }
}

/// Population standard deviation per column, implicit zeros included.
/// Constant columns get a scale of 1.
fn column_scales(matrix: &CsrMatrix) -> Vec<f64> {
    let n = matrix.n_rows() as f64;
    let mut sum = vec![0.0; matrix.n_cols()];
    let mut sum_sq = vec![0.0; matrix.n_cols()];
    for i in 0..matrix.n_rows() {
        let (indices, values) = matrix.row(i);
        for (&j, &v) in indices.iter().zip(values) {
            sum[j] += v;
            sum_sq[j] += v * v;
        }
    }

    sum.iter()
        .zip(&sum_sq)
        .map(|(&s, &sq)| {
            if n == 0.0 {
                return 1.0;
            }
            let mean = s / n;
            let var = (sq / n - mean * mean).max(0.0);
            let std = var.sqrt();
            if std > f64::EPSILON {
                std
            } else {
                1.0
            }
        })
        .collect()
}

/// `floor(n * ratio)` ones and the rest zeros, shuffled.
///
/// Placeholder targets for unlabeled corpora. They encode no signal.
pub fn synthesize_labels<R: Rng + ?Sized>(n: usize, ratio: f64, rng: &mut R) -> Vec<f64> {
    let ratio = ratio.clamp(0.0, 1.0);
    let positives = ((n as f64) * ratio).floor() as usize;
    let mut labels = vec![0.0; n];
    for label in labels.iter_mut().take(positives.min(n)) {
        *label = 1.0;
    }
    labels.shuffle(rng);
    labels
}

/// Vectorizer and scaler with their learned state.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    vectorizer: TfidfVectorizer,
    scaler: FeatureScaler,
}

impl FeaturePipeline {
    pub fn new(max_features: usize) -> Self {
        Self {
            vectorizer: TfidfVectorizer::new(max_features),
            scaler: FeatureScaler::new(),
        }
    }

    pub fn vectorizer(&self) -> &TfidfVectorizer {
        &self.vectorizer
    }

    pub fn vectorize(&mut self, texts: &[String], fit: bool) -> Result<CsrMatrix, PipelineError> {
        self.vectorizer.vectorize(texts, fit)
    }

    pub fn scale(&mut self, matrix: CsrMatrix, fit: bool) -> Result<CsrMatrix, PipelineError> {
        self.scaler.scale(matrix, fit)
    }

    /// normalize → vectorize(fit) → scale(fit) → synthetic labels.
    pub fn prepare_training_data<R: Rng + ?Sized>(
        &mut self,
        texts: &[String],
        positive_ratio: f64,
        rng: &mut R,
    ) -> Result<LabeledDataset, PipelineError> {
        let normalized: Vec<String> = texts.iter().map(|t| normalize(t)).collect();
        tracing::info!("Processed {} texts", normalized.len());

        let matrix = self.vectorize(&normalized, true)?;
        let matrix = self.scale(matrix, true)?;
        let labels = synthesize_labels(matrix.n_rows(), positive_ratio, rng);
        tracing::info!(
            positives = labels.iter().filter(|&&y| y > 0.5).count(),
            rows = labels.len(),
            "Generated synthetic labels"
        );
        LabeledDataset::new(matrix, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_strips_noise() {
        let raw = "  Visit https://example.com/x or www.test.org NOW!\n<b>Bold</b>   42 apples_2 ";
        assert_eq!(normalize(raw), "visit or now bold apples_");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Hello, World! 123",
            "<div class='x'>Tags <i>inside</i></div> www.a.b",
            "  tabs\tand\nnewlines  ",
            "Ünïcödé — dashes… and “quotes”",
            "",
            "http://only.a.url",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input: {:?}", s);
        }
    }

    #[test]
    fn vectorize_builds_unigrams_and_bigrams() {
        let mut v = TfidfVectorizer::new(100);
        let m = v
            .vectorize(&texts(&["gradient boosting trees", "boosting trees"]), true)
            .unwrap();
        assert_eq!(
            v.feature_names(),
            vec![
                "boosting",
                "boosting trees",
                "gradient",
                "gradient boosting",
                "trees"
            ]
        );
        assert_eq!(m.n_rows(), 2);
        // Row 2 has no "gradient" terms.
        assert_eq!(m.get(1, 2), 0.0);
        assert_eq!(m.get(1, 3), 0.0);
        for i in 0..m.n_rows() {
            let norm: f64 = m.row(i).1.iter().map(|x| x * x).sum();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn stop_words_are_dropped_before_bigrams() {
        let mut v = TfidfVectorizer::new(100);
        v.vectorize(&texts(&["rust and the compiler"]), true).unwrap();
        assert_eq!(v.feature_names(), vec!["compiler", "rust", "rust compiler"]);
    }

    #[test]
    fn max_features_keeps_most_frequent() {
        let mut v = TfidfVectorizer::new(2);
        let m = v
            .vectorize(&texts(&["apple apple apple pear", "apple kiwi kiwi kiwi"]), true)
            .unwrap();
        assert_eq!(v.feature_names(), vec!["apple", "kiwi"]);
        assert_eq!(m.n_cols(), 2);
    }

    #[test]
    fn transform_reuses_vocabulary() {
        let mut v = TfidfVectorizer::new(100);
        v.vectorize(&texts(&["alpha beta"]), true).unwrap();
        let m = v.vectorize(&texts(&["gamma alpha"]), false).unwrap();
        assert_eq!(m.n_cols(), 3);
        assert!(m.get(0, 0) > 0.0);
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn transform_before_fit_fails() {
        let mut v = TfidfVectorizer::new(10);
        assert_eq!(
            v.vectorize(&texts(&["anything"]), false).unwrap_err(),
            PipelineError::NotFitted("vectorizer")
        );
    }

    #[test]
    fn fitting_only_stop_words_fails() {
        let mut v = TfidfVectorizer::new(10);
        assert_eq!(
            v.vectorize(&texts(&["the and of", ""]), true).unwrap_err(),
            PipelineError::EmptyVocabulary
        );
    }

    #[test]
    fn scaler_divides_by_std() {
        let m = CsrMatrix::from_dense(&[vec![2.0, 5.0], vec![0.0, 5.0]]).unwrap();
        let mut scaler = FeatureScaler::new();
        let scaled = scaler.scale(m, true).unwrap();
        // Column 0: std 1; column 1 is constant and left alone.
        assert!((scaled.get(0, 0) - 2.0).abs() < 1e-12);
        assert_eq!(scaled.get(1, 0), 0.0);
        assert!((scaled.get(0, 1) - 5.0).abs() < 1e-12);

        let other = CsrMatrix::from_dense(&[vec![4.0, 0.0]]).unwrap();
        let reused = scaler.scale(other, false).unwrap();
        assert!((reused.get(0, 0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn scaler_requires_fit_and_matching_width() {
        let mut scaler = FeatureScaler::new();
        let m = CsrMatrix::from_dense(&[vec![1.0]]).unwrap();
        assert_eq!(
            scaler.scale(m.clone(), false).unwrap_err(),
            PipelineError::NotFitted("scaler")
        );
        scaler.scale(m, true).unwrap();
        let wide = CsrMatrix::from_dense(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            scaler.scale(wide, false),
            Err(PipelineError::ColumnMismatch { .. })
        ));
    }

    #[test]
    fn label_counts_are_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [0usize, 1, 2, 3, 10, 37, 100] {
            for ratio in [0.0, 0.1, 0.25, 0.5, 0.33, 0.99, 1.0] {
                let labels = synthesize_labels(n, ratio, &mut rng);
                let ones = labels.iter().filter(|&&y| y == 1.0).count();
                let zeros = labels.iter().filter(|&&y| y == 0.0).count();
                let expected = ((n as f64) * ratio).floor() as usize;
                assert_eq!(ones, expected, "n={} ratio={}", n, ratio);
                assert_eq!(zeros, n - expected);
            }
        }
    }

    #[test]
    fn prepare_training_data_pairs_rows_and_labels() {
        let mut pipeline = FeaturePipeline::new(50);
        let mut rng = StdRng::seed_from_u64(1);
        let docs = texts(&[
            "<h1>Rust</h1> ownership and borrowing",
            "Gradient boosted trees, see https://example.com",
            "Crawling pages for training text",
            "Sparse matrices keep memory low",
        ]);
        let ds = pipeline.prepare_training_data(&docs, 0.5, &mut rng).unwrap();
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.positives(), 2);
        assert!(pipeline.vectorizer().is_fitted());
        assert!(!pipeline
            .vectorizer()
            .feature_names()
            .iter()
            .any(|t| t.contains("example")));
    }
}
