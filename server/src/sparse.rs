//! BM25 sparse scoring over the tokenized chunk corpus.
//!
//! Okapi BM25 with the parameters of the reference scorer (k1 = 1.5,
//! b = 0.75, epsilon = 0.25). Negative IDF values for very common terms are
//! floored to epsilon times the average IDF so scores stay non-negative.
//! Corpus and query share one tokenizer: lower-cased Unicode word runs.

use crate::types::SparsePayload;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const K1: f32 = 1.5;
const B: f32 = 0.75;
const EPSILON: f32 = 0.25;

static WORD_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static pattern"));

/// Lower-cased Unicode word runs, shared by corpus building and queries.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD_RUNS.find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

pub struct SparseScorer {
    /// Per-document term frequencies, in corpus order.
    doc_freqs: Vec<HashMap<String, u32>>,
    idf: HashMap<String, f32>,
    doc_len: Vec<f32>,
    avgdl: f32,
}

impl SparseScorer {
    pub fn new(corpus: &[Vec<String>]) -> Self {
        let doc_len: Vec<f32> = corpus.iter().map(|doc| doc.len() as f32).collect();
        let total_tokens: f32 = doc_len.iter().sum();
        let avgdl = if corpus.is_empty() { 0.0 } else { total_tokens / corpus.len() as f32 };

        let mut doc_freqs: Vec<HashMap<String, u32>> = Vec::with_capacity(corpus.len());
        let mut df: HashMap<String, u32> = HashMap::new();
        for doc in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_freqs.push(freqs);
        }

        let n = corpus.len() as f32;
        let mut idf: HashMap<String, f32> = HashMap::with_capacity(df.len());
        let mut idf_sum = 0.0f32;
        let mut negative: Vec<String> = Vec::new();
        for (term, term_df) in &df {
            let value = ((n - *term_df as f32 + 0.5) / (*term_df as f32 + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        // Floor negative IDFs (terms in most documents) to a small positive value
        if !idf.is_empty() {
            let floor = EPSILON * (idf_sum / idf.len() as f32).abs();
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self { doc_freqs, idf, doc_len, avgdl }
    }

    pub fn from_payload(payload: &SparsePayload) -> Self {
        Self::new(&payload.tokenized_corpus)
    }

    pub fn doc_count(&self) -> usize {
        self.doc_freqs.len()
    }

    /// Per-chunk BM25 scores for the query, in corpus order.
    /// Empty corpus yields an empty vector; an all-empty corpus yields zeros.
    pub fn score(&self, query_tokens: &[String]) -> Vec<f32> {
        let n = self.doc_freqs.len();
        if n == 0 {
            return Vec::new();
        }
        if self.avgdl <= 0.0 {
            return vec![0.0; n];
        }

        let mut scores = vec![0.0f32; n];
        for token in query_tokens {
            let Some(&idf) = self.idf.get(token) else { continue };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = *freqs.get(token).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let denom = tf + K1 * (1.0 - B + B * self.doc_len[i] / self.avgdl);
                scores[i] += idf * (tf * (K1 + 1.0)) / denom;
            }
        }
        scores
    }
}
