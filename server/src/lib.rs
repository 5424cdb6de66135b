//! Context Engine: local content indexing and hybrid retrieval for AI
//! assistants.
//!
//! The engine walks a project tree, routes files through content-aware
//! parsers into bounded chunks, and maintains two complementary indices per
//! project: a dense embedding matrix and a BM25 sparse index. Queries fuse
//! both scores and return ranked fragments with file and line provenance.
//! The whole thing is exposed to clients through an MCP stdio server.

pub mod config;
pub mod encoder;
pub mod error;
pub mod ignore_rules;
pub mod indexer;
pub mod manager;
pub mod mcp;
pub mod parsers;
pub mod sparse;
pub mod storage;
pub mod types;
pub mod walker;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic encoder for unit tests: bag-of-words hashing keeps
    //! cosine similarity correlated with token overlap, with no model
    //! download.

    use crate::encoder::{l2_normalize, TextEncoder};
    use crate::error::Result;
    use crate::sparse::tokenize;
    use std::hash::{DefaultHasher, Hash, Hasher};

    pub struct HashEncoder {
        name: String,
        dim: usize,
    }

    impl Default for HashEncoder {
        fn default() -> Self {
            Self::named("test-encoder")
        }
    }

    impl HashEncoder {
        pub fn named(name: &str) -> Self {
            Self { name: name.to_string(), dim: 32 }
        }
    }

    impl TextEncoder for HashEncoder {
        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut row = vec![0.0f32; self.dim];
                    for token in tokenize(text) {
                        let mut hasher = DefaultHasher::new();
                        token.hash(&mut hasher);
                        row[(hasher.finish() as usize) % self.dim] += 1.0;
                    }
                    l2_normalize(&mut row);
                    row
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn identifier(&self) -> &str {
            &self.name
        }
    }
}
