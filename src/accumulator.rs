//! Running answer text assembled from stream chunks

use serde::{Deserialize, Serialize};

/// Append-only concatenation of chunk contents, in delivery order.
///
/// No dedup and no reordering: correctness relies on the channel delivering
/// chunks in the order the backend produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAccumulator {
    text: String,
    chunks: usize,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the buffer, keeping its allocation
    pub fn reset(&mut self) {
        self.text.clear();
        self.chunks = 0;
    }

    /// Append one fragment and return the running text
    pub fn append(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        self.chunks += 1;
        &self.text
    }

    #[cfg(test)]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of chunk events seen, including empty ones
    #[cfg(test)]
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }
}
