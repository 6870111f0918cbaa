//! Deterministic fixed-size text splitting with overlap.
//!
//! Articles are cut into windows of at most `chunk_size` characters, each
//! window sharing `overlap` characters with its predecessor so that a
//! sentence straddling a boundary is still searchable from either side.
//! Splitting is a pure function of the input text.

use crate::types::SalmonError;

/// Character-window splitter with a soft preference for whitespace breaks.
#[derive(Clone, Debug)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    pub const DEFAULT_CHUNK_SIZE: usize = 2048;
    pub const DEFAULT_OVERLAP: usize = 128;

    /// Creates a splitter; `overlap` must be strictly smaller than
    /// `chunk_size` and `chunk_size` must be positive.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, SalmonError> {
        if chunk_size == 0 {
            return Err(SalmonError::InvalidInput(
                "chunk size must be positive".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(SalmonError::InvalidInput(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splits `text` into ordered overlapping chunks.
    ///
    /// Window ends snap back to the last whitespace inside the window when
    /// one exists past the minimum stride, so words are not cut mid-way
    /// unless a single word exceeds the window.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total <= self.chunk_size {
            return vec![text.to_string()];
        }

        let stride = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.soft_break(&chars, start + stride, hard_end)
            };

            chunks.push(chars[start..end].iter().collect::<String>());
            if end == total {
                break;
            }

            let next = end.saturating_sub(self.overlap);
            // A pathological overlap/size ratio must still make progress.
            start = if next > start { next } else { start + stride };
        }

        chunks
    }

    /// Last whitespace position in `chars[min_end..hard_end]`, or `hard_end`
    /// when the window contains none.
    fn soft_break(&self, chars: &[char], min_end: usize, hard_end: usize) -> usize {
        chars[min_end..hard_end]
            .iter()
            .rposition(|c| c.is_whitespace())
            .map(|offset| min_end + offset)
            .unwrap_or(hard_end)
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            overlap: Self::DEFAULT_OVERLAP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(TextSplitter::new(128, 128).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(128, 32).is_ok());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = TextSplitter::new(100, 10).unwrap();
        let chunks = splitter.split("just a short note");
        assert_eq!(chunks, vec!["just a short note".to_string()]);
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        let splitter = TextSplitter::default();
        assert!(splitter.split("   \n\t ").is_empty());
    }

    #[test]
    fn chunks_respect_max_size_and_overlap() {
        let splitter = TextSplitter::new(50, 10).unwrap();
        let words: Vec<String> = (0..120).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");

        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1, "long text should split");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "oversized chunk: {chunk:?}");
        }
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(10).collect::<Vec<_>>().iter().rev().collect();
            assert!(
                pair[1].starts_with(&tail),
                "adjacent chunks must share the overlap region"
            );
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let splitter = TextSplitter::new(64, 16).unwrap();
        let text = "lorem ipsum dolor sit amet ".repeat(40);
        assert_eq!(splitter.split(&text), splitter.split(&text));
    }

    #[test]
    fn unbreakable_run_is_cut_hard() {
        let splitter = TextSplitter::new(32, 8).unwrap();
        let text = "x".repeat(100);
        let chunks = splitter.split(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 32));
        assert!(chunks.len() >= 3);
    }
}
