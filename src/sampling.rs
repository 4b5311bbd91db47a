use rand::prelude::*;
use std::collections::HashSet;

use crate::manifest::ManifestLine;

/// Segment de-duplication for random sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDedup {
    pub delimiter: char,
}

impl SegmentDedup {
    /// `spk1-rec7-0003` -> `spk1-rec7` with the default `-` delimiter.
    pub fn segment_name<'a>(&self, key: &'a str) -> &'a str {
        key.rfind(self.delimiter).map_or(key, |pos| &key[..pos])
    }
}

/// Selection applied to the lines that survived key filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplingStrategy {
    All,
    Random {
        sample_size: usize,
        seed: u64,
        dedup: Option<SegmentDedup>,
    },
}

impl SamplingStrategy {
    /// Whether lines can be written as soon as they are matched.
    pub fn is_streaming(&self) -> bool {
        matches!(self, SamplingStrategy::All)
    }

    /// Returns the selected lines in their original order.
    pub fn select(&self, lines: Vec<ManifestLine>) -> Vec<ManifestLine> {
        let (sample_size, seed, dedup) = match self {
            SamplingStrategy::All => return lines,
            SamplingStrategy::Random {
                sample_size,
                seed,
                dedup,
            } => (*sample_size, *seed, *dedup),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..lines.len()).collect();
        order.shuffle(&mut rng);

        let mut seen_segments = HashSet::new();
        let mut keep = vec![false; lines.len()];
        let mut kept = 0;
        for i in order {
            if kept >= sample_size {
                break;
            }
            if let Some(dedup) = dedup {
                if !seen_segments.insert(dedup.segment_name(&lines[i].key)) {
                    continue;
                }
            }
            keep[i] = true;
            kept += 1;
        }

        lines
            .into_iter()
            .zip(keep)
            .filter(|(_, keep)| *keep)
            .map(|(line, _)| line)
            .collect()
    }
}
