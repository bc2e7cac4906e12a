// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Fuzzy lookup of tags by free-text keywords.
//!
//! Similarity is the Ratcliff-Obershelp "gestalt" ratio: the longest common contiguous
//! block is found, the search recurses on both sides of it, and the score is
//! `2 * matched / (len(a) + len(b))`. Only the tags sharing the single best score are
//! returned, so a search for a misspelled label yields the closest label (and anything
//! tied with it) rather than a ranked list.

use crate::tags::{TagDictionary, TagMap};
use std::collections::HashMap;

/// Scores must be strictly greater than this to count as a match.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Sequences at least this long have their most common elements ignored when
/// looking for matching blocks.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Split a keyword string on ASCII or full-width commas, trimming each keyword.
pub fn split_keywords(keywords: &str) -> Vec<&str> {
    if keywords.trim().is_empty() {
        return Vec::new();
    }

    keywords.split([',', '，']).map(str::trim).collect()
}

/// Similarity of two strings in `[0, 1]`, computed over Unicode scalar values.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let matches = SequenceMatcher::new(&a, &b).matching_chars();
    2.0 * matches as f64 / total as f64
}

/// Tags from `tags` whose best score against any keyword, on either the key or the
/// display name, exceeds `threshold` and equals the highest score seen.
pub fn best_matches(keywords: &str, tags: &TagMap, threshold: f64) -> TagMap {
    let keywords = split_keywords(keywords);
    if keywords.is_empty() {
        return TagMap::new();
    }

    let mut scored: Vec<(&String, &String, f64)> = tags
        .iter()
        .filter_map(|(key, display)| {
            let score = keywords
                .iter()
                .map(|kw| ratio(kw, key).max(ratio(kw, display)))
                .fold(0.0, f64::max);

            if score > threshold {
                Some((key, display, score))
            } else {
                None
            }
        })
        .collect();

    scored.sort_by(|x, y| y.2.total_cmp(&x.2));

    let top = match scored.first() {
        Some((_, _, score)) => *score,
        None => return TagMap::new(),
    };

    scored
        .into_iter()
        .take_while(|(_, _, score)| *score == top)
        .map(|(key, display, _)| (key.clone(), display.clone()))
        .collect()
}

/// Run `best_matches` against every tag in the dictionary.
pub fn search(dictionary: &TagDictionary, keywords: &str, threshold: f64) -> TagMap {
    let tags = dictionary.all();
    let res = best_matches(keywords, &tags, threshold);
    tracing::debug!(message = "searched tag dictionary", keywords = %keywords, num_tags = tags.len(), num_matches = res.len());
    res
}

/// Matching-block search between two character sequences.
///
/// There is no junk predicate. The only elements excluded from `b`'s index are
/// "popular" ones, present in more than 1% of a sequence of 200 or more elements.
struct SequenceMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    b2j: HashMap<char, Vec<usize>>,
}

impl<'a> SequenceMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in b.iter().enumerate() {
            b2j.entry(*c).or_default().push(j);
        }

        if b.len() >= AUTOJUNK_MIN_LEN {
            let limit = b.len() / 100 + 1;
            b2j.retain(|_, positions| positions.len() <= limit);
        }

        SequenceMatcher { a, b, b2j }
    }

    /// Total number of elements in all matching blocks.
    fn matching_chars(&self) -> usize {
        let mut total = 0;
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.longest_match(alo, ahi, blo, bhi);
            if k == 0 {
                continue;
            }

            total += k;
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }

        total
    }

    /// Longest block `a[i..i+k] == b[j..j+k]` within the given bounds, earliest in `a`
    /// (then earliest in `b`) among blocks of equal length.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
        let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0);
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b2j.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }

                    let k = j.checked_sub(1).and_then(|p| j2len.get(&p)).copied().unwrap_or(0) + 1;
                    next.insert(j, k);
                    if k > bestsize {
                        besti = i + 1 - k;
                        bestj = j + 1 - k;
                        bestsize = k;
                    }
                }
            }
            j2len = next;
        }

        // Popular elements never appear in the index, so grow the block over
        // any equal neighbors that were skipped because of that.
        while besti > alo && bestj > blo && self.a[besti - 1] == self.b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            bestsize += 1;
        }
        while besti + bestsize < ahi && bestj + bestsize < bhi && self.a[besti + bestsize] == self.b[bestj + bestsize] {
            bestsize += 1;
        }

        (besti, bestj, bestsize)
    }
}
