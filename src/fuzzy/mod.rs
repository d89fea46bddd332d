//! Approximate key search.
//!
//! Enumerates every stored key within a bounded edit distance of a query
//! word. The walk keeps one Levenshtein row per trie depth and prunes a
//! subtree as soon as no completion can stay within budget.
//!
//! The walk never materializes child lists. Candidate bytes below a prefix
//! come from repeated at-or-after probes, so the cost follows the trie's real
//! branching factor. With transposition enabled the distance is the optimal
//! string alignment variant of Damerau-Levenshtein.
//!
//! # Example
//!
//! ```
//! use judy_rs::Judy;
//!
//! let mut trie = Judy::open(64).unwrap();
//! for word in ["goober", "gober", "goner"] {
//!     *trie.insert(word.as_bytes()).unwrap() = 1;
//! }
//! let matches = trie.fuzzy_matches(b"goober", 1, true);
//! assert_eq!(matches, vec![(b"gober".to_vec(), 1), (b"goober".to_vec(), 0)]);
//! ```

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::judy::Judy;

/// One DP row: column `c` is the distance between the current prefix and
/// the first `c` bytes of the word.
type Row = SmallVec<[u32; 32]>;

/// Cooperative cancellation flag, checked between recursive steps.
///
/// Clones share the flag, so one clone can be handed to another thread and
/// cancelled from there.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Search parameters.
#[derive(Debug, Clone, Default)]
pub struct FuzzyOptions {
    /// Largest edit distance reported.
    pub max_cost: u32,
    /// Count an adjacent swap as one edit.
    pub transposition: bool,
    pub cancel: Option<CancelToken>,
}

impl FuzzyOptions {
    pub fn new(max_cost: u32) -> Self {
        Self {
            max_cost,
            ..Self::default()
        }
    }

    pub fn with_transposition(mut self, transposition: bool) -> Self {
        self.transposition = transposition;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Every candidate within budget was reported.
    Completed,
    /// The sink returned `ControlFlow::Break`.
    Stopped,
    /// The cancel token fired.
    Cancelled,
}

enum Halt {
    Stopped,
    Cancelled,
}

struct Walk<'a, F> {
    judy: &'a mut Judy,
    word: &'a [u8],
    options: &'a FuzzyOptions,
    sink: F,
    /// Key bytes of the node being visited.
    prefix: Vec<u8>,
    visited: usize,
    emitted: usize,
}

impl<F> Walk<'_, F>
where
    F: FnMut(&[u8], u32) -> ControlFlow<()>,
{
    fn check_cancel(&self) -> Result<(), Halt> {
        match &self.options.cancel {
            Some(token) if token.is_cancelled() => Err(Halt::Cancelled),
            _ => Ok(()),
        }
    }

    /// Whether the prefix itself is a stored key.
    fn prefix_is_key(&mut self) -> bool {
        self.judy.lookup_exact(&self.prefix).is_some()
    }

    fn report(&mut self, row: &Row) -> Result<(), Halt> {
        let distance = row[self.word.len()];
        if distance > self.options.max_cost || !self.prefix_is_key() {
            return Ok(());
        }
        self.emitted += 1;
        match (self.sink)(&self.prefix, distance) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(Halt::Stopped),
        }
    }

    /// Visit every child of the current prefix in byte order.
    fn children(&mut self, parent: &Row, grand: Option<&Row>) -> Result<(), Halt> {
        let mut from = 1u8;
        while let Some(byte) = self.judy.next_branch(&self.prefix, from) {
            self.visit(byte, parent, grand)?;
            match byte.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
        }
        Ok(())
    }

    fn visit(&mut self, byte: u8, parent: &Row, grand: Option<&Row>) -> Result<(), Halt> {
        self.check_cancel()?;
        self.visited += 1;
        self.prefix.push(byte);

        let row = self.row(byte, parent, grand);
        let mut result = self.report(&row);
        let best = row.iter().copied().min().unwrap_or(u32::MAX);
        if result.is_ok() && best <= self.options.max_cost {
            result = self.children(&row, Some(parent));
        }

        self.prefix.pop();
        result
    }

    /// Row for `byte` appended to the prefix. `grand` is the row two levels
    /// up and is only present once the prefix holds two bytes.
    fn row(&self, byte: u8, parent: &Row, grand: Option<&Row>) -> Row {
        let word = self.word;
        let swap = grand.filter(|_| self.options.transposition);
        let prev = self.prefix.len().checked_sub(2).map(|i| self.prefix[i]);

        let mut row = Row::with_capacity(word.len() + 1);
        row.push(parent[0] + 1);
        for c in 1..=word.len() {
            let cost = u32::from(word[c - 1] != byte);
            let mut best = (row[c - 1] + 1)
                .min(parent[c] + 1)
                .min(parent[c - 1] + cost);
            if let (Some(grand), Some(prev)) = (swap, prev) {
                if c >= 2 && word[c - 2] == byte && word[c - 1] == prev {
                    best = best.min(grand[c - 2] + cost);
                }
            }
            row.push(best);
        }
        row
    }

    fn run(&mut self) -> Result<(), Halt> {
        self.check_cancel()?;
        let initial: Row = (0..=self.word.len() as u32).collect();
        self.report(&initial)?;
        self.children(&initial, None)
    }
}

impl Judy {
    /// Report every stored key within `max_cost` edits of `word` to `sink`.
    ///
    /// Keys arrive in ascending order with their distance. Returning
    /// `ControlFlow::Break(())` from the sink ends the search early. The
    /// shared cursor is moved by the search's probes.
    pub fn fuzzy_search<F>(
        &mut self,
        word: &[u8],
        max_cost: u32,
        transposition: bool,
        sink: F,
    ) -> SearchOutcome
    where
        F: FnMut(&[u8], u32) -> ControlFlow<()>,
    {
        let options = FuzzyOptions::new(max_cost).with_transposition(transposition);
        self.fuzzy_search_with(word, &options, sink)
    }

    pub fn fuzzy_search_with<F>(&mut self, word: &[u8], options: &FuzzyOptions, sink: F) -> SearchOutcome
    where
        F: FnMut(&[u8], u32) -> ControlFlow<()>,
    {
        debug!(
            word_len = word.len(),
            max_cost = options.max_cost,
            transposition = options.transposition,
            "fuzzy.search.start"
        );

        let mut walk = Walk {
            judy: self,
            word,
            options,
            sink,
            prefix: Vec::with_capacity(word.len() + options.max_cost as usize + 1),
            visited: 0,
            emitted: 0,
        };
        let outcome = match walk.run() {
            Ok(()) => SearchOutcome::Completed,
            Err(Halt::Stopped) => SearchOutcome::Stopped,
            Err(Halt::Cancelled) => {
                debug!(visited = walk.visited, "fuzzy.search.cancelled");
                SearchOutcome::Cancelled
            }
        };

        debug!(
            visited = walk.visited,
            emitted = walk.emitted,
            ?outcome,
            "fuzzy.search.finish"
        );
        outcome
    }

    /// Collect every stored key within `max_cost` edits of `word`, in key
    /// order.
    pub fn fuzzy_matches(&mut self, word: &[u8], max_cost: u32, transposition: bool) -> Vec<(Vec<u8>, u32)> {
        let mut matches = Vec::new();
        self.fuzzy_search(word, max_cost, transposition, |key, distance| {
            matches.push((key.to_vec(), distance));
            ControlFlow::Continue(())
        });
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn dictionary(words: &[&str]) -> Judy {
        let mut t = Judy::open(64).unwrap();
        for (i, word) in words.iter().enumerate() {
            *t.insert(word.as_bytes()).unwrap() = i as u64 + 1;
        }
        t
    }

    /// Reference distance over the full DP matrix.
    fn distance(a: &[u8], b: &[u8], transposition: bool) -> u32 {
        let mut d = vec![vec![0u32; b.len() + 1]; a.len() + 1];
        for (i, row) in d.iter_mut().enumerate() {
            row[0] = i as u32;
        }
        for j in 0..=b.len() {
            d[0][j] = j as u32;
        }
        for i in 1..=a.len() {
            for j in 1..=b.len() {
                let cost = u32::from(a[i - 1] != b[j - 1]);
                let mut best = (d[i - 1][j] + 1)
                    .min(d[i][j - 1] + 1)
                    .min(d[i - 1][j - 1] + cost);
                if transposition && i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                    best = best.min(d[i - 2][j - 2] + cost);
                }
                d[i][j] = best;
            }
        }
        d[a.len()][b.len()]
    }

    #[test]
    fn test_goober_within_one() {
        let mut t = dictionary(&["goober", "goner", "gober"]);
        let matches = t.fuzzy_matches(b"goober", 1, true);
        assert_eq!(
            matches,
            vec![(b"gober".to_vec(), 1), (b"goober".to_vec(), 0)]
        );
        let wider = t.fuzzy_matches(b"goober", 2, true);
        assert_eq!(wider.len(), 3);
        assert!(wider.contains(&(b"goner".to_vec(), 2)));
    }

    #[test]
    fn test_transposition_toggle() {
        let mut t = dictionary(&["ba"]);
        assert_eq!(t.fuzzy_matches(b"ab", 1, true), vec![(b"ba".to_vec(), 1)]);
        assert!(t.fuzzy_matches(b"ab", 1, false).is_empty());
        assert_eq!(t.fuzzy_matches(b"ab", 2, false), vec![(b"ba".to_vec(), 2)]);

        let mut t = dictionary(&["ab"]);
        assert_eq!(t.fuzzy_matches(b"ba", 1, true), vec![(b"ab".to_vec(), 1)]);
        assert!(t.fuzzy_matches(b"ba", 1, false).is_empty());
    }

    #[test]
    fn test_keys_deeper_than_cursor_depth() {
        let mut t = Judy::open(1).unwrap();
        *t.insert(b"abcdefgh").unwrap() = 1;
        *t.insert(b"abcdefgz").unwrap() = 2;

        assert!(t.fuzzy_matches(b"abcd", 0, false).is_empty());
        assert_eq!(
            t.fuzzy_matches(b"abcdefgh", 0, false),
            vec![(b"abcdefgh".to_vec(), 0)]
        );
        assert_eq!(
            t.fuzzy_matches(b"abcdefgx", 1, false),
            vec![(b"abcdefgh".to_vec(), 1), (b"abcdefgz".to_vec(), 1)]
        );
        assert_eq!(t.child_bytes(b"abcdefg"), b"hz");
    }

    #[test]
    fn test_zero_budget_is_exact_match() {
        let mut t = dictionary(&["cat", "cart", "cot"]);
        assert_eq!(t.fuzzy_matches(b"cat", 0, false), vec![(b"cat".to_vec(), 0)]);
        assert!(t.fuzzy_matches(b"ca", 0, false).is_empty());
    }

    #[test]
    fn test_empty_key_and_empty_word() {
        let mut t = dictionary(&["", "a", "ab", "abc"]);
        assert_eq!(
            t.fuzzy_matches(b"", 1, false),
            vec![(b"".to_vec(), 0), (b"a".to_vec(), 1)]
        );
        assert_eq!(
            t.fuzzy_matches(b"b", 1, false),
            vec![(b"".to_vec(), 1), (b"a".to_vec(), 1), (b"ab".to_vec(), 1)]
        );
    }

    #[test]
    fn test_sink_can_stop_early() {
        let mut t = dictionary(&["aa", "ab", "ac", "ad"]);
        let mut seen = Vec::new();
        let outcome = t.fuzzy_search(b"a", 1, false, |key, _| {
            seen.push(key.to_vec());
            ControlFlow::Break(())
        });
        assert_eq!(outcome, SearchOutcome::Stopped);
        assert_eq!(seen, vec![b"aa".to_vec()]);
    }

    #[test]
    fn test_cancel_token() {
        let mut t = dictionary(&["aa", "ab", "ac", "ad"]);

        let token = CancelToken::new();
        token.cancel();
        let options = FuzzyOptions::new(1).with_cancel(token);
        let mut seen = 0;
        let outcome = t.fuzzy_search_with(b"a", &options, |_, _| {
            seen += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(outcome, SearchOutcome::Cancelled);
        assert_eq!(seen, 0);

        let token = CancelToken::new();
        let options = FuzzyOptions::new(1).with_cancel(token.clone());
        let mut seen = 0;
        let outcome = t.fuzzy_search_with(b"a", &options, |_, _| {
            seen += 1;
            token.cancel();
            ControlFlow::Continue(())
        });
        assert_eq!(outcome, SearchOutcome::Cancelled);
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_search_leaves_trie_intact() {
        let mut t = dictionary(&["one", "two", "three"]);
        t.fuzzy_matches(b"tow", 2, true);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(b"two"), Some(2));
        let keys: Vec<Vec<u8>> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"one".to_vec(), b"three".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut words: Vec<Vec<u8>> = (0..400)
            .map(|_| {
                let len = rng.gen_range(0..9);
                (0..len).map(|_| rng.gen_range(b'a'..=b'd')).collect()
            })
            .collect();
        words.sort();
        words.dedup();

        let mut t = Judy::open(64).unwrap();
        for word in &words {
            *t.insert(word).unwrap() = 1;
        }

        for _ in 0..100 {
            let len = rng.gen_range(0..8);
            let query: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'd')).collect();
            let max_cost = rng.gen_range(0..3);
            let transposition = rng.gen_bool(0.5);

            let expected: Vec<(Vec<u8>, u32)> = words
                .iter()
                .map(|w| (w.clone(), distance(w, &query, transposition)))
                .filter(|&(_, d)| d <= max_cost)
                .collect();
            let got = t.fuzzy_matches(&query, max_cost, transposition);
            assert_eq!(got, expected, "query {query:?} max {max_cost} swap {transposition}");
        }
    }
}
