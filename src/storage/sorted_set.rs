use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Score with a total order so it can key a BTreeSet.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Members ordered by `(score, member)`, unique by member.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    ordered: BTreeSet<(Score, String)>,
    scores: HashMap<String, f64>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update. Returns true when the member is new.
    pub fn add(&mut self, member: &str, score: f64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_string()));
                self.ordered.insert((Score(score), member.to_string()));
                false
            }
            None => {
                self.ordered.insert((Score(score), member.to_string()));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// 0-based position in `(score, member)` order.
    pub fn rank(&self, member: &str) -> Option<usize> {
        let score = self.score(member)?;
        Some(self.ordered.range(..(Score(score), member.to_string())).count())
    }

    /// Members between two resolved, inclusive positions.
    pub fn range(&self, start: usize, end: usize) -> Vec<String> {
        if start > end {
            return Vec::new();
        }
        self.ordered
            .iter()
            .skip(start)
            .take(end - start + 1)
            .map(|(_, member)| member.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
