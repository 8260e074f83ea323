//! Word-level text comparison
//!
//! Texts are whitespace-normalized, tokenized into words and aligned with
//! Myers' O(ND) shortest edit script (linear-space, middle-snake variant).
//! Common prefix and suffix are stripped first since page-text revisions
//! tend to differ in a small region.

use serde::{Deserialize, Serialize};
use viewtrace_common::text::{normalize_whitespace, word_count};

use crate::severity::{percentage, round2, Severity, SeverityPolicy};

/// Edit distance beyond which the unmatched middle is reported as one
/// removal plus one addition instead of an exact alignment.
pub const MAX_EDIT_DISTANCE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Unchanged,
    Added,
    Removed,
}

/// A run of words sharing the same diff kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub kind: SpanKind,
    pub value: String,
    pub words: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStatistics {
    pub total_words: usize,
    pub added_words: usize,
    pub removed_words: usize,
    /// `min(added, removed)`: a replacement counts once, not as two edits.
    pub changed_words: usize,
}

/// Outcome of comparing two texts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextComparison {
    pub has_changes: bool,
    pub change_score: f64,
    pub change_severity: Severity,
    pub added_text: String,
    pub removed_text: String,
    pub changes: Vec<TextSpan>,
    pub statistics: TextStatistics,
}

/// Text diff engine configuration
#[derive(Debug, Clone)]
pub struct TextDiffEngine {
    pub policy: SeverityPolicy,
    pub max_edit_distance: usize,
}

impl Default for TextDiffEngine {
    fn default() -> Self {
        Self {
            policy: SeverityPolicy::TEXT,
            max_edit_distance: MAX_EDIT_DISTANCE,
        }
    }
}

impl TextDiffEngine {
    /// Compare `before` against `after`. Added spans are words present only
    /// in `after`.
    pub fn compare(&self, before: &str, after: &str) -> TextComparison {
        let a = normalize_whitespace(before);
        let b = normalize_whitespace(after);

        if a == b {
            return TextComparison {
                has_changes: false,
                change_score: 0.0,
                change_severity: Severity::None,
                added_text: String::new(),
                removed_text: String::new(),
                changes: Vec::new(),
                statistics: TextStatistics {
                    total_words: word_count(&a),
                    ..Default::default()
                },
            };
        }

        let old: Vec<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
        let new: Vec<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
        let ops = diff_words(&old, &new, self.max_edit_distance);
        let changes = spans(&ops, &old, &new);

        let mut added_words = 0;
        let mut removed_words = 0;
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for span in &changes {
            match span.kind {
                SpanKind::Added => {
                    added_words += span.words;
                    added.push(span.value.as_str());
                }
                SpanKind::Removed => {
                    removed_words += span.words;
                    removed.push(span.value.as_str());
                }
                SpanKind::Unchanged => {}
            }
        }

        let total_words = old.len().max(new.len());
        let score = percentage((added_words + removed_words) as u64, total_words as u64);

        TextComparison {
            has_changes: added_words > 0 || removed_words > 0,
            change_score: round2(score),
            change_severity: self.policy.classify(score),
            added_text: added.join(" "),
            removed_text: removed.join(" "),
            statistics: TextStatistics {
                total_words,
                added_words,
                removed_words,
                changed_words: added_words.min(removed_words),
            },
            changes,
        }
    }
}

/// Compare two texts with the default engine.
pub fn compare_texts(before: &str, after: &str) -> TextComparison {
    TextDiffEngine::default().compare(before, after)
}

// ============================================================================
// Edit script
// ============================================================================

/// One step of an edit script over token indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Equal { old: usize, new: usize, len: usize },
    Delete { old: usize, len: usize },
    Insert { new: usize, len: usize },
}

/// Shortest edit script turning `old` into `new`.
pub fn diff_words<T: PartialEq>(old: &[T], new: &[T], max_edit_distance: usize) -> Vec<DiffOp> {
    let mut ops = Vec::new();

    let prefix = common_prefix_len(old, new);
    if prefix > 0 {
        ops.push(DiffOp::Equal {
            old: 0,
            new: 0,
            len: prefix,
        });
    }
    let suffix = common_suffix_len(&old[prefix..], &new[prefix..]);
    let old_mid = prefix..old.len() - suffix;
    let new_mid = prefix..new.len() - suffix;

    let n = old_mid.len();
    let m = new_mid.len();
    if n > 0 || m > 0 {
        // The middle snake search reaches edit distance ~2d at step d.
        let max_d = ((n + m + 1) / 2 + 1).min(max_edit_distance / 2 + 1);
        let mark = ops.len();
        let aligned = Myers {
            old,
            new,
            vf: V::new(max_d),
            vb: V::new(max_d),
            max_d,
            ops: &mut ops,
        }
        .conquer(old_mid.clone(), new_mid.clone());
        if !aligned {
            // Too different to align exactly.
            ops.truncate(mark);
            push_delete(&mut ops, old_mid.start, n);
            push_insert(&mut ops, new_mid.start, m);
        }
    }

    if suffix > 0 {
        ops.push(DiffOp::Equal {
            old: old.len() - suffix,
            new: new.len() - suffix,
            len: suffix,
        });
    }
    compact(ops)
}

/// Merge adjacent equal runs, and turn every run of edits between two equal
/// runs into one deletion followed by one insertion.
fn compact(ops: Vec<DiffOp>) -> Vec<DiffOp> {
    let mut out: Vec<DiffOp> = Vec::with_capacity(ops.len());
    let mut deleted: Option<(usize, usize)> = None;
    let mut inserted: Option<(usize, usize)> = None;

    fn flush(
        out: &mut Vec<DiffOp>,
        deleted: &mut Option<(usize, usize)>,
        inserted: &mut Option<(usize, usize)>,
    ) {
        if let Some((old, len)) = deleted.take() {
            push_delete(out, old, len);
        }
        if let Some((new, len)) = inserted.take() {
            push_insert(out, new, len);
        }
    }

    for op in ops {
        match op {
            DiffOp::Delete { old, len } => deleted.get_or_insert((old, 0)).1 += len,
            DiffOp::Insert { new, len } => inserted.get_or_insert((new, 0)).1 += len,
            DiffOp::Equal { len, .. } => {
                flush(&mut out, &mut deleted, &mut inserted);
                match out.last_mut() {
                    Some(DiffOp::Equal { len: last, .. }) => *last += len,
                    _ => out.push(op),
                }
            }
        }
    }
    flush(&mut out, &mut deleted, &mut inserted);
    out
}

fn common_prefix_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn push_equal(ops: &mut Vec<DiffOp>, old: usize, new: usize, len: usize) {
    if len > 0 {
        ops.push(DiffOp::Equal { old, new, len });
    }
}

fn push_delete(ops: &mut Vec<DiffOp>, old: usize, len: usize) {
    if len > 0 {
        ops.push(DiffOp::Delete { old, len });
    }
}

fn push_insert(ops: &mut Vec<DiffOp>, new: usize, len: usize) {
    if len > 0 {
        ops.push(DiffOp::Insert { new, len });
    }
}

/// Furthest-reaching x per diagonal k, indexed by signed k
struct V {
    offset: isize,
    v: Vec<usize>,
}

impl V {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            v: vec![0; 2 * max_d + 2],
        }
    }
}

impl std::ops::Index<isize> for V {
    type Output = usize;
    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl std::ops::IndexMut<isize> for V {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

struct Myers<'a, T> {
    old: &'a [T],
    new: &'a [T],
    vf: V,
    vb: V,
    max_d: usize,
    ops: &'a mut Vec<DiffOp>,
}

impl<'a, T: PartialEq> Myers<'a, T> {
    /// Emit the edit script for the given ranges. Returns false when the
    /// edit distance exceeds the configured bound.
    fn conquer(
        &mut self,
        mut old_range: std::ops::Range<usize>,
        mut new_range: std::ops::Range<usize>,
    ) -> bool {
        let prefix = common_prefix_len(&self.old[old_range.clone()], &self.new[new_range.clone()]);
        push_equal(self.ops, old_range.start, new_range.start, prefix);
        old_range.start += prefix;
        new_range.start += prefix;

        let suffix = common_suffix_len(&self.old[old_range.clone()], &self.new[new_range.clone()]);
        old_range.end -= suffix;
        new_range.end -= suffix;

        if old_range.is_empty() {
            push_insert(self.ops, new_range.start, new_range.len());
        } else if new_range.is_empty() {
            push_delete(self.ops, old_range.start, old_range.len());
        } else {
            match self.middle_snake(old_range.clone(), new_range.clone()) {
                Some((x, y)) => {
                    if !self.conquer(old_range.start..x, new_range.start..y) {
                        return false;
                    }
                    if !self.conquer(x..old_range.end, y..new_range.end) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        push_equal(self.ops, old_range.end, new_range.end, suffix);
        true
    }

    /// Find the split point of an optimal path through the edit graph of
    /// the two ranges by searching from both ends at once.
    fn middle_snake(
        &mut self,
        old_range: std::ops::Range<usize>,
        new_range: std::ops::Range<usize>,
    ) -> Option<(usize, usize)> {
        let old = &self.old[old_range.clone()];
        let new = &self.new[new_range.clone()];
        let n = old.len();
        let m = new.len();
        let delta = n as isize - m as isize;
        let odd = delta & 1 == 1;
        let d_max = ((n + m + 1) / 2 + 1).min(self.max_d);
        let vf = &mut self.vf;
        let vb = &mut self.vb;
        vf[1] = 0;
        vb[1] = 0;

        for d in 0..d_max as isize {
            // Forward
            for k in (-d..=d).rev().step_by(2) {
                let mut x = if k == -d || (k != d && vf[k - 1] < vf[k + 1]) {
                    vf[k + 1]
                } else {
                    vf[k - 1] + 1
                };
                let y = (x as isize - k) as usize;
                let (x0, y0) = (x, y);
                if x < n && y < m {
                    x += common_prefix_len(&old[x..], &new[y..]);
                }
                vf[k] = x;
                if odd && (k - delta).abs() <= d - 1 && vf[k] + vb[-(k - delta)] >= n {
                    return Some((x0 + old_range.start, y0 + new_range.start));
                }
            }

            // Backward
            for k in (-d..=d).rev().step_by(2) {
                let mut x = if k == -d || (k != d && vb[k - 1] < vb[k + 1]) {
                    vb[k + 1]
                } else {
                    vb[k - 1] + 1
                };
                let mut y = (x as isize - k) as usize;
                if x < n && y < m {
                    let advance = common_suffix_len(&old[..n - x], &new[..m - y]);
                    x += advance;
                    y += advance;
                }
                vb[k] = x;
                if !odd && (k - delta).abs() <= d && vb[k] + vf[-(k - delta)] >= n {
                    return Some((n - x + old_range.start, m - y + new_range.start));
                }
            }
        }
        None
    }
}

/// Collapse an edit script into spans of adjacent same-kind words.
fn spans(ops: &[DiffOp], old: &[&str], new: &[&str]) -> Vec<TextSpan> {
    let mut out: Vec<TextSpan> = Vec::new();
    for op in ops {
        let (kind, words) = match *op {
            DiffOp::Equal { old: o, len, .. } => (SpanKind::Unchanged, &old[o..o + len]),
            DiffOp::Delete { old: o, len } => (SpanKind::Removed, &old[o..o + len]),
            DiffOp::Insert { new: n, len } => (SpanKind::Added, &new[n..n + len]),
        };
        if words.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.kind == kind => {
                last.value.push(' ');
                last.value.push_str(&words.join(" "));
                last.words += words.len();
            }
            _ => out.push(TextSpan {
                kind,
                value: words.join(" "),
                words: words.len(),
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild both sides from an edit script.
    fn apply(ops: &[DiffOp], old: &[&str], new: &[&str]) -> (Vec<String>, Vec<String>) {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for op in ops {
            match *op {
                DiffOp::Equal { old: o, new: n, len } => {
                    assert_eq!(&old[o..o + len], &new[n..n + len]);
                    a.extend(old[o..o + len].iter().map(|s| s.to_string()));
                    b.extend(new[n..n + len].iter().map(|s| s.to_string()));
                }
                DiffOp::Delete { old: o, len } => {
                    a.extend(old[o..o + len].iter().map(|s| s.to_string()));
                }
                DiffOp::Insert { new: n, len } => {
                    b.extend(new[n..n + len].iter().map(|s| s.to_string()));
                }
            }
        }
        (a, b)
    }

    fn edits(ops: &[DiffOp]) -> usize {
        ops.iter()
            .map(|op| match op {
                DiffOp::Equal { .. } => 0,
                DiffOp::Delete { len, .. } | DiffOp::Insert { len, .. } => *len,
            })
            .sum()
    }

    #[test]
    fn test_script_reconstructs_both_sides() {
        let old: Vec<&str> = "a b c a b b a".split(' ').collect();
        let new: Vec<&str> = "c b a b a c".split(' ').collect();
        let ops = diff_words(&old, &new, MAX_EDIT_DISTANCE);
        let (a, b) = apply(&ops, &old, &new);
        assert_eq!(a, old);
        assert_eq!(b, new);
        // Classic example from the Myers paper: D = 5.
        assert_eq!(edits(&ops), 5);
    }

    #[test]
    fn test_single_replacement() {
        let old = ["Buy", "now", "$10"];
        let new = ["Buy", "now", "$8"];
        let ops = diff_words(&old, &new, MAX_EDIT_DISTANCE);
        assert_eq!(
            ops,
            vec![
                DiffOp::Equal { old: 0, new: 0, len: 2 },
                DiffOp::Delete { old: 2, len: 1 },
                DiffOp::Insert { new: 2, len: 1 },
            ]
        );
    }

    #[test]
    fn test_edit_cap_falls_back_to_replace_all() {
        let old: Vec<String> = (0..50).map(|i| format!("a{}", i)).collect();
        let new: Vec<String> = (0..50).map(|i| format!("b{}", i)).collect();
        let ops = diff_words(&old, &new, 10);
        assert_eq!(
            ops,
            vec![
                DiffOp::Delete { old: 0, len: 50 },
                DiffOp::Insert { new: 0, len: 50 },
            ]
        );
    }

    #[test]
    fn test_edit_cap_keeps_prefix_and_suffix() {
        let mut old = vec!["head".to_string()];
        let mut new = vec!["head".to_string()];
        old.extend((0..30).map(|i| format!("a{}", i)));
        new.extend((0..30).map(|i| format!("b{}", i)));
        old.push("tail".into());
        new.push("tail".into());
        let ops = diff_words(&old, &new, 4);
        assert_eq!(ops.first(), Some(&DiffOp::Equal { old: 0, new: 0, len: 1 }));
        assert_eq!(ops.last(), Some(&DiffOp::Equal { old: 31, new: 31, len: 1 }));
        assert_eq!(edits(&ops), 60);
    }

    #[test]
    fn test_identity() {
        let result = compare_texts("Hello   world\n again", "Hello world again");
        assert!(!result.has_changes);
        assert_eq!(result.change_score, 0.0);
        assert_eq!(result.change_severity, Severity::None);
        assert_eq!(result.statistics.total_words, 3);
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        let result = compare_texts("", "   ");
        assert!(!result.has_changes);
        assert_eq!(result.statistics.total_words, 0);

        let added = compare_texts("", "brand new");
        assert_eq!(added.statistics.added_words, 2);
        assert_eq!(added.change_score, 100.0);
        assert_eq!(added.change_severity, Severity::High);
    }

    #[test]
    fn test_statistics() {
        let result = compare_texts("the quick brown fox", "the slow brown dog jumps");
        assert_eq!(result.statistics.total_words, 5);
        assert_eq!(result.statistics.removed_words, 2);
        assert_eq!(result.statistics.added_words, 3);
        assert_eq!(result.statistics.changed_words, 2);
        assert_eq!(result.change_score, 100.0);
        assert_eq!(result.removed_text, "quick fox");
        assert_eq!(result.added_text, "slow dog jumps");
    }

    #[test]
    fn test_spans_merge_adjacent_words() {
        let result = compare_texts("a b c", "a x y c");
        let kinds: Vec<_> = result.changes.iter().map(|s| (s.kind, s.value.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (SpanKind::Unchanged, "a"),
                (SpanKind::Removed, "b"),
                (SpanKind::Added, "x y"),
                (SpanKind::Unchanged, "c"),
            ]
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(compare_texts("a", "b")).unwrap();
        assert!(json.get("hasChanges").is_some());
        assert!(json["statistics"].get("changedWords").is_some());
        assert_eq!(json["changeSeverity"], "high");
    }
}
