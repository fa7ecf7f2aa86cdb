//! Sentence-level text diff.
//!
//! Answer edits are reported as a list of retained, added and removed spans.
//! Text is split into sentence tokens and the whitespace between them; the
//! spans come from a longest-common-subsequence walk over those tokens.
//!
//! A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
//! the text. Trailing text without a terminator is its own token.

use serde::{Deserialize, Serialize};

/// What happened to a span between the old and new text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    Retained,
    Added,
    Removed,
}

/// A contiguous run of tokens sharing one [`DiffOp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSpan {
    pub op: DiffOp,
    pub value: String,
}

impl DiffSpan {
    /// Whether this span is an insertion or a deletion.
    pub fn is_change(&self) -> bool {
        self.op != DiffOp::Retained
    }
}

/// Split `text` into sentence and whitespace tokens.
///
/// Concatenating the tokens reproduces `text` exactly.
pub fn tokenize_sentences(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if idx == start {
            in_space = ch.is_whitespace();
        }

        if in_space {
            let next_is_space = chars.peek().map(|&(_, c)| c.is_whitespace());
            if next_is_space != Some(true) {
                let end = idx + ch.len_utf8();
                tokens.push(&text[start..end]);
                start = end;
            }
            continue;
        }

        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = match chars.peek() {
                None => true,
                Some(&(_, next)) => next.is_whitespace(),
            };
            if at_boundary {
                let end = idx + ch.len_utf8();
                tokens.push(&text[start..end]);
                start = end;
            }
        }
    }

    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Diff two texts sentence by sentence.
///
/// Within a replaced region, removed spans come before added spans.
pub fn sentence_diff(old: &str, new: &str) -> Vec<DiffSpan> {
    let a = tokenize_sentences(old);
    let b = tokenize_sentences(new);

    // lcs[i][j] = length of the LCS of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut spans: Vec<DiffSpan> = Vec::new();
    let mut push = |op: DiffOp, token: &str| match spans.last_mut() {
        Some(last) if last.op == op => last.value.push_str(token),
        _ => spans.push(DiffSpan {
            op,
            value: token.to_string(),
        }),
    };

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            push(DiffOp::Retained, a[i]);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            push(DiffOp::Removed, a[i]);
            i += 1;
        } else {
            push(DiffOp::Added, b[j]);
            j += 1;
        }
    }
    for &token in &a[i..] {
        push(DiffOp::Removed, token);
    }
    for &token in &b[j..] {
        push(DiffOp::Added, token);
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tokenize_sentences() {
        let tokens = tokenize_sentences("Yes. It is legal!  See R7");
        assert_eq!(tokens, vec!["Yes.", " ", "It is legal!", "  ", "See R7"]);
    }

    #[test]
    fn test_tokenize_keeps_inline_periods() {
        let tokens = tokenize_sentences("Rule <R7>.a applies. Done.");
        assert_eq!(tokens, vec!["Rule <R7>.a applies.", " ", "Done."]);
    }

    #[test]
    fn test_diff_single_sentence_edit() {
        let spans = sentence_diff("Yes. It is legal.", "Yes. It is not legal.");
        assert_eq!(
            spans,
            vec![
                DiffSpan { op: DiffOp::Retained, value: "Yes. ".into() },
                DiffSpan { op: DiffOp::Removed, value: "It is legal.".into() },
                DiffSpan { op: DiffOp::Added, value: "It is not legal.".into() },
            ]
        );
    }

    #[test]
    fn test_diff_identical_has_no_changes() {
        let spans = sentence_diff("Same. Text.", "Same. Text.");
        assert!(spans.iter().all(|s| !s.is_change()));
    }

    #[test]
    fn test_diff_from_empty() {
        let spans = sentence_diff("", "New answer.");
        assert_eq!(spans, vec![DiffSpan { op: DiffOp::Added, value: "New answer.".into() }]);
    }

    proptest! {
        #[test]
        fn tokens_reassemble(text in "[a-zA-Z .!?\n]{0,80}") {
            let joined: String = tokenize_sentences(&text).concat();
            prop_assert_eq!(joined, text);
        }

        #[test]
        fn diff_reconstructs_both_sides(
            old in "[a-c .!]{0,40}",
            new in "[a-c .!]{0,40}",
        ) {
            let spans = sentence_diff(&old, &new);
            let before: String = spans
                .iter()
                .filter(|s| s.op != DiffOp::Added)
                .map(|s| s.value.as_str())
                .collect();
            let after: String = spans
                .iter()
                .filter(|s| s.op != DiffOp::Removed)
                .map(|s| s.value.as_str())
                .collect();
            prop_assert_eq!(before, old);
            prop_assert_eq!(after, new);
        }
    }
}
