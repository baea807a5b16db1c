use crate::models::ProposalBox;

/// Take the first `k` proposals of an already ranked list.
///
/// `k <= 0` selects nothing; a `k` larger than the list selects everything.
pub fn select_top_k(boxes: &[ProposalBox], k: i64) -> &[ProposalBox] {
    if k <= 0 {
        return &[];
    }
    let take = usize::try_from(k).unwrap_or(usize::MAX).min(boxes.len());
    &boxes[..take]
}
