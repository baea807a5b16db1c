use crate::models::{ClippedBox, ProposalBox};

/// Intersect `bbox` with the image rectangle `[0, 0, width, height)`.
///
/// Returns `None` when nothing of the box is left. Both edges of an axis
/// move independently, so a box hanging over the left border loses width
/// instead of sliding right.
pub fn clip_to_image(bbox: &ProposalBox, width: u32, height: u32) -> Option<ClippedBox> {
    let left = (bbox.x as i64).max(0);
    let top = (bbox.y as i64).max(0);
    let right = (bbox.x as i64 + bbox.width as i64).min(width as i64);
    let bottom = (bbox.y as i64 + bbox.height as i64).min(height as i64);

    if right - left <= 0 || bottom - top <= 0 {
        return None;
    }

    Some(ClippedBox {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}
