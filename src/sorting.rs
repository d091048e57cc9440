use float_ord::FloatOrd;

use crate::QuadBox;

/// Boxes whose top-left corners differ by less than this many pixels
/// vertically are treated as one line.
pub const LINE_TOLERANCE: f32 = 10.0;

/// Orders items top to bottom, then left to right within a line.
///
/// A stable sort on the top-left y is followed by a local bubble pass that
/// swaps neighbours on the same line that are out of x order, so small
/// vertical jitter inside a line does not break left-to-right order.
pub fn sort_reading_order<T>(mut items: Vec<T>, quad: impl Fn(&T) -> &QuadBox) -> Vec<T> {
    items.sort_by_key(|item| {
        let top_left = quad(item).top_left();
        (FloatOrd(top_left.y), FloatOrd(top_left.x))
    });

    for i in 0..items.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let current = quad(&items[j]).top_left();
            let next = quad(&items[j + 1]).top_left();
            if (next.y - current.y).abs() < LINE_TOLERANCE && next.x < current.x {
                items.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    items
}
