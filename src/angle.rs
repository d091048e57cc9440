use float_ord::FloatOrd;
use ndarray::ArrayView1;

/// Orientation class of a crop: index 0 is upright, 1 is upside down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub index: usize,
    pub score: f32,
}

impl Angle {
    /// Picks the most probable class from a classifier output row.
    pub fn from_scores(scores: ArrayView1<f32>) -> Option<Self> {
        scores
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
    }

    pub fn is_upside_down(&self, threshold: f32) -> bool {
        self.index == 1 && self.score >= threshold
    }
}

/// Assigns the majority orientation to every angle.
pub fn apply_most_angle(angles: &mut [Angle]) {
    if angles.is_empty() {
        return;
    }
    let sum = angles.iter().map(|angle| angle.index).sum::<usize>() as f32;
    let half_percent = angles.len() as f32 / 2.0;
    let most_angle_index = if sum < half_percent { 0 } else { 1 };
    log::debug!("Majority orientation of {} crops is {most_angle_index}", angles.len());

    for angle in angles.iter_mut() {
        angle.index = most_angle_index;
    }
}
