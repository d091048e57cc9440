use float_ord::FloatOrd;
use geo::Coord;
use tracing::instrument;

use crate::{QuadBox, RecognitionResult, TextLine};

/// Groups recognized boxes, already in reading order, into lines.
///
/// A box joins the current line while its top edge is within
/// `average box height * gap_threshold` of the previous box's top edge.
#[instrument(level = "debug", skip(items))]
pub fn merge_text_lines(items: &[(RecognitionResult, QuadBox)], gap_threshold: f32) -> Vec<TextLine> {
    if items.is_empty() {
        return Vec::new();
    }
    let average_height =
        items.iter().map(|(_, quad)| quad.height()).sum::<f32>() / items.len() as f32;
    let max_gap = average_height * gap_threshold;

    let mut groups: Vec<Vec<&(RecognitionResult, QuadBox)>> = Vec::new();
    let mut previous_top: Option<f32> = None;
    for item in items {
        let top = item.1.min_y();
        let joins = previous_top.is_some_and(|previous| (top - previous).abs() <= max_gap);
        if !joins {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(item);
        }
        previous_top = Some(top);
    }

    groups.into_iter().map(build_line).collect()
}

fn build_line(mut members: Vec<&(RecognitionResult, QuadBox)>) -> TextLine {
    members.sort_by_key(|(_, quad)| FloatOrd(quad.min_x()));

    let text = members
        .iter()
        .map(|(result, _)| result.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence =
        members.iter().map(|(result, _)| result.confidence).sum::<f32>() / members.len() as f32;

    let points = members.iter().flat_map(|(_, quad)| quad.points);
    let (min, max) = points.fold(
        (
            Coord {
                x: f32::INFINITY,
                y: f32::INFINITY,
            },
            Coord {
                x: f32::NEG_INFINITY,
                y: f32::NEG_INFINITY,
            },
        ),
        |(min, max), p| {
            (
                Coord {
                    x: min.x.min(p.x),
                    y: min.y.min(p.y),
                },
                Coord {
                    x: max.x.max(p.x),
                    y: max.y.max(p.y),
                },
            )
        },
    );

    TextLine {
        boxes: members.iter().map(|(_, quad)| *quad).collect(),
        text,
        confidence,
        bounding_box: QuadBox::from_envelope(min, max),
    }
}
