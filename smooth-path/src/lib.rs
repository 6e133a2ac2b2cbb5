//! Cubic smoothing of ordered 2D polylines.
//!
//! Converts a polyline into a sequence of cubic Bezier segments using the
//! Catmull-Rom construction: for each consecutive pair `(p1, p2)` the control
//! points are `p1 + (p2 - p0)/6` and `p2 - (p3 - p1)/6`, where `p0`/`p3` are
//! the neighbors one step further back/ahead, clamped at the sequence ends.
//! The result is C1-continuous and passes through every input point.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One cubic Bezier piece of a smoothed path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicSegment {
    pub from: Point,
    pub ctrl1: Point,
    pub ctrl2: Point,
    pub to: Point,
}

/// Smooth an ordered polyline into cubic Bezier segments.
///
/// Fewer than two input points yield an empty path.
pub fn smooth_polyline(points: &[Point]) -> Vec<CubicSegment> {
    if points.len() < 2 {
        return Vec::new();
    }

    let last = points.len() - 1;
    (0..last)
        .map(|i| {
            let p0 = points[i.saturating_sub(1)];
            let p1 = points[i];
            let p2 = points[i + 1];
            let p3 = points[(i + 2).min(last)];

            CubicSegment {
                from: p1,
                ctrl1: Point::new(p1.x + (p2.x - p0.x) / 6.0, p1.y + (p2.y - p0.y) / 6.0),
                ctrl2: Point::new(p2.x - (p3.x - p1.x) / 6.0, p2.y - (p3.y - p1.y) / 6.0),
                to: p2,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn degenerate_input_yields_empty_path() {
        assert!(smooth_polyline(&[]).is_empty());
        assert!(smooth_polyline(&[Point::new(1.0, 2.0)]).is_empty());
    }

    #[test]
    fn segments_interpolate_input_points() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 2.0),
            Point::new(2.0, 1.0),
            Point::new(3.0, 3.0),
        ];
        let segments = smooth_polyline(&points);
        assert_eq!(segments.len(), 3);
        for (segment, pair) in segments.iter().zip(points.windows(2)) {
            assert_eq!(segment.from, pair[0]);
            assert_eq!(segment.to, pair[1]);
        }
    }

    #[test]
    fn tangents_are_continuous_at_interior_points() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 2.0),
            Point::new(2.0, 1.0),
            Point::new(3.0, 3.0),
            Point::new(4.0, 0.0),
        ];
        let segments = smooth_polyline(&points);
        for pair in segments.windows(2) {
            // Incoming and outgoing tangent vectors at the shared point must
            // match for C1 continuity.
            let incoming = (
                pair[0].to.x - pair[0].ctrl2.x,
                pair[0].to.y - pair[0].ctrl2.y,
            );
            let outgoing = (
                pair[1].ctrl1.x - pair[1].from.x,
                pair[1].ctrl1.y - pair[1].from.y,
            );
            assert_relative_eq!(incoming.0, outgoing.0, epsilon = 1e-12);
            assert_relative_eq!(incoming.1, outgoing.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn straight_line_stays_straight() {
        let points: Vec<Point> = (0..5).map(|i| Point::new(i as f64, 2.0)).collect();
        for segment in smooth_polyline(&points) {
            assert_relative_eq!(segment.ctrl1.y, 2.0);
            assert_relative_eq!(segment.ctrl2.y, 2.0);
        }
    }
}
