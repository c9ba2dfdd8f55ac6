//! Response curves used for height fitting and placement density shapes

/// A one-dimensional function evaluated during placement.
pub trait ResponseCurve {
    fn evaluate(&self, x: f64) -> f64;
}

/// Piecewise-linear curve through `(x, y)` points: the first `y` below the
/// first point, the last `y` beyond the last point, interpolated in between.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonCurve {
    points: Vec<(f64, f64)>,
}

impl PolygonCurve {
    /// Returns `None` when no points are given or `x` values are not ascending.
    pub fn new(points: Vec<(f64, f64)>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        if points.windows(2).any(|pair| pair[1].0 < pair[0].0) {
            return None;
        }
        Some(Self { points })
    }

    /// Fit curve used when a height grid is configured without one:
    /// full acceptance between 80% and 110% of the target height.
    pub fn default_height_fit() -> Self {
        Self {
            points: vec![(0.0, 0.0), (0.8, 1.0), (1.1, 1.0), (1.25, 0.0)],
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl ResponseCurve for PolygonCurve {
    fn evaluate(&self, x: f64) -> f64 {
        let (first_x, first_y) = self.points[0];
        if x <= first_x {
            return first_y;
        }
        for pair in self.points.windows(2) {
            let (x1, y1) = pair[0];
            let (x2, y2) = pair[1];
            if x <= x2 {
                if x2 == x1 {
                    return y2;
                }
                return y1 + (y2 - y1) * (x - x1) / (x2 - x1);
            }
        }
        self.points[self.points.len() - 1].1
    }
}

impl<F: Fn(f64) -> f64> ResponseCurve for F {
    fn evaluate(&self, x: f64) -> f64 {
        self(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_interpolates_and_clamps() {
        let curve = PolygonCurve::default_height_fit();
        assert_eq!(curve.evaluate(-1.0), 0.0);
        assert!((curve.evaluate(0.4) - 0.5).abs() < 1e-12);
        assert_eq!(curve.evaluate(1.0), 1.0);
        assert!((curve.evaluate(1.175) - 0.5).abs() < 1e-9);
        assert_eq!(curve.evaluate(4.8), 0.0);
    }

    #[test]
    fn polygon_rejects_unsorted_points() {
        assert!(PolygonCurve::new(vec![]).is_none());
        assert!(PolygonCurve::new(vec![(1.0, 0.0), (0.5, 1.0)]).is_none());
    }

    #[test]
    fn closures_are_curves() {
        let step = |x: f64| if x > 1.0 { 0.0 } else { 1.0 };
        assert_eq!(step.evaluate(0.5), 1.0);
        assert_eq!(step.evaluate(4.8), 0.0);
    }
}
