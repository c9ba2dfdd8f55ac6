//! Skewed random draws that steer trees towards lightly or heavily loaded
//! pixels.

use serde::{Deserialize, Serialize};

use crate::curve::{PolygonCurve, ResponseCurve};
use crate::error::InitError;
use crate::rng::RngExt;

const PDF_STEPS: usize = 100;
const WEIGHT_SCALE: f64 = 100_000_000.0;

/// Shape of the probability density used for placement ranks on `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DensityShape {
    Uniform,
    /// `1 - x^exponent`
    Decreasing { exponent: f64 },
    Polygon { points: Vec<[f64; 2]> },
}

impl Default for DensityShape {
    fn default() -> Self {
        DensityShape::Decreasing { exponent: 2.0 }
    }
}

impl DensityShape {
    pub fn to_curve(&self) -> Result<Box<dyn ResponseCurve>, InitError> {
        match self {
            DensityShape::Uniform => Ok(Box::new(|_: f64| 1.0)),
            DensityShape::Decreasing { exponent } => {
                let exponent = *exponent;
                Ok(Box::new(move |x: f64| 1.0 - x.powf(exponent)))
            }
            DensityShape::Polygon { points } => {
                let points = points.iter().map(|p| (p[0], p[1])).collect();
                let curve = PolygonCurve::new(points).ok_or_else(|| {
                    InitError::InvalidDensityFunction(
                        "polygon needs at least one point with ascending x values".into(),
                    )
                })?;
                Ok(Box::new(curve))
            }
        }
    }
}

/// Random values following a user supplied density on `[0, 1]`.
///
/// The density is integrated over 100 equal steps; a draw picks a step with
/// probability proportional to its area and then a uniform value inside it.
#[derive(Debug, Clone)]
pub struct CustomPdf {
    cumulative: Vec<u64>,
    total: u64,
    step_width: f64,
}

impl CustomPdf {
    pub fn new(density: &dyn ResponseCurve) -> Result<Self, InitError> {
        let step_width = 1.0 / PDF_STEPS as f64;
        let mut cumulative = Vec::with_capacity(PDF_STEPS);
        let mut total = 0_u64;
        for step in 0..PDF_STEPS {
            let x1 = step as f64 * step_width;
            let x2 = x1 + step_width;
            let area = (density.evaluate(x1) + density.evaluate(x2)) / 2.0 * step_width;
            if !area.is_finite() || area < 0.0 {
                return Err(InitError::InvalidDensityFunction(format!(
                    "density is negative or undefined between {x1:.2} and {x2:.2}"
                )));
            }
            total += (area * WEIGHT_SCALE) as u64;
            cumulative.push(total);
        }
        if total == 0 {
            return Err(InitError::InvalidDensityFunction(
                "density integrates to zero on [0, 1]".into(),
            ));
        }
        Ok(Self {
            cumulative,
            total,
            step_width,
        })
    }

    pub fn draw<R: RngExt + ?Sized>(&self, rng: &mut R) -> f64 {
        let target = rng.below(self.total);
        let step = self.cumulative.partition_point(|&weight| weight <= target);
        let base = step as f64 * self.step_width;
        rng.uniform(base, base + self.step_width)
    }
}

/// Combines the density draw with a class's skew parameter.
#[derive(Debug, Clone)]
pub struct PlacementSampler {
    pdf: CustomPdf,
}

impl PlacementSampler {
    pub fn new(pdf: CustomPdf) -> Self {
        Self { pdf }
    }

    pub fn from_shape(shape: &DensityShape) -> Result<Self, InitError> {
        let curve = shape.to_curve()?;
        Ok(Self::new(CustomPdf::new(curve.as_ref())?))
    }

    /// Fraction in `[0, 1]` mapped to a pixel rank.
    ///
    /// Densities up to 1 blend the density draw (mirrored for negative
    /// values) with a uniform draw; larger densities claim a capped share of
    /// the area: `u * min(density / 100, 1)`.
    pub fn draw<R: RngExt + ?Sized>(&self, density: f64, rng: &mut R) -> f64 {
        if density > 1.0 {
            return rng.probability() * (density / 100.0).min(1.0);
        }
        let mut value = self.pdf.draw(rng);
        if density < 0.0 {
            value = 1.0 - value;
        }
        let weight = density.abs();
        value * weight + rng.probability() * (1.0 - weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::InitRng;

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    #[test]
    fn decreasing_density_favours_low_values() {
        let pdf = CustomPdf::new(&|x: f64| 1.0 - x * x).unwrap();
        let mut rng = InitRng::new(3);
        let draws: Vec<f64> = (0..5000).map(|_| pdf.draw(&mut rng)).collect();
        assert!(draws.iter().all(|v| (0.0..=1.0).contains(v)));
        // E[x] for 1-x^2 on [0,1] is 0.375
        assert!((mean(&draws) - 0.375).abs() < 0.03);
    }

    #[test]
    fn zero_density_is_rejected() {
        assert!(matches!(
            CustomPdf::new(&|_: f64| 0.0),
            Err(InitError::InvalidDensityFunction(_))
        ));
        assert!(CustomPdf::new(&|x: f64| x - 0.5).is_err());
    }

    #[test]
    fn negative_skew_mirrors_the_draw() {
        let sampler = PlacementSampler::from_shape(&DensityShape::default()).unwrap();
        let mut rng = InitRng::new(11);
        let low: Vec<f64> = (0..4000).map(|_| sampler.draw(1.0, &mut rng)).collect();
        let high: Vec<f64> = (0..4000).map(|_| sampler.draw(-1.0, &mut rng)).collect();
        assert!(mean(&low) < 0.45);
        assert!(mean(&high) > 0.55);
    }

    #[test]
    fn zero_skew_is_uniform() {
        let sampler = PlacementSampler::from_shape(&DensityShape::default()).unwrap();
        let mut rng = InitRng::new(5);
        let draws: Vec<f64> = (0..4000).map(|_| sampler.draw(0.0, &mut rng)).collect();
        assert!((mean(&draws) - 0.5).abs() < 0.03);
    }

    #[test]
    fn area_claim_is_capped() {
        let sampler = PlacementSampler::from_shape(&DensityShape::Uniform).unwrap();
        let mut rng = InitRng::new(9);
        for _ in 0..1000 {
            assert!(sampler.draw(30.0, &mut rng) < 0.3);
            assert!(sampler.draw(500.0, &mut rng) < 1.0);
        }
    }

    #[test]
    fn polygon_shape_requires_points() {
        let shape = DensityShape::Polygon { points: vec![] };
        assert!(PlacementSampler::from_shape(&shape).is_err());
    }
}
