use std::fmt;
use std::str::FromStr;

use log::debug;
use ndarray::{Array1, Array2};
use ndarray_linalg::Norm;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::manifolds::spd::{inv_sqrtm, logm};

/// How far below zero the CBH radicand may fall (relative to max(1, E))
/// before it is reported instead of clamped
pub const CBH_CLAMP_TOLERANCE: f64 = 1e-9;

/// Dissimilarity between two SPD matrices of equal size
///
/// Persisted by name, so a saved model always records which metric it was
/// trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Distance {
    /// ‖ln B − ln A‖_F
    LogEuclidean,
    /// Log-Euclidean distance with the second-order Campbell-Baker-Hausdorff
    /// correction
    Cbh,
    /// Affine-invariant geodesic distance ‖ln(A^{-1/2} B A^{-1/2})‖_F
    Geodesic,
    /// Plain Frobenius distance ‖B − A‖_F, no manifold mapping
    RawEuclidean,
}

impl Distance {
    pub const ALL: [Distance; 4] = [
        Distance::LogEuclidean,
        Distance::Cbh,
        Distance::Geodesic,
        Distance::RawEuclidean,
    ];

    /// Configuration key of this distance
    pub fn name(&self) -> &'static str {
        match self {
            Distance::LogEuclidean => "euclid",
            Distance::Cbh => "cbh",
            Distance::Geodesic => "geodesic",
            Distance::RawEuclidean => "my euclid",
        }
    }

    /// Look a distance up by its (case-sensitive) configuration key
    pub fn from_name(name: &str) -> Result<Self> {
        Distance::ALL
            .iter()
            .copied()
            .find(|d| d.name() == name)
            .ok_or_else(|| Error::UnknownDistance(name.to_string()))
    }

    /// Evaluate d(a, b)
    pub fn evaluate(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<f64> {
        check_same_shape(a, b)?;
        let anchor = self.anchor(a)?;
        let query = self.query_form(b)?;
        self.between(&anchor, &query)
    }

    /// Per-sample precomputation for the left argument of d(sample, ·)
    ///
    /// The matrix logarithm for the log-based distances, `S^{-1/2}` for the
    /// geodesic one, the matrix itself otherwise. Keeping anchors around lets
    /// repeated queries against the same samples skip every sample-side
    /// eigendecomposition.
    pub fn anchors(&self, samples: &[Array2<f64>]) -> Result<Vec<Array2<f64>>> {
        if let Some(first) = samples.first() {
            for s in samples.iter().skip(1) {
                check_same_shape(first, s)?;
            }
        }

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            samples.par_iter().map(|s| self.anchor(s)).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            samples.iter().map(|s| self.anchor(s)).collect()
        }
    }

    /// Full N×N distance matrix over `samples`
    ///
    /// Only the strict upper triangle is evaluated; the lower triangle is its
    /// mirror and the diagonal is zero.
    pub fn pairwise(&self, samples: &[Array2<f64>]) -> Result<Array2<f64>> {
        let anchors = self.anchors(samples)?;
        self.pairwise_anchored(samples, &anchors)
    }

    /// `pairwise` with anchors already computed by [`Distance::anchors`]
    pub fn pairwise_anchored(
        &self,
        samples: &[Array2<f64>],
        anchors: &[Array2<f64>],
    ) -> Result<Array2<f64>> {
        let n = samples.len();
        if anchors.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: anchors.len(),
            });
        }
        // Only the geodesic distance needs the raw matrix on the query side
        let queries = match self {
            Distance::Geodesic => samples,
            _ => anchors,
        };

        let upper_row = |i: usize| -> Result<Vec<f64>> {
            ((i + 1)..n)
                .map(|j| self.between(&anchors[i], &queries[j]))
                .collect()
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            (0..n)
                .into_par_iter()
                .map(upper_row)
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<Vec<f64>> = (0..n).map(upper_row).collect::<Result<Vec<_>>>()?;

        let mut distances = Array2::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            for (offset, &d) in row.iter().enumerate() {
                let j = i + 1 + offset;
                distances[[i, j]] = d;
                distances[[j, i]] = d;
            }
        }

        debug!("{} pairwise {} distances over {} samples", n * n.saturating_sub(1) / 2, self, n);
        Ok(distances)
    }

    /// Distances d(sample_i, query) for every sample, in sample order
    pub fn row(&self, samples: &[Array2<f64>], query: &Array2<f64>) -> Result<Array1<f64>> {
        let anchors = self.anchors(samples)?;
        self.row_anchored(&anchors, query)
    }

    /// `row` against anchors computed by [`Distance::anchors`]; only the
    /// query is decomposed
    pub fn row_anchored(&self, anchors: &[Array2<f64>], query: &Array2<f64>) -> Result<Array1<f64>> {
        if let Some(first) = anchors.first() {
            check_same_shape(first, query)?;
        }
        let query = self.query_form(query)?;
        let one = |anchor: &Array2<f64>| self.between(anchor, &query);

        #[cfg(feature = "parallel")]
        let values: Vec<f64> = {
            use rayon::prelude::*;
            anchors.par_iter().map(one).collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let values: Vec<f64> = anchors.iter().map(one).collect::<Result<Vec<_>>>()?;

        Ok(Array1::from(values))
    }

    fn anchor(&self, m: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Distance::LogEuclidean | Distance::Cbh => logm(m),
            Distance::Geodesic => inv_sqrtm(m),
            Distance::RawEuclidean => Ok(m.clone()),
        }
    }

    fn query_form(&self, m: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Distance::LogEuclidean | Distance::Cbh => logm(m),
            Distance::Geodesic | Distance::RawEuclidean => Ok(m.clone()),
        }
    }

    /// Distance from an anchor to a query in query form
    fn between(&self, anchor: &Array2<f64>, query: &Array2<f64>) -> Result<f64> {
        match self {
            Distance::LogEuclidean | Distance::RawEuclidean => Ok((query - anchor).norm_l2()),
            Distance::Cbh => cbh(anchor, query),
            Distance::Geodesic => {
                let sandwich = anchor.dot(query).dot(anchor);
                let sandwich: Array2<f64> = 0.5 * (&sandwich + &sandwich.t());
                Ok(logm(&sandwich)?.norm_l2())
            }
        }
    }
}

/// CBH distance from the matrix logarithms `la`, `lb`
fn cbh(la: &Array2<f64>, lb: &Array2<f64>) -> Result<f64> {
    let d = lb - la;
    let e = d.dot(&d).diag().sum();

    let ab = la.dot(lb);
    let a2 = la.dot(la);
    let b2 = lb.dot(lb);
    let xi = -(ab.dot(&ab).diag().sum() - a2.dot(&b2).diag().sum()) / 12.0;

    cbh_radicand_root(e, xi)
}

/// √(E + ξ) under the clamp policy: a radicand within
/// `CBH_CLAMP_TOLERANCE · max(1, E)` below zero is round-off and gives 0,
/// anything further below is `NumericDomain`
fn cbh_radicand_root(e: f64, xi: f64) -> Result<f64> {
    let radicand = e + xi;
    if radicand >= 0.0 {
        return Ok(radicand.sqrt());
    }

    if radicand >= -CBH_CLAMP_TOLERANCE * e.max(1.0) {
        debug!("clamping cbh radicand {:e} to zero", radicand);
        Ok(0.0)
    } else {
        Err(Error::NumericDomain(format!(
            "cbh radicand is negative: E = {:e}, xi = {:e}",
            e, xi
        )))
    }
}

fn check_same_shape(a: &Array2<f64>, b: &Array2<f64>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Distance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Distance::from_name(s)
    }
}

impl TryFrom<String> for Distance {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Distance::from_name(&name)
    }
}

impl From<Distance> for String {
    fn from(distance: Distance) -> Self {
        distance.name().to_string()
    }
}
