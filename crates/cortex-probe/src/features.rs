//! Feature search over one-dimensional intensity profiles.
//!
//! Every operator is total: inverted or empty intervals yield `None` and
//! callers decide on a fallback.

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};
use crate::options::ModelOptions;

/// How a search terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingKind {
    /// The curve crossed the requested value.
    Value,
    /// A flat run was found before any crossing.
    Plateau,
}

/// Result of [`search_right`] / [`search_left`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crossing {
    pub index: usize,
    pub kind: CrossingKind,
}

impl Crossing {
    #[inline]
    pub fn is_plateau(&self) -> bool {
        self.kind == CrossingKind::Plateau
    }
}

/// Plateau detection parameters.
///
/// A sample is flat when `|dy| / slope_threshold < max_plateau_slope`; a
/// plateau is `min_plateau_len` consecutive flat samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauParams {
    pub slope_threshold: f64,
    pub min_plateau_len: usize,
    pub max_plateau_slope: f64,
}

impl PlateauParams {
    /// Never reports a plateau.
    pub fn disabled() -> Self {
        Self {
            slope_threshold: 0.0,
            min_plateau_len: usize::MAX,
            max_plateau_slope: 0.0,
        }
    }

    /// Plateau settings of a run.
    pub fn from_options(options: &ModelOptions) -> Self {
        Self {
            slope_threshold: options.slope_threshold,
            min_plateau_len: options.min_plateau_len.max(1),
            max_plateau_slope: options.max_plateau_slope,
        }
    }

    #[inline]
    fn is_flat(&self, dy: f64) -> bool {
        self.slope_threshold > 0.0 && dy.abs() / self.slope_threshold < self.max_plateau_slope
    }
}

/// Interval clamped to the curve; None if inverted or past the end.
fn interval(curve: &[f64], start: usize, end: usize) -> Option<(usize, usize)> {
    if curve.is_empty() || start > end || start >= curve.len() {
        return None;
    }
    Some((start, end.min(curve.len() - 1)))
}

fn edge(curve: &[f64], start: usize, end: usize, leftmost: bool, maximum: bool) -> Option<usize> {
    let (start, end) = interval(curve, start, end)?;
    if start == end {
        return Some(start);
    }

    // Orient so that "larger is better" for both searches.
    let key = |i: usize| if maximum { curve[i] } else { -curve[i] };
    let is_extremum = |i: usize| {
        if i == 0 || i + 1 >= curve.len() {
            return false;
        }
        key(i) - key(i - 1) >= 0.0 && key(i + 1) - key(i) < 0.0
    };

    let mut best: Option<usize> = None;
    for i in start..=end {
        if !is_extremum(i) {
            continue;
        }
        if leftmost {
            return Some(i);
        }
        if best.is_none_or(|b| key(i) > key(b)) {
            best = Some(i);
        }
    }

    best.or_else(|| {
        (start..=end).fold(None, |acc: Option<usize>, i| match acc {
            Some(b) if key(b) >= key(i) => Some(b),
            _ => Some(i),
        })
    })
}

/// Local maximum in `[start, end]`.
///
/// A local maximum at `i` has a non-negative difference into it and a
/// negative one out of it. Returns the first one if `leftmost`, else the
/// largest; the interval's arg-max if none exists.
pub fn max_edge(curve: &[f64], start: usize, end: usize, leftmost: bool) -> Option<usize> {
    edge(curve, start, end, leftmost, true)
}

/// Local minimum in `[start, end]`; the mirror of [`max_edge`].
pub fn min_edge(curve: &[f64], start: usize, end: usize, leftmost: bool) -> Option<usize> {
    edge(curve, start, end, leftmost, false)
}

/// Scan `indices` for a crossing of `value` or a plateau. `prev(i)` is the
/// sample visited just before `i`.
fn search<I>(
    curve: &[f64],
    mut indices: I,
    value: f64,
    plateau: &PlateauParams,
    find_last: bool,
    prev: impl Fn(usize) -> usize,
) -> Option<Crossing>
where
    I: Iterator<Item = usize>,
{
    let first = indices.next()?;
    if curve[first] == value && !find_last {
        return Some(Crossing { index: first, kind: CrossingKind::Value });
    }
    let mut last_crossing = (curve[first] == value).then_some(first);
    let mut run = 0usize;

    for i in indices {
        let p = prev(i);
        let before = curve[p] - value;
        let here = curve[i] - value;

        // Crossings are checked before plateaus.
        if here == 0.0 || (before < 0.0) != (here < 0.0) {
            if !find_last {
                return Some(Crossing { index: i, kind: CrossingKind::Value });
            }
            last_crossing = Some(i);
        }

        if plateau.is_flat(curve[i] - curve[p]) {
            run += 1;
            if run >= plateau.min_plateau_len && last_crossing.is_none() {
                let start = if i > p { i + 1 - run } else { i + run - 1 };
                return Some(Crossing { index: start, kind: CrossingKind::Plateau });
            }
        } else {
            run = 0;
        }
    }

    last_crossing.map(|index| Crossing { index, kind: CrossingKind::Value })
}

/// Scan right from `start` to `end` for a crossing of `value` or a plateau.
pub fn search_right(
    curve: &[f64],
    start: usize,
    end: usize,
    value: f64,
    plateau: &PlateauParams,
    find_last: bool,
) -> Option<Crossing> {
    let (start, end) = interval(curve, start, end)?;
    search(curve, start..=end, value, plateau, find_last, |i| i - 1)
}

/// Scan left from `start` down to `end`; the mirror of [`search_right`].
pub fn search_left(
    curve: &[f64],
    start: usize,
    end: usize,
    value: f64,
    plateau: &PlateauParams,
    find_last: bool,
) -> Option<Crossing> {
    let (end, start) = interval(curve, end, start)?;
    search(curve, (end..=start).rev(), value, plateau, find_last, |i| i + 1)
}

/// Control points of the averaged profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageControlPoints {
    /// Scalp peak in the outer half.
    pub a1: usize,
    /// Skull trough before the peak.
    pub a2: usize,
    /// Rising edge between trough and peak.
    pub a3: usize,
    /// Falling edge after the peak.
    pub a4: usize,
    /// Half-way to the trough, a bound for inner-skull searches.
    pub a5: usize,
}

/// Locate the reference control points of an averaged profile.
///
/// # Errors
///
/// [`ProbeError::DegenerateProfile`] if the curve has fewer than two
/// samples.
pub fn average_control_points(curve: &[f64]) -> ProbeResult<AverageControlPoints> {
    let m = curve.len();
    if m < 2 {
        return Err(ProbeError::degenerate_profile(format!(
            "average profile has {} samples",
            m
        )));
    }

    let a1 = max_edge(curve, m / 2, m - 1, false)
        .ok_or_else(|| ProbeError::degenerate_profile("no peak in the outer half"))?;
    let a2 = min_edge(curve, 0, a1, false)
        .ok_or_else(|| ProbeError::degenerate_profile("no trough before the peak"))?;

    let flat = PlateauParams::disabled();
    let a3 = search_left(curve, a1, a2, (curve[a1] + curve[a2]) / 2.0, &flat, false)
        .map_or((a1 + a2) / 2, |c| c.index);
    let a4 = search_right(curve, a1, m - 1, curve[a3], &flat, false).map_or(m - 1, |c| c.index);
    let a5 = (a2 as f64 / 2.0).round() as usize;

    Ok(AverageControlPoints { a1, a2, a3, a4, a5 })
}

/// Control points of one subject ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectControlPoints {
    /// Scalp peak.
    pub n1: usize,
    /// Skull trough.
    pub n2: usize,
    /// Inner skull boundary.
    pub inner: usize,
    /// Outer skull boundary.
    pub outer: usize,
    /// Outer scalp boundary.
    pub scalp: usize,
    /// The outer boundary came from a plateau rather than a crossing.
    pub outer_plateau: bool,
}

/// Locate boundaries on a subject ray, constrained by the average points.
///
/// `find_last` selects the last outer-skull crossing instead of the first;
/// it is set for rays ending above the ear–nasion plane.
pub fn subject_control_points(
    curve: &[f64],
    avg: &AverageControlPoints,
    plateau: &PlateauParams,
    min_intensity: f64,
    find_last: bool,
) -> SubjectControlPoints {
    let m = curve.len();
    let last = m.saturating_sub(1);
    let clamp = |i: usize| i.min(last);
    let flat = PlateauParams::disabled();

    let n1 = max_edge(curve, avg.a3, avg.a4, false).unwrap_or(clamp(avg.a1));
    let n2 = min_edge(curve, avg.a2, n1, false).unwrap_or(clamp(avg.a2));

    let (outer, outer_plateau) = match search_right(
        curve,
        n2,
        n1,
        (curve[n1] + curve[n2]) / 2.0,
        plateau,
        find_last,
    ) {
        Some(c) => (c.index, c.is_plateau()),
        None => ((n1 + n2) / 2, false),
    };

    let inner = {
        let lo = avg.a5.min(n2);
        let peak = curve[lo..=n2].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        search_left(curve, n2, lo, (curve[n2] + peak) / 2.0, &flat, false).map_or(n2, |c| c.index)
    };

    let scalp = search_right(curve, n1, last, (curve[n1] + min_intensity) / 2.0, &flat, false)
        .map_or(last, |c| c.index);

    SubjectControlPoints {
        n1,
        n2,
        inner,
        outer,
        scalp,
        outer_plateau,
    }
}
