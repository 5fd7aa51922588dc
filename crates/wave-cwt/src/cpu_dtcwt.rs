//! Dual-tree complex wavelet transform on plain `Vec` planes, **reference path**.
//!
//! Straightforward loops in f64, one 2-D plane at a time. The candle path in
//! `candle_dtcwt` computes exactly the same transform with tensor ops; the
//! tests there compare against this module.
//!
//! Planes are row-major `Vec<Vec<f64>>` with rows along the first index
//! (height) and columns along the second (width).

use crate::filters::{Biort, BiortBank, QShift, QShiftBank};

pub type Plane = Vec<Vec<f64>>;

/// One complex subband: `(re, im)` planes of equal shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexPlane {
    pub re: Plane,
    pub im: Plane,
}

/// Multi-level decomposition of a single plane.
///
/// `highpasses[j]` holds the six orientations of level `j + 1` in the order
/// `[lh.z1, hh.z1, hl.z1, hl.z2, hh.z2, lh.z2]` (roughly 15°, 45°, 75°,
/// -75°, -45°, -15°).
#[derive(Debug, Clone)]
pub struct CpuDecomposition {
    pub lowpass: Plane,
    pub highpasses: Vec<[ComplexPlane; 6]>,
    pub input_hw: (usize, usize),
}

const SQRT_HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Half-sample symmetric index into a signal of length `n`.
pub(crate) fn symmetric_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let i = i.rem_euclid(period);
    if i < n as isize {
        i as usize
    } else {
        (period - 1 - i) as usize
    }
}

/// Undecimated filtering with symmetric extension, centred on the filter.
pub fn filter_symmetric(x: &[f64], h: &[f64]) -> Vec<f64> {
    let n = x.len();
    let half = (h.len() / 2) as isize;
    (0..n)
        .map(|t| {
            h.iter()
                .enumerate()
                .map(|(k, hk)| hk * x[symmetric_index(t as isize + half - k as isize, n)])
                .sum()
        })
        .collect()
}

/// Samples of the extended signal convolved with a set of taps.
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub(crate) index: Vec<usize>,
    pub(crate) taps: Vec<f64>,
}

impl Part {
    /// Number of fully overlapped ('valid') outputs.
    pub(crate) fn output_len(&self) -> usize {
        self.index.len() + 1 - self.taps.len()
    }
}

/// One output phase of a dual-tree filter: the sum of its parts.
pub(crate) type Stream = Vec<Part>;

fn taps_from(h: &[f64], start: usize) -> Vec<f64> {
    h.iter().skip(start).step_by(2).copied().collect()
}

/// Trees a and b swap output phase with the sign of `Σ ha·hb`.
fn tree_a_leads(ha: &[f64], hb: &[f64]) -> bool {
    ha.iter().zip(hb).map(|(a, b)| a * b).sum::<f64>() > 0.0
}

fn shifted(ts: &[usize], ext: &[usize], back: usize) -> Vec<usize> {
    ts.iter().map(|&t| ext[t - back]).collect()
}

/// Streams of the 4:2 dual-tree decimator, in output phase order.
///
/// The signal (length `n`, a multiple of 4) is extended symmetrically by
/// `m = ha.len()` samples on each side. For `t = 5, 9, ...` tree a reads
/// extension samples `t - 1` and `t - 3` against the odd and even taps of
/// `ha`; tree b reads `t` and `t - 2` against those of `hb`.
pub(crate) fn decimation_streams(n: usize, ha: &[f64], hb: &[f64]) -> [Stream; 2] {
    let m = ha.len();
    let ext: Vec<usize> = (0..n + 2 * m).map(|i| symmetric_index(i as isize - m as isize, n)).collect();
    let ts: Vec<usize> = (5..n + 2 * m - 2).step_by(4).collect();
    let tree = |near: usize, far: usize, h: &[f64]| -> Stream {
        vec![
            Part { index: shifted(&ts, &ext, near), taps: taps_from(h, 0) },
            Part { index: shifted(&ts, &ext, far), taps: taps_from(h, 1) },
        ]
    };
    let a = tree(1, 3, ha);
    let b = tree(0, 2, hb);
    if tree_a_leads(ha, hb) {
        [a, b]
    } else {
        [b, a]
    }
}

/// Streams of the 2:4 dual-tree interpolator, in output phase order.
///
/// The signal (length `n`, even) is extended symmetrically by `m / 2` samples
/// on each side; each input sample yields two outputs per tree.
pub(crate) fn interpolation_streams(n: usize, ha: &[f64], hb: &[f64]) -> [Stream; 4] {
    let m = ha.len();
    let m2 = m / 2;
    let ext: Vec<usize> = (0..n + 2 * m2).map(|i| symmetric_index(i as isize - m2 as isize, n)).collect();
    let (hao, hae) = (taps_from(ha, 0), taps_from(ha, 1));
    let (hbo, hbe) = (taps_from(hb, 0), taps_from(hb, 1));
    let lead = tree_a_leads(ha, hb);
    let one = |index: Vec<usize>, taps: Vec<f64>| -> Stream { vec![Part { index, taps }] };

    if m2 % 2 == 0 {
        let t: Vec<usize> = (3..n + m).step_by(2).collect();
        let prev: Vec<usize> = t.iter().map(|v| v - 1).collect();
        let (ta, tb) = if lead { (t, prev) } else { (prev, t) };
        [
            one(shifted(&tb, &ext, 2), hae),
            one(shifted(&ta, &ext, 2), hbe),
            one(shifted(&tb, &ext, 0), hao),
            one(shifted(&ta, &ext, 0), hbo),
        ]
    } else {
        let t: Vec<usize> = (2..n + m - 1).step_by(2).collect();
        let prev: Vec<usize> = t.iter().map(|v| v - 1).collect();
        let (ta, tb) = if lead { (t, prev) } else { (prev, t) };
        [
            one(shifted(&tb, &ext, 0), hao),
            one(shifted(&ta, &ext, 0), hbo),
            one(shifted(&tb, &ext, 0), hae),
            one(shifted(&ta, &ext, 0), hbe),
        ]
    }
}

/// `out[j] = Σ_k h[k] s[j + len(h) - 1 - k]`, full overlap only.
fn convolve_valid(s: &[f64], h: &[f64]) -> Vec<f64> {
    let l = h.len();
    (0..s.len() + 1 - l)
        .map(|j| h.iter().enumerate().map(|(k, hk)| hk * s[j + l - 1 - k]).sum())
        .collect()
}

/// Evaluate the streams on `x` and interleave them phase by phase.
fn run_streams(x: &[f64], streams: &[Stream]) -> Vec<f64> {
    let phases: Vec<Vec<f64>> = streams
        .iter()
        .map(|parts| {
            let mut acc = vec![0.0; parts[0].output_len()];
            for part in parts {
                let s: Vec<f64> = part.index.iter().map(|&i| x[i]).collect();
                for (a, v) in acc.iter_mut().zip(convolve_valid(&s, &part.taps)) {
                    *a += v;
                }
            }
            acc
        })
        .collect();
    (0..phases[0].len()).flat_map(|j| phases.iter().map(move |p| p[j])).collect()
}

/// Decimate by 2 with the dual-tree pair `(ha, hb)`; `x.len()` must be a multiple of 4.
pub fn dual_tree_decimate(x: &[f64], ha: &[f64], hb: &[f64]) -> Vec<f64> {
    assert!(x.len() % 4 == 0, "dual-tree decimation needs length % 4 == 0, got {}", x.len());
    assert!(ha.len() == hb.len() && ha.len() % 2 == 0, "tree filters must share an even length");
    run_streams(x, &decimation_streams(x.len(), ha, hb))
}

/// Interpolate by 2 with the dual-tree pair `(ha, hb)`; `x.len()` must be even.
pub fn dual_tree_interpolate(x: &[f64], ha: &[f64], hb: &[f64]) -> Vec<f64> {
    assert!(x.len() % 2 == 0, "dual-tree interpolation needs an even length, got {}", x.len());
    assert!(ha.len() == hb.len() && ha.len() % 2 == 0, "tree filters must share an even length");
    run_streams(x, &interpolation_streams(x.len(), ha, hb))
}

/// Lowpass and highpass halves of one decimating level.
pub fn dual_tree_analysis(x: &[f64], bank: &QShiftBank) -> (Vec<f64>, Vec<f64>) {
    (
        dual_tree_decimate(x, &bank.h0b, &bank.h0a),
        dual_tree_decimate(x, &bank.h1b, &bank.h1a),
    )
}

/// Inverse of [`dual_tree_analysis`].
pub fn dual_tree_synthesis(lo: &[f64], hi: &[f64], bank: &QShiftBank) -> Vec<f64> {
    let y_lo = dual_tree_interpolate(lo, &bank.g0b, &bank.g0a);
    let y_hi = dual_tree_interpolate(hi, &bank.g1b, &bank.g1a);
    y_lo.iter().zip(&y_hi).map(|(a, b)| a + b).collect()
}

fn transpose(x: &Plane) -> Plane {
    if x.is_empty() {
        return Vec::new();
    }
    (0..x[0].len()).map(|j| x.iter().map(|row| row[j]).collect()).collect()
}

/// Apply `f` down every column.
fn columns(x: &Plane, f: impl Fn(&[f64]) -> Vec<f64>) -> Plane {
    transpose(&transpose(x).iter().map(|c| f(c)).collect())
}

/// Apply `f` along every row.
fn rows(x: &Plane, f: impl Fn(&[f64]) -> Vec<f64>) -> Plane {
    x.iter().map(|r| f(r)).collect()
}

fn add(a: &Plane, b: &Plane) -> Plane {
    a.iter()
        .zip(b)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(p, q)| p + q).collect())
        .collect()
}

/// Split a plane into quads and form the two complex subbands.
fn q2c(y: &Plane) -> (ComplexPlane, ComplexPlane) {
    let h = y.len() / 2;
    let w = y[0].len() / 2;
    let mut z1 = ComplexPlane { re: vec![vec![0.0; w]; h], im: vec![vec![0.0; w]; h] };
    let mut z2 = z1.clone();
    for i in 0..h {
        for j in 0..w {
            let a = y[2 * i][2 * j];
            let b = y[2 * i][2 * j + 1];
            let c = y[2 * i + 1][2 * j];
            let d = y[2 * i + 1][2 * j + 1];
            z1.re[i][j] = (a - d) * SQRT_HALF;
            z1.im[i][j] = (b + c) * SQRT_HALF;
            z2.re[i][j] = (a + d) * SQRT_HALF;
            z2.im[i][j] = (b - c) * SQRT_HALF;
        }
    }
    (z1, z2)
}

/// Inverse of [`q2c`].
fn c2q(z1: &ComplexPlane, z2: &ComplexPlane) -> Plane {
    let h = z1.re.len();
    let w = z1.re[0].len();
    let mut y = vec![vec![0.0; 2 * w]; 2 * h];
    for i in 0..h {
        for j in 0..w {
            y[2 * i][2 * j] = (z1.re[i][j] + z2.re[i][j]) * SQRT_HALF;
            y[2 * i + 1][2 * j + 1] = (z2.re[i][j] - z1.re[i][j]) * SQRT_HALF;
            y[2 * i][2 * j + 1] = (z1.im[i][j] + z2.im[i][j]) * SQRT_HALF;
            y[2 * i + 1][2 * j] = (z1.im[i][j] - z2.im[i][j]) * SQRT_HALF;
        }
    }
    y
}

fn pack(lh: (ComplexPlane, ComplexPlane), hl: (ComplexPlane, ComplexPlane), hh: (ComplexPlane, ComplexPlane)) -> [ComplexPlane; 6] {
    [lh.0, hh.0, hl.0, hl.1, hh.1, lh.1]
}

/// Returns `(lh, hl, hh)` quads rebuilt from the six packed orientations.
fn unpack(bands: &[ComplexPlane; 6]) -> (Plane, Plane, Plane) {
    let lh = c2q(&bands[0], &bands[5]);
    let hl = c2q(&bands[2], &bands[3]);
    let hh = c2q(&bands[1], &bands[4]);
    (lh, hl, hh)
}

/// Replicate the last row/column when a dimension is odd.
fn pad_to_even(x: Plane) -> Plane {
    let mut x = x;
    if x.len() % 2 == 1 {
        let last = x[x.len() - 1].clone();
        x.push(last);
    }
    if x[0].len() % 2 == 1 {
        for row in x.iter_mut() {
            let last = row[row.len() - 1];
            row.push(last);
        }
    }
    x
}

/// Replicate the first and last row/column when a dimension is not a multiple of 4.
fn pad_to_multiple_of_four(x: Plane) -> Plane {
    let mut x = x;
    if x.len() % 4 != 0 {
        let first = x[0].clone();
        let last = x[x.len() - 1].clone();
        x.insert(0, first);
        x.push(last);
    }
    if x[0].len() % 4 != 0 {
        for row in x.iter_mut() {
            let first = row[0];
            let last = row[row.len() - 1];
            row.insert(0, first);
            row.push(last);
        }
    }
    x
}

fn crop_border(x: Plane, target_h: usize, target_w: usize) -> Plane {
    let mut x = x;
    if x.len() != target_h {
        x = x[1..x.len() - 1].to_vec();
    }
    if x[0].len() != target_w {
        x = x.into_iter().map(|r| r[1..r.len() - 1].to_vec()).collect();
    }
    x
}

/// Forward transform of one plane.
pub fn forward(x: &Plane, levels: usize, biort: Biort, qshift: QShift) -> CpuDecomposition {
    assert!(levels >= 1, "need at least one decomposition level");
    assert!(!x.is_empty() && !x[0].is_empty(), "empty input plane");
    let input_hw = (x.len(), x[0].len());
    let b: BiortBank = biort.bank();
    let q: QShiftBank = qshift.bank();

    let x = pad_to_even(x.clone());
    let lo = columns(&x, |c| filter_symmetric(c, &b.h0o));
    let hi = columns(&x, |c| filter_symmetric(c, &b.h1o));
    let mut lowpass = rows(&lo, |r| filter_symmetric(r, &b.h0o));
    let lh = q2c(&rows(&hi, |r| filter_symmetric(r, &b.h0o)));
    let hl = q2c(&rows(&lo, |r| filter_symmetric(r, &b.h1o)));
    let hh = q2c(&rows(&hi, |r| filter_symmetric(r, &b.h1o)));
    let mut highpasses = vec![pack(lh, hl, hh)];

    for _ in 1..levels {
        let x = pad_to_multiple_of_four(lowpass);
        let low = |v: &[f64]| dual_tree_decimate(v, &q.h0b, &q.h0a);
        let high = |v: &[f64]| dual_tree_decimate(v, &q.h1b, &q.h1a);
        let lo = columns(&x, low);
        let hi = columns(&x, high);
        lowpass = rows(&lo, low);
        let lh = q2c(&rows(&hi, low));
        let hl = q2c(&rows(&lo, high));
        let hh = q2c(&rows(&hi, high));
        highpasses.push(pack(lh, hl, hh));
    }

    CpuDecomposition { lowpass, highpasses, input_hw }
}

/// Inverse transform; reproduces the input of [`forward`] up to rounding.
pub fn inverse(d: &CpuDecomposition, biort: Biort, qshift: QShift) -> Plane {
    let b = biort.bank();
    let q = qshift.bank();
    let mut z = d.lowpass.clone();

    for level in (1..d.highpasses.len()).rev() {
        let (lh, hl, hh) = unpack(&d.highpasses[level]);
        let lo: Plane = z.iter().zip(&hl).map(|(l, h)| dual_tree_synthesis(l, h, &q)).collect();
        let hi: Plane = lh.iter().zip(&hh).map(|(l, h)| dual_tree_synthesis(l, h, &q)).collect();
        let (lo_t, hi_t) = (transpose(&lo), transpose(&hi));
        let y = transpose(
            &lo_t.iter().zip(&hi_t).map(|(l, h)| dual_tree_synthesis(l, h, &q)).collect(),
        );
        let finer = &d.highpasses[level - 1][0].re;
        z = crop_border(y, 2 * finer.len(), 2 * finer[0].len());
    }

    let (lh, hl, hh) = unpack(&d.highpasses[0]);
    let synth = |lo: &Plane, hi: &Plane| -> Plane {
        add(&rows(lo, |r| filter_symmetric(r, &b.g0o)), &rows(hi, |r| filter_symmetric(r, &b.g1o)))
    };
    let lo = synth(&z, &hl);
    let hi = synth(&lh, &hh);
    let y = add(
        &columns(&lo, |c| filter_symmetric(c, &b.g0o)),
        &columns(&hi, |c| filter_symmetric(c, &b.g1o)),
    );

    let (h, w) = d.input_hw;
    y.into_iter().take(h).map(|r| r.into_iter().take(w).collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_plane(h: usize, w: usize) -> Plane {
        (0..h)
            .map(|i| (0..w).map(|j| ((i * 7 + j * 3) as f64 * 0.37).sin() + 0.1 * j as f64).collect())
            .collect()
    }

    fn max_abs_diff(a: &Plane, b: &Plane) -> f64 {
        a.iter()
            .zip(b)
            .flat_map(|(ra, rb)| ra.iter().zip(rb).map(|(p, q)| (p - q).abs()))
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_symmetric_index_reflects_at_both_ends() {
        assert_eq!(symmetric_index(-1, 5), 0);
        assert_eq!(symmetric_index(-2, 5), 1);
        assert_eq!(symmetric_index(5, 5), 4);
        assert_eq!(symmetric_index(6, 5), 3);
        assert_eq!(symmetric_index(12, 5), 2);
    }

    #[test]
    fn test_subband_shapes_for_14x14() {
        let d = forward(&test_plane(14, 14), 3, Biort::NearSymB, QShift::QshiftB);
        let sizes: Vec<(usize, usize)> = d
            .highpasses
            .iter()
            .map(|bands| (bands[0].re.len(), bands[0].re[0].len()))
            .collect();
        assert_eq!(sizes, vec![(7, 7), (4, 4), (2, 2)]);
        assert_eq!((d.lowpass.len(), d.lowpass[0].len()), (4, 4));
    }

    #[test]
    fn test_round_trip_all_filter_families() {
        let x = test_plane(12, 10);
        for biort in [Biort::NearSymA, Biort::NearSymB] {
            for qshift in [QShift::QshiftA, QShift::QshiftB] {
                let d = forward(&x, 3, biort, qshift);
                let y = inverse(&d, biort, qshift);
                let err = max_abs_diff(&x, &y);
                assert!(err < 1e-6, "{}/{} reconstruction error {}", biort, qshift, err);
            }
        }
    }

    #[test]
    fn test_dual_tree_round_trip_1d() {
        for qshift in [QShift::QshiftA, QShift::QshiftB] {
            let q = qshift.bank();
            for n in [4usize, 8, 16, 20] {
                let x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.9).cos() + 0.3 * (i as f64).sqrt()).collect();
                let (lo, hi) = dual_tree_analysis(&x, &q);
                let y = dual_tree_synthesis(&lo, &hi, &q);
                assert_eq!(y.len(), n);
                for (a, b) in x.iter().zip(&y) {
                    assert!((a - b).abs() < 1e-6, "{} n={}: {} vs {}", qshift, n, a, b);
                }
            }
        }
    }

    fn assert_close(got: &[f64], want: &[f64], what: &str) {
        assert_eq!(got.len(), want.len(), "{} length", what);
        for (i, (g, w)) in got.iter().zip(want).enumerate() {
            assert!((g - w).abs() < 1e-5, "{}[{}]: {} vs {}", what, i, g, w);
        }
    }

    /// Fixed coefficients of the symmetric-extension decimator (qshift_b).
    #[test]
    fn test_decimation_matches_reference_coefficients() {
        let q = QShift::QshiftB.bank();
        let x: Vec<f64> = (0..16).map(|i| (i as f64 * 0.9).cos()).collect();
        let (lo, hi) = dual_tree_analysis(&x, &q);
        assert_close(
            &lo,
            &[0.862015, -0.500788, -0.437594, 0.609121, 0.181900, -0.723407, -0.044059, 1.205000],
            "lowpass",
        );
        assert_close(
            &hi,
            &[-0.834864, 0.687430, 0.621309, -1.100742, -0.166640, 1.175399, -0.406205, -0.677054],
            "highpass",
        );

        let mut impulse = vec![0.0; 16];
        impulse[8] = 1.0;
        assert_close(
            &dual_tree_decimate(&impulse, &q.h0b, &q.h0a),
            &[0.023825, -0.005439, 0.011866, 0.0, 0.756146, 0.003253, -0.117204, 0.034660],
            "impulse",
        );
    }

    #[test]
    fn test_constant_signal_decimates_to_dc_gain() {
        for qshift in [QShift::QshiftA, QShift::QshiftB] {
            let q = qshift.bank();
            let x = vec![1.5; 12];
            let (lo, hi) = dual_tree_analysis(&x, &q);
            let gain: f64 = q.h0a.iter().sum();
            assert!(lo.iter().all(|v| (v - 1.5 * gain).abs() < 1e-6), "{} {:?}", qshift, lo);
            assert!(hi.iter().all(|v| v.abs() < 1e-5), "{} {:?}", qshift, hi);
        }
    }

    /// Level-2 coefficients of an 8×12 plane, near_sym_b + qshift_b.
    #[test]
    fn test_level_two_matches_reference_coefficients() {
        let d = forward(&test_plane(8, 12), 2, Biort::NearSymB, QShift::QshiftB);
        let want = [
            [0.452627, 0.419838, 0.805431, 1.394248, 1.773497, 1.761462],
            [0.142964, 0.450239, 0.907827, 1.293198, 1.728545, 2.108594],
            [0.049272, 0.472005, 0.922929, 1.275201, 1.738052, 2.121759],
            [0.120851, 0.496917, 0.858909, 1.330516, 1.807164, 1.808083],
        ];
        assert_eq!(d.lowpass.len(), 4);
        for (row, w) in d.lowpass.iter().zip(&want) {
            assert_close(row, w, "lowpass");
        }

        let lh_z1 = &d.highpasses[1][0];
        assert_close(&lh_z1.re[0], &[0.141122, -0.109133, 0.261909], "lh.z1 re");
        assert_close(&lh_z1.im[0], &[0.258563, -0.055794, -0.035491], "lh.z1 im");
        let hh_z2 = &d.highpasses[1][4];
        assert_close(&hh_z2.re[1], &[-0.103131, 0.540530, -0.253579], "hh.z2 re");
        assert_close(&hh_z2.im[1], &[-0.476875, 0.050468, 0.371698], "hh.z2 im");
    }

    #[test]
    fn test_constant_plane_has_negligible_detail() {
        let x = vec![vec![2.5; 16]; 16];
        let d = forward(&x, 3, Biort::NearSymB, QShift::QshiftB);
        for (level, bands) in d.highpasses.iter().enumerate() {
            for band in bands.iter() {
                let peak = band.re.iter().chain(&band.im).flatten().fold(0.0f64, |m, v| m.max(v.abs()));
                assert!(peak < 5e-3, "level {} detail peak {}", level + 1, peak);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_round_trip_any_size(h in 2usize..20, w in 2usize..20, seed in 0u32..1000) {
            let x: Plane = (0..h)
                .map(|i| (0..w).map(|j| ((i * 31 + j * 17 + seed as usize) as f64 * 0.61).sin()).collect())
                .collect();
            let d = forward(&x, 3, Biort::NearSymB, QShift::QshiftB);
            let y = inverse(&d, Biort::NearSymB, QShift::QshiftB);
            prop_assert_eq!(y.len(), h);
            prop_assert_eq!(y[0].len(), w);
            prop_assert!(max_abs_diff(&x, &y) < 1e-6);
        }
    }
}
