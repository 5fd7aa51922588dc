//! Candle dual-tree complex wavelet transform, **training path**.
//!
//! Same transform as `cpu_dtcwt`, written with pure tensor ops (index_select
//! for boundary extension and polyphase sample picking, narrow + affine for
//! the FIR taps, stack + flatten for interleaving). The sample plans come from
//! `cpu_dtcwt`, so both paths read identical extension indices. Works on whatever device the input lives
//! on and autograd flows through every step.
//!
//! Input is a `(batch, channels, height, width)` map. Each high-pass level
//! comes out as `(batch, channels, 6, h, w, 2)`: six orientations and a
//! trailing `(re, im)` axis.

use candle_core::{Result, Tensor, D};

use crate::cpu_dtcwt::{decimation_streams, interpolation_streams, symmetric_index, Stream};
use crate::filters::{Biort, BiortBank, QShift, QShiftBank};

const SQRT_HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Output of [`DtcwtForward::forward`], input of [`DtcwtInverse::inverse`].
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// `(batch, channels, h_J, w_J)`
    pub lowpass: Tensor,
    /// Level 1 first; `(batch, channels, 6, h_j, w_j, 2)`
    pub highpasses: Vec<Tensor>,
    /// Spatial size of the transformed map, restored by the inverse.
    pub input_hw: (usize, usize),
}

struct Complex {
    re: Tensor,
    im: Tensor,
}

fn index_tensor(idx: Vec<u32>, device: &candle_core::Device) -> Result<Tensor> {
    let n = idx.len();
    Tensor::from_vec(idx, n, device)
}

fn gather(x: &Tensor, dim: usize, idx: Vec<u32>) -> Result<Tensor> {
    let idx = index_tensor(idx, x.device())?;
    x.contiguous()?.index_select(&idx, dim)
}

/// Every other sample along `dim`, starting at `offset`.
fn phase(x: &Tensor, dim: usize, offset: usize) -> Result<Tensor> {
    let n = x.dim(dim)?;
    gather(x, dim, (offset..n).step_by(2).map(|i| i as u32).collect())
}

fn last_dim(x: &Tensor) -> usize {
    x.rank() - 1
}

/// `a[0], b[0], a[1], b[1], ...` along the last axis.
fn interleave(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Tensor::stack(&[a, b], D::Minus1)?.flatten_from(D::Minus2)
}

/// `Σ_k taps[k] * xe[..., k..k+n]`
fn correlate(xe: &Tensor, taps: &[f64], n: usize) -> Result<Tensor> {
    let mut acc: Option<Tensor> = None;
    for (k, &tap) in taps.iter().enumerate() {
        if tap == 0.0 {
            continue;
        }
        let term = xe.narrow(D::Minus1, k, n)?.affine(tap, 0.0)?;
        acc = Some(match acc {
            Some(a) => (a + term)?,
            None => term,
        });
    }
    match acc {
        Some(a) => Ok(a),
        None => xe.narrow(D::Minus1, 0, n)?.zeros_like(),
    }
}

fn reversed(taps: &[f64]) -> Vec<f64> {
    taps.iter().rev().copied().collect()
}

/// Undecimated filtering along the last axis with half-sample symmetric extension.
fn filter_symmetric(x: &Tensor, h: &[f64]) -> Result<Tensor> {
    let n = x.dim(D::Minus1)?;
    let m = h.len() as isize;
    let half = m / 2;
    let idx = (0..n as isize + m - 1)
        .map(|j| symmetric_index(j - (m - 1) + half, n) as u32)
        .collect();
    let xe = gather(x, last_dim(x), idx)?;
    correlate(&xe, &reversed(h), n)
}

/// Evaluate dual-tree streams along the last axis and interleave them.
fn run_streams(x: &Tensor, streams: &[Stream]) -> Result<Tensor> {
    let d = last_dim(x);
    let phases = streams
        .iter()
        .map(|parts| {
            let mut acc: Option<Tensor> = None;
            for part in parts {
                let s = gather(x, d, part.index.iter().map(|&i| i as u32).collect())?;
                let y = correlate(&s, &reversed(&part.taps), part.output_len())?;
                acc = Some(match acc {
                    Some(a) => (a + y)?,
                    None => y,
                });
            }
            acc.ok_or_else(|| candle_core::Error::Msg("empty dual-tree stream".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&phases, D::Minus1)?.flatten_from(D::Minus2)
}

/// 4:2 dual-tree decimation along the last axis (length % 4 == 0).
fn dual_tree_decimate(x: &Tensor, ha: &[f64], hb: &[f64]) -> Result<Tensor> {
    let n = x.dim(D::Minus1)?;
    if n % 4 != 0 {
        return Err(candle_core::Error::Msg(format!(
            "dual-tree decimation needs length % 4 == 0, got {}",
            n
        )));
    }
    run_streams(x, &decimation_streams(n, ha, hb))
}

/// 2:4 dual-tree interpolation along the last axis.
fn dual_tree_interpolate(x: &Tensor, ha: &[f64], hb: &[f64]) -> Result<Tensor> {
    let n = x.dim(D::Minus1)?;
    if n % 2 != 0 {
        return Err(candle_core::Error::Msg(format!(
            "dual-tree interpolation needs an even length, got {}",
            n
        )));
    }
    run_streams(x, &interpolation_streams(n, ha, hb))
}

fn dual_tree_analysis(x: &Tensor, q: &QShiftBank) -> Result<(Tensor, Tensor)> {
    Ok((dual_tree_decimate(x, &q.h0b, &q.h0a)?, dual_tree_decimate(x, &q.h1b, &q.h1a)?))
}

fn dual_tree_synthesis(lo: &Tensor, hi: &Tensor, q: &QShiftBank) -> Result<Tensor> {
    dual_tree_interpolate(lo, &q.g0b, &q.g0a)? + dual_tree_interpolate(hi, &q.g1b, &q.g1a)?
}

/// Run a last-axis operation down the height axis of a `(B, C, H, W)` map.
fn along_height(x: &Tensor, f: impl Fn(&Tensor) -> Result<Tensor>) -> Result<Tensor> {
    f(&x.transpose(2, 3)?)?.transpose(2, 3)
}

fn q2c(y: &Tensor) -> Result<(Complex, Complex)> {
    let even = phase(y, 2, 0)?;
    let odd = phase(y, 2, 1)?;
    let a = phase(&even, 3, 0)?;
    let b = phase(&even, 3, 1)?;
    let c = phase(&odd, 3, 0)?;
    let d = phase(&odd, 3, 1)?;
    let z1 = Complex {
        re: (&a - &d)?.affine(SQRT_HALF, 0.0)?,
        im: (&b + &c)?.affine(SQRT_HALF, 0.0)?,
    };
    let z2 = Complex {
        re: (&a + &d)?.affine(SQRT_HALF, 0.0)?,
        im: (&b - &c)?.affine(SQRT_HALF, 0.0)?,
    };
    Ok((z1, z2))
}

fn c2q(z1: &Complex, z2: &Complex) -> Result<Tensor> {
    let a = (&z1.re + &z2.re)?.affine(SQRT_HALF, 0.0)?;
    let d = (&z2.re - &z1.re)?.affine(SQRT_HALF, 0.0)?;
    let b = (&z1.im + &z2.im)?.affine(SQRT_HALF, 0.0)?;
    let c = (&z1.im - &z2.im)?.affine(SQRT_HALF, 0.0)?;
    let even_rows = interleave(&a, &b)?;
    let odd_rows = interleave(&c, &d)?;
    Tensor::stack(&[&even_rows, &odd_rows], 3)?.flatten(2, 3)
}

fn pack(lh: (Complex, Complex), hl: (Complex, Complex), hh: (Complex, Complex)) -> Result<Tensor> {
    let order = [&lh.0, &hh.0, &hl.0, &hl.1, &hh.1, &lh.1];
    let bands = order
        .iter()
        .map(|z| Tensor::stack(&[&z.re, &z.im], D::Minus1))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&bands, 2)
}

fn orientation(hp: &Tensor, index: usize) -> Result<Complex> {
    let band = hp.get_on_dim(2, index)?;
    Ok(Complex {
        re: band.get_on_dim(4, 0)?,
        im: band.get_on_dim(4, 1)?,
    })
}

/// `(lh, hl, hh)` quad maps rebuilt from a packed level.
fn unpack(hp: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
    let z: Vec<Complex> = (0..6).map(|o| orientation(hp, o)).collect::<Result<_>>()?;
    Ok((c2q(&z[0], &z[5])?, c2q(&z[2], &z[3])?, c2q(&z[1], &z[4])?))
}

fn pad_to_even(x: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let x = if h % 2 == 1 { x.pad_with_same(2, 0, 1)? } else { x.clone() };
    if w % 2 == 1 {
        x.pad_with_same(3, 0, 1)
    } else {
        Ok(x)
    }
}

fn pad_to_multiple_of_four(x: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let x = if h % 4 != 0 { x.pad_with_same(2, 1, 1)? } else { x.clone() };
    if w % 4 != 0 {
        x.pad_with_same(3, 1, 1)
    } else {
        Ok(x)
    }
}

fn crop_border(y: &Tensor, target_h: usize, target_w: usize) -> Result<Tensor> {
    let (_, _, h, w) = y.dims4()?;
    let y = if h != target_h { y.narrow(2, 1, h - 2)? } else { y.clone() };
    if w != target_w {
        y.narrow(3, 1, w - 2)
    } else {
        Ok(y)
    }
}

/// Forward 2-D DTCWT.
#[derive(Debug, Clone)]
pub struct DtcwtForward {
    levels: usize,
    biort: BiortBank,
    qshift: QShiftBank,
}

impl DtcwtForward {
    pub fn new(levels: usize, biort: Biort, qshift: QShift) -> Self {
        Self { levels, biort: biort.bank(), qshift: qshift.bank() }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn forward(&self, x: &Tensor) -> Result<Decomposition> {
        let (_, _, h, w) = x.dims4()?;
        if self.levels == 0 {
            return Err(candle_core::Error::Msg("DTCWT needs at least one level".to_string()));
        }
        let b = &self.biort;
        let q = &self.qshift;

        // Level 1: undecimated biorthogonal filtering.
        let x = pad_to_even(x)?;
        let lo = along_height(&x, |t| filter_symmetric(t, &b.h0o))?;
        let hi = along_height(&x, |t| filter_symmetric(t, &b.h1o))?;
        let mut lowpass = filter_symmetric(&lo, &b.h0o)?;
        let lh = q2c(&filter_symmetric(&hi, &b.h0o)?)?;
        let hl = q2c(&filter_symmetric(&lo, &b.h1o)?)?;
        let hh = q2c(&filter_symmetric(&hi, &b.h1o)?)?;
        let mut highpasses = vec![pack(lh, hl, hh)?];

        for _ in 1..self.levels {
            let x = pad_to_multiple_of_four(&lowpass)?;
            let (lo, hi) = dual_tree_analysis(&x.transpose(2, 3)?, q)?;
            let (lo, hi) = (lo.transpose(2, 3)?, hi.transpose(2, 3)?);
            let (lolo, lohi) = dual_tree_analysis(&lo, q)?;
            let (hilo, hihi) = dual_tree_analysis(&hi, q)?;
            highpasses.push(pack(q2c(&hilo)?, q2c(&lohi)?, q2c(&hihi)?)?);
            lowpass = lolo;
        }

        Ok(Decomposition { lowpass, highpasses, input_hw: (h, w) })
    }
}

/// Inverse 2-D DTCWT. Filter families must match the forward transform.
#[derive(Debug, Clone)]
pub struct DtcwtInverse {
    biort: BiortBank,
    qshift: QShiftBank,
}

impl DtcwtInverse {
    pub fn new(biort: Biort, qshift: QShift) -> Self {
        Self { biort: biort.bank(), qshift: qshift.bank() }
    }

    pub fn inverse(&self, d: &Decomposition) -> Result<Tensor> {
        if d.highpasses.is_empty() {
            return Err(candle_core::Error::Msg("decomposition has no high-pass levels".to_string()));
        }
        let b = &self.biort;
        let q = &self.qshift;
        let mut z = d.lowpass.clone();

        for level in (1..d.highpasses.len()).rev() {
            let (lh, hl, hh) = unpack(&d.highpasses[level])?;
            if z.dims() != hl.dims() {
                return Err(candle_core::Error::Msg(format!(
                    "level {} lowpass {:?} does not match highpass quads {:?}",
                    level + 1,
                    z.dims(),
                    hl.dims()
                )));
            }
            let lo = dual_tree_synthesis(&z, &hl, q)?;
            let hi = dual_tree_synthesis(&lh, &hh, q)?;
            let y = dual_tree_synthesis(&lo.transpose(2, 3)?, &hi.transpose(2, 3)?, q)?
                .transpose(2, 3)?;
            let finer = d.highpasses[level - 1].dims();
            z = crop_border(&y, 2 * finer[3], 2 * finer[4])?;
        }

        let (lh, hl, hh) = unpack(&d.highpasses[0])?;
        let lo = (filter_symmetric(&z, &b.g0o)? + filter_symmetric(&hl, &b.g1o)?)?;
        let hi = (filter_symmetric(&lh, &b.g0o)? + filter_symmetric(&hh, &b.g1o)?)?;
        let y = (along_height(&lo, |t| filter_symmetric(t, &b.g0o))?
            + along_height(&hi, |t| filter_symmetric(t, &b.g1o))?)?;

        let (h, w) = d.input_hw;
        y.narrow(2, 0, h)?.narrow(3, 0, w)?.contiguous()
    }
}
