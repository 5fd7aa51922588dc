//! Filter banks for the dual-tree complex wavelet transform.
//!
//! Level 1 uses an odd-length biorthogonal pair applied without decimation
//! (`h0o`/`h1o` analysis, `g0o`/`g1o` synthesis). Levels 2 and up use an
//! orthonormal quarter-shift pair: tree `a` filters with `h0a`/`h1a`, tree `b`
//! with the time-reversed `h0b`/`h1b`, which puts the two trees half a sample
//! apart and makes their outputs behave as the real and imaginary parts of an
//! analytic wavelet. The quarter-shift synthesis filters are the time reverse
//! of the analysis filters.

use std::fmt;
use std::str::FromStr;

/// Near-symmetric 5/7 tap lowpass pair.
const NEAR_SYM_A_H0: [f64; 5] = [-0.05, 0.25, 0.6, 0.25, -0.05];
const NEAR_SYM_A_G0: [f64; 7] = [
    -3.0 / 280.0,
    -15.0 / 280.0,
    73.0 / 280.0,
    170.0 / 280.0,
    73.0 / 280.0,
    -15.0 / 280.0,
    -3.0 / 280.0,
];

/// Near-symmetric 13/19 tap lowpass pair.
const NEAR_SYM_B_H0: [f64; 13] = [
    -0.0017578125,
    0.0,
    0.022265625,
    -0.046875,
    -0.0482421875,
    0.296875,
    0.5552734375,
    0.296875,
    -0.0482421875,
    -0.046875,
    0.022265625,
    0.0,
    -0.0017578125,
];

/// First half (up to and including the centre tap) of the 19-tap synthesis
/// lowpass. The filter is symmetric; the tail mirrors these values.
const NEAR_SYM_B_G0_HALF: [f64; 10] = [
    7.069659893832e-05,
    0.0,
    -1.343211977235e-03,
    -1.885242638355e-03,
    7.163648995502e-03,
    2.387911601669e-02,
    -5.567109569590e-02,
    -5.173610848390e-02,
    2.998777863183e-01,
    5.594841341006e-01,
];

/// Tree-a lowpass of the 10-tap quarter-shift bank.
const QSHIFT_A_H0A: [f64; 10] = [
    0.0511304052838317,
    -0.0139753702468888,
    -0.109836051665971,
    0.263839561058938,
    0.766628467793037,
    0.563655710127052,
    0.000873622695217097,
    -0.100231219507476,
    -0.00168968127252815,
    -0.00618188189211644,
];

/// Tree-a lowpass of the 14-tap quarter-shift bank. Renormalized to unit
/// energy on construction.
const QSHIFT_B_H0A: [f64; 14] = [
    0.00325314,
    -0.00388321,
    0.03466035,
    -0.03887280,
    -0.11720389,
    0.27529538,
    0.75614564,
    0.56881042,
    0.01186609,
    -0.10671180,
    0.02382538,
    0.01702522,
    -0.00543948,
    -0.00455690,
];

/// Level-1 biorthogonal filter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Biort {
    NearSymA,
    #[default]
    NearSymB,
}

/// Quarter-shift filter family for levels 2 and up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QShift {
    QshiftA,
    #[default]
    QshiftB,
}

/// Level-1 analysis and synthesis filters.
#[derive(Debug, Clone, PartialEq)]
pub struct BiortBank {
    pub h0o: Vec<f64>,
    pub h1o: Vec<f64>,
    pub g0o: Vec<f64>,
    pub g1o: Vec<f64>,
}

/// Quarter-shift analysis (`h*`) and synthesis (`g*`) filters for both trees.
#[derive(Debug, Clone, PartialEq)]
pub struct QShiftBank {
    pub h0a: Vec<f64>,
    pub h1a: Vec<f64>,
    pub h0b: Vec<f64>,
    pub h1b: Vec<f64>,
    pub g0a: Vec<f64>,
    pub g1a: Vec<f64>,
    pub g0b: Vec<f64>,
    pub g1b: Vec<f64>,
}

/// Alternate signs: `out[i] = (-1)^(i + parity) * taps[i]`.
fn alternate(taps: &[f64], parity: usize) -> Vec<f64> {
    taps.iter()
        .enumerate()
        .map(|(i, &v)| if (i + parity) % 2 == 0 { v } else { -v })
        .collect()
}

/// Quadrature mirror of an orthonormal lowpass: `hp[n] = (-1)^n * h[m-1-n]`.
fn quadrature_mirror(h: &[f64]) -> Vec<f64> {
    let m = h.len();
    (0..m)
        .map(|n| if n % 2 == 0 { h[m - 1 - n] } else { -h[m - 1 - n] })
        .collect()
}

fn reversed(taps: &[f64]) -> Vec<f64> {
    taps.iter().rev().copied().collect()
}

impl Biort {
    pub fn name(self) -> &'static str {
        match self {
            Biort::NearSymA => "near_sym_a",
            Biort::NearSymB => "near_sym_b",
        }
    }

    pub fn bank(self) -> BiortBank {
        let (h0o, g0o): (Vec<f64>, Vec<f64>) = match self {
            Biort::NearSymA => (NEAR_SYM_A_H0.to_vec(), NEAR_SYM_A_G0.to_vec()),
            Biort::NearSymB => {
                let mut g0o = NEAR_SYM_B_G0_HALF.to_vec();
                g0o.extend(NEAR_SYM_B_G0_HALF[..NEAR_SYM_B_G0_HALF.len() - 1].iter().rev());
                (NEAR_SYM_B_H0.to_vec(), g0o)
            }
        };
        // Highpass pair from the opposite lowpass, so that
        // H0(z)G0(z) + H1(z)G1(z) is a pure delay.
        let h1o = alternate(&g0o, 1);
        let g1o = alternate(&h0o, 0);
        BiortBank { h0o, h1o, g0o, g1o }
    }
}

impl QShift {
    pub fn name(self) -> &'static str {
        match self {
            QShift::QshiftA => "qshift_a",
            QShift::QshiftB => "qshift_b",
        }
    }

    pub fn bank(self) -> QShiftBank {
        let raw: &[f64] = match self {
            QShift::QshiftA => &QSHIFT_A_H0A,
            QShift::QshiftB => &QSHIFT_B_H0A,
        };
        let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
        let h0a: Vec<f64> = raw.iter().map(|v| v / norm).collect();
        let h1a = quadrature_mirror(&h0a);
        let h0b = reversed(&h0a);
        let h1b = reversed(&h1a);
        QShiftBank {
            g0a: h0b.clone(),
            g1a: h1b.clone(),
            g0b: h0a.clone(),
            g1b: h1a.clone(),
            h0a,
            h1a,
            h0b,
            h1b,
        }
    }
}

impl fmt::Display for Biort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for QShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Biort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "near_sym_a" => Ok(Biort::NearSymA),
            "near_sym_b" => Ok(Biort::NearSymB),
            other => Err(format!(
                "unknown biorthogonal filters '{}'; expected 'near_sym_a' or 'near_sym_b'",
                other
            )),
        }
    }
}

impl FromStr for QShift {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qshift_a" => Ok(QShift::QshiftA),
            "qshift_b" => Ok(QShift::QshiftB),
            other => Err(format!(
                "unknown quarter-shift filters '{}'; expected 'qshift_a' or 'qshift_b'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biort_lowpass_unit_dc_gain() {
        for biort in [Biort::NearSymA, Biort::NearSymB] {
            let bank = biort.bank();
            let h0: f64 = bank.h0o.iter().sum();
            let g0: f64 = bank.g0o.iter().sum();
            assert!((h0 - 1.0).abs() < 1e-3, "{} h0o sum {}", biort, h0);
            assert!((g0 - 1.0).abs() < 1e-3, "{} g0o sum {}", biort, g0);
            // Highpass filters (nearly) reject DC.
            assert!(bank.h1o.iter().sum::<f64>().abs() < 1e-3);
            assert!(bank.g1o.iter().sum::<f64>().abs() < 1e-3);
        }
    }

    #[test]
    fn test_near_sym_b_lengths_and_symmetry() {
        let bank = Biort::NearSymB.bank();
        assert_eq!(bank.h0o.len(), 13);
        assert_eq!(bank.g0o.len(), 19);
        for i in 0..bank.g0o.len() {
            assert_eq!(bank.g0o[i], bank.g0o[bank.g0o.len() - 1 - i]);
        }
    }

    #[test]
    fn test_qshift_banks_are_orthonormal() {
        for q in [QShift::QshiftA, QShift::QshiftB] {
            let bank = q.bank();
            let h = &bank.h0a;
            let energy: f64 = h.iter().map(|v| v * v).sum();
            assert!((energy - 1.0).abs() < 1e-12);
            assert!((h.iter().sum::<f64>() - std::f64::consts::SQRT_2).abs() < 1e-6);
            // Even shifts are orthogonal (tolerance covers 8-digit published taps).
            for shift in (2..h.len()).step_by(2) {
                let dot: f64 = (0..h.len() - shift).map(|i| h[i] * h[i + shift]).sum();
                assert!(dot.abs() < 1e-7, "{} shift {} dot {}", q, shift, dot);
            }
            // Lowpass and its quadrature mirror are orthogonal at every even shift.
            for shift in (0..h.len()).step_by(2) {
                let dot: f64 = (0..h.len() - shift).map(|i| h[i + shift] * bank.h1a[i]).sum();
                assert!(dot.abs() < 1e-7);
            }
            assert_eq!(bank.h0b.first(), bank.h0a.last());
        }
    }

    #[test]
    fn test_qshift_tree_b_and_synthesis_are_time_reversed() {
        let bank = QShift::QshiftB.bank();
        assert_eq!(bank.h1b, reversed(&bank.h1a));
        assert_eq!(bank.g0a, bank.h0b);
        assert_eq!(bank.g0b, bank.h0a);
        assert_eq!(bank.g1a, bank.h1b);
        assert_eq!(bank.g1b, bank.h1a);
        // Highpass starts from the last lowpass tap: h1a[0] = h0a[m-1].
        assert_eq!(bank.h1a[0], bank.h0a[13]);
        assert_eq!(bank.h1a[1], -bank.h0a[12]);
        // Lowpass pair is positively aligned, highpass pair negatively.
        let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(p, q)| p * q).sum::<f64>();
        assert!(dot(&bank.h0b, &bank.h0a) > 0.0);
        assert!(dot(&bank.h1b, &bank.h1a) < 0.0);
    }

    #[test]
    fn test_filter_names_parse_back() {
        for b in [Biort::NearSymA, Biort::NearSymB] {
            assert_eq!(b.name().parse::<Biort>(), Ok(b));
        }
        for q in [QShift::QshiftA, QShift::QshiftB] {
            assert_eq!(q.to_string().parse::<QShift>(), Ok(q));
        }
        assert!("antonini".parse::<Biort>().is_err());
    }
}
