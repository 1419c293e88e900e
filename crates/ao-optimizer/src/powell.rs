//! Derivative-free bounded minimization using Powell's conjugate direction method.
//!
//! The search runs in box-normalized coordinates `u = (x - lower) / (upper - lower)`
//! so that dimensions with very different physical scales are treated alike.
//! Each line search is a bounded Brent minimization restricted to the part of
//! the direction that stays inside the unit box.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PowellError {
    #[error("no free dimensions to optimize")]
    EmptyProblem,

    #[error("x0 has {got} dimensions but bounds have {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("invalid bounds at index {index}: [{lower}, {upper}]")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowellOptions {
    pub max_iterations: usize,
    pub max_evaluations: Option<usize>,
    /// Line-search tolerance in normalized coordinates.
    pub xtol: f64,
    /// Relative decrease below which an iteration counts as converged.
    pub ftol: f64,
}

impl Default for PowellOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_evaluations: None,
            xtol: 1e-4,
            ftol: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    MaxIterations,
    MaxEvaluations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowellResult {
    pub x: Vec<f64>,
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

impl PowellResult {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Objective wrapper working in unit-box coordinates.
struct Scaled<'a, F> {
    f: F,
    bounds: &'a [(f64, f64)],
    evaluations: usize,
}

impl<F: FnMut(&[f64]) -> f64> Scaled<'_, F> {
    fn to_physical(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .zip(self.bounds)
            .map(|(ui, (lo, hi))| lo + ui.clamp(0.0, 1.0) * (hi - lo))
            .collect()
    }

    fn eval(&mut self, u: &[f64]) -> f64 {
        self.evaluations += 1;
        let x = self.to_physical(u);
        let value = (self.f)(x.as_slice());
        if value.is_finite() {
            value
        } else {
            f64::MAX
        }
    }
}

/// Minimizes `f` over the box `bounds`, starting from `x0` clipped into the box.
/// Non-finite starting coordinates are replaced by the interval midpoint.
pub fn minimize<F>(
    f: F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    options: &PowellOptions,
) -> Result<PowellResult, PowellError>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = bounds.len();
    if n == 0 {
        return Err(PowellError::EmptyProblem);
    }
    if x0.len() != n {
        return Err(PowellError::DimensionMismatch {
            got: x0.len(),
            expected: n,
        });
    }
    for (index, &(lower, upper)) in bounds.iter().enumerate() {
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(PowellError::InvalidBounds { index, lower, upper });
        }
    }

    let mut objective = Scaled {
        f,
        bounds,
        evaluations: 0,
    };

    let mut u: Vec<f64> = x0
        .iter()
        .zip(bounds)
        .map(|(x, (lo, hi))| {
            if x.is_finite() {
                ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
            } else {
                0.5
            }
        })
        .collect();

    let mut directions: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    let mut fval = objective.eval(&u);
    let mut iterations = 0;
    let termination;

    loop {
        let fx = fval;
        let u_start = u.clone();
        let mut biggest_index = 0;
        let mut biggest_drop = 0.0;

        for (i, direction) in directions.iter().enumerate() {
            let before = fval;
            let (f_new, u_new, _) = line_search(&mut objective, &u, direction, fval, options.xtol);
            fval = f_new;
            u = u_new;
            if before - fval > biggest_drop {
                biggest_drop = before - fval;
                biggest_index = i;
            }
        }
        iterations += 1;

        if 2.0 * (fx - fval) <= options.ftol * (fx.abs() + fval.abs()) + 1e-20 {
            termination = Termination::Converged;
            break;
        }
        if options
            .max_evaluations
            .is_some_and(|limit| objective.evaluations >= limit)
        {
            termination = Termination::MaxEvaluations;
            break;
        }
        if iterations >= options.max_iterations {
            termination = Termination::MaxIterations;
            break;
        }

        // Extrapolate along the net move of this iteration and decide whether
        // it should replace the direction of largest decrease.
        let net: Vec<f64> = u.iter().zip(&u_start).map(|(a, b)| a - b).collect();
        let extrapolated: Vec<f64> = u
            .iter()
            .zip(&net)
            .map(|(ui, d)| (ui + d).clamp(0.0, 1.0))
            .collect();
        let fx2 = objective.eval(&extrapolated);

        if fx > fx2 {
            let mut t = 2.0 * (fx + fx2 - 2.0 * fval);
            t *= (fx - fval - biggest_drop).powi(2);
            t -= biggest_drop * (fx - fx2).powi(2);
            if t < 0.0 {
                let (f_new, u_new, step) = line_search(&mut objective, &u, &net, fval, options.xtol);
                fval = f_new;
                u = u_new;
                if step.iter().any(|s| *s != 0.0) {
                    directions[biggest_index] = directions[n - 1].clone();
                    directions[n - 1] = step;
                }
            }
        }
    }

    Ok(PowellResult {
        x: objective.to_physical(&u),
        fun: fval,
        iterations,
        evaluations: objective.evaluations,
        termination,
    })
}

/// Minimizes along `direction` from `u`, staying inside `[0, 1]^n`.
/// Returns the new value, the new point and the step taken. Never accepts a
/// point worse than the start.
fn line_search<F: FnMut(&[f64]) -> f64>(
    objective: &mut Scaled<'_, F>,
    u: &[f64],
    direction: &[f64],
    fval: f64,
    xtol: f64,
) -> (f64, Vec<f64>, Vec<f64>) {
    let unchanged = || (fval, u.to_vec(), vec![0.0; u.len()]);

    let mut lmin = f64::NEG_INFINITY;
    let mut lmax = f64::INFINITY;
    for (ui, di) in u.iter().zip(direction) {
        if *di == 0.0 {
            continue;
        }
        let a = (0.0 - ui) / di;
        let b = (1.0 - ui) / di;
        lmin = lmin.max(a.min(b));
        lmax = lmax.min(a.max(b));
    }
    if !lmin.is_finite() || !lmax.is_finite() || lmax - lmin <= f64::EPSILON {
        return unchanged();
    }

    let point = |t: f64| -> Vec<f64> {
        u.iter()
            .zip(direction)
            .map(|(ui, di)| (ui + t * di).clamp(0.0, 1.0))
            .collect()
    };

    let (t, f_new) = brent_bounded(|t| objective.eval(&point(t)), lmin, lmax, xtol, 500);
    if f_new < fval {
        let u_new = point(t);
        let step = u_new.iter().zip(u).map(|(a, b)| a - b).collect();
        (f_new, u_new, step)
    } else {
        unchanged()
    }
}

/// Brent's bounded scalar minimization on `[a, b]`.
fn brent_bounded<F: FnMut(f64) -> f64>(
    mut f: F,
    mut a: f64,
    mut b: f64,
    xatol: f64,
    max_evaluations: usize,
) -> (f64, f64) {
    let sqrt_eps = f64::EPSILON.sqrt();
    let golden_mean = 0.5 * (3.0 - 5.0_f64.sqrt());

    let mut fulc = a + golden_mean * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat: f64 = 0.0;
    let mut e: f64 = 0.0;
    let mut fx = f(xf);
    let mut evaluations = 1;
    let mut ffulc = fx;
    let mut fnfc = fx;
    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
    let mut tol2 = 2.0 * tol1;

    let sign = |v: f64| -> f64 {
        if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        }
    };

    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        let mut golden = true;

        if e.abs() > tol1 {
            // Parabolic fit through the three best points.
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                golden = false;
                if (x - a) < tol2 || (b - x) < tol2 {
                    let si = sign(xm - xf) + if xm == xf { 1.0 } else { 0.0 };
                    rat = tol1 * si;
                }
            }
        }

        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden_mean * e;
        }

        let si = sign(rat) + if rat == 0.0 { 1.0 } else { 0.0 };
        let x = xf + si * rat.abs().max(tol1);
        let fu = f(x);
        evaluations += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
        tol2 = 2.0 * tol1;

        if evaluations >= max_evaluations {
            break;
        }
    }

    (xf, fx)
}
