//! Data-level statistics backing the CORRELATION estimators.
//!
//! Pearson r² for numerical/numerical pairs, Cramér φ for
//! nominal/nominal, one-way ANOVA r² for mixed pairs, and the
//! matching two-sided p-values via the regularized incomplete beta
//! and gamma functions.  Undefined statistics (no data, no variation)
//! come back as `None` and surface as SQL NULL.

/// Pearson product-moment correlation, squared.
pub fn pearsonr2(xs: &[f64], ys: &[f64]) -> Option<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    let r = sxy / (sxx * syy).sqrt();
    Some(r * r)
}

/// Two-sided p-value for the t-test of a Pearson correlation.
pub fn pearsonr2_pvalue(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let r2 = pearsonr2(xs, ys)?;
    let n = xs.len();
    if n <= 2 {
        return None;
    }
    if r2 >= 1.0 {
        return Some(0.0);
    }
    let df = (n - 2) as f64;
    let t2 = r2 * df / (1.0 - r2);
    // P(|T| > t) = I_{df/(df+t²)}(df/2, 1/2).
    Some(betai(df / 2.0, 0.5, df / (df + t2)))
}

/// Cramér φ for two discrete columns.
pub fn cramerphi(xs: &[String], ys: &[String]) -> Option<f64> {
    let (chi2, n0, n1, n) = contingency_chi2(xs, ys)?;
    let min_levels = n0.min(n1);
    Some((chi2 / (n as f64 * (min_levels as f64 - 1.0))).sqrt())
}

/// p-value for the χ² independence test behind Cramér φ.
pub fn cramerphi_pvalue(xs: &[String], ys: &[String]) -> Option<f64> {
    let (chi2, n0, n1, _) = contingency_chi2(xs, ys)?;
    let df = ((n0 - 1) * (n1 - 1)) as f64;
    Some(chi2_sf(chi2, df))
}

fn contingency_chi2(xs: &[String], ys: &[String]) -> Option<(f64, usize, usize, usize)> {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n == 0 {
        return None;
    }
    let mut levels0 = Vec::new();
    let mut levels1 = Vec::new();
    for x in xs {
        if !levels0.contains(x) {
            levels0.push(x.clone());
        }
    }
    for y in ys {
        if !levels1.contains(y) {
            levels1.push(y.clone());
        }
    }
    let n0 = levels0.len();
    let n1 = levels1.len();
    if n0.min(n1) < 2 {
        // No variation in one column, so no notion of association.
        return None;
    }
    let mut counts = vec![vec![0f64; n1]; n0];
    for (x, y) in xs.iter().zip(ys) {
        let i = levels0.iter().position(|l| l == x).unwrap();
        let j = levels1.iter().position(|l| l == y).unwrap();
        counts[i][j] += 1.0;
    }
    let total = n as f64;
    let row_sums: Vec<f64> = counts.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> =
        (0..n1).map(|j| counts.iter().map(|r| r[j]).sum()).collect();
    let mut chi2 = 0.0;
    for i in 0..n0 {
        for j in 0..n1 {
            let expected = row_sums[i] * col_sums[j] / total;
            if expected > 0.0 {
                let d = counts[i][j] - expected;
                chi2 += d * d / expected;
            }
        }
    }
    Some((chi2, n0, n1, n))
}

/// One-way ANOVA r² of a numerical column against a discrete
/// grouping column.
pub fn anovar2(groups: &[String], ys: &[f64]) -> Option<f64> {
    let (f, n_groups, n) = f_oneway(groups, ys)?;
    if !f.is_finite() {
        return None;
    }
    let num = (n_groups - 1) as f64;
    let den = (n - n_groups) as f64;
    Some(1.0 - 1.0 / (1.0 + f * (num / den)))
}

/// p-value for the one-way ANOVA F-test.
pub fn anovar2_pvalue(groups: &[String], ys: &[f64]) -> Option<f64> {
    let (f, n_groups, n) = f_oneway(groups, ys)?;
    if !f.is_finite() {
        return None;
    }
    let d1 = (n_groups - 1) as f64;
    let d2 = (n - n_groups) as f64;
    Some(f_sf(f, d1, d2))
}

fn f_oneway(groups: &[String], ys: &[f64]) -> Option<(f64, usize, usize)> {
    debug_assert_eq!(groups.len(), ys.len());
    let n = groups.len();
    if n == 0 {
        return None;
    }
    let mut levels = Vec::new();
    for g in groups {
        if !levels.contains(g) {
            levels.push(g.clone());
        }
    }
    let k = levels.len();
    // One group carries no information; one observation per group
    // leaves no within-group variation.
    if k < 2 || k >= n {
        return None;
    }
    let grand_mean = ys.iter().sum::<f64>() / n as f64;
    let mut between = 0.0;
    let mut within = 0.0;
    for level in &levels {
        let members: Vec<f64> = groups
            .iter()
            .zip(ys)
            .filter(|(g, _)| *g == level)
            .map(|(_, y)| *y)
            .collect();
        let m = members.len() as f64;
        let mean = members.iter().sum::<f64>() / m;
        between += m * (mean - grand_mean) * (mean - grand_mean);
        within += members.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>();
    }
    let d1 = (k - 1) as f64;
    let d2 = (n - k) as f64;
    if within == 0.0 {
        return Some((f64::INFINITY, k, n));
    }
    Some(((between / d1) / (within / d2), k, n))
}

// ------------------------------------------------- special functions

/// Survival function of the χ² distribution with `df` degrees of
/// freedom.
pub fn chi2_sf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    gammq(df / 2.0, x / 2.0)
}

/// Survival function of the F distribution.
pub fn f_sf(f: f64, d1: f64, d2: f64) -> f64 {
    if f <= 0.0 {
        return 1.0;
    }
    betai(d2 / 2.0, d1 / 2.0, d2 / (d2 + d1 * f))
}

/// Natural log of the gamma function (Lanczos approximation).
fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

/// Regularized incomplete beta function I_x(a, b).
fn betai(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let bt = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b)
        + a * x.ln()
        + b * (1.0 - x).ln())
    .exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        bt * betacf(a, b, x) / a
    } else {
        1.0 - bt * betacf(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta function.
fn betacf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-300;
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Regularized upper incomplete gamma function Q(a, x).
fn gammq(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        1.0 - gser(a, x)
    } else {
        gcf(a, x)
    }
}

/// Series representation of P(a, x), for x < a + 1.
fn gser(a: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;
    if x <= 0.0 {
        return 0.0;
    }
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut del = sum;
    for _ in 0..MAX_ITER {
        ap += 1.0;
        del *= x / ap;
        sum += del;
        if del.abs() < sum.abs() * EPS {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Continued fraction representation of Q(a, x), for x >= a + 1.
fn gcf(a: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = b + an / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h * (-x + a * x.ln() - ln_gamma(a)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn pearson_of_linear_data_is_one() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!(close(pearsonr2(&xs, &ys).unwrap(), 1.0, 1e-12));
        assert!(close(pearsonr2_pvalue(&xs, &ys).unwrap(), 0.0, 1e-12));
    }

    #[test]
    fn pearson_of_constant_column_is_undefined() {
        let xs = [1.0, 1.0, 1.0];
        let ys = [2.0, 4.0, 6.0];
        assert!(pearsonr2(&xs, &ys).is_none());
    }

    #[test]
    fn pearson_pvalue_of_noise_is_large() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ys = [3.0, 1.0, 4.0, 1.0, 5.0, 2.0];
        let p = pearsonr2_pvalue(&xs, &ys).unwrap();
        assert!(p > 0.2, "p = {}", p);
    }

    #[test]
    fn cramerphi_of_identical_columns_is_one() {
        let xs: Vec<String> =
            ["a", "b", "a", "b"].iter().map(|s| s.to_string()).collect();
        let phi = cramerphi(&xs, &xs).unwrap();
        assert!(close(phi, 1.0, 1e-12));
    }

    #[test]
    fn cramerphi_without_variation_is_undefined() {
        let xs: Vec<String> = ["a", "a"].iter().map(|s| s.to_string()).collect();
        let ys: Vec<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        assert!(cramerphi(&xs, &ys).is_none());
    }

    #[test]
    fn anova_separated_groups_score_high() {
        let groups: Vec<String> =
            ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect();
        let ys = [1.0, 1.1, 0.9, 9.0, 9.1, 8.9];
        let r2 = anovar2(&groups, &ys).unwrap();
        assert!(r2 > 0.95, "r2 = {}", r2);
        let p = anovar2_pvalue(&groups, &ys).unwrap();
        assert!(p < 0.01, "p = {}", p);
    }

    #[test]
    fn chi2_sf_boundaries() {
        assert!(close(chi2_sf(0.0, 3.0), 1.0, 1e-12));
        assert!(chi2_sf(100.0, 3.0) < 1e-10);
        // Median of chi² with 2 df is 2 ln 2.
        assert!(close(chi2_sf(2.0 * (2.0f64).ln(), 2.0), 0.5, 1e-9));
    }

    #[test]
    fn f_sf_boundaries() {
        assert!(close(f_sf(0.0, 2.0, 10.0), 1.0, 1e-12));
        assert!(f_sf(1000.0, 2.0, 10.0) < 1e-6);
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        assert!(close(ln_gamma(5.0), (24.0f64).ln(), 1e-10));
        assert!(close(ln_gamma(1.0), 0.0, 1e-10));
        assert!(close(ln_gamma(0.5), (std::f64::consts::PI).sqrt().ln(), 1e-10));
    }
}
