//! Kink-model least-squares fit used by the edge-multi trigger (spec §4.4,
//! §9 "kink model"): `y = a + b*(x-k) + c*max(0, x-k)`, fit by ordinary
//! least squares for a given breakpoint `k`; `c` is the slope change right
//! at the kink, which is what the edge-multi trigger compares against its
//! configured level.

/// Fit `(a, b, c)` and the resulting chi-squared for a fixed breakpoint `k`.
pub fn kink_model_result(k: f64, x: &[f64], y: &[f64]) -> (f64, f64, f64, f64) {
    assert_eq!(x.len(), y.len());
    // Normal equations for design matrix columns [1, (x-k), max(0,x-k)].
    let mut ata = [[0.0f64; 3]; 3];
    let mut aty = [0.0f64; 3];
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let u = xi - k;
        let v = u.max(0.0);
        let row = [1.0, u, v];
        for i in 0..3 {
            aty[i] += row[i] * yi;
            for j in 0..3 {
                ata[i][j] += row[i] * row[j];
            }
        }
    }
    let (a, b, c) = solve3(ata, aty);
    let mut chi2 = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let u = xi - k;
        let model = a + b * u + c * u.max(0.0);
        let d = yi - model;
        chi2 += d * d;
    }
    (a, b, c, chi2)
}

/// Scan `candidates` for the breakpoint minimizing chi-squared.
pub fn kink_model_fit(x: &[f64], y: &[f64], candidates: &[f64]) -> Option<(f64, f64)> {
    candidates
        .iter()
        .map(|&k| {
            let (_, _, _, chi2) = kink_model_result(k, x, y);
            (k, chi2)
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

/// Solve the symmetric 3x3 system `m * beta = rhs` by Cramer's rule.
fn solve3(m: [[f64; 3]; 3], rhs: [f64; 3]) -> (f64, f64, f64) {
    let det3 = |r: [[f64; 3]; 3]| -> f64 {
        r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
    };
    let d = det3(m);
    if d.abs() < 1e-12 {
        return (0.0, 0.0, 0.0);
    }
    let solve_col = |col: usize| -> f64 {
        let mut mm = m;
        for i in 0..3 {
            mm[i][col] = rhs[i];
        }
        det3(mm) / d
    };
    (solve_col(0), solve_col(1), solve_col(2))
}
