//! Fit of a two-parameter exponential decay by least squares.
//!
//! Nelder-Mead finds the optimum, the converged simplex gives a curvature
//! estimate, and BFGS refines the fit starting from the simplex's best vertex.
extern crate nm_bfgs;

use nm_bfgs::{estimate_hessian, Bfgs, NelderMead, Rn, Simplex};

// samples of 2 exp(-0.7 t) with a little deterministic noise
fn data() -> Vec<(f64, f64)> {
    (0..20)
        .map(|i| {
            let t = i as f64 * 0.25;
            let noise = 0.01 * ((i * 7 % 5) as f64 - 2.);
            (t, 2. * (-0.7 * t).exp() + noise)
        })
        .collect()
}

fn sse(p: &Rn<f64>, d: &[(f64, f64)]) -> f64 {
    d.iter()
        .map(|&(t, y)| (p[0] * (-p[1] * t).exp() - y).powi(2))
        .sum()
}

fn sse_grad(p: &Rn<f64>, d: &[(f64, f64)]) -> Rn<f64> {
    let mut g = Rn::zeros(2);
    for &(t, y) in d {
        let e = (-p[1] * t).exp();
        let r = p[0] * e - y;
        g[0] += 2. * r * e;
        g[1] -= 2. * r * p[0] * t * e;
    }
    g
}

fn main() {
    let d = data();
    let f = |p: &Rn<f64>| sse(p, &d);
    let x0 = Rn::new(vec![1., 1.]);

    let nm = NelderMead::<f64>::new();
    let s0 = Simplex::initial(f, 0.1, &x0).expect("initial simplex");
    let s = nm.minimize_with_trace(s0, f, |_, info| {
        if info.k % 10 == 0 {
            println!("{:?}", info);
        }
    });
    let s = match s {
        Ok(s) => s,
        Err(e) => {
            println!("Nelder-Mead failed: {}", e);
            return;
        }
    };
    println!("Nelder-Mead result: {:?}", s.best());

    match estimate_hessian(f, &s) {
        Ok(est) => {
            println!("Hessian: {:?}", est.hessian);
            println!("Inverse: {:?}", est.inverse);
            println!("Standard errors: {:?}", est.standard_errors());
        }
        Err(e) => println!("Hessian estimate failed: {}", e),
    }

    let bfgs = Bfgs::<f64>::new();
    let r = bfgs.minimize_with_trace(
        &s.best().point,
        f,
        |p: &Rn<f64>| sse_grad(p, &d),
        |x, info| {
            println!("{:?}, {:?}", x.point, info);
        },
    );
    match r {
        Ok(m) => {
            println!("BFGS result: {:?} f = {}", m.point, m.value);
            println!("\tafter {} iterations", m.iterations);
            println!("\tinverse Hessian: {:?}", m.inv_hessian);
        }
        Err(e) => println!("BFGS failed: {}", e),
    }
}
