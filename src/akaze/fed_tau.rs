//! Fast Explicit Diffusion step sizes.
//!
//! An explicit diffusion scheme is only stable for steps up to `tau_max`.
//! FED cycles mix short and long steps so that a whole cycle reaches a much
//! longer diffusion time than that limit allows per step, while staying stable.
//! See Grewenig, Weickert and Bruhn, "From box filtering to fast explicit
//! diffusion", DAGM 2010.

use std::f64::consts::PI;

/// Step sizes of a single FED cycle that diffuses for `time` in total.
///
/// The steps are reordered in a kappa cycle so that rounding errors of the
/// large steps are damped by the small ones.
pub fn fed_tau_by_process_time(time: f64, tau_max: f64) -> Vec<f64> {
    if time <= 0.0 {
        return vec![];
    }
    let n = (((3.0 * time / tau_max + 0.25).sqrt() - 0.5 - 1.0e-8).ceil() + 0.5) as usize;
    let scale = 3.0 * time / (tau_max * (n * (n + 1)) as f64);
    let c = 1.0 / (4.0 * n as f64 + 2.0);
    let d = scale * tau_max / 2.0;
    let sorted: Vec<f64> = (0..n)
        .map(|k| {
            let h = (PI * (2.0 * k as f64 + 1.0) * c).cos();
            d / (h * h)
        })
        .collect();

    let kappa = n / 2;
    if kappa == 0 {
        return sorted;
    }
    let mut prime = n as u64 + 1;
    while !primal::is_prime(prime) {
        prime += 1;
    }
    let mut k = 0u64;
    let mut reordered = Vec::with_capacity(n);
    while reordered.len() < n {
        k += 1;
        let index = (k * kappa as u64) % prime;
        if index >= 1 && index as usize <= n {
            reordered.push(sorted[index as usize - 1]);
        }
    }
    reordered
}
