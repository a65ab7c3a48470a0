//! Sample random variates from supported distributions

use rand::prelude::Rng;
use rand_distr::Distribution;

/// Sample an exponential waiting time with the given `rate` using provided `rng`
///
/// A rate of zero means the event never fires and yields `f64::INFINITY`
/// without consuming randomness.
pub fn exponential<R: Rng>(rate: f64, rng: &mut R) -> f64 {
    assert!(rate >= 0.0, "exponential called with negative rate");
    if rate == 0.0 {
        return f64::INFINITY;
    }
    rand_distr::Exp::new(rate).unwrap().sample(rng)
}

/// Sample a Poisson random variate from a distribution with mean `lambda` using provided `rng`
///
/// May panic or produce incorrect results on invalid lambda
///
/// Optimized for case where a single sample is needed for a given set of parameters
pub fn poisson<R: Rng>(lambda: f64, rng: &mut R) -> u64 {
    // rand_distr Poisson was slower for large lambda
    // This performance optimization probably mattered more for older versions
    if lambda <= 10.0 {
        direct_poisson(lambda, rng)
    } else {
        rand_distr::Poisson::new(lambda).unwrap().sample(rng)
    }
}

/// Sample a Poisson random variate from a distribution with mean `lambda` using provided `rng`
///
/// Uses the Algorithm 3 described in <https://www.jstor.org/stable/2347913>
///
/// Faster than the `rand_distr` implementation for single samples with small lambdas
fn direct_poisson<R: Rng>(lambda: f64, rng: &mut R) -> u64 {
    assert!(lambda >= 0.0, "Poisson called with negative lambda");
    let mut x = 0;
    let mut p = (-lambda).exp();
    let mut u = rng.gen::<f64>();

    while u > p {
        x += 1;
        u -= p;
        p *= lambda / x as f64;
    }

    x
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::{exponential, poisson};

    #[test]
    fn zero_rate_never_fires() {
        let mut rng = Pcg64::seed_from_u64(1);
        assert!(exponential(0.0, &mut rng).is_infinite());
    }

    #[test]
    fn exponential_mean_tracks_rate() {
        let mut rng = Pcg64::seed_from_u64(2);
        let rate = 4.0;
        let n = 20_000;
        let mean = (0..n).map(|_| exponential(rate, &mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 1.0 / rate).abs() < 0.01);
    }

    #[test]
    fn poisson_mean_tracks_lambda() {
        let mut rng = Pcg64::seed_from_u64(3);
        for lambda in [0.5, 4.0, 40.0] {
            let n = 20_000;
            let mean = (0..n).map(|_| poisson(lambda, &mut rng)).sum::<u64>() as f64 / n as f64;
            assert!((mean - lambda).abs() < lambda.max(1.0) * 0.05);
        }
    }
}
