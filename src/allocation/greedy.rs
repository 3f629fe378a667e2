//! # Greedy Rounding
//!
//! $$
//! x_i=\Big\lfloor \frac{w_iB}{p_i}\Big\rfloor,\qquad
//! i^\*=\arg\max_i\Big(w_i-\frac{x_ip_i}{\sum_j x_jp_j}\Big)
//! $$
//!
//! Floor every position in descending weight order, then keep buying one
//! share of the most underweight asset that is still affordable.

/// `weights` must be non-negative and sum to one.
pub(crate) fn greedy_round(weights: &[f64], prices: &[f64], budget: f64) -> Vec<i64> {
  let n = weights.len();
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));

  let mut shares = vec![0i64; n];
  let mut available = budget;
  for &i in &order {
    let x = (weights[i] * budget / prices[i]).floor().max(0.0);
    let cost = x * prices[i];
    if cost <= available {
      shares[i] = x as i64;
      available -= cost;
    }
  }

  loop {
    let invested: f64 = shares.iter().zip(prices).map(|(&x, p)| x as f64 * p).sum();
    let pick = order
      .iter()
      .copied()
      .filter(|&i| prices[i] <= available)
      .map(|i| {
        let current = if invested > 0.0 {
          shares[i] as f64 * prices[i] / invested
        } else {
          0.0
        };
        (i, weights[i] - current)
      })
      .filter(|&(_, deficit)| deficit > 0.0)
      .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((i, _)) = pick else {
      break;
    };
    shares[i] += 1;
    available -= prices[i];
  }

  shares
}
