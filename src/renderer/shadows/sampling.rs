//! CPU mirrors of the shadow lookup math in `shader/lighting.wgsl`.
//!
//! The WGSL functions of the same names must stay in sync with these.

use glam::Vec2;

/// Variance floor used when the caller passes a non-positive minimum.
pub const DEFAULT_MIN_VARIANCE: f32 = 0.00002;

/// One-tailed Chebyshev bound on the probability that a receiver at `depth`
/// is lit, given the filtered moments `(E[d], E[d²])`.
pub fn chebyshev_upper_bound(moments: Vec2, depth: f32, min_variance: f32) -> f32 {
    if depth <= moments.x {
        return 1.0;
    }
    let floor = if min_variance > 0.0 {
        min_variance
    } else {
        DEFAULT_MIN_VARIANCE
    };
    let variance = (moments.y - moments.x * moments.x).max(floor);
    let delta = depth - moments.x;
    (variance / (variance + delta * delta)).clamp(0.0, 1.0)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Cuts off the low tail of the Chebyshev bound, trading a little contact
/// softness for less light bleeding through overlapping occluders.
pub fn reduce_light_bleeding(p_max: f32, amount: f32) -> f32 {
    let amount = amount.clamp(0.0, 0.99);
    smoothstep(amount, 1.0, p_max)
}

/// Depth bias for the directional PCF lookup; grows as the surface turns
/// away from the light.
pub fn slope_scaled_bias(n_dot_l: f32, min_bias: f32, max_bias: f32) -> f32 {
    (max_bias * (1.0 - n_dot_l.clamp(0.0, 1.0))).max(min_bias)
}

/// Index of the cascade band containing a fragment at `view_depth`.
/// Depths beyond the last threshold fall into the final band.
pub fn select_cascade(view_depth: f32, thresholds: &[f32]) -> usize {
    thresholds
        .iter()
        .position(|&threshold| view_depth < threshold)
        .unwrap_or(thresholds.len())
}

/// Full point-light visibility for a receiver, as evaluated per fragment.
pub fn vsm_visibility(moments: Vec2, depth: f32, min_variance: f32, bleed_reduction: f32) -> f32 {
    let p_max = chebyshev_upper_bound(moments, depth, min_variance);
    reduce_light_bleeding(p_max, bleed_reduction)
}

/// Normalized Gaussian weights for a `2 * radius + 1` tap kernel.
pub fn gaussian_weights(sigma: f32, radius: usize) -> Vec<f32> {
    let sigma = sigma.max(1.0e-3);
    let mut weights: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for weight in &mut weights {
        *weight /= sum;
    }
    weights
}
