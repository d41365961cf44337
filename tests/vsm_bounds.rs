use glam::Vec2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use wgpu_frame_graph::renderer::shadows::sampling::{
    chebyshev_upper_bound, gaussian_weights, reduce_light_bleeding, vsm_visibility,
};

#[test]
fn visibility_stays_in_unit_range() {
    let mut rng = SmallRng::seed_from_u64(42);
    for _ in 0..10_000 {
        let mean: f32 = rng.gen_range(0.0..1.0);
        let second = mean * mean + rng.gen_range(0.0..0.1);
        let depth = rng.gen_range(0.0..1.5);
        let min_variance = rng.gen_range(-0.001..0.01);
        let bleed = rng.gen_range(0.0..1.0);

        let p = chebyshev_upper_bound(Vec2::new(mean, second), depth, min_variance);
        assert!((0.0..=1.0).contains(&p), "p = {p}");
        let v = vsm_visibility(Vec2::new(mean, second), depth, min_variance, bleed);
        assert!((0.0..=1.0).contains(&v), "v = {v}");
    }
}

#[test]
fn receivers_at_or_before_the_occluder_are_fully_lit() {
    let moments = Vec2::new(0.4, 0.4 * 0.4);
    assert_eq!(chebyshev_upper_bound(moments, 0.4, 0.0), 1.0);
    assert_eq!(chebyshev_upper_bound(moments, 0.1, 0.0), 1.0);
}

#[test]
fn bound_decreases_with_receiver_distance() {
    let moments = Vec2::new(0.3, 0.3 * 0.3 + 0.001);
    let mut previous = 1.0;
    for step in 1..50 {
        let depth = 0.3 + step as f32 * 0.01;
        let p = chebyshev_upper_bound(moments, depth, 0.0);
        assert!(p <= previous);
        previous = p;
    }
}

#[test]
fn bleed_reduction_is_monotonic() {
    let mut previous = 0.0;
    for step in 0..=20 {
        let p = step as f32 / 20.0;
        let reduced = reduce_light_bleeding(p, 0.3);
        assert!(reduced >= previous);
        assert!((0.0..=1.0).contains(&reduced));
        previous = reduced;
    }
    assert_eq!(reduce_light_bleeding(0.0, 0.3), 0.0);
    assert_eq!(reduce_light_bleeding(1.0, 0.3), 1.0);
}

#[test]
fn bleed_reduction_darkens_the_low_tail() {
    for step in 0..6 {
        let p = step as f32 * 0.05;
        assert_eq!(reduce_light_bleeding(p, 0.3), 0.0, "p = {p}");
    }
    assert!(reduce_light_bleeding(0.5, 0.3) < 0.5);
    let expected = 0.7f32 * 0.7 * (3.0 - 2.0 * 0.7);
    assert!((reduce_light_bleeding(0.7, 0.0) - expected).abs() < 1e-6);
}

#[test]
fn blur_kernel_is_normalized() {
    let weights = gaussian_weights(2.0, 4);
    assert_eq!(weights.len(), 9);
    let sum: f32 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
}
