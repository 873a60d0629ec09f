use docrag_core::Metric;

/// Similarity of `a` and `b` under `metric`, in `[0, 1]`. Vectors must have equal length.
pub fn similarity(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => {
            let (dot, na, nb) = a.iter().zip(b).fold((0f32, 0f32, 0f32), |(d, x, y), (p, q)| (d + p * q, x + p * p, y + q * q));
            if na == 0.0 || nb == 0.0 { return 0.0; }
            clamp_unit(dot / (na.sqrt() * nb.sqrt()))
        }
        Metric::DotProduct => clamp_unit(dot(a, b)),
        Metric::L2 => {
            let dist = a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum::<f32>().sqrt();
            1.0 / (1.0 + dist)
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(p, q)| p * q).sum()
}

fn clamp_unit(x: f32) -> f32 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}
