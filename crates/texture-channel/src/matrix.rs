//! Column-major 4x4 transform helpers for texture coordinates
//!
//! Texture frames carry the sampling transform of the GPU surface. Front
//! facing cameras additionally get a horizontal flip folded in so the
//! consumer sees a mirrored image, matching what the user sees in a mirror.

/// Column-major identity.
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Mirror texture coordinates around the vertical axis: x' = 1 - x.
pub fn horizontal_flip_matrix() -> [f32; 16] {
    [
        -1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        1.0, 0.0, 0.0, 1.0,
    ]
}

/// Column-major product `a * b`.
pub fn multiply_matrices(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[row + 4 * k] * b[k + 4 * col];
            }
            out[row + 4 * col] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[f32; 16], x: f32, y: f32) -> (f32, f32) {
        (
            m[0] * x + m[4] * y + m[12],
            m[1] * x + m[5] * y + m[13],
        )
    }

    #[test]
    fn test_identity_multiplication() {
        let flip = horizontal_flip_matrix();
        assert_eq!(multiply_matrices(&IDENTITY, &flip), flip);
        assert_eq!(multiply_matrices(&flip, &IDENTITY), flip);
    }

    #[test]
    fn test_horizontal_flip_mirrors_x() {
        let flip = horizontal_flip_matrix();
        assert_eq!(apply(&flip, 0.0, 0.25), (1.0, 0.25));
        assert_eq!(apply(&flip, 1.0, 0.5), (0.0, 0.5));
    }

    #[test]
    fn test_double_flip_is_identity() {
        let flip = horizontal_flip_matrix();
        let twice = multiply_matrices(&flip, &flip);
        assert_eq!(twice, IDENTITY);
    }
}
