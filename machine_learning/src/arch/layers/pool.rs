use ndarray::prelude::*;

/// 2x2 max pooling with stride 2, dropping a trailing odd row or column.
pub fn max_pool_2x2(x: ArrayView3<f32>) -> Array3<f32> {
    let (h, w, c) = x.dim();

    Array3::from_shape_fn((h / 2, w / 2, c), |(i, j, k)| {
        let (y, x_) = (2 * i, 2 * j);
        x[[y, x_, k]]
            .max(x[[y, x_ + 1, k]])
            .max(x[[y + 1, x_, k]])
            .max(x[[y + 1, x_ + 1, k]])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_largest_of_each_window() {
        let x = Array3::from_shape_fn((4, 5, 1), |(i, j, _)| (i * 5 + j) as f32);
        let y = max_pool_2x2(x.view());

        assert_eq!(y.dim(), (2, 2, 1));
        assert_eq!(y[[0, 0, 0]], 6.);
        assert_eq!(y[[1, 1, 0]], 18.);
    }
}
