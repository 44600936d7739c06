//! 可分离的 3D 高斯平滑.
//!
//! 与 `scipy.ndimage.gaussian_filter` 的默认行为一致: 依次沿 `x`, `y`, `z` 做一维相关,
//! 边界采用 `reflect` 模式 (`d c b a | a b c d | d c b a`), 核半径为 `int(4σ + 0.5)`.
//!
//! 打开 `rayon` feature 时, 同一轴上的各条 lane 并行计算.

use ndarray::{Array3, ArrayView3, ArrayViewMut1, Axis, Zip};

/// 截断倍数.
const TRUNCATE: f64 = 4.0;

/// 归一化的一维高斯核, 长度为 `2r + 1`. `sigma <= 0` 时返回 `[1.0]`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || !sigma.is_finite() {
        return vec![1.0];
    }
    let radius = (TRUNCATE * sigma + 0.5) as i64;
    let denom = 2.0 * sigma * sigma;
    let mut w: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / denom).exp())
        .collect();
    let sum: f64 = w.iter().sum();
    w.iter_mut().for_each(|v| *v /= sum);
    w
}

/// `reflect` 边界下的合法下标.
#[inline]
fn reflect(i: i64, n: usize) -> usize {
    let n = n as i64;
    let m = i.rem_euclid(2 * n);
    (if m < n { m } else { 2 * n - 1 - m }) as usize
}

/// 对单条 lane 做一维相关.
fn correlate_lane(mut lane: ArrayViewMut1<'_, f64>, weights: &[f64]) {
    let n = lane.len();
    let radius = (weights.len() / 2) as i64;
    let buf = lane.to_vec();
    for (i, out) in lane.iter_mut().enumerate() {
        let base = i as i64 - radius;
        *out = weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * buf[reflect(base + k as i64, n)])
            .sum();
    }
}

/// 沿 `axis` 原地做一维相关.
fn correlate_axis(data: &mut Array3<f64>, axis: Axis, weights: &[f64]) {
    if data.len_of(axis) == 0 || weights.len() == 1 {
        return;
    }
    let lanes = Zip::from(data.lanes_mut(axis));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            lanes.par_for_each(|lane| correlate_lane(lane, weights));
        } else {
            lanes.for_each(|lane| correlate_lane(lane, weights));
        }
    }
}

/// 三个轴使用相同 `sigma` 的高斯平滑.
pub fn gaussian_filter(data: ArrayView3<'_, f64>, sigma: f64) -> Array3<f64> {
    let weights = gaussian_kernel(sigma);
    let mut out = data.to_owned();
    for axis in 0..3 {
        correlate_axis(&mut out, Axis(axis), &weights);
    }
    out
}

/// 将不大于 `threshold` 的体素置零. 返回保留的体素个数.
pub fn apply_threshold(data: &mut Array3<f64>, threshold: f64) -> usize {
    let mut kept = 0;
    data.mapv_inplace(|v| {
        if v > threshold {
            kept += 1;
            v
        } else {
            0.0
        }
    });
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_shape() {
        let k = gaussian_kernel(2.0);
        assert_eq!(k.len(), 17);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(k[0], k[16]);
        assert!(k[8] > k[7]);
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
    }

    #[test]
    fn test_reflect() {
        let n = 4;
        let got: Vec<_> = (-5..9).map(|i| reflect(i, n)).collect();
        assert_eq!(got, vec![3, 3, 2, 1, 0, 0, 1, 2, 3, 3, 2, 1, 0, 0]);
        assert_eq!(reflect(7, 1), 0);
    }

    #[test]
    fn test_constant_field_is_preserved() {
        let data = Array3::from_elem((5, 3, 9), 2.5);
        let out = gaussian_filter(data.view(), 2.0);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_impulse_mass_is_conserved() {
        let mut data = Array3::zeros((21, 21, 21));
        data[(10, 10, 10)] = 1.0;
        let out = gaussian_filter(data.view(), 2.0);
        assert!((out.sum() - 1.0).abs() < 1e-9);
        assert!(out[(10, 10, 10)] > out[(11, 10, 10)]);
        assert!((out[(9, 10, 10)] - out[(11, 10, 10)]).abs() < 1e-12);
    }

    #[test]
    fn test_threshold() {
        let mut data = Array3::from_shape_vec((1, 1, 4), vec![0.5, 0.01, -1.0, 0.02]).unwrap();
        assert_eq!(apply_threshold(&mut data, 0.01), 2);
        assert_eq!(data.as_slice().unwrap(), &[0.5, 0.0, 0.0, 0.02]);
    }
}
