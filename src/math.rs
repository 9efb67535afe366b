use nalgebra as na;
use num_traits::{Float, NumCast};

/// Least-squares fit of `y = a*x^2 + b*x + c`, returns `[a, b, c]`.
pub fn quadratic_ls<T: na::ComplexField + Float>(
    x: &na::DVector<T>,
    y: &na::DVector<T>,
) -> Option<na::Matrix3x1<T>> {
    if x.len() < 3 || x.len() != y.len() {
        return None;
    }

    let n: T = <T as NumCast>::from(x.len())?;

    let s_x1 = x.sum();
    let x2 = x.map(|x| x * x);
    let s_x2 = x2.sum();
    let x3 = x2.zip_map(x, |a, b| a * b);
    let s_x3 = x3.sum();
    let x4 = x3.zip_map(x, |a, b| a * b);
    let s_x4 = x4.sum();
    let s_x2y = x2.zip_map(y, |x, y| x * y).sum();
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix3::new(s_x4, s_x3, s_x2, s_x3, s_x2, s_x1, s_x2, s_x1, n);
    let b = na::Matrix3x1::new(s_x2y, s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    qr_result.r().solve_upper_triangular(&qty)
}

pub fn gauss(x: f32, c: f32) -> f32 {
    (-((x * x) / (2.0 * c * c))).exp()
}

#[inline(always)]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub fn ease_out_quad(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

pub fn cubic_bezier(
    p0: na::Point2<f32>,
    p1: na::Point2<f32>,
    p2: na::Point2<f32>,
    p3: na::Point2<f32>,
    s: f32,
) -> na::Point2<f32> {
    let u = 1.0 - s;
    let w0 = u * u * u;
    let w1 = 3.0 * u * u * s;
    let w2 = 3.0 * u * s * s;
    let w3 = s * s * s;

    na::Point2::from(p0.coords * w0 + p1.coords * w1 + p2.coords * w2 + p3.coords * w3)
}

pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;

    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) * 0.5)
    } else {
        Some(values[mid])
    }
}

pub fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;

    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quadratic_fit_recovers_parabola() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x * x - 3.0 * x + 1.0).collect();

        let p = quadratic_ls(&na::DVector::from_vec(xs), &na::DVector::from_vec(ys)).unwrap();

        assert_abs_diff_eq!(p[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], -3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn quadratic_fit_needs_three_points() {
        let x = na::DVector::from_vec(vec![0.0f64, 1.0]);
        assert!(quadratic_ls(&x, &x).is_none());
    }

    #[test]
    fn bezier_hits_endpoints() {
        let p0 = na::Point2::new(0.1, 0.9);
        let p3 = na::Point2::new(0.7, 0.6);
        let p1 = na::Point2::new(0.2, 0.3);
        let p2 = na::Point2::new(0.5, 0.2);

        assert_eq!(cubic_bezier(p0, p1, p2, p3, 0.0), p0);
        assert_eq!(cubic_bezier(p0, p1, p2, p3, 1.0), p3);
    }

    #[test]
    fn ease_out_is_front_loaded() {
        assert_abs_diff_eq!(ease_out_quad(0.0), 0.0);
        assert_abs_diff_eq!(ease_out_quad(1.0), 1.0);
        assert!(ease_out_quad(0.5) > 0.5);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
