//! Absolute-coordinate calibration.
//!
//! User-supplied matrices act on coordinates normalized to the unit square
//! over the device extent, so one matrix fits every device regardless of its
//! axis ranges. At install time the matrix is wrapped into device space:
//!
//! ```text
//! M = T_unnormalize · U · T_normalize
//! ```
//!
//! and `M` is what the flush path applies to every absolute coordinate.

use super::decoder::AbsInfo;
use crate::utils::Matrix;

/// udev property carrying the default calibration matrix of a device,
/// as six whitespace-separated floats in row-major order.
pub const CALIBRATION_MATRIX_PROPERTY: &str = "LIBINPUT_CALIBRATION_MATRIX";

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// Calibration capability of a device with absolute x/y axes.
///
/// Installed at configure time; devices without both axes do not carry one.
#[derive(Debug)]
pub struct Calibration {
    absinfo_x: AbsInfo,
    absinfo_y: AbsInfo,
    fake_resolution: bool,
    matrix: Matrix,
    user_matrix: [f32; 6],
    default_matrix: [f32; 6],
    apply: bool,
}

impl Calibration {
    /// Builds the calibration state from the device's axis ranges.
    ///
    /// Axes reporting a resolution of 0 are forced to 1 and the device is
    /// flagged as having no usable physical size.
    pub(crate) fn new(mut absinfo_x: AbsInfo, mut absinfo_y: AbsInfo) -> Calibration {
        let mut fake_resolution = false;
        for info in [&mut absinfo_x, &mut absinfo_y] {
            if info.resolution == 0 {
                info.resolution = 1;
                fake_resolution = true;
            }
        }
        Calibration {
            absinfo_x,
            absinfo_y,
            fake_resolution,
            matrix: Matrix::IDENTITY,
            user_matrix: IDENTITY,
            default_matrix: IDENTITY,
            apply: false,
        }
    }

    /// Seeds the attach-time default and installs it.
    pub(crate) fn set_default_matrix(&mut self, matrix: [f32; 6]) {
        self.default_matrix = matrix;
        self.set_matrix(matrix);
    }

    /// Installs a user calibration matrix. Always succeeds.
    pub fn set_matrix(&mut self, matrix: [f32; 6]) {
        self.user_matrix = matrix;
        if matrix == IDENTITY {
            self.matrix = Matrix::IDENTITY;
            self.apply = false;
            return;
        }

        let min_x = self.absinfo_x.minimum as f32;
        let min_y = self.absinfo_y.minimum as f32;
        let sx = (self.absinfo_x.maximum - self.absinfo_x.minimum + 1) as f32;
        let sy = (self.absinfo_y.maximum - self.absinfo_y.minimum + 1) as f32;

        let normalize = Matrix::scale(1.0 / sx, 1.0 / sy) * Matrix::translate(-min_x, -min_y);
        let unnormalize = Matrix::translate(min_x, min_y) * Matrix::scale(sx, sy);

        self.matrix = unnormalize * Matrix::from_affine(matrix) * normalize;
        self.apply = !self.matrix.is_identity();
    }

    /// The user matrix as last set, and whether it is non-default
    /// (differs from identity).
    pub fn matrix(&self) -> ([f32; 6], bool) {
        (self.user_matrix, self.user_matrix != IDENTITY)
    }

    /// The default matrix seeded when the device was attached.
    pub fn default_matrix(&self) -> [f32; 6] {
        self.default_matrix
    }

    /// Transforms device coordinates through the installed matrix.
    pub(crate) fn transform(&self, x: i32, y: i32) -> (i32, i32) {
        if self.apply {
            self.matrix.apply(x, y)
        } else {
            (x, y)
        }
    }

    /// Physical extent in millimeters, unless the resolution was faked.
    pub(crate) fn size(&self) -> Option<(f64, f64)> {
        if self.fake_resolution {
            return None;
        }
        Some((
            (self.absinfo_x.maximum - self.absinfo_x.minimum) as f64
                / self.absinfo_x.resolution as f64,
            (self.absinfo_y.maximum - self.absinfo_y.minimum) as f64
                / self.absinfo_y.resolution as f64,
        ))
    }

    pub(crate) fn absinfo_x(&self) -> &AbsInfo {
        &self.absinfo_x
    }
}

/// Parses the value of [`CALIBRATION_MATRIX_PROPERTY`].
///
/// Returns `None` unless the string holds exactly six floats.
pub fn parse_calibration_property(value: &str) -> Option<[f32; 6]> {
    let mut matrix = [0.0f32; 6];
    let mut parts = value.split_whitespace();
    for slot in matrix.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    parts.next().is_none().then_some(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absinfo(minimum: i32, maximum: i32, resolution: i32) -> AbsInfo {
        AbsInfo {
            minimum,
            maximum,
            fuzz: 0,
            flat: 0,
            resolution,
        }
    }

    #[test]
    fn matrix_roundtrip_is_bit_exact() {
        let mut cal = Calibration::new(absinfo(0, 1000, 10), absinfo(0, 1000, 10));
        let m = [1.2, 3.4, 5.6, 7.8, 9.10, 11.12];
        cal.set_matrix(m);
        let (back, non_default) = cal.matrix();
        assert_eq!(back, m);
        assert!(non_default);

        cal.set_matrix([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let (_, non_default) = cal.matrix();
        assert!(!non_default);
    }

    #[test]
    fn identity_leaves_extremes_untouched() {
        let cal = Calibration::new(absinfo(50, 1550, 0), absinfo(-20, 2480, 0));
        assert_eq!(cal.transform(50, -20), (50, -20));
        assert_eq!(cal.transform(1550, 2480), (1550, 2480));
    }

    #[test]
    fn matrix_acts_on_normalized_coordinates() {
        // reference computation in f64
        let user = [1.2f64, 3.4, 5.6, 7.8, 9.10, 11.12];
        let (sx, sy) = (1501.0f64, 2501.0f64);
        let reference = |x: f64, y: f64| {
            let (xn, yn) = (x / sx, y / sy);
            let xu = user[0] * xn + user[1] * yn + user[2];
            let yu = user[3] * xn + user[4] * yn + user[5];
            (xu * sx, yu * sy)
        };

        let mut cal = Calibration::new(absinfo(0, 1500, 30), absinfo(0, 2500, 30));
        cal.set_default_matrix([1.2, 3.4, 5.6, 7.8, 9.10, 11.12]);

        for (x, y) in [(0, 0), (1500, 2500), (750, 1250)] {
            let (tx, ty) = cal.transform(x, y);
            let (rx, ry) = reference(x as f64, y as f64);
            assert!((tx as f64 - rx).abs() <= 1.0, "x: {tx} vs {rx}");
            assert!((ty as f64 - ry).abs() <= 1.0, "y: {ty} vs {ry}");
        }

        // the seeded matrix is both current and default
        assert_eq!(cal.default_matrix(), cal.matrix().0);
    }

    #[test]
    fn faked_resolution_hides_physical_size() {
        let cal = Calibration::new(absinfo(0, 1000, 0), absinfo(0, 1000, 20));
        assert!(cal.size().is_none());

        let cal = Calibration::new(absinfo(0, 1000, 20), absinfo(0, 500, 20));
        assert_eq!(cal.size(), Some((50.0, 25.0)));
    }

    #[test]
    fn property_parsing() {
        assert_eq!(
            parse_calibration_property("1 0 0 0 1 0"),
            Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
        );
        assert_eq!(
            parse_calibration_property("1.2 3.4 5.6 7.8 9.10 11.12"),
            Some([1.2, 3.4, 5.6, 7.8, 9.10, 11.12])
        );
        assert_eq!(parse_calibration_property("1 2 3 4 5"), None);
        assert_eq!(parse_calibration_property("1 2 3 4 5 6 7"), None);
        assert_eq!(parse_calibration_property("a b c d e f"), None);
    }
}
