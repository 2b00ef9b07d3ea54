//! Page geometry: the A4 target size, fit-to-page placement, and affine matrices.

/// A4 width in PDF points (210 mm).
pub const A4_WIDTH_PT: f32 = 595.28;
/// A4 height in PDF points (297 mm).
pub const A4_HEIGHT_PT: f32 = 841.89;
/// Allowed deviation when checking page sizes.
pub const SIZE_TOLERANCE_PT: f32 = 0.5;

/// Points per millimetre.
pub const PT_PER_MM: f32 = 72.0 / 25.4;

/// Physical page size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const A4: PageSize = PageSize {
        width: A4_WIDTH_PT,
        height: A4_HEIGHT_PT,
    };

    /// Whether both dimensions match `other` within [`SIZE_TOLERANCE_PT`].
    pub fn approx_eq(&self, other: &PageSize) -> bool {
        (self.width - other.width).abs() <= SIZE_TOLERANCE_PT
            && (self.height - other.height).abs() <= SIZE_TOLERANCE_PT
    }
}

/// Where scaled content lands on the target page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Uniform scale factor applied to the source.
    pub scale: f32,
    /// Left offset of the scaled content.
    pub x: f32,
    /// Bottom offset of the scaled content.
    pub y: f32,
    /// Scaled width.
    pub width: f32,
    /// Scaled height.
    pub height: f32,
}

/// Fit a `width` × `height` box into `page`, preserving aspect ratio and centering it.
///
/// The content is scaled up or down so that it touches the page on at least one axis.
pub fn fit(width: f32, height: f32, page: PageSize) -> Placement {
    let scale = if width > 0.0 && height > 0.0 {
        (page.width / width).min(page.height / height)
    } else {
        1.0
    };
    let scaled_w = width * scale;
    let scaled_h = height * scale;
    Placement {
        scale,
        x: (page.width - scaled_w) / 2.0,
        y: (page.height - scaled_h) / 2.0,
        width: scaled_w,
        height: scaled_h,
    }
}

/// A PDF affine matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// Map a point through the matrix.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn to_array(self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

/// A source page box in user space, with its display rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceBox {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
    /// Clockwise display rotation, normalized to 0, 90, 180 or 270.
    pub rotate: i64,
}

impl SourceBox {
    pub fn new(rect: [f32; 4], rotate: i64) -> Self {
        Self {
            llx: rect[0].min(rect[2]),
            lly: rect[1].min(rect[3]),
            urx: rect[0].max(rect[2]),
            ury: rect[1].max(rect[3]),
            rotate: rotate.rem_euclid(360) / 90 * 90,
        }
    }

    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }

    /// Size as displayed, after rotation.
    pub fn displayed_size(&self) -> (f32, f32) {
        match self.rotate {
            90 | 270 => (self.height(), self.width()),
            _ => (self.width(), self.height()),
        }
    }

    /// Matrix taking this box (rotated as displayed) onto `page`, centered and fitted.
    pub fn fit_matrix(&self, page: PageSize) -> Matrix {
        let (w, h) = (self.width(), self.height());
        let (disp_w, disp_h) = self.displayed_size();
        let placement = fit(disp_w, disp_h, page);

        // Rotation of the origin-anchored box into display orientation.
        let (a, b, c, d, e, f) = match self.rotate {
            90 => (0.0, -1.0, 1.0, 0.0, 0.0, w),
            180 => (-1.0, 0.0, 0.0, -1.0, w, h),
            270 => (0.0, 1.0, -1.0, 0.0, h, 0.0),
            _ => (1.0, 0.0, 0.0, 1.0, 0.0, 0.0),
        };

        let s = placement.scale;
        Matrix {
            a: s * a,
            b: s * b,
            c: s * c,
            d: s * d,
            e: s * (e - a * self.llx - c * self.lly) + placement.x,
            f: s * (f - b * self.llx - d * self.lly) + placement.y,
        }
    }
}

/// Convert millimetres to points.
pub fn mm_to_pt(mm: f32) -> f32 {
    mm * PT_PER_MM
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_a4_in_millimetres() {
        assert!(close(A4_WIDTH_PT / PT_PER_MM, 210.0));
        assert!(close(A4_HEIGHT_PT / PT_PER_MM, 297.0));
    }

    #[test]
    fn test_fit_wide_image() {
        // 1000x500 px: width-bound
        let p = fit(1000.0, 500.0, PageSize::A4);
        assert!(close(p.scale, A4_WIDTH_PT / 1000.0));
        assert!(close(p.x, 0.0));
        assert!(close(p.width, A4_WIDTH_PT));
        assert!(close(p.y, (A4_HEIGHT_PT - 500.0 * p.scale) / 2.0));
    }

    #[test]
    fn test_fit_tall_image_is_centered_horizontally() {
        let p = fit(100.0, 1000.0, PageSize::A4);
        assert!(close(p.scale, A4_HEIGHT_PT / 1000.0));
        assert!(close(p.y, 0.0));
        assert!(close(p.x * 2.0 + p.width, A4_WIDTH_PT));
    }

    #[test]
    fn test_fit_upscales_small_content() {
        let p = fit(10.0, 10.0, PageSize::A4);
        assert!(p.scale > 1.0);
        assert!(p.width <= A4_WIDTH_PT + 0.01);
        assert!(p.height <= A4_HEIGHT_PT + 0.01);
    }

    #[test]
    fn test_fit_matrix_letter_page() {
        let src = SourceBox::new([0.0, 0.0, 612.0, 792.0], 0);
        let m = src.fit_matrix(PageSize::A4);
        let (x0, y0) = m.apply(0.0, 0.0);
        let (x1, y1) = m.apply(612.0, 792.0);
        assert!(x0 >= -0.01 && y0 >= -0.01);
        assert!(x1 <= A4_WIDTH_PT + 0.01 && y1 <= A4_HEIGHT_PT + 0.01);
        // centered
        assert!(close(x0, A4_WIDTH_PT - x1));
        assert!(close(y0, A4_HEIGHT_PT - y1));
    }

    #[test]
    fn test_fit_matrix_offset_box() {
        let src = SourceBox::new([100.0, 100.0, 200.0, 200.0], 0);
        let m = src.fit_matrix(PageSize::A4);
        let (x0, _) = m.apply(100.0, 100.0);
        let (x1, _) = m.apply(200.0, 200.0);
        assert!(close(x0, 0.0));
        assert!(close(x1, A4_WIDTH_PT));
    }

    #[test]
    fn test_fit_matrix_rotated_landscape() {
        // A portrait box rotated 90° displays as landscape.
        let src = SourceBox::new([0.0, 0.0, 400.0, 800.0], 90);
        assert_eq!(src.displayed_size(), (800.0, 400.0));
        let m = src.fit_matrix(PageSize::A4);
        // Top-left of the source ends up top-right of the displayed content.
        let (tl_x, tl_y) = m.apply(0.0, 800.0);
        let (br_x, br_y) = m.apply(400.0, 0.0);
        assert!(tl_x > br_x);
        assert!(tl_y > br_y);
        let corners = [(0.0, 0.0), (400.0, 0.0), (0.0, 800.0), (400.0, 800.0)];
        for (x, y) in corners {
            let (px, py) = m.apply(x, y);
            assert!((-0.01..=A4_WIDTH_PT + 0.01).contains(&px));
            assert!((-0.01..=A4_HEIGHT_PT + 0.01).contains(&py));
        }
    }

    #[test]
    fn test_rotation_normalized() {
        assert_eq!(SourceBox::new([0.0, 0.0, 1.0, 1.0], -90).rotate, 270);
        assert_eq!(SourceBox::new([0.0, 0.0, 1.0, 1.0], 450).rotate, 90);
    }
}
