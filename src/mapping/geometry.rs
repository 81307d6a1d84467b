use serde::{Deserialize, Serialize};

/// 页面坐标系中的轴对齐矩形，原点在左上角，y 向下增长
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x0, y0, x1, y1]: [f64; 4]) -> Self {
        Self::new(x0, y0, x1, y1)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

impl BoundingBox {
    /// Corners are normalised so that `x1 >= x0` and `y1 >= y0`.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.area() > 0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// 交集面积；交集退化（零宽或零高）时为 0
    pub fn overlap_area(&self, other: &BoundingBox) -> f64 {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);

        if x0 >= x1 || y0 >= y1 {
            return 0.0;
        }
        (x1 - x0) * (y1 - y0)
    }

    /// 交集占自身面积的比例，自身面积为 0 时返回 0
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        (self.overlap_area(other) / area).clamp(0.0, 1.0)
    }

    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Linear falloff of centre distance: 1.0 for identical centres, 0.0 at
    /// `normalization` units or beyond. Not adaptive to the real page size.
    /// Degenerate boxes score 0.0.
    pub fn proximity_score(&self, other: &BoundingBox, normalization: f64) -> f64 {
        if !(normalization > 0.0) || self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }
        let distance = self.center_distance(other);
        if !distance.is_finite() {
            return 0.0;
        }
        (1.0 - distance / normalization).clamp(0.0, 1.0)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }
}
