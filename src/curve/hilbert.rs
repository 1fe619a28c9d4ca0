use crate::curve::{Envelope, SpaceFillingCurve};

/// 2D Hilbert curve. Cell `(0, 0)` is value 0, the curve leaves the
/// envelope through the lower-right cell.
#[derive(Debug, Clone)]
pub struct HilbertCurve2D {
    envelope: Envelope,
    max_level: u32,
}

impl HilbertCurve2D {
    pub const MAX_LEVEL: u32 = 30;

    pub fn new(envelope: Envelope, max_level: u32) -> Self {
        debug_assert_eq!(envelope.dimensions(), 2);
        HilbertCurve2D {
            envelope,
            max_level: max_level.clamp(1, Self::MAX_LEVEL),
        }
    }
}

impl SpaceFillingCurve for HilbertCurve2D {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn derived_value_for_cell(&self, cell: &[u64]) -> i64 {
        let n = 1u64 << self.max_level;
        let (mut x, mut y) = (cell[0], cell[1]);
        let mut d = 0u64;
        let mut s = n / 2;
        while s > 0 {
            let rx = u64::from(x & s != 0);
            let ry = u64::from(y & s != 0);
            d += s * s * ((3 * rx) ^ ry);
            // rotate the quadrant so the sub-curve starts at its origin
            if ry == 0 {
                if rx == 1 {
                    x = n - 1 - x;
                    y = n - 1 - y;
                }
                std::mem::swap(&mut x, &mut y);
            }
            s /= 2;
        }
        d as i64
    }
}

/// 3D Hilbert curve using Skilling's transpose formulation.
#[derive(Debug, Clone)]
pub struct HilbertCurve3D {
    envelope: Envelope,
    max_level: u32,
}

impl HilbertCurve3D {
    pub const MAX_LEVEL: u32 = 20;

    pub fn new(envelope: Envelope, max_level: u32) -> Self {
        debug_assert_eq!(envelope.dimensions(), 3);
        HilbertCurve3D {
            envelope,
            max_level: max_level.clamp(1, Self::MAX_LEVEL),
        }
    }
}

impl SpaceFillingCurve for HilbertCurve3D {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn derived_value_for_cell(&self, cell: &[u64]) -> i64 {
        let mut axes = [cell[0], cell[1], cell[2]];
        axes_to_transpose(&mut axes, self.max_level);
        // interleave the transposed bits, most significant level first
        let mut d = 0u64;
        for bit in (0..self.max_level).rev() {
            for axis in axes {
                d = (d << 1) | ((axis >> bit) & 1);
            }
        }
        d as i64
    }
}

/// In-place conversion of cell coordinates to the transposed Hilbert index.
fn axes_to_transpose(x: &mut [u64], bits: u32) {
    let n = x.len();
    let m = 1u64 << (bits - 1);

    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u64;
    let mut q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for value in x.iter_mut() {
        *value ^= t;
    }
}
