/// Zero-suppression mode from the %FS command. Leading suppression is the
/// modern norm; trailing suppression is accepted with a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroSuppression {
    #[default]
    Leading,
    Trailing,
}

/// Coordinate format from the %FS (Format Specification) command.
///
/// Example: `%FSLAX24Y24*%` means leading-zero suppression, absolute mode,
/// 2 integer digits + 4 decimal digits for both X and Y.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateFormat {
    pub x_integer: u8,
    pub x_decimal: u8,
    pub y_integer: u8,
    pub y_decimal: u8,
    pub suppression: ZeroSuppression,
}

impl Default for CoordinateFormat {
    fn default() -> Self {
        // Common default: 2.4 format (FSLAX24Y24)
        Self {
            x_integer: 2,
            x_decimal: 4,
            y_integer: 2,
            y_decimal: 4,
            suppression: ZeroSuppression::Leading,
        }
    }
}

/// Unit system from the %MO command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

impl Units {
    /// Factor taking file-unit lengths to millimetres.
    pub fn to_mm_factor(self) -> f64 {
        match self {
            Units::Millimeters => 1.0,
            Units::Inches => 25.4,
        }
    }
}

/// A raw coordinate operand as lexed: its integer value plus the number of
/// digit characters it was written with. The digit count is what makes
/// trailing-zero-suppressed values recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCoord {
    pub value: i64,
    pub digits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Converts raw Gerber coordinate operands to millimetres.
#[derive(Debug, Clone, Default)]
pub struct CoordinateConverter {
    pub format: CoordinateFormat,
    pub units: Units,
}

impl CoordinateConverter {
    /// Convert a raw coordinate to mm.
    ///
    /// With leading-zero suppression the digits are right-aligned against
    /// the decimal point: divide by 10^decimal. With trailing suppression
    /// they are left-aligned: scale up to the full digit width first.
    pub fn to_mm(&self, raw: RawCoord, axis: Axis) -> f64 {
        let (int_digits, dec_digits) = match axis {
            Axis::X => (self.format.x_integer, self.format.x_decimal),
            Axis::Y => (self.format.y_integer, self.format.y_decimal),
        };
        let mut value = raw.value as f64;
        if self.format.suppression == ZeroSuppression::Trailing {
            let total = int_digits + dec_digits;
            if raw.digits < total {
                value *= 10f64.powi((total - raw.digits) as i32);
            }
        }
        let coord = value / 10f64.powi(dec_digits as i32);
        coord * self.units.to_mm_factor()
    }
}
