//! Unit newtypes for the quantities a synthesized feeder carries.
//!
//! Lengths (m), voltage levels (kV) and transformer ratings (kVA) all travel
//! through the builder and the mappers as plain numbers in the source data.
//! Wrapping them keeps a 50 m mesh spacing from being passed where a 7.2 kV
//! level is expected.
//!
//! ```
//! use shift_core::units::{Kilovolts, KilovoltAmperes, Meters};
//!
//! let span = Meters(150.0) + Meters(50.0);
//! assert_eq!(span.value(), 200.0);
//!
//! let total: KilovoltAmperes = [KilovoltAmperes(25.0), KilovoltAmperes(50.0)].iter().sum();
//! assert_eq!(total.value(), 75.0);
//!
//! // let wrong = span + Kilovolts(7.2); // does not compile
//! assert_eq!(Kilovolts(12.47).to_volts(), 12_470.0);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $type {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit_name)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }

            /// Compare within an absolute tolerance.
            #[inline]
            pub fn approx_eq(self, other: Self, tol: f64) -> bool {
                (self.0 - other.0).abs() <= tol
            }
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl<'a> std::iter::Sum<&'a $type> for $type {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }
    };
}

/// Metres per degree of latitude/longitude used for mesh spacing and buffers.
///
/// A flat approximation; good enough at feeder scale.
pub const METERS_PER_DEGREE: f64 = 111_139.0;

/// Length in metres (m)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Meters(pub f64);

impl_unit_ops!(Meters, "m");

impl Meters {
    /// Approximate span in degrees using [`METERS_PER_DEGREE`].
    #[inline]
    pub fn to_degrees(self) -> f64 {
        self.0 / METERS_PER_DEGREE
    }
}

/// Voltage level in kilovolts (kV)
///
/// Line-to-ground magnitude assigned to a node.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);

impl_unit_ops!(Kilovolts, "kV");

impl Kilovolts {
    #[inline]
    pub fn to_volts(self) -> f64 {
        self.0 * 1000.0
    }
}

/// Apparent power in kilovolt-amperes (kVA)
///
/// Transformer ratings and served-load estimates.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct KilovoltAmperes(pub f64);

impl_unit_ops!(KilovoltAmperes, "kVA");
