use std::{fmt::Display, str::FromStr};

use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

use crate::{TrajError, Vec3};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Atom {
    pub atomic_number: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.abs_diff_eq(other, Self::default_epsilon())
    }
}

impl AbsDiffEq for Atom {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-8
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() < epsilon;
        self.atomic_number == other.atomic_number
            && close(self.x, other.x)
            && close(self.y, other.y)
            && close(self.z, other.z)
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:2} {:15.10} {:15.10} {:15.10}",
            self.label(),
            self.x,
            self.y,
            self.z
        )
    }
}

impl FromStr for Atom {
    type Err = String;

    /// parse an Atom from a line like
    ///  C 1.0 1.0 1.0
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(format!(
                "expected 4 fields in atom line, found {}",
                fields.len()
            ));
        }
        let mut coord = [0.0; 3];
        for (c, field) in coord.iter_mut().zip(&fields[1..]) {
            *c = field.parse().map_err(|_| {
                format!("failed to parse coordinate field `{field}` as f64")
            })?;
        }
        Self::new_from_label(fields[0], coord[0], coord[1], coord[2])
            .map_err(|e| e.to_string())
    }
}

pub const NUMBER_TO_SYMBOL: [&str; 55] = [
    "X", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg",
    "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn",
    "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb",
    "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe",
];

/// return the atomic number for the element symbol `s`, ignoring case
pub fn symbol_to_number(s: &str) -> Option<usize> {
    let t = titlecase(s);
    NUMBER_TO_SYMBOL
        .iter()
        .skip(1)
        .position(|&x| x == t)
        .map(|i| i + 1)
}

fn titlecase(s: &str) -> String {
    let mut cs = s.chars();
    let Some(first) = cs.next() else {
        return String::new();
    };
    let mut ret = first.to_uppercase().to_string();
    ret.extend(cs.flat_map(char::to_lowercase));
    ret
}

impl Atom {
    pub fn new(atomic_number: usize, x: f64, y: f64, z: f64) -> Self {
        Self {
            atomic_number,
            x,
            y,
            z,
        }
    }

    pub fn new_from_label(
        atomic_symbol: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<Self, TrajError> {
        let n = symbol_to_number(atomic_symbol).ok_or_else(|| {
            TrajError::UnknownElement(atomic_symbol.to_owned())
        })?;
        Ok(Self::new(n, x, y, z))
    }

    #[inline]
    pub const fn label(&self) -> &str {
        debug_assert!(self.atomic_number != 0 && self.atomic_number < 55);
        NUMBER_TO_SYMBOL[self.atomic_number]
    }

    pub fn coord(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titlecase() {
        assert_eq!(super::titlecase("AL"), "Al");
        assert_eq!(super::titlecase("Al"), "Al");
        assert_eq!(super::titlecase("al"), "Al");
        assert_eq!(super::titlecase("H"), "H");
        assert_eq!(super::titlecase("h"), "H");
    }

    #[test]
    fn parse() {
        let got: Atom = " cl 1.0 -2.5 3.25 ".parse().unwrap();
        assert_eq!(got, Atom::new(17, 1.0, -2.5, 3.25));
        assert_eq!(got.label(), "Cl");
    }

    #[test]
    fn parse_errors() {
        assert!("C 1.0 2.0".parse::<Atom>().is_err());
        assert!("C 1.0 2.0 z".parse::<Atom>().is_err());
        assert!("Qq 1.0 2.0 3.0".parse::<Atom>().is_err());
        assert!("X 1.0 2.0 3.0".parse::<Atom>().is_err());
    }

    #[test]
    fn tolerance() {
        let a = Atom::new(8, 0.0, 0.0, 0.0);
        let b = Atom::new(8, 0.0, 0.0, 1e-9);
        let c = Atom::new(8, 0.0, 0.0, 1e-4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.abs_diff_eq(&c, 1e-3));
        assert!(!a.abs_diff_eq(&Atom::new(1, 0.0, 0.0, 0.0), 1.0));
    }
}
