//! Reference van der Waals radii in Å, from Bondi (1964) with the main-group
//! additions of Mantina et al. (2009). Elements without a tabulated value are
//! stored as 0.0 and reported as missing by [radius].

use crate::{Atom, atom::symbol_to_number};

#[rustfmt::skip]
pub const VDW_RADII: [f64; 55] = [
    0.00, // X
    1.20, 1.40,                                                 // H-He
    1.82, 1.53, 1.92, 1.70, 1.55, 1.52, 1.47, 1.54,             // Li-Ne
    2.27, 1.73, 1.84, 2.10, 1.80, 1.80, 1.75, 1.88,             // Na-Ar
    2.75, 2.31,                                                 // K-Ca
    0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 1.63, 1.40, 1.39, // Sc-Zn
    1.87, 2.11, 1.85, 1.90, 1.85, 2.02,                         // Ga-Kr
    3.03, 2.49,                                                 // Rb-Sr
    0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 1.63, 1.72, 1.58, // Y-Cd
    1.93, 2.17, 2.06, 2.06, 1.98, 2.16,                         // In-Xe
];

/// the van der Waals radius for the element with symbol `label`
pub fn radius(label: &str) -> Option<f64> {
    symbol_to_number(label).and_then(radius_of)
}

pub fn radius_of(atomic_number: usize) -> Option<f64> {
    VDW_RADII
        .get(atomic_number)
        .copied()
        .filter(|&r| r > 0.0)
}

impl Atom {
    pub fn vdw_radius(&self) -> Option<f64> {
        radius_of(self.atomic_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(radius("C"), Some(1.70));
        assert_eq!(radius("cl"), Some(1.75));
        assert_eq!(radius("Fe"), None);
        assert_eq!(radius("Zz"), None);
        assert_eq!(Atom::new(1, 0.0, 0.0, 0.0).vdw_radius(), Some(1.20));
    }

    #[test]
    fn table_matches_symbols() {
        assert_eq!(VDW_RADII.len(), crate::NUMBER_TO_SYMBOL.len());
        assert_eq!(radius_of(54), Some(2.16));
        assert_eq!(radius_of(0), None);
        assert_eq!(radius_of(99), None);
    }
}
