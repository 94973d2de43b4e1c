// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The six faces of an axis-aligned cube.

use nalgebra::Vector3;

/// Number of faces on a cube.
pub const NUM_FACES_PER_CUBE: usize = 6;

/// A face of an axis-aligned cube, named by its outward normal.
///
/// The discriminant order is fixed and is relied on by the corner tables
/// and by neighbor storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    ZMinus = 0,
    YMinus = 1,
    XMinus = 2,
    XPlus = 3,
    YPlus = 4,
    ZPlus = 5,
}

impl CubeFace {
    /// All faces in storage order.
    pub const ALL: [CubeFace; NUM_FACES_PER_CUBE] = [
        CubeFace::ZMinus,
        CubeFace::YMinus,
        CubeFace::XMinus,
        CubeFace::XPlus,
        CubeFace::YPlus,
        CubeFace::ZPlus,
    ];

    /// Storage index of this face.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Face for a storage index, if in range.
    pub fn from_index(i: usize) -> Option<CubeFace> {
        Self::ALL.get(i).copied()
    }

    /// The face on the other side of the cube.
    #[inline]
    pub fn opposite(self) -> CubeFace {
        Self::ALL[NUM_FACES_PER_CUBE - 1 - self.index()]
    }

    /// Coordinate axis (0 = x, 1 = y, 2 = z) the normal lies along.
    #[inline]
    pub fn axis(self) -> usize {
        match self {
            CubeFace::XMinus | CubeFace::XPlus => 0,
            CubeFace::YMinus | CubeFace::YPlus => 1,
            CubeFace::ZMinus | CubeFace::ZPlus => 2,
        }
    }

    /// +1.0 for the plus faces, -1.0 for the minus faces.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            CubeFace::XPlus | CubeFace::YPlus | CubeFace::ZPlus => 1.0,
            CubeFace::XMinus | CubeFace::YMinus | CubeFace::ZMinus => -1.0,
        }
    }

    /// Outward unit normal.
    pub fn normal(self) -> Vector3<f64> {
        let mut n = Vector3::zeros();
        n[self.axis()] = self.sign();
        n
    }

    /// The two in-plane axes, in increasing order.
    pub fn plane_axes(self) -> (usize, usize) {
        match self.axis() {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involution() {
        for f in CubeFace::ALL {
            assert_eq!(f.opposite().opposite(), f);
            assert_ne!(f.opposite(), f);
            assert_eq!(f.opposite().axis(), f.axis());
            assert_eq!(f.opposite().sign(), -f.sign());
        }
    }

    #[test]
    fn normals_match_names() {
        assert_eq!(CubeFace::XPlus.normal(), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(CubeFace::YMinus.normal(), Vector3::new(0.0, -1.0, 0.0));
        assert_eq!(CubeFace::ZMinus.normal(), Vector3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn index_round_trip() {
        for (i, f) in CubeFace::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
            assert_eq!(CubeFace::from_index(i), Some(*f));
        }
        assert_eq!(CubeFace::from_index(6), None);
    }
}
