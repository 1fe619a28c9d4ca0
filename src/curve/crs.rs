use serde::{Deserialize, Serialize};

/// Coordinate reference systems a point value can carry.
///
/// Each system is identified on disk by a (table id, code) pair:
///
/// ```text
/// ┌──────────────┬───────┬──────┬────────────┐
/// │ system       │ table │ code │ dimensions │
/// ├──────────────┼───────┼──────┼────────────┤
/// │ cartesian    │   0   │ 7203 │     2      │
/// │ cartesian-3d │   0   │ 9157 │     3      │
/// │ wgs-84       │   1   │ 4326 │     2      │
/// │ wgs-84-3d    │   1   │ 4979 │     3      │
/// └──────────────┴───────┴──────┴────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CoordinateReferenceSystem {
    Cartesian,
    Cartesian3D,
    Wgs84,
    Wgs84_3D,
}

impl CoordinateReferenceSystem {
    pub const ALL: [CoordinateReferenceSystem; 4] = [
        CoordinateReferenceSystem::Cartesian,
        CoordinateReferenceSystem::Cartesian3D,
        CoordinateReferenceSystem::Wgs84,
        CoordinateReferenceSystem::Wgs84_3D,
    ];

    pub fn table_id(self) -> u32 {
        match self {
            CoordinateReferenceSystem::Cartesian | CoordinateReferenceSystem::Cartesian3D => 0,
            CoordinateReferenceSystem::Wgs84 | CoordinateReferenceSystem::Wgs84_3D => 1,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            CoordinateReferenceSystem::Cartesian => 7203,
            CoordinateReferenceSystem::Cartesian3D => 9157,
            CoordinateReferenceSystem::Wgs84 => 4326,
            CoordinateReferenceSystem::Wgs84_3D => 4979,
        }
    }

    pub fn dimensions(self) -> usize {
        match self {
            CoordinateReferenceSystem::Cartesian | CoordinateReferenceSystem::Wgs84 => 2,
            CoordinateReferenceSystem::Cartesian3D | CoordinateReferenceSystem::Wgs84_3D => 3,
        }
    }

    pub fn is_geographic(self) -> bool {
        self.table_id() == 1
    }

    pub fn from_table_and_code(table_id: u32, code: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|crs| crs.table_id() == table_id && crs.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            CoordinateReferenceSystem::Cartesian => "cartesian",
            CoordinateReferenceSystem::Cartesian3D => "cartesian-3d",
            CoordinateReferenceSystem::Wgs84 => "wgs-84",
            CoordinateReferenceSystem::Wgs84_3D => "wgs-84-3d",
        }
    }
}
