//! Common types for the AMoD harness environment.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Planar coordinate in metres.
pub type Coord = Point2<f64>;

/// Reserved vehicle id prefix identifying AMoD fleet vehicles.
pub const AV_VEHICLE_PREFIX: &str = "av_";

/// Creates a coordinate from its components.
pub fn coord(x: f64, y: f64) -> Coord {
    Point2::new(x, y)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an id from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a network node (grid nodes use `"x:y"`).
    NodeId
);

string_id!(
    /// Identifier of a directed network link.
    LinkId
);

string_id!(
    /// Identifier of a simulated person.
    PersonId
);

string_id!(
    /// Identifier of a simulated vehicle.
    VehicleId
);

impl NodeId {
    /// Grid node id for column `x`, row `y`.
    pub fn grid(x: usize, y: usize) -> Self {
        Self(format!("{}:{}", x, y))
    }
}

impl VehicleId {
    /// True if this vehicle belongs to an AMoD fleet.
    pub fn is_amod(&self) -> bool {
        self.0.starts_with(AV_VEHICLE_PREFIX)
    }
}

/// Travel mode tag carried by links and legs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Road vehicles, including AMoD vehicles.
    Car,
    /// Public transit.
    Pt,
    Walk,
    /// Leg served by the AMoD fleet.
    Av,
    Other(String),
}

impl Mode {
    /// Returns true for modes that drive on the road network.
    pub fn is_vehicular(&self) -> bool {
        matches!(self, Mode::Car)
    }

    /// Returns the tag used in logs and reports.
    pub fn name(&self) -> &str {
        match self {
            Mode::Car => "car",
            Mode::Pt => "pt",
            Mode::Walk => "walk",
            Mode::Av => "av",
            Mode::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "car" => Mode::Car,
            "pt" => Mode::Pt,
            "walk" => Mode::Walk,
            "av" => Mode::Av,
            _ => Mode::Other(s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_node_id() {
        assert_eq!(NodeId::grid(3, 7).as_str(), "3:7");
    }

    #[test]
    fn test_vehicle_prefix() {
        assert!(VehicleId::from("av_test_0").is_amod());
        assert!(!VehicleId::from("bus_12").is_amod());
        assert!(!VehicleId::from("person_av_1").is_amod());
    }

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in [Mode::Car, Mode::Pt, Mode::Walk, Mode::Av] {
            let parsed: Mode = mode.name().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        let bike: Mode = "bike".parse().unwrap();
        assert_eq!(bike, Mode::Other("bike".to_string()));
        assert!(!bike.is_vehicular());
        assert!(Mode::Car.is_vehicular());
    }
}
