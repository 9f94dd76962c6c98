//! Angular and spatial quantities around a meteor sighting.
//!
//! Every function returns `None` as soon as an input it depends on is
//! missing. Sun and moon positions come from an injected [`Ephemeris`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Location, Sighting};

/// WGS84 semi-major axis in metres
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Apparent horizontal position, degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizontal {
    pub altitude: f64,
    pub azimuth: f64,
}

/// Source of apparent sun and moon positions for an observer
#[cfg_attr(test, mockall::automock)]
pub trait Ephemeris: Send + Sync {
    fn sun_horizontal(&self, at: DateTime<Utc>, location: &Location) -> Horizontal;

    fn moon_horizontal(&self, at: DateTime<Utc>, location: &Location) -> Horizontal;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SightingGeometry {
    pub solar_elongation: Option<f64>,
    pub lunar_elongation: Option<f64>,
    pub arc_length: Option<f64>,
    pub air_mass: Option<f64>,
    /// Metres
    pub distance_to_station: Option<f64>,
    /// Seconds
    pub duration: Option<f64>,
}

/// Great-circle separation between two horizontal directions, in degrees
///
/// Law of cosines written as `cos(φ1−φ2) − cos φ1·cos φ2·(1 − cos(λ1−λ2))`
/// so coincident directions give exactly zero.
pub fn angular_separation(
    az1: Option<f64>,
    alt1: Option<f64>,
    az2: Option<f64>,
    alt2: Option<f64>,
) -> Option<f64> {
    let (phi1, phi2) = (alt1?.to_radians(), alt2?.to_radians());
    let (lambda1, lambda2) = (az1?.to_radians(), az2?.to_radians());

    let cosine =
        (phi1 - phi2).cos() - phi1.cos() * phi2.cos() * (1.0 - (lambda1 - lambda2).cos());
    if !cosine.is_finite() {
        return None;
    }

    Some(cosine.clamp(-1.0, 1.0).acos().to_degrees())
}

/// Angular length of a trail between its first and last points, degrees
pub fn arc_length(
    alt1: Option<f64>,
    az1: Option<f64>,
    alt2: Option<f64>,
    az2: Option<f64>,
) -> Option<f64> {
    angular_separation(az1, alt1, az2, alt2)
}

/// Where the sun stands for an observer at `location`
pub fn sun_position(
    ephemeris: &dyn Ephemeris,
    location: Option<&Location>,
    at: DateTime<Utc>,
) -> Option<Horizontal> {
    Some(ephemeris.sun_horizontal(at, location?))
}

/// Separation between the sun and a direction seen from `location` at `at`
pub fn solar_elongation(
    ephemeris: &dyn Ephemeris,
    location: Option<&Location>,
    at: Option<DateTime<Utc>>,
    azimuth: Option<f64>,
    altitude: Option<f64>,
) -> Option<f64> {
    // Short-circuit before asking the ephemeris anything
    let (azimuth, altitude) = (azimuth?, altitude?);
    let sun = ephemeris.sun_horizontal(at?, location?);
    angular_separation(Some(sun.azimuth), Some(sun.altitude), Some(azimuth), Some(altitude))
}

pub fn lunar_elongation(
    ephemeris: &dyn Ephemeris,
    location: Option<&Location>,
    at: Option<DateTime<Utc>>,
    azimuth: Option<f64>,
    altitude: Option<f64>,
) -> Option<f64> {
    let (azimuth, altitude) = (azimuth?, altitude?);
    let moon = ephemeris.moon_horizontal(at?, location?);
    angular_separation(Some(moon.azimuth), Some(moon.altitude), Some(azimuth), Some(altitude))
}

/// `1 / sin(altitude)`, unclamped; `f64::MAX` exactly at the horizon
pub fn air_mass(altitude: Option<f64>) -> Option<f64> {
    let sine = altitude?.to_radians().sin();
    if sine == 0.0 {
        return Some(f64::MAX);
    }
    Some(1.0 / sine)
}

/// Earth-centred, Earth-fixed coordinates in metres (WGS84)
pub fn geocentric(location: &Location) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (phi, lambda) = (location.latitude.to_radians(), location.longitude.to_radians());
    let n = WGS84_A / (1.0 - e2 * phi.sin().powi(2)).sqrt();

    [
        (n + location.altitude) * phi.cos() * lambda.cos(),
        (n + location.altitude) * phi.cos() * lambda.sin(),
        (n * (1.0 - e2) + location.altitude) * phi.sin(),
    ]
}

/// Straight-line distance between two geodetic locations, metres
pub fn geocentric_distance(a: Option<&Location>, b: Option<&Location>) -> Option<f64> {
    let (a, b) = (geocentric(a?), geocentric(b?));
    let squared: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).powi(2)).sum();
    Some(squared.sqrt())
}

pub fn sighting_geometry(
    ephemeris: Option<&dyn Ephemeris>,
    sighting: &Sighting,
    station: Option<&Location>,
) -> SightingGeometry {
    let lightmax = sighting.lightmax;

    SightingGeometry {
        solar_elongation: ephemeris.and_then(|ephemeris| {
            solar_elongation(
                ephemeris,
                station,
                sighting.timestamp,
                lightmax.azimuth,
                lightmax.altitude,
            )
        }),
        lunar_elongation: ephemeris.and_then(|ephemeris| {
            lunar_elongation(
                ephemeris,
                station,
                sighting.timestamp,
                lightmax.azimuth,
                lightmax.altitude,
            )
        }),
        arc_length: arc_length(
            sighting.beginning.altitude,
            sighting.beginning.azimuth,
            sighting.end.altitude,
            sighting.end.azimuth,
        ),
        air_mass: air_mass(lightmax.altitude),
        distance_to_station: geocentric_distance(station, sighting.meteor_location.as_ref()),
        duration: sighting
            .duration()
            .map(|duration| duration.num_milliseconds() as f64 / 1000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkyPoint;
    use chrono::TimeZone;

    const EPS: f64 = 1e-9;

    fn ondrejov() -> Location {
        Location {
            latitude: 49.9105,
            longitude: 14.7808,
            altitude: 528.0,
        }
    }

    fn fixed_ephemeris(sun: Horizontal, moon: Horizontal) -> MockEphemeris {
        let mut ephemeris = MockEphemeris::new();
        ephemeris.expect_sun_horizontal().return_const(sun);
        ephemeris.expect_moon_horizontal().return_const(moon);
        ephemeris
    }

    #[test]
    fn test_self_separation_is_zero() {
        for az in [0.0, 12.5, 90.0, 179.9, 270.0, 359.99] {
            for alt in [-90.0, -12.0, 0.0, 0.1, 33.3, 45.0, 89.9, 90.0] {
                let sep = angular_separation(Some(az), Some(alt), Some(az), Some(alt)).unwrap();
                assert!(sep.abs() < EPS, "az {} alt {} gave {}", az, alt, sep);
            }
        }
    }

    #[test]
    fn test_known_separations() {
        let sep = angular_separation(Some(0.0), Some(0.0), Some(90.0), Some(0.0)).unwrap();
        assert!((sep - 90.0).abs() < EPS);

        let sep = angular_separation(Some(0.0), Some(0.0), Some(180.0), Some(0.0)).unwrap();
        assert!((sep - 180.0).abs() < 1e-6);

        // Any azimuth at the zenith is the same point
        let sep = angular_separation(Some(10.0), Some(90.0), Some(200.0), Some(90.0)).unwrap();
        assert!(sep.abs() < 1e-6);

        let sep = angular_separation(Some(123.0), Some(90.0), Some(45.0), Some(30.0)).unwrap();
        assert!((sep - 60.0).abs() < EPS);
    }

    #[test]
    fn test_separation_is_symmetric() {
        let ab = angular_separation(Some(12.0), Some(34.0), Some(210.0), Some(-5.0)).unwrap();
        let ba = angular_separation(Some(210.0), Some(-5.0), Some(12.0), Some(34.0)).unwrap();
        assert!((ab - ba).abs() < EPS);
    }

    #[test]
    fn test_missing_inputs_give_none() {
        assert_eq!(angular_separation(None, Some(1.0), Some(2.0), Some(3.0)), None);
        assert_eq!(angular_separation(Some(1.0), None, Some(2.0), Some(3.0)), None);
        assert_eq!(angular_separation(Some(1.0), Some(2.0), None, Some(3.0)), None);
        assert_eq!(angular_separation(Some(1.0), Some(2.0), Some(3.0), None), None);
        assert_eq!(arc_length(None, Some(1.0), Some(2.0), Some(3.0)), None);
        assert_eq!(air_mass(None), None);
        assert_eq!(geocentric_distance(None, Some(&ondrejov())), None);
        assert_eq!(geocentric_distance(Some(&ondrejov()), None), None);
    }

    #[test]
    fn test_non_finite_inputs_give_none() {
        assert_eq!(angular_separation(Some(f64::NAN), Some(1.0), Some(2.0), Some(3.0)), None);
        assert_eq!(angular_separation(Some(f64::INFINITY), Some(1.0), Some(2.0), Some(3.0)), None);
    }

    #[test]
    fn test_air_mass() {
        assert!((air_mass(Some(90.0)).unwrap() - 1.0).abs() < 1e-12);
        assert!((air_mass(Some(30.0)).unwrap() - 2.0).abs() < 1e-9);

        let horizon = air_mass(Some(0.0)).unwrap();
        assert!(horizon.is_finite());
        assert!(horizon > 1e6);

        let low = air_mass(Some(0.001)).unwrap();
        assert!(low.is_finite() && low > 1e4);
    }

    #[test]
    fn test_geocentric_equator_and_pole() {
        let equator = geocentric(&Location { latitude: 0.0, longitude: 0.0, altitude: 0.0 });
        assert!((equator[0] - WGS84_A).abs() < 1e-6);
        assert!(equator[1].abs() < 1e-6);
        assert!(equator[2].abs() < 1e-6);

        let pole = geocentric(&Location { latitude: 90.0, longitude: 0.0, altitude: 0.0 });
        // WGS84 semi-minor axis
        assert!((pole[2] - 6_356_752.314_245).abs() < 1e-3);
    }

    #[test]
    fn test_geocentric_distance() {
        let station = ondrejov();
        assert!(geocentric_distance(Some(&station), Some(&station)).unwrap().abs() < 1e-6);

        let above = Location { altitude: station.altitude + 100_000.0, ..station };
        let d = geocentric_distance(Some(&station), Some(&above)).unwrap();
        assert!((d - 100_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_elongations_use_ephemeris() {
        let ephemeris = fixed_ephemeris(
            Horizontal { altitude: 0.0, azimuth: 90.0 },
            Horizontal { altitude: 90.0, azimuth: 0.0 },
        );
        let at = Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap();
        let station = ondrejov();

        let solar = solar_elongation(&ephemeris, Some(&station), Some(at), Some(180.0), Some(0.0));
        assert!((solar.unwrap() - 90.0).abs() < EPS);

        let lunar = lunar_elongation(&ephemeris, Some(&station), Some(at), Some(180.0), Some(45.0));
        assert!((lunar.unwrap() - 45.0).abs() < EPS);
    }

    #[test]
    fn test_elongation_short_circuits_without_ephemeris_call() {
        let mut ephemeris = MockEphemeris::new();
        ephemeris.expect_sun_horizontal().never();
        ephemeris.expect_moon_horizontal().never();
        let at = Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap();

        assert_eq!(solar_elongation(&ephemeris, None, Some(at), Some(1.0), Some(2.0)), None);
        assert_eq!(solar_elongation(&ephemeris, Some(&ondrejov()), None, Some(1.0), Some(2.0)), None);
        assert_eq!(lunar_elongation(&ephemeris, Some(&ondrejov()), Some(at), None, Some(2.0)), None);
    }

    #[test]
    fn test_sighting_geometry_partial_inputs() {
        let ephemeris = fixed_ephemeris(
            Horizontal { altitude: -20.0, azimuth: 0.0 },
            Horizontal { altitude: 10.0, azimuth: 180.0 },
        );
        let sighting = Sighting {
            id: 1,
            station_id: Some(1),
            timestamp: None,
            beginning: SkyPoint { azimuth: Some(100.0), altitude: Some(40.0) },
            lightmax: SkyPoint { azimuth: Some(105.0), altitude: Some(30.0) },
            end: SkyPoint { azimuth: Some(100.0), altitude: Some(20.0) },
            beginning_time: None,
            end_time: Some(Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 1).unwrap()),
            magnitude: Some(-1.5),
            meteor_location: None,
        };

        let geometry = sighting_geometry(Some(&ephemeris), &sighting, Some(&ondrejov()));

        // No timestamp: only elongations are unknown
        assert_eq!(geometry.solar_elongation, None);
        assert_eq!(geometry.lunar_elongation, None);
        assert!((geometry.arc_length.unwrap() - 20.0).abs() < EPS);
        assert!((geometry.air_mass.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(geometry.distance_to_station, None);
        // Only the end time is known
        assert_eq!(geometry.duration, None);
    }

    #[test]
    fn test_sighting_geometry_complete() {
        let ephemeris = fixed_ephemeris(
            Horizontal { altitude: -30.0, azimuth: 0.0 },
            Horizontal { altitude: 30.0, azimuth: 0.0 },
        );
        let station = ondrejov();
        let sighting = Sighting {
            id: 2,
            station_id: Some(1),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap()),
            beginning: SkyPoint { azimuth: Some(0.0), altitude: Some(30.0) },
            lightmax: SkyPoint { azimuth: Some(0.0), altitude: Some(60.0) },
            end: SkyPoint { azimuth: Some(0.0), altitude: Some(70.0) },
            beginning_time: Some(Utc.with_ymd_and_hms(2024, 8, 12, 21, 59, 59).unwrap()),
            end_time: Some(
                Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap() + chrono::Duration::milliseconds(250),
            ),
            magnitude: None,
            meteor_location: Some(Location { altitude: 90_000.0, ..station }),
        };

        let geometry = sighting_geometry(Some(&ephemeris), &sighting, Some(&station));

        assert!((geometry.solar_elongation.unwrap() - 90.0).abs() < EPS);
        assert!((geometry.lunar_elongation.unwrap() - 30.0).abs() < EPS);
        assert!((geometry.arc_length.unwrap() - 40.0).abs() < EPS);
        assert!((geometry.distance_to_station.unwrap() - (90_000.0 - 528.0)).abs() < 1e-3);
        assert_eq!(geometry.duration, Some(1.25));
    }

    #[test]
    fn test_sun_position() {
        let mut ephemeris = MockEphemeris::new();
        ephemeris
            .expect_sun_horizontal()
            .times(1)
            .withf(|_, location| location.altitude == 528.0)
            .return_const(Horizontal { altitude: -18.5, azimuth: 320.0 });
        let at = Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap();

        assert_eq!(
            sun_position(&ephemeris, Some(&ondrejov()), at),
            Some(Horizontal { altitude: -18.5, azimuth: 320.0 })
        );
        assert_eq!(sun_position(&ephemeris, None, at), None);
    }

    #[test]
    fn test_sighting_geometry_without_ephemeris() {
        let sighting = Sighting {
            id: 3,
            station_id: Some(1),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap()),
            beginning: SkyPoint { azimuth: Some(0.0), altitude: Some(30.0) },
            lightmax: SkyPoint { azimuth: Some(0.0), altitude: Some(90.0) },
            end: SkyPoint { azimuth: Some(0.0), altitude: Some(50.0) },
            beginning_time: None,
            end_time: None,
            magnitude: None,
            meteor_location: None,
        };

        let geometry = sighting_geometry(None, &sighting, Some(&ondrejov()));

        assert_eq!(geometry.solar_elongation, None);
        assert_eq!(geometry.lunar_elongation, None);
        assert!((geometry.arc_length.unwrap() - 20.0).abs() < EPS);
        assert!((geometry.air_mass.unwrap() - 1.0).abs() < EPS);
    }
}
