use crate::constants::{EARTH_ROTATION_RATE, PI, WGS84_A, WGS84_FINV};

/// Reference ellipsoids selectable by index: International 1924,
/// International 1967, WGS-72, GRS-80, WGS-84.
const ELLIPSOID_A: [f64; 5] = [6378388.0, 6378160.0, 6378135.0, 6378137.0, 6378137.0];
const ELLIPSOID_F: [f64; 5] = [
    1.0 / 297.0,
    1.0 / 298.247,
    1.0 / 298.26,
    1.0 / 298.257222101,
    1.0 / 298.257223563,
];

/// Cartesian ECEF to geodetic (degrees, degrees, meters) on the selected
/// ellipsoid, by iterating latitude and height until the height settles.
pub fn cart2geo(x: f64, y: f64, z: f64, ellipsoid: usize) -> (f64, f64, f64) {
    let a = ELLIPSOID_A[ellipsoid];
    let f = ELLIPSOID_F[ellipsoid];

    let lambda = y.atan2(x);
    let ex2 = (2.0 - f) * f / ((1.0 - f) * (1.0 - f));
    let c = a * (1.0 + ex2).sqrt();

    let p = (x * x + y * y).sqrt();
    let mut phi = (z / (p * (1.0 - (2.0 - f) * f))).atan();

    let mut h: f64 = 0.1;
    let mut oldh: f64 = 0.0;
    let mut iterations = 0;
    while (h - oldh).abs() > 1e-12 {
        oldh = h;
        let n = c / (1.0 + ex2 * phi.cos() * phi.cos()).sqrt();
        phi = (z / (p * (1.0 - (2.0 - f) * f * n / (n + h)))).atan();
        h = p / phi.cos() - n;

        iterations += 1;
        if iterations > 100 {
            log::warn!(
                "geodetic iteration did not converge, delta-h = {:e}",
                h - oldh
            );
            break;
        }
    }

    (phi * 180.0 / PI, lambda * 180.0 / PI, h)
}

/// Trigonometric series used by the transverse Mercator mapping.
fn clsin(coeffs: &[f64; 4], arg: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(i, c)| c * ((i + 1) as f64 * arg).sin())
        .sum()
}

/// Complex-argument form of the series, returning the (N, E) corrections.
fn clksin(coeffs: &[f64; 4], n: f64, e: f64) -> (f64, f64) {
    let mut dn = 0.0;
    let mut de = 0.0;
    for (i, c) in coeffs.iter().enumerate() {
        let k = (i + 1) as f64;
        dn += c * (k * n).sin() * (k * e).cosh();
        de += c * (k * n).cos() * (k * e).sinh();
    }
    (dn, de)
}

/// Cartesian ECEF to UTM Easting/Northing/Up in the given zone, through
/// the ED50 datum shift and the Koenig & Weise series.
pub fn cart2utm(x: f64, y: f64, z: f64, zone: u32) -> (f64, f64, f64) {
    // International 1924 ellipsoid backing the ED50 datum
    let a: f64 = 6378388.0;
    let f: f64 = 1.0 / 297.0;
    let ex2 = (2.0 - f) * f / ((1.0 - f) * (1.0 - f));
    let c = a * (1.0 + ex2).sqrt();

    // similarity transform into ED50
    let alpha = 0.756e-6;
    let trans = [89.5, 93.8, 127.6];
    let scale = 0.9999988;
    let vec = [x, y, z - 4.5];
    let v = [
        scale * (vec[0] - alpha * vec[1]) + trans[0],
        scale * (alpha * vec[0] + vec[1]) + trans[1],
        scale * vec[2] + trans[2],
    ];

    let l = v[1].atan2(v[0]);
    let p = (v[0] * v[0] + v[1] * v[1]).sqrt();
    let mut n1 = 6395000.0; // preliminary radius of curvature
    let mut b = (v[2] / ((1.0 - f) * (1.0 - f) * n1)).atan2(p / n1);

    let mut u: f64 = 0.1;
    let mut old_u: f64 = 0.0;
    while (u - old_u).abs() > 1e-4 {
        old_u = u;
        n1 = c / (1.0 + ex2 * b.cos() * b.cos()).sqrt();
        b = (v[2] / ((1.0 - f) * (1.0 - f) * n1 + u)).atan2(p / (n1 + u));
        u = p / b.cos() - n1;
    }

    // normalized meridian quadrant (Koenig & Weise)
    let m0 = 0.0004;
    let n = f / (2.0 - f);
    let m = n * n * (1.0 / 4.0 + n * n / 64.0);
    let w = (a * (-n - m0 + m * (1.0 - m0))) / (1.0 + n);
    let q_n = a + w;

    let e0 = 500000.0;
    let l0 = ((zone as f64 - 30.0) * 6.0 - 3.0) * PI / 180.0;

    let bg = [
        -3.37077907e-3,
        4.73444769e-6,
        -8.29914570e-9,
        1.58785330e-11,
    ];
    let gtu = [
        8.41275991e-4,
        7.67306686e-7,
        1.21291230e-9,
        2.48508228e-12,
    ];

    // ellipsoidal to spherical latitude, then to the complementary
    // spherical coordinates of the central meridian
    let neg_geo = b < 0.0;
    let mut bg_r = b.abs();
    bg_r += clsin(&bg, 2.0 * bg_r);
    let lg_r = l - l0;

    let cos_bn = bg_r.cos();
    let mut np = bg_r.sin().atan2(lg_r.cos() * cos_bn);
    let mut ep = (lg_r.sin() * cos_bn).atanh();

    np *= 2.0;
    ep *= 2.0;
    let (dn, de) = clksin(&gtu, np, ep);
    np = np / 2.0 + dn;
    ep = ep / 2.0 + de;

    let mut northing = q_n * np;
    let easting = q_n * ep + e0;
    if neg_geo {
        northing = -northing + 20000000.0;
    }
    (easting, northing, u)
}

/// Geodetic coordinates of a Cartesian point by the classic iterative
/// residual scheme; `finv` is the inverse flattening.
pub fn togeod(a: f64, finv: f64, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let tolsq = 1.0e-10;
    let maxit = 10;
    let rtd = 180.0 / PI;

    let esq = if finv < 1.0e-20 {
        0.0
    } else {
        (2.0 - 1.0 / finv) / finv
    };
    let oneesq = 1.0 - esq;

    let p = (x * x + y * y).sqrt();
    let mut dlambda = if p > 1.0e-20 { y.atan2(x) * rtd } else { 0.0 };
    if dlambda < 0.0 {
        dlambda += 360.0;
    }

    let r = (p * p + z * z).sqrt();
    if r < 1.0e-20 {
        return (0.0, 0.0, 0.0);
    }
    let sinphi = z / r;
    let mut dphi = sinphi.asin();
    let mut h = r - a * (1.0 - sinphi * sinphi / finv);

    for i in 0..maxit {
        let sinphi = dphi.sin();
        let cosphi = dphi.cos();

        let n_phi = a / (1.0 - esq * sinphi * sinphi).sqrt();
        let dp = p - (n_phi + h) * cosphi;
        let dz = z - (n_phi * oneesq + h) * sinphi;

        h += sinphi * dz + cosphi * dp;
        dphi += (cosphi * dz - sinphi * dp) / (n_phi + h);

        if dp * dp + dz * dz < tolsq {
            break;
        }
        if i == maxit - 1 {
            log::warn!("togeod did not converge in {} iterations", maxit);
        }
    }

    (dphi * rtd, dlambda, h)
}

/// Azimuth [deg, clockwise from north], elevation [deg] and range of the
/// vector `dx` seen from the ECEF origin `x`.
pub fn topocent(x: &[f64; 3], dx: &[f64; 3]) -> (f64, f64, f64) {
    let dtr = PI / 180.0;
    let (phi, lambda, _) = togeod(WGS84_A, WGS84_FINV, x[0], x[1], x[2]);

    let cl = (lambda * dtr).cos();
    let sl = (lambda * dtr).sin();
    let cb = (phi * dtr).cos();
    let sb = (phi * dtr).sin();

    // ENU components of dx
    let e = -sl * dx[0] + cl * dx[1];
    let n = -sb * cl * dx[0] - sb * sl * dx[1] + cb * dx[2];
    let u = cb * cl * dx[0] + cb * sl * dx[1] + sb * dx[2];

    let hor_dis = (e * e + n * n).sqrt();
    let (mut az, el) = if hor_dis < 1e-20 {
        (0.0, 90.0)
    } else {
        (e.atan2(n) / dtr, u.atan2(hor_dis) / dtr)
    };
    if az < 0.0 {
        az += 360.0;
    }

    let d = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
    (az, el, d)
}

/// UTM zone for a geodetic position, with the Norway and Svalbard
/// exceptions. Out-of-range inputs are clamped with a warning.
pub fn find_utm_zone(latitude: f64, longitude: f64) -> u32 {
    let mut latitude = latitude;
    let mut longitude = longitude;
    if !(-180.0..=180.0).contains(&longitude) {
        log::warn!("longitude {} outside [-180, 180]", longitude);
        longitude = longitude.clamp(-180.0, 180.0);
    }
    if !(-80.0..=84.0).contains(&latitude) {
        log::warn!("latitude {} outside [-80, 84]", latitude);
        latitude = latitude.clamp(-80.0, 84.0);
    }

    let mut zone = ((180.0 + longitude) / 6.0) as u32 + 1;

    if latitude > 72.0 {
        if (0.0..9.0).contains(&longitude) {
            zone = 31;
        } else if (9.0..21.0).contains(&longitude) {
            zone = 33;
        } else if (21.0..33.0).contains(&longitude) {
            zone = 35;
        } else if (33.0..42.0).contains(&longitude) {
            zone = 37;
        }
    } else if (56.0..64.0).contains(&latitude) && (3.0..12.0).contains(&longitude) {
        zone = 32;
    }
    zone
}

/// Satellite ECEF coordinates rotated by the Earth rotation accumulated
/// over the signal travel time.
pub fn e_r_corr(travel_time: f64, x_sat: &[f64; 3]) -> [f64; 3] {
    let omegatau = EARTH_ROTATION_RATE * travel_time;
    let (s, c) = omegatau.sin_cos();
    [
        c * x_sat[0] + s * x_sat[1],
        -s * x_sat[0] + c * x_sat[1],
        x_sat[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Geodetic to ECEF on the selected ellipsoid, for round trips.
    fn geo2cart(lat_deg: f64, lon_deg: f64, h: f64, ellipsoid: usize) -> (f64, f64, f64) {
        let a = ELLIPSOID_A[ellipsoid];
        let f = ELLIPSOID_F[ellipsoid];
        let e2 = (2.0 - f) * f;
        let lat = lat_deg * PI / 180.0;
        let lon = lon_deg * PI / 180.0;
        let n = a / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();
        (
            (n + h) * lat.cos() * lon.cos(),
            (n + h) * lat.cos() * lon.sin(),
            (n * (1.0 - e2) + h) * lat.sin(),
        )
    }

    #[test]
    fn geodetic_round_trip_stays_within_tolerance() {
        for &(lat, lon, h) in &[
            (0.0, 0.0, 0.0),
            (45.0, 9.0, 350.0),
            (-33.9, 18.4, 10.0),
            (63.4, 10.4, 120.0),
            (88.5, -120.0, 2000.0),
            (-88.9, 170.0, 0.0),
        ] {
            let (x, y, z) = geo2cart(lat, lon, h, 4);
            let (lat2, lon2, h2) = cart2geo(x, y, z, 4);
            assert!((lat2 - lat).abs() < 1e-7, "lat {lat}: {lat2}");
            let mut dlon = (lon2 - lon).abs();
            if dlon > 180.0 {
                dlon = 360.0 - dlon;
            }
            assert!(dlon < 1e-7, "lon {lon}: {lon2}");
            assert!((h2 - h).abs() < 1e-3, "h {h}: {h2}");
        }
    }

    #[test]
    fn cart2geo_agrees_with_independent_implementation() {
        let (x, y, z) = geo2cart(52.1, 5.2, 43.0, 4);
        let (lat, lon, h) = cart2geo(x, y, z, 4);
        let (lat_m, lon_m, h_m) = map_3d::ecef2geodetic(x, y, z, map_3d::Ellipsoid::WGS84);
        assert!((lat - lat_m.to_degrees()).abs() < 1e-6);
        assert!((lon - lon_m.to_degrees()).abs() < 1e-6);
        assert!((h - h_m).abs() < 1e-2);
    }

    #[test]
    fn togeod_matches_cart2geo_on_wgs84() {
        let (x, y, z) = geo2cart(40.0, -75.0, 100.0, 4);
        let (lat_a, lon_a, h_a) = cart2geo(x, y, z, 4);
        let (lat_b, lon_b, h_b) = togeod(6378137.0, 298.257223563, x, y, z);
        assert!((lat_a - lat_b).abs() < 1e-6);
        // togeod reports longitude in [0, 360)
        assert!(((lon_a + 360.0) - lon_b).abs() < 1e-6);
        assert!((h_a - h_b).abs() < 1e-3);
    }

    #[test]
    fn topocentric_angles_point_at_the_satellite() {
        // observer on the equator at the prime meridian
        let (x, y, z) = geo2cart(0.0, 0.0, 0.0, 4);
        let origin = [x, y, z];

        // straight up: along +X in ECEF from this origin
        let (_, el, d) = topocent(&origin, &[1000.0, 0.0, 0.0]);
        assert!((el - 90.0).abs() < 1e-6);
        assert!((d - 1000.0).abs() < 1e-9);

        // due north: along +Z
        let (az, el, _) = topocent(&origin, &[0.0, 0.0, 1000.0]);
        assert!(az.abs() < 1e-6);
        assert!(el.abs() < 1e-6);

        // due east: along +Y
        let (az, _, _) = topocent(&origin, &[0.0, 1000.0, 0.0]);
        assert!((az - 90.0).abs() < 1e-6);
    }

    #[test]
    fn utm_zone_lookup_with_exceptions() {
        assert_eq!(find_utm_zone(45.0, 9.0), 32);
        assert_eq!(find_utm_zone(40.0, -75.0), 18);
        // Norway exception pushes zone 31 east of 3 deg to zone 32
        assert_eq!(find_utm_zone(60.0, 5.0), 32);
        // Svalbard band
        assert_eq!(find_utm_zone(78.0, 15.0), 33);
        assert_eq!(find_utm_zone(0.0, -179.9), 1);
        assert_eq!(find_utm_zone(0.0, 179.9), 60);
    }

    #[test]
    fn earth_rotation_correction_is_a_small_rotation() {
        let sat = [2.0e7, 1.0e7, 1.5e7];
        let rotated = e_r_corr(0.075, &sat);
        // |r| preserved
        let r0 = (sat[0] * sat[0] + sat[1] * sat[1] + sat[2] * sat[2]).sqrt();
        let r1 = (rotated[0] * rotated[0] + rotated[1] * rotated[1] + rotated[2] * rotated[2])
            .sqrt();
        assert!((r0 - r1).abs() < 1e-6);
        assert_eq!(rotated[2], sat[2]);
        // zero travel time is the identity
        assert_eq!(e_r_corr(0.0, &sat), sat);
    }

    #[test]
    fn utm_easting_sits_on_central_meridian() {
        // 9 deg east is the central meridian of zone 32
        let (x, y, z) = geo2cart(56.0, 9.0, 50.0, 4);
        let (easting, northing, _) = cart2utm(x, y, z, 32);
        // the ED50 shift moves the meridian by well under a kilometer
        assert!((easting - 500000.0).abs() < 1500.0, "E {easting}");
        assert!(northing > 6.1e6 && northing < 6.3e6, "N {northing}");
    }
}
