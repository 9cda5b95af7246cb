use crate::constants::{EARTH_GM, EARTH_ROTATION_RATE, GPS_PI, HALF_WEEK_SEC, RELATIVISTIC_F};
use crate::ephemeris::Ephemeris;

/// Wraps a time difference into half a GPS week.
fn check_t(time: f64) -> f64 {
    if time > HALF_WEEK_SEC {
        time - 2.0 * HALF_WEEK_SEC
    } else if time < -HALF_WEEK_SEC {
        time + 2.0 * HALF_WEEK_SEC
    } else {
        time
    }
}

/// Remainder with the sign convention of truncated division.
fn trunc_rem(a: f64, b: f64) -> f64 {
    a - b * (a / b).trunc()
}

/// ECEF position [m] and clock correction [s] of one satellite at its
/// transmit time, from broadcast ephemeris.
pub fn sat_position_and_clock(eph: &Ephemeris, transmit_time: f64) -> ([f64; 3], f64) {
    // clock polynomial around t_oc, group delay removed
    let dt = check_t(transmit_time - eph.t_oc);
    let mut clk_corr = (eph.a_f2 * dt + eph.a_f1) * dt + eph.a_f0 - eph.t_gd;

    let time = transmit_time - clk_corr;

    let a = eph.sqrt_a * eph.sqrt_a;
    let tk = check_t(time - eph.t_oe);

    // corrected mean motion and mean anomaly
    let n0 = (EARTH_GM / (a * a * a)).sqrt();
    let n = n0 + eph.deltan;
    let m = (eph.m_0 + n * tk + 2.0 * GPS_PI).rem_euclid(2.0 * GPS_PI);

    // Kepler's equation by fixed-point iteration
    let mut e_anom = m;
    for _ in 0..10 {
        let e_old = e_anom;
        e_anom = m + eph.e * e_anom.sin();
        let de = (e_anom - e_old).rem_euclid(2.0 * GPS_PI);
        if de.abs() < 1e-12 {
            break;
        }
    }
    let e_anom = (e_anom + 2.0 * GPS_PI).rem_euclid(2.0 * GPS_PI);

    let dtr = RELATIVISTIC_F * eph.e * eph.sqrt_a * e_anom.sin();

    // true anomaly and argument of latitude
    let nu = ((1.0 - eph.e * eph.e).sqrt() * e_anom.sin()).atan2(e_anom.cos() - eph.e);
    let phi = (nu + eph.omega).rem_euclid(2.0 * GPS_PI);

    // second-harmonic perturbations
    let u = phi + eph.c_uc * (2.0 * phi).cos() + eph.c_us * (2.0 * phi).sin();
    let r = a * (1.0 - eph.e * e_anom.cos())
        + eph.c_rc * (2.0 * phi).cos()
        + eph.c_rs * (2.0 * phi).sin();
    let i = eph.i_0 + eph.i_dot * tk + eph.c_ic * (2.0 * phi).cos() + eph.c_is * (2.0 * phi).sin();

    let x_orb = u.cos() * r;
    let y_orb = u.sin() * r;

    // longitude of the ascending node, corrected for Earth rotation
    // during tk and since the start of week
    let omega = trunc_rem(
        eph.omega_0 + (eph.omega_dot - EARTH_ROTATION_RATE) * tk - EARTH_ROTATION_RATE * eph.t_oe
            + 2.0 * GPS_PI,
        2.0 * GPS_PI,
    );

    let pos = [
        x_orb * omega.cos() - y_orb * i.cos() * omega.sin(),
        x_orb * omega.sin() + y_orb * i.cos() * omega.cos(),
        y_orb * i.sin(),
    ];

    clk_corr += dtr;
    (pos, clk_corr)
}

/// Positions and clock corrections for a list of satellites. The ephemeris
/// table is indexed by `prn - 1`.
pub fn sat_positions(
    transmit_time: &[f64],
    prns: &[u8],
    eph_table: &[Ephemeris],
) -> (Vec<[f64; 3]>, Vec<f64>) {
    let mut positions = Vec::with_capacity(prns.len());
    let mut clk_corrs = Vec::with_capacity(prns.len());

    for (&prn, &tx) in prns.iter().zip(transmit_time.iter()) {
        let eph = &eph_table[(prn - 1) as usize];
        if !eph.is_usable() {
            log::warn!("prn {}: satellite position requested without usable ephemeris", prn);
            positions.push([0.0; 3]);
            clk_corrs.push(0.0);
            continue;
        }
        let (pos, clk) = sat_position_and_clock(eph, tx);
        positions.push(pos);
        clk_corrs.push(clk);
    }
    (positions, clk_corrs)
}
