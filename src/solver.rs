use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::constants::PI;
use crate::error::{Error, Result};
use crate::geodesy;
use crate::settings::Settings;

const MAX_ITERATIONS: usize = 10;

/// Dilutions of precision from the geometry matrix of the converged fix.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Dop {
    pub gdop: f64,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub tdop: f64,
}

impl Dop {
    pub fn infinite() -> Self {
        Self {
            gdop: f64::INFINITY,
            pdop: f64::INFINITY,
            hdop: f64::INFINITY,
            vdop: f64::INFINITY,
            tdop: f64::INFINITY,
        }
    }
}

/// Converged least-squares state: receiver ECEF position and clock bias
/// [m], per-satellite topocentric angles [deg], and DOP.
#[derive(Clone, Debug)]
pub struct Pvt {
    pub pos: [f64; 4],
    pub el: Vec<f64>,
    pub az: Vec<f64>,
    pub dop: Dop,
}

/// Iterative least-squares position and clock solution from SV-clock
/// corrected pseudoranges. The first iteration starts at the center of the
/// Earth with a placeholder troposphere; later iterations rotate each
/// satellite by the signal travel time and apply the elevation-dependent
/// corrections.
pub fn least_square_pos(sat_pos: &[[f64; 3]], obs: &[f64], settings: &Settings) -> Result<Pvt> {
    let num_sats = sat_pos.len();
    if num_sats < 4 {
        return Err(Error::RankDeficient(num_sats));
    }
    let dtr = PI / 180.0;

    let mut pos = [0.0f64; 4];
    let mut el = vec![0.0f64; num_sats];
    let mut az = vec![0.0f64; num_sats];
    let mut a = DMatrix::<f64>::zeros(num_sats, 4);
    let mut omc = DVector::<f64>::zeros(num_sats);

    for iteration in 0..MAX_ITERATIONS {
        for i in 0..num_sats {
            let (rot_x, trop) = if iteration == 0 {
                (sat_pos[i], 2.0)
            } else {
                let dx = [
                    sat_pos[i][0] - pos[0],
                    sat_pos[i][1] - pos[1],
                    sat_pos[i][2] - pos[2],
                ];
                let rho = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
                let travel_time = rho / settings.speed_of_light;
                let rot_x = geodesy::e_r_corr(travel_time, &sat_pos[i]);

                let (azimuth, elevation, _) = geodesy::topocent(
                    &[pos[0], pos[1], pos[2]],
                    &[rot_x[0] - pos[0], rot_x[1] - pos[1], rot_x[2] - pos[2]],
                );
                az[i] = azimuth;
                el[i] = elevation;

                let trop = if settings.use_trop_corr {
                    tropo((el[i] * dtr).sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0)
                } else {
                    0.0
                };
                (rot_x, trop)
            };

            let dx = [rot_x[0] - pos[0], rot_x[1] - pos[1], rot_x[2] - pos[2]];
            let range = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
            omc[i] = obs[i] - range - pos[3] - trop;

            if range == 0.0 {
                for j in 0..4 {
                    a[(i, j)] = 0.0;
                }
            } else {
                a[(i, 0)] = -dx[0] / range;
                a[(i, 1)] = -dx[1] / range;
                a[(i, 2)] = -dx[2] / range;
                a[(i, 3)] = 1.0;
            }
        }

        if a.clone().svd(false, false).rank(1e-10) < 4 {
            return Err(Error::RankDeficient(num_sats));
        }

        // normal-equations solve of min ||A dx - omc||
        let ata = a.transpose() * &a;
        let atb = a.transpose() * &omc;
        let inv = ata
            .try_inverse()
            .ok_or(Error::RankDeficient(num_sats))?;
        let dx = inv * atb;

        for j in 0..4 {
            pos[j] += dx[j];
        }
    }

    let q = (a.transpose() * &a)
        .try_inverse()
        .ok_or(Error::RankDeficient(num_sats))?;
    let dop = Dop {
        gdop: q.trace().sqrt(),
        pdop: (q[(0, 0)] + q[(1, 1)] + q[(2, 2)]).sqrt(),
        hdop: (q[(0, 0)] + q[(1, 1)]).sqrt(),
        vdop: q[(2, 2)].sqrt(),
        tdop: q[(3, 3)].sqrt(),
    };

    Ok(Pvt { pos, el, az, dop })
}

/// Tropospheric zenith delay mapped through the elevation-dependent
/// two-layer refractivity model of Goad & Goodman, in meters. Heights are
/// in km, pressure in mbar, temperature in kelvin, humidity in percent.
#[allow(clippy::too_many_arguments)]
pub fn tropo(
    sinel: f64,
    hsta: f64,
    p: f64,
    tkel: f64,
    hum: f64,
    hp: f64,
    htkel: f64,
    hhum: f64,
) -> f64 {
    let a_e = 6378.137;
    let b0 = 7.839257e-5;
    let tlapse = -6.5;

    let tkhum = tkel + tlapse * (hhum - htkel);
    let atkel = 7.5 * (tkhum - 273.15) / (237.3 + tkhum - 273.15);
    let e0 = 0.0611 * hum * 10f64.powf(atkel);
    let tksea = tkel - tlapse * htkel;
    let em = -978.77 / (2.8704e6 * tlapse * 1.0e-5);
    let tkelh = tksea + tlapse * hhum;
    let e0sea = e0 * (tksea / tkelh).powf(4.0 * em);
    let tkelp = tksea + tlapse * hp;
    let psea = p * (tksea / tkelp).powf(em);

    let sinel = sinel.max(0.0);

    let mut tropo_delay = 0.0;
    let mut done = false;
    let mut refsea = 77.624e-6 / tksea;
    let mut htop = 1.1385e-5 / refsea;
    refsea *= psea;
    let mut ref_ = refsea * ((htop - hsta) / htop).powi(4);

    loop {
        let mut rtop = (a_e + htop).powi(2) - (a_e + hsta).powi(2) * (1.0 - sinel * sinel);
        rtop = if rtop < 0.0 { 0.0 } else { rtop.sqrt() } - (a_e + hsta) * sinel;

        let a = -sinel / (htop - hsta);
        let b = -b0 * (1.0 - sinel * sinel) / (htop - hsta);

        let mut rn = [0.0f64; 8];
        for (i, v) in rn.iter_mut().enumerate() {
            *v = rtop.powi(i as i32 + 2);
        }
        let mut alpha = [
            2.0 * a,
            2.0 * a * a + 4.0 * b / 3.0,
            a * (a * a + 3.0 * b),
            a.powi(4) / 5.0 + 2.4 * a * a * b + 1.2 * b * b,
            2.0 * a * b * (a * a + 3.0 * b) / 3.0,
            b * b * (6.0 * a * a + 4.0 * b) * 1.428571e-1,
            0.0,
            0.0,
        ];
        if b * b > 1.0e-35 {
            alpha[6] = a * b.powi(3) / 3.0;
            alpha[7] = b.powi(4) / 9.0;
        }

        let mut dr = rtop;
        for (al, r) in alpha.iter().zip(rn.iter()) {
            dr += al * r;
        }
        tropo_delay += dr * ref_ * 1000.0;

        if done {
            return tropo_delay;
        }
        done = true;

        refsea = (371900.0e-6 / tksea - 12.92e-6) / tksea;
        htop = 1.1385e-5 * (1255.0 / tksea + 0.05) / refsea;
        ref_ = refsea * e0sea * ((htop - hsta) / htop).powi(4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zenith_tropospheric_delay_is_a_couple_of_meters() {
        let zenith = tropo(1.0, 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);
        assert!(zenith > 2.0 && zenith < 3.0, "zenith delay {zenith}");

        // delay grows as elevation drops
        let low = tropo((5.0f64.to_radians()).sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);
        assert!(low > 5.0 * zenith, "low-elevation delay {low}");
    }

    #[test]
    fn fewer_than_four_satellites_is_rank_deficient() {
        let settings = Settings::default();
        let sats = vec![[2e7, 0.0, 0.0], [0.0, 2e7, 0.0], [0.0, 0.0, 2e7]];
        let obs = vec![2e7; 3];
        match least_square_pos(&sats, &obs, &settings) {
            Err(Error::RankDeficient(3)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn degenerate_geometry_is_rank_deficient() {
        let settings = Settings {
            use_trop_corr: false,
            ..Settings::default()
        };
        // four co-located satellites give a singular geometry matrix
        let sats = vec![[2.6e7, 0.0, 0.0]; 4];
        let obs = vec![2.6e7; 4];
        match least_square_pos(&sats, &obs, &settings) {
            Err(Error::RankDeficient(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
