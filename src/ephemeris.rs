use colored::Colorize;
use gnss_rs::constellation::Constellation;
use gnss_rs::sv::SV;
use serde::{Deserialize, Serialize};

use crate::constants::{
    BITS_PER_SUBFRAME, BITS_PER_WORD, GPS_PI, P2_5, P2_19, P2_29, P2_31, P2_33, P2_43, P2_55,
};
use crate::util::{check_phase, getbits, getbits2, getbitu, getbitu2};

/// Broadcast clock and orbit parameters of one satellite, collected from
/// LNAV subframes 1-3. `id_valid` records which subframes have been seen;
/// field values are overwritten on re-decode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Ephemeris {
    pub prn: u8,
    /// One flag per requisite subframe (1, 2, 3).
    pub id_valid: [bool; 3],

    /* subframe 1: week, clock correction, health, accuracy */
    pub week_number: u32,
    pub accuracy: u32,
    pub health: u32,
    pub t_gd: f64,
    pub iodc: u32,
    pub t_oc: f64,
    pub a_f2: f64,
    pub a_f1: f64,
    pub a_f0: f64,

    /* subframe 2: first part of the orbit */
    pub iode_sf2: u32,
    pub c_rs: f64,
    pub deltan: f64,
    pub m_0: f64,
    pub c_uc: f64,
    pub e: f64,
    pub c_us: f64,
    pub sqrt_a: f64,
    pub t_oe: f64,

    /* subframe 3: second part of the orbit */
    pub c_ic: f64,
    pub omega_0: f64,
    pub c_is: f64,
    pub i_0: f64,
    pub c_rc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub iode_sf3: u32,
    pub i_dot: f64,

    /// Time of week of the first decoded subframe [s].
    pub tow: f64,
}

impl Ephemeris {
    pub fn new(prn: u8) -> Self {
        Self {
            prn,
            ..Default::default()
        }
    }

    /// All three requisite subframes decoded and the satellite healthy.
    pub fn is_usable(&self) -> bool {
        self.id_valid.iter().all(|&v| v) && self.health == 0
    }

    fn sv(&self) -> SV {
        SV::new(Constellation::GPS, self.prn)
    }

    /// Decodes five consecutive subframes (1500 bits, polarity as
    /// transmitted) seeded with the last bit of the preceding word.
    /// Returns the TOW of the first subframe in the stream.
    pub fn decode_frames(&mut self, bits: &[u8], d30_star: u8) -> f64 {
        assert_eq!(bits.len(), 5 * BITS_PER_SUBFRAME);

        let mut d30_star = d30_star;
        let mut last_subframe = [0u8; BITS_PER_SUBFRAME];

        for i in 0..5 {
            let mut subframe: [u8; BITS_PER_SUBFRAME] = bits
                [i * BITS_PER_SUBFRAME..(i + 1) * BITS_PER_SUBFRAME]
                .try_into()
                .unwrap();

            for word in 0..10 {
                let range = word * BITS_PER_WORD..(word + 1) * BITS_PER_WORD;
                check_phase(&mut subframe[range.clone()], d30_star);
                d30_star = subframe[range.end - 1];
            }

            self.decode_subframe(&subframe);
            last_subframe = subframe;
        }

        // the HOW carries the TOW of the *next* subframe; five subframes
        // span 30 s, so the stream starts one subframe earlier
        let tow = getbitu(&last_subframe, 30, 17) as f64 * 6.0 - 30.0;
        self.tow = tow;
        tow
    }

    /// Dispatches one polarity-corrected 300-bit subframe on its HOW ID.
    pub fn decode_subframe(&mut self, sf: &[u8]) -> u32 {
        let subframe_id = getbitu(sf, 49, 3);
        match subframe_id {
            1 => self.decode_subframe1(sf),
            2 => self.decode_subframe2(sf),
            3 => self.decode_subframe3(sf),
            // almanac, iono and UTC pages are not needed for a fix
            4 | 5 => {}
            _ => log::warn!("{}: invalid subframe id={subframe_id}", self.sv()),
        }
        subframe_id
    }

    fn decode_subframe1(&mut self, sf: &[u8]) {
        self.week_number = getbitu(sf, 60, 10) + 1024;
        self.accuracy = getbitu(sf, 72, 4);
        self.health = getbitu(sf, 76, 6);
        self.t_gd = getbits(sf, 196, 8) as f64 * P2_31;
        self.iodc = getbitu2(sf, 82, 2, 210, 8);
        self.t_oc = getbitu(sf, 218, 16) as f64 * 16.0;
        self.a_f2 = getbits(sf, 240, 8) as f64 * P2_55;
        self.a_f1 = getbits(sf, 248, 16) as f64 * P2_43;
        self.a_f0 = getbits(sf, 270, 22) as f64 * P2_31;
        self.id_valid[0] = true;

        log::info!(
            "{}: {} week={} sva={} svh={} iodc={} tgd={:+e} toc={} a0={:+e} a1={:+e} a2={:+e}",
            self.sv(),
            "subframe-1".blue(),
            self.week_number,
            self.accuracy,
            self.health,
            self.iodc,
            self.t_gd,
            self.t_oc,
            self.a_f0,
            self.a_f1,
            self.a_f2
        );
    }

    fn decode_subframe2(&mut self, sf: &[u8]) {
        self.iode_sf2 = getbitu(sf, 60, 8);
        self.c_rs = getbits(sf, 68, 16) as f64 * P2_5;
        self.deltan = getbits(sf, 90, 16) as f64 * P2_43 * GPS_PI;
        self.m_0 = getbits2(sf, 106, 8, 120, 24) as f64 * P2_31 * GPS_PI;
        self.c_uc = getbits(sf, 150, 16) as f64 * P2_29;
        self.e = getbitu2(sf, 166, 8, 180, 24) as f64 * P2_33;
        self.c_us = getbits(sf, 210, 16) as f64 * P2_29;
        self.sqrt_a = getbitu2(sf, 226, 8, 240, 24) as f64 * P2_19;
        self.t_oe = getbitu(sf, 270, 16) as f64 * 16.0;
        self.id_valid[1] = true;

        log::info!(
            "{}: {} iode={} crs={} deltan={:+e} m0={} cuc={:+e} e={} cus={:+e} sqrta={} toe={}",
            self.sv(),
            "subframe-2".blue(),
            self.iode_sf2,
            self.c_rs,
            self.deltan,
            self.m_0,
            self.c_uc,
            self.e,
            self.c_us,
            self.sqrt_a,
            self.t_oe,
        );
    }

    fn decode_subframe3(&mut self, sf: &[u8]) {
        self.c_ic = getbits(sf, 60, 16) as f64 * P2_29;
        self.omega_0 = getbits2(sf, 76, 8, 90, 24) as f64 * P2_31 * GPS_PI;
        self.c_is = getbits(sf, 120, 16) as f64 * P2_29;
        self.i_0 = getbits2(sf, 136, 8, 150, 24) as f64 * P2_31 * GPS_PI;
        self.c_rc = getbits(sf, 180, 16) as f64 * P2_5;
        self.omega = getbits2(sf, 196, 8, 210, 24) as f64 * P2_31 * GPS_PI;
        self.omega_dot = getbits(sf, 240, 24) as f64 * P2_43 * GPS_PI;
        self.iode_sf3 = getbitu(sf, 270, 8);
        self.i_dot = getbits(sf, 278, 14) as f64 * P2_43 * GPS_PI;
        self.id_valid[2] = true;

        log::info!(
            "{}: {} cic={:+e} cis={:+e} omega0={} i0={} crc={} omega={} omegadot={:+e} iode={} idot={:+e}",
            self.sv(),
            "subframe-3".blue(),
            self.c_ic,
            self.c_is,
            self.omega_0,
            self.i_0,
            self.c_rc,
            self.omega,
            self.omega_dot,
            self.iode_sf3,
            self.i_dot
        );
    }
}
