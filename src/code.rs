use once_cell::sync::Lazy;

use crate::constants::CA_CODE_LEN;

/// G2 phase-select taps per PRN (IS-GPS-200 table 3-I, 1-based stages).
const G2_PHASE_TAPS: [(usize, usize); 32] = [
    (2, 6),
    (3, 7),
    (4, 8),
    (5, 9),
    (1, 9),
    (2, 10),
    (1, 8),
    (2, 9),
    (3, 10),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (7, 8),
    (8, 9),
    (9, 10),
    (1, 4),
    (2, 5),
    (3, 6),
    (4, 7),
    (5, 8),
    (6, 9),
    (1, 3),
    (4, 6),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (1, 6),
    (2, 7),
    (3, 8),
    (4, 9),
];

static CA_CODES: Lazy<Vec<Vec<i8>>> =
    Lazy::new(|| (1..=32).map(|prn| generate_ca_code(prn as u8)).collect());

/// One period of the C/A Gold code for `prn`, chips as ±1 (logic 1 -> +1).
pub fn generate_ca_code(prn: u8) -> Vec<i8> {
    assert!((1..=32).contains(&prn));
    let (t1, t2) = G2_PHASE_TAPS[(prn - 1) as usize];

    let mut r1 = [1u8; 10];
    let mut r2 = [1u8; 10];
    let mut g = Vec::with_capacity(CA_CODE_LEN);

    for _ in 0..CA_CODE_LEN {
        let chip = r1[9] ^ r2[t1 - 1] ^ r2[t2 - 1];
        g.push(if chip == 1 { 1 } else { -1 });

        let f1 = r1[2] ^ r1[9];
        let f2 = r2[1] ^ r2[2] ^ r2[5] ^ r2[7] ^ r2[8] ^ r2[9];
        r1.rotate_right(1);
        r2.rotate_right(1);
        r1[0] = f1;
        r2[0] = f2;
    }
    g
}

/// Cached code table shared by acquisition and tracking.
pub fn ca_code(prn: u8) -> &'static [i8] {
    &CA_CODES[(prn - 1) as usize]
}

/// One code period resampled to `fs`. Sample k maps to chip
/// ceil(k * fc / fs), 1-based over the chip array; the last sample is
/// clamped to chip 1022 to absorb rounding at the right edge.
pub fn make_ca_table(prn: u8, fs: f64, fc: f64) -> Vec<f64> {
    let samples_per_code = (fs / (fc / CA_CODE_LEN as f64)).round() as usize;
    let ts = 1.0 / fs;
    let tc = 1.0 / fc;
    let code = ca_code(prn);

    (1..=samples_per_code)
        .map(|k| {
            let idx = if k == samples_per_code {
                CA_CODE_LEN
            } else {
                (ts * k as f64 / tc).ceil() as usize
            };
            code[idx - 1] as f64
        })
        .collect()
}

pub fn print_codes() {
    println!("generating C/A codes");
    for prn in 1..=32u8 {
        let g = ca_code(prn);
        println!("  code-{:02}: {:?}", prn, &g[0..20]);
    }
}
