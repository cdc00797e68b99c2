//! Dormand–Prince 8(5,3) high-order explicit method.
//!
//! Twelve stages per attempted step; the error estimate combines the
//! embedded 5th- and 3rd-order results the way Hairer's DOP853 does, so
//! the step controller sees a single blended norm.

use crate::error::EngineError;
use crate::traits::OdeSystem;

use super::{initial_step, step_underflow, IntegrationReport, IntegratorOptions, Outcome, Trajectory};

const C2: f64 = 0.526001519587677318785587544488e-01;
const C3: f64 = 0.789002279381515978178381316732e-01;
const C4: f64 = 0.118350341907227396726757197510e+00;
const C5: f64 = 0.281649658092772603273242802490e+00;
const C6: f64 = 0.333333333333333333333333333333e+00;
const C7: f64 = 0.25e+00;
const C8: f64 = 0.307692307692307692307692307692e+00;
const C9: f64 = 0.651282051282051282051282051282e+00;
const C10: f64 = 0.6e+00;
const C11: f64 = 0.857142857142857142857142857142e+00;

const A21: f64 = 5.26001519587677318785587544488e-2;
const A31: f64 = 1.97250569845378994544595329183e-2;
const A32: f64 = 5.91751709536136983633785987549e-2;
const A41: f64 = 2.95875854768068491816892993775e-2;
const A43: f64 = 8.87627564304205475450678981324e-2;
const A51: f64 = 2.41365134159266685502369798665e-1;
const A53: f64 = -8.84549479328286085344864962717e-1;
const A54: f64 = 9.24834003261792003115737966543e-1;
const A61: f64 = 3.7037037037037037037037037037e-2;
const A64: f64 = 1.70828608729473871279604482173e-1;
const A65: f64 = 1.25467687566822425016691814123e-1;
const A71: f64 = 3.7109375e-2;
const A74: f64 = 1.70252211019544039314978060272e-1;
const A75: f64 = 6.02165389804559606850219397283e-2;
const A76: f64 = -1.7578125e-2;
const A81: f64 = 3.70920001185047927108779319836e-2;
const A84: f64 = 1.70383925712239993810214054705e-1;
const A85: f64 = 1.07262030446373284651809199168e-1;
const A86: f64 = -1.53194377486244017527936158236e-2;
const A87: f64 = 8.27378916381402288758473766002e-3;
const A91: f64 = 6.24110958716075717114429577812e-1;
const A94: f64 = -3.36089262944694129406857109825e0;
const A95: f64 = -8.68219346841726006818189891453e-1;
const A96: f64 = 2.75920996994467083049415600797e1;
const A97: f64 = 2.01540675504778934086186788979e1;
const A98: f64 = -4.34898841810699588477366255144e1;
const A101: f64 = 4.77662536438264365890433908527e-1;
const A104: f64 = -2.48811461997166764192642586468e0;
const A105: f64 = -5.90290826836842996371446475743e-1;
const A106: f64 = 2.12300514481811942347288949897e1;
const A107: f64 = 1.52792336328824235832596922938e1;
const A108: f64 = -3.32882109689848629194453265587e1;
const A109: f64 = -2.03312017085086261358222928593e-2;
const A111: f64 = -9.3714243008598732571704021658e-1;
const A114: f64 = 5.18637242884406370830023853209e0;
const A115: f64 = 1.09143734899672957818500254654e0;
const A116: f64 = -8.14978701074692612513997267357e0;
const A117: f64 = -1.85200656599969598641566180701e1;
const A118: f64 = 2.27394870993505042818970056734e1;
const A119: f64 = 2.49360555267965238987089396762e0;
const A1110: f64 = -3.0467644718982195003823669022e0;
const A121: f64 = 2.27331014751653820792359768449e0;
const A124: f64 = -1.05344954667372501984066689879e1;
const A125: f64 = -2.00087205822486249909675718444e0;
const A126: f64 = -1.79589318631187989172765950534e1;
const A127: f64 = 2.79488845294199600508499808837e1;
const A128: f64 = -2.85899827713502369474065508674e0;
const A129: f64 = -8.87285693353062954433549289258e0;
const A1210: f64 = 1.23605671757943030647266201528e1;
const A1211: f64 = 6.43392746015763530355970484046e-1;

const B1: f64 = 5.42937341165687622380535766363e-2;
const B6: f64 = 4.45031289275240888144113950566e0;
const B7: f64 = 1.89151789931450038304281599044e0;
const B8: f64 = -5.8012039600105847814672114227e0;
const B9: f64 = 3.1116436695781989440891606237e-1;
const B10: f64 = -1.52160949662516078556178806805e-1;
const B11: f64 = 2.01365400804030348374776537501e-1;
const B12: f64 = 4.47106157277725905176885569043e-2;

const BH1: f64 = 0.244094488188976377952755905512e+00;
const BH2: f64 = 0.733846688281611857341361741547e+00;
const BH3: f64 = 0.220588235294117647058823529412e-01;

const ER1: f64 = 0.1312004499419488073250102996e-01;
const ER6: f64 = -0.1225156446376204440720569753e+01;
const ER7: f64 = -0.4957589496572501915214079952e+00;
const ER8: f64 = 0.1664377182454986536961530415e+01;
const ER9: f64 = -0.3503288487499736816886487290e+00;
const ER10: f64 = 0.3341791187130174790297318841e+00;
const ER11: f64 = 0.8192320648511571246570742613e-01;
const ER12: f64 = -0.2235530786388629525884427845e-01;

fn eval<F: OdeSystem + ?Sized>(
    f: &F,
    x: f64,
    y: &[f64],
    out: &mut [f64],
) -> Result<(), EngineError> {
    f.eval(x, y, out).map_err(EngineError::rhs_failed)
}

pub(crate) fn integrate_into<F: OdeSystem + ?Sized>(
    f: &F,
    x0: f64,
    xend: f64,
    y0: &[f64],
    opts: &IntegratorOptions,
    traj: &mut Trajectory,
    report: &mut IntegrationReport,
) -> Result<Outcome, EngineError> {
    let n = y0.len();
    let span = xend - x0;
    let mut t = x0;
    let mut y = y0.to_vec();

    let mut k: Vec<Vec<f64>> = (0..12).map(|_| vec![0.0; n]).collect();
    let mut y_tmp = vec![0.0; n];
    let mut y_new = vec![0.0; n];
    let mut ksum = vec![0.0; n];

    eval(f, t, &y, &mut k[0])?;
    report.nfev += 1;
    if traj.is_empty() {
        traj.push(t, &y, &k[0]);
    }

    let mut h = initial_step(span, opts.h_max);
    let mut nstep = 0;

    loop {
        if nstep >= opts.max_steps {
            return Ok(Outcome::Stalled("maximum number of steps reached".into()));
        }
        if step_underflow(h, span) {
            return Ok(Outcome::Stalled("step size underflow".into()));
        }
        nstep += 1;
        h = h.min(xend - t);

        for i in 0..n {
            y_tmp[i] = y[i] + h * A21 * k[0][i];
        }
        eval(f, t + C2 * h, &y_tmp, &mut k[1])?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A31 * k[0][i] + A32 * k[1][i]);
        }
        eval(f, t + C3 * h, &y_tmp, &mut k[2])?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A41 * k[0][i] + A43 * k[2][i]);
        }
        eval(f, t + C4 * h, &y_tmp, &mut k[3])?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A51 * k[0][i] + A53 * k[2][i] + A54 * k[3][i]);
        }
        eval(f, t + C5 * h, &y_tmp, &mut k[4])?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A61 * k[0][i] + A64 * k[3][i] + A65 * k[4][i]);
        }
        eval(f, t + C6 * h, &y_tmp, &mut k[5])?;

        for i in 0..n {
            y_tmp[i] = y[i] + h * (A71 * k[0][i] + A74 * k[3][i] + A75 * k[4][i] + A76 * k[5][i]);
        }
        eval(f, t + C7 * h, &y_tmp, &mut k[6])?;

        for i in 0..n {
            y_tmp[i] = y[i]
                + h * (A81 * k[0][i]
                    + A84 * k[3][i]
                    + A85 * k[4][i]
                    + A86 * k[5][i]
                    + A87 * k[6][i]);
        }
        eval(f, t + C8 * h, &y_tmp, &mut k[7])?;

        for i in 0..n {
            y_tmp[i] = y[i]
                + h * (A91 * k[0][i]
                    + A94 * k[3][i]
                    + A95 * k[4][i]
                    + A96 * k[5][i]
                    + A97 * k[6][i]
                    + A98 * k[7][i]);
        }
        eval(f, t + C9 * h, &y_tmp, &mut k[8])?;

        for i in 0..n {
            y_tmp[i] = y[i]
                + h * (A101 * k[0][i]
                    + A104 * k[3][i]
                    + A105 * k[4][i]
                    + A106 * k[5][i]
                    + A107 * k[6][i]
                    + A108 * k[7][i]
                    + A109 * k[8][i]);
        }
        eval(f, t + C10 * h, &y_tmp, &mut k[9])?;

        for i in 0..n {
            y_tmp[i] = y[i]
                + h * (A111 * k[0][i]
                    + A114 * k[3][i]
                    + A115 * k[4][i]
                    + A116 * k[5][i]
                    + A117 * k[6][i]
                    + A118 * k[7][i]
                    + A119 * k[8][i]
                    + A1110 * k[9][i]);
        }
        eval(f, t + C11 * h, &y_tmp, &mut k[10])?;

        for i in 0..n {
            y_tmp[i] = y[i]
                + h * (A121 * k[0][i]
                    + A124 * k[3][i]
                    + A125 * k[4][i]
                    + A126 * k[5][i]
                    + A127 * k[6][i]
                    + A128 * k[7][i]
                    + A129 * k[8][i]
                    + A1210 * k[9][i]
                    + A1211 * k[10][i]);
        }
        eval(f, t + h, &y_tmp, &mut k[11])?;
        report.nfev += 11;

        for i in 0..n {
            ksum[i] = B1 * k[0][i]
                + B6 * k[5][i]
                + B7 * k[6][i]
                + B8 * k[7][i]
                + B9 * k[8][i]
                + B10 * k[9][i]
                + B11 * k[10][i]
                + B12 * k[11][i];
            y_new[i] = y[i] + h * ksum[i];
        }

        // Combined 5th/3rd-order error estimate
        let mut err5 = 0.0;
        let mut err3 = 0.0;
        for i in 0..n {
            let scale = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
            let e3 = ksum[i] - BH1 * k[0][i] - BH2 * k[8][i] - BH3 * k[11][i];
            err3 += (e3 / scale).powi(2);
            let e5 = ER1 * k[0][i]
                + ER6 * k[5][i]
                + ER7 * k[6][i]
                + ER8 * k[7][i]
                + ER9 * k[8][i]
                + ER10 * k[9][i]
                + ER11 * k[10][i]
                + ER12 * k[11][i];
            err5 += (e5 / scale).powi(2);
        }
        let mut deno = err5 + 0.01 * err3;
        if deno <= 0.0 {
            deno = 1.0;
        }
        let err_norm = h.abs() * err5 * (1.0 / (n as f64 * deno)).sqrt();

        if err_norm <= 1.0 {
            t += h;
            y.copy_from_slice(&y_new);
            eval(f, t, &y, &mut k[0])?;
            report.nfev += 1;
            traj.push(t, &y, &k[0]);
            report.naccept += 1;
            if (xend - t).abs() <= 1e-14 * span.abs().max(1.0) {
                return Ok(Outcome::Complete);
            }
        } else {
            report.nreject += 1;
        }

        let factor = if err_norm == 0.0 {
            6.0
        } else {
            (0.9 * err_norm.powf(-1.0 / 8.0)).clamp(1.0 / 3.0, 6.0)
        };
        h = (h * factor).min(opts.h_max);
    }
}
