//! Typed payload records, read from and built into the tables in [`super::schema`].

use flatbuffers::{FlatBufferBuilder, WIPOffset};
use serde::{Deserialize, Serialize};

use super::schema::{self, Floats};
use crate::error::DecodeError;

type Result<T> = std::result::Result<T, DecodeError>;

/// Periodic device telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Phase counter reading.
    pub phase_count: f32,
    /// Frequency error (Hz) as estimated on the device.
    pub frequency_error: f32,
    /// Frequency drift (Hz/s).
    pub frequency_drift: f32,
    /// Oscillator control voltage (V).
    pub control_voltage: f32,
    /// Measured voltage (V).
    pub measured_voltage: f32,
    /// Board temperature (°C).
    pub temperature: f32,
    /// Oscillator cycles counted over the last PPS interval.
    pub raw_counter_value: u32,
}

impl StatusRecord {
    pub(crate) fn read(table: &schema::Status<'_>) -> Self {
        Self {
            phase_count: table.phase_cnt(),
            frequency_error: table.freq_error(),
            frequency_drift: table.freq_drift(),
            control_voltage: table.vctrl(),
            measured_voltage: table.vmeas(),
            temperature: table.temp(),
            raw_counter_value: table.raw_counter_value(),
        }
    }

    pub(crate) fn build<'fbb>(&self, fbb: &mut FlatBufferBuilder<'fbb>) -> WIPOffset<schema::Status<'fbb>> {
        let start = fbb.start_table();
        fbb.push_slot::<f32>(schema::Status::VT_PHASE_CNT, self.phase_count, 0.0);
        fbb.push_slot::<f32>(schema::Status::VT_FREQ_ERROR, self.frequency_error, 0.0);
        fbb.push_slot::<f32>(schema::Status::VT_FREQ_DRIFT, self.frequency_drift, 0.0);
        fbb.push_slot::<f32>(schema::Status::VT_VCTRL, self.control_voltage, 0.0);
        fbb.push_slot::<f32>(schema::Status::VT_VMEAS, self.measured_voltage, 0.0);
        fbb.push_slot::<f32>(schema::Status::VT_TEMP, self.temperature, 0.0);
        fbb.push_slot::<u32>(schema::Status::VT_RAW_COUNTER_VALUE, self.raw_counter_value, 0);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

/// Device filter state snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KfStateDebug {
    pub x: [f32; 3],
    /// Row-major 3x3 covariance.
    pub covariance: [f32; 9],
    pub drift: f32,
}

/// Device filter correction snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KfCorrectionDebug {
    /// Measurement.
    pub z: f32,
    /// Predicted measurement.
    pub h_x: f32,
    /// Innovation.
    pub y: f32,
    /// Innovation variance.
    pub s: f32,
    pub mahalanobis_sq: f32,
    pub nis: f32,
    pub rejected: bool,
}

/// On-device Kalman filter diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KfDebugRecord {
    pub timestamp_s: f64,
    pub state: KfStateDebug,
    pub correction: KfCorrectionDebug,
    pub gain: [f32; 3],
    pub observation: [f32; 3],
    /// Row-major 3x3 process noise.
    pub process_noise: [f32; 9],
    pub measurement_noise: f32,
    pub outlier_count: u32,
    pub iteration: u32,
}

/// Copy a `Vec3`/`MatRxC` table into a fixed array.
fn fixed<const N: usize>(table: Option<Floats<'_>>, field: &'static str) -> Result<[f32; N]> {
    let values = table
        .and_then(|t| t.values())
        .ok_or(DecodeError::MissingField { field })?;
    if values.len() != N {
        return Err(DecodeError::InvalidVector {
            field,
            expected: N,
            actual: values.len(),
        });
    }
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().zip(values.iter()) {
        *slot = value;
    }
    Ok(out)
}

impl KfDebugRecord {
    pub(crate) fn read(table: &schema::KfDebug<'_>) -> Result<Self> {
        use schema::KfCorrectionDebug as C;
        use schema::KfDebug as D;

        let state = table.state().ok_or(DecodeError::MissingField { field: "state" })?;
        let correction = table
            .correction()
            .ok_or(DecodeError::MissingField { field: "correction" })?;

        Ok(Self {
            timestamp_s: table.timestamp_s(),
            state: KfStateDebug {
                x: fixed(state.x(), "state.x")?,
                covariance: fixed(state.p(), "state.P")?,
                drift: state.drift(),
            },
            correction: KfCorrectionDebug {
                z: correction.float(C::VT_Z),
                h_x: correction.float(C::VT_H_X),
                y: correction.float(C::VT_Y),
                s: correction.float(C::VT_S),
                mahalanobis_sq: correction.float(C::VT_MAHAL_D2),
                nis: correction.float(C::VT_NIS),
                rejected: correction.rejected(),
            },
            gain: fixed(table.floats(D::VT_K), "K")?,
            observation: fixed(table.floats(D::VT_H), "H")?,
            process_noise: fixed(table.floats(D::VT_Q), "Q")?,
            measurement_noise: table.r(),
            outlier_count: table.outlier_count(),
            iteration: table.iteration(),
        })
    }

    pub(crate) fn build<'fbb>(&self, fbb: &mut FlatBufferBuilder<'fbb>) -> WIPOffset<schema::KfDebug<'fbb>> {
        self.build_with_process_noise(fbb, &self.process_noise)
    }

    /// Build with `Q` taken from `process_noise` instead of the record.
    pub(crate) fn build_with_process_noise<'fbb>(
        &self,
        fbb: &mut FlatBufferBuilder<'fbb>,
        process_noise: &[f32],
    ) -> WIPOffset<schema::KfDebug<'fbb>> {
        use schema::KfCorrectionDebug as C;
        use schema::KfDebug as D;
        use schema::KfStateDebug as S;

        // Children first; a table cannot be open while another is built.
        let x = Floats::create(fbb, &self.state.x);
        let p = Floats::create(fbb, &self.state.covariance);
        let start = fbb.start_table();
        fbb.push_slot_always::<WIPOffset<_>>(S::VT_X, x);
        fbb.push_slot_always::<WIPOffset<_>>(S::VT_P, p);
        fbb.push_slot::<f32>(S::VT_DRIFT, self.state.drift, 0.0);
        let state: WIPOffset<S> = WIPOffset::new(fbb.end_table(start).value());

        let c = &self.correction;
        let start = fbb.start_table();
        fbb.push_slot::<f32>(C::VT_Z, c.z, 0.0);
        fbb.push_slot::<f32>(C::VT_H_X, c.h_x, 0.0);
        fbb.push_slot::<f32>(C::VT_Y, c.y, 0.0);
        fbb.push_slot::<f32>(C::VT_S, c.s, 0.0);
        fbb.push_slot::<f32>(C::VT_MAHAL_D2, c.mahalanobis_sq, 0.0);
        fbb.push_slot::<f32>(C::VT_NIS, c.nis, 0.0);
        fbb.push_slot::<bool>(C::VT_REJECTED, c.rejected, false);
        let correction: WIPOffset<C> = WIPOffset::new(fbb.end_table(start).value());

        let gain = Floats::create(fbb, &self.gain);
        let observation = Floats::create(fbb, &self.observation);
        let process_noise = Floats::create(fbb, process_noise);

        let start = fbb.start_table();
        fbb.push_slot::<f64>(D::VT_TIMESTAMP_S, self.timestamp_s, 0.0);
        fbb.push_slot_always::<WIPOffset<_>>(D::VT_STATE, state);
        fbb.push_slot_always::<WIPOffset<_>>(D::VT_CORRECTION, correction);
        fbb.push_slot_always::<WIPOffset<_>>(D::VT_K, gain);
        fbb.push_slot_always::<WIPOffset<_>>(D::VT_H, observation);
        fbb.push_slot_always::<WIPOffset<_>>(D::VT_Q, process_noise);
        fbb.push_slot::<f32>(D::VT_R, self.measurement_noise, 0.0);
        fbb.push_slot::<u32>(D::VT_OUTLIER_COUNT, self.outlier_count, 0);
        fbb.push_slot::<u32>(D::VT_ITERATION, self.iteration, 0);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

/// One decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedRecord {
    Status {
        /// Envelope timestamp (seconds, device clock).
        timestamp_s: f64,
        status: StatusRecord,
    },
    KfDebug {
        timestamp_s: f64,
        debug: KfDebugRecord,
    },
    /// Unrecognized frame kind or payload tag.
    Unknown { kind: u16, length: usize },
}

impl DecodedRecord {
    /// Envelope timestamp, if the record carried one.
    pub fn timestamp_s(&self) -> Option<f64> {
        match self {
            DecodedRecord::Status { timestamp_s, .. } | DecodedRecord::KfDebug { timestamp_s, .. } => {
                Some(*timestamp_s)
            }
            DecodedRecord::Unknown { .. } => None,
        }
    }

    /// Raw counter value for telemetry records.
    pub fn raw_counter(&self) -> Option<u32> {
        match self {
            DecodedRecord::Status { status, .. } => Some(status.raw_counter_value),
            _ => None,
        }
    }
}
