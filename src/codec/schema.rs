//! FlatBuffers accessors for the device schema, laid out the way `flatc --rust`
//! emits them.
//!
//! ```text
//! namespace gpsdo;
//!
//! union Payload { Status = 1, kf_debug = 2 }
//! table Message { timestamp_s: double; payload: Payload; }
//! table Status { phase_cnt, freq_error, freq_drift, vctrl, vmeas, temp: float;
//!                raw_counter_value: uint; }
//! table kf_state_debug { x: Vec3; P: Mat3x3; drift: float; }
//! table kf_correction_debug { z, h_x, y, S, mahal_d2, nis: float; rejected: bool; }
//! table kf_debug { timestamp_s: double; state: kf_state_debug;
//!                  correction: kf_correction_debug; K: Mat3x1; H: Mat1x3;
//!                  Q: Mat3x3; R: float; outlier_count: uint; iteration: uint; }
//! table Vec3 { v: [float]; }            // and MatRxC { m: [float]; } row-major
//! ```
//!
//! Every table implements [`Verifiable`], so `flatbuffers::root::<Message>`
//! checks all offsets, vtables and vector lengths before any accessor runs.
//! The `unsafe` reads below rely on that.

use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, VOffsetT, Vector,
    Verifiable, Verifier, WIPOffset,
};

/// `Payload` union discriminants.
pub mod payload_type {
    pub const NONE: u8 = 0;
    pub const STATUS: u8 = 1;
    pub const KF_DEBUG: u8 = 2;
}

macro_rules! table {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq)]
        pub struct $name<'a> {
            pub _tab: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            #[inline]
            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                Self {
                    _tab: Table::new(buf, loc),
                }
            }
        }

        impl<'a> $name<'a> {
            /// # Safety
            ///
            /// `table` must be a verified table of this type.
            #[inline]
            pub unsafe fn init_from_table(table: Table<'a>) -> Self {
                Self { _tab: table }
            }
        }
    };
}

table!(
    /// Root envelope.
    Message
);

impl<'a> Message<'a> {
    pub const VT_TIMESTAMP_S: VOffsetT = 4;
    pub const VT_PAYLOAD_TYPE: VOffsetT = 6;
    pub const VT_PAYLOAD: VOffsetT = 8;

    #[inline]
    pub fn timestamp_s(&self) -> f64 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f64>(Self::VT_TIMESTAMP_S, Some(0.0)) }.unwrap_or(0.0)
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<u8>(Self::VT_PAYLOAD_TYPE, Some(payload_type::NONE)) }
            .unwrap_or(payload_type::NONE)
    }

    #[inline]
    pub fn payload(&self) -> Option<Table<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<Table<'a>>>(Self::VT_PAYLOAD, None) }
    }

    pub fn payload_as_status(&self) -> Option<Status<'a>> {
        if self.payload_type() != payload_type::STATUS {
            return None;
        }
        // Safety: the verifier checked the union variant against its tag.
        self.payload().map(|t| unsafe { Status::init_from_table(t) })
    }

    pub fn payload_as_kf_debug(&self) -> Option<KfDebug<'a>> {
        if self.payload_type() != payload_type::KF_DEBUG {
            return None;
        }
        // Safety: the verifier checked the union variant against its tag.
        self.payload().map(|t| unsafe { KfDebug::init_from_table(t) })
    }
}

impl Verifiable for Message<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f64>("timestamp_s", Self::VT_TIMESTAMP_S, false)?
            .visit_union::<u8, _>(
                "payload_type",
                Self::VT_PAYLOAD_TYPE,
                "payload",
                Self::VT_PAYLOAD,
                false,
                |key, v, pos| match key {
                    payload_type::STATUS => {
                        v.verify_union_variant::<ForwardsUOffset<Status>>("Payload::Status", pos)
                    }
                    payload_type::KF_DEBUG => {
                        v.verify_union_variant::<ForwardsUOffset<KfDebug>>("Payload::kf_debug", pos)
                    }
                    _ => Ok(()),
                },
            )?
            .finish();
        Ok(())
    }
}

/// Finish `fbb` with a `Message` root around `payload`.
pub fn finish_message<T>(
    fbb: &mut FlatBufferBuilder<'_>,
    tag: u8,
    payload: Option<WIPOffset<T>>,
    timestamp_s: f64,
) {
    let start = fbb.start_table();
    fbb.push_slot::<f64>(Message::VT_TIMESTAMP_S, timestamp_s, 0.0);
    if let Some(payload) = payload {
        fbb.push_slot_always::<WIPOffset<_>>(Message::VT_PAYLOAD, payload.as_union_value());
    }
    fbb.push_slot::<u8>(Message::VT_PAYLOAD_TYPE, tag, payload_type::NONE);
    let root = fbb.end_table(start);
    fbb.finish(root, None);
}

table!(
    /// Periodic device telemetry.
    Status
);

impl<'a> Status<'a> {
    pub const VT_PHASE_CNT: VOffsetT = 4;
    pub const VT_FREQ_ERROR: VOffsetT = 6;
    pub const VT_FREQ_DRIFT: VOffsetT = 8;
    pub const VT_VCTRL: VOffsetT = 10;
    pub const VT_VMEAS: VOffsetT = 12;
    pub const VT_TEMP: VOffsetT = 14;
    pub const VT_RAW_COUNTER_VALUE: VOffsetT = 16;

    #[inline]
    fn float(&self, slot: VOffsetT) -> f32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f32>(slot, Some(0.0)) }.unwrap_or(0.0)
    }

    pub fn phase_cnt(&self) -> f32 {
        self.float(Self::VT_PHASE_CNT)
    }

    pub fn freq_error(&self) -> f32 {
        self.float(Self::VT_FREQ_ERROR)
    }

    pub fn freq_drift(&self) -> f32 {
        self.float(Self::VT_FREQ_DRIFT)
    }

    pub fn vctrl(&self) -> f32 {
        self.float(Self::VT_VCTRL)
    }

    pub fn vmeas(&self) -> f32 {
        self.float(Self::VT_VMEAS)
    }

    pub fn temp(&self) -> f32 {
        self.float(Self::VT_TEMP)
    }

    pub fn raw_counter_value(&self) -> u32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<u32>(Self::VT_RAW_COUNTER_VALUE, Some(0)) }.unwrap_or(0)
    }
}

impl Verifiable for Status<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f32>("phase_cnt", Self::VT_PHASE_CNT, false)?
            .visit_field::<f32>("freq_error", Self::VT_FREQ_ERROR, false)?
            .visit_field::<f32>("freq_drift", Self::VT_FREQ_DRIFT, false)?
            .visit_field::<f32>("vctrl", Self::VT_VCTRL, false)?
            .visit_field::<f32>("vmeas", Self::VT_VMEAS, false)?
            .visit_field::<f32>("temp", Self::VT_TEMP, false)?
            .visit_field::<u32>("raw_counter_value", Self::VT_RAW_COUNTER_VALUE, false)?
            .finish();
        Ok(())
    }
}

table!(
    /// `Vec3` and the `MatRxC` tables. All hold one `[float]` at the first
    /// slot, so one accessor serves them.
    Floats
);

impl<'a> Floats<'a> {
    pub const VT_VALUES: VOffsetT = 4;

    pub fn values(&self) -> Option<Vector<'a, f32>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<Vector<'a, f32>>>(Self::VT_VALUES, None) }
    }

    pub fn create<'fbb>(fbb: &mut FlatBufferBuilder<'fbb>, values: &[f32]) -> WIPOffset<Floats<'fbb>> {
        let values = fbb.create_vector(values);
        let start = fbb.start_table();
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_VALUES, values);
        WIPOffset::new(fbb.end_table(start).value())
    }
}

impl Verifiable for Floats<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, f32>>>("values", Self::VT_VALUES, false)?
            .finish();
        Ok(())
    }
}

table!(
    /// `kf_state_debug`.
    KfStateDebug
);

impl<'a> KfStateDebug<'a> {
    pub const VT_X: VOffsetT = 4;
    pub const VT_P: VOffsetT = 6;
    pub const VT_DRIFT: VOffsetT = 8;

    pub fn x(&self) -> Option<Floats<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<Floats<'a>>>(Self::VT_X, None) }
    }

    pub fn p(&self) -> Option<Floats<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<Floats<'a>>>(Self::VT_P, None) }
    }

    pub fn drift(&self) -> f32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f32>(Self::VT_DRIFT, Some(0.0)) }.unwrap_or(0.0)
    }
}

impl Verifiable for KfStateDebug<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Floats>>("x", Self::VT_X, false)?
            .visit_field::<ForwardsUOffset<Floats>>("P", Self::VT_P, false)?
            .visit_field::<f32>("drift", Self::VT_DRIFT, false)?
            .finish();
        Ok(())
    }
}

table!(
    /// `kf_correction_debug`.
    KfCorrectionDebug
);

impl<'a> KfCorrectionDebug<'a> {
    pub const VT_Z: VOffsetT = 4;
    pub const VT_H_X: VOffsetT = 6;
    pub const VT_Y: VOffsetT = 8;
    pub const VT_S: VOffsetT = 10;
    pub const VT_MAHAL_D2: VOffsetT = 12;
    pub const VT_NIS: VOffsetT = 14;
    pub const VT_REJECTED: VOffsetT = 16;

    #[inline]
    pub fn float(&self, slot: VOffsetT) -> f32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f32>(slot, Some(0.0)) }.unwrap_or(0.0)
    }

    pub fn rejected(&self) -> bool {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<bool>(Self::VT_REJECTED, Some(false)) }.unwrap_or(false)
    }
}

impl Verifiable for KfCorrectionDebug<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f32>("z", Self::VT_Z, false)?
            .visit_field::<f32>("h_x", Self::VT_H_X, false)?
            .visit_field::<f32>("y", Self::VT_Y, false)?
            .visit_field::<f32>("S", Self::VT_S, false)?
            .visit_field::<f32>("mahal_d2", Self::VT_MAHAL_D2, false)?
            .visit_field::<f32>("nis", Self::VT_NIS, false)?
            .visit_field::<bool>("rejected", Self::VT_REJECTED, false)?
            .finish();
        Ok(())
    }
}

table!(
    /// `kf_debug`.
    KfDebug
);

impl<'a> KfDebug<'a> {
    pub const VT_TIMESTAMP_S: VOffsetT = 4;
    pub const VT_STATE: VOffsetT = 6;
    pub const VT_CORRECTION: VOffsetT = 8;
    pub const VT_K: VOffsetT = 10;
    pub const VT_H: VOffsetT = 12;
    pub const VT_Q: VOffsetT = 14;
    pub const VT_R: VOffsetT = 16;
    pub const VT_OUTLIER_COUNT: VOffsetT = 18;
    pub const VT_ITERATION: VOffsetT = 20;

    pub fn timestamp_s(&self) -> f64 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f64>(Self::VT_TIMESTAMP_S, Some(0.0)) }.unwrap_or(0.0)
    }

    pub fn state(&self) -> Option<KfStateDebug<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<KfStateDebug<'a>>>(Self::VT_STATE, None) }
    }

    pub fn correction(&self) -> Option<KfCorrectionDebug<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<KfCorrectionDebug<'a>>>(Self::VT_CORRECTION, None) }
    }

    /// Floats table at `slot` (`K`, `H` or `Q`).
    pub fn floats(&self, slot: VOffsetT) -> Option<Floats<'a>> {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<ForwardsUOffset<Floats<'a>>>(slot, None) }
    }

    pub fn r(&self) -> f32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<f32>(Self::VT_R, Some(0.0)) }.unwrap_or(0.0)
    }

    pub fn outlier_count(&self) -> u32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<u32>(Self::VT_OUTLIER_COUNT, Some(0)) }.unwrap_or(0)
    }

    pub fn iteration(&self) -> u32 {
        // Safety: verified by `run_verifier`.
        unsafe { self._tab.get::<u32>(Self::VT_ITERATION, Some(0)) }.unwrap_or(0)
    }
}

impl Verifiable for KfDebug<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f64>("timestamp_s", Self::VT_TIMESTAMP_S, false)?
            .visit_field::<ForwardsUOffset<KfStateDebug>>("state", Self::VT_STATE, false)?
            .visit_field::<ForwardsUOffset<KfCorrectionDebug>>("correction", Self::VT_CORRECTION, false)?
            .visit_field::<ForwardsUOffset<Floats>>("K", Self::VT_K, false)?
            .visit_field::<ForwardsUOffset<Floats>>("H", Self::VT_H, false)?
            .visit_field::<ForwardsUOffset<Floats>>("Q", Self::VT_Q, false)?
            .visit_field::<f32>("R", Self::VT_R, false)?
            .visit_field::<u32>("outlier_count", Self::VT_OUTLIER_COUNT, false)?
            .visit_field::<u32>("iteration", Self::VT_ITERATION, false)?
            .finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_message() -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let start = fbb.start_table();
        fbb.push_slot::<f32>(Status::VT_TEMP, 41.5, 0.0);
        fbb.push_slot::<u32>(Status::VT_RAW_COUNTER_VALUE, 625_000, 0);
        let status: WIPOffset<Status> = WIPOffset::new(fbb.end_table(start).value());
        finish_message(&mut fbb, payload_type::STATUS, Some(status), 12.5);
        fbb.finished_data().to_vec()
    }

    #[test]
    fn test_message_accessors() {
        let buf = status_message();
        let message = flatbuffers::root::<Message>(&buf).unwrap();
        assert_eq!(message.timestamp_s(), 12.5);
        assert_eq!(message.payload_type(), payload_type::STATUS);
        assert!(message.payload_as_kf_debug().is_none());

        let status = message.payload_as_status().unwrap();
        assert_eq!(status.temp(), 41.5);
        assert_eq!(status.raw_counter_value(), 625_000);
        assert_eq!(status.vctrl(), 0.0);
    }

    #[test]
    fn test_floats_table() {
        let mut fbb = FlatBufferBuilder::new();
        let floats = Floats::create(&mut fbb, &[1.0, 2.0, 3.0]);
        fbb.finish(floats, None);
        let floats = flatbuffers::root::<Floats>(fbb.finished_data()).unwrap();
        let values: Vec<f32> = floats.values().unwrap().iter().collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_truncated_buffer_rejected_by_verifier() {
        let buf = status_message();
        for len in 0..buf.len() {
            assert!(flatbuffers::root::<Message>(&buf[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn test_vector_length_overflow_rejected() {
        let mut fbb = FlatBufferBuilder::new();
        let floats = Floats::create(&mut fbb, &[1.0, 2.0]);
        fbb.finish(floats, None);
        let mut buf = fbb.finished_data().to_vec();

        let mut prefix = 2u32.to_le_bytes().to_vec();
        prefix.extend_from_slice(&1.0f32.to_le_bytes());
        let at = buf
            .windows(prefix.len())
            .position(|w| w == prefix.as_slice())
            .unwrap();
        buf[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(flatbuffers::root::<Floats>(&buf).is_err());
    }
}
