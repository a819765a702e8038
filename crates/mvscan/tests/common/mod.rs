//! Test-side bitstream synthesis: a bit writer, Exp-Golomb encoding, and
//! minimal SPS/PPS/slice/MP4 builders.

/// Route parser tracing to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// MSB-first bit accumulator.
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: u8,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_pos: 0,
        }
    }

    pub fn put_bit(&mut self, bit: bool) {
        if self.bit_pos == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.bit_pos);
        }
        self.bit_pos = (self.bit_pos + 1) % 8;
    }

    pub fn put_bits(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    pub fn put_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let bits = 64 - code.leading_zeros() as u8;
        self.put_bits(0, bits - 1);
        for i in (0..bits).rev() {
            self.put_bit((code >> i) & 1 == 1);
        }
    }

    pub fn put_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            (-(value as i64) as u32) * 2
        };
        self.put_ue(code);
    }

    /// rbsp_trailing_bits(): stop bit plus alignment zeros.
    pub fn finish(mut self) -> Vec<u8> {
        self.put_bit(true);
        while self.bit_pos != 0 {
            self.put_bit(false);
        }
        self.bytes
    }
}

/// Insert emulation-prevention bytes.
pub fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Assemble a complete NAL unit (header byte + escaped RBSP).
pub fn nal_unit(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    out.extend_from_slice(&escape_rbsp(rbsp));
    out
}

/// Baseline SPS RBSP: 4:2:0, poc_type 2, frame-only, no cropping.
pub fn sps_rbsp(mb_width: u32, mb_height: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_bits(66, 8); // profile_idc: Baseline
    w.put_bits(0, 8); // constraint flags + reserved
    w.put_bits(10, 8); // level_idc
    w.put_ue(0); // seq_parameter_set_id
    w.put_ue(0); // log2_max_frame_num_minus4
    w.put_ue(2); // pic_order_cnt_type
    w.put_ue(1); // max_num_ref_frames
    w.put_bit(false); // gaps_in_frame_num_value_allowed_flag
    w.put_ue(mb_width - 1); // pic_width_in_mbs_minus1
    w.put_ue(mb_height - 1); // pic_height_in_map_units_minus1
    w.put_bit(true); // frame_mbs_only_flag
    w.put_bit(true); // direct_8x8_inference_flag
    w.put_bit(false); // frame_cropping_flag
    w.put_bit(false); // vui_parameters_present_flag
    w.finish()
}

/// Minimal PPS RBSP; `cabac` drives entropy_coding_mode_flag.
pub fn pps_rbsp(cabac: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_ue(0); // pic_parameter_set_id
    w.put_ue(0); // seq_parameter_set_id
    w.put_bit(cabac); // entropy_coding_mode_flag
    w.put_bit(false); // bottom_field_pic_order_in_frame_present_flag
    w.put_ue(0); // num_slice_groups_minus1
    w.put_ue(0); // num_ref_idx_l0_default_active_minus1
    w.put_ue(0); // num_ref_idx_l1_default_active_minus1
    w.put_bit(false); // weighted_pred_flag
    w.put_bits(0, 2); // weighted_bipred_idc
    w.put_se(0); // pic_init_qp_minus26
    w.put_se(0); // pic_init_qs_minus26
    w.put_se(0); // chroma_qp_index_offset
    w.put_bit(false); // deblocking_filter_control_present_flag
    w.put_bit(false); // constrained_intra_pred_flag
    w.put_bit(false); // redundant_pic_cnt_present_flag
    w.finish()
}

/// Write the shared slice-header prefix of a non-IDR P slice
/// (frame_num coded in 4 bits, poc_type 2, nal_ref_idc != 0).
pub fn p_slice_header(w: &mut BitWriter, frame_num: u32) {
    w.put_ue(0); // first_mb_in_slice
    w.put_ue(0); // slice_type: P
    w.put_ue(0); // pic_parameter_set_id
    w.put_bits(frame_num, 4);
    w.put_bit(false); // num_ref_idx_active_override_flag
    w.put_bit(false); // ref_pic_list_modification_flag_l0
    w.put_bit(false); // adaptive_ref_pic_marking_mode_flag
    w.put_se(0); // slice_qp_delta
}

/// A P slice that skips every macroblock of the picture.
pub fn all_skip_p_slice(pic_size_in_mbs: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    p_slice_header(&mut w, 1);
    w.put_ue(pic_size_in_mbs); // mb_skip_run
    w.finish()
}

/// Append one P_L0_16x16 macroblock with the given quarter-sample mvd
/// and no coded coefficients (preceded by its mb_skip_run of 0).
pub fn put_p16x16_mb(w: &mut BitWriter, mvd: (i32, i32)) {
    w.put_ue(0); // mb_skip_run
    w.put_ue(0); // mb_type: P_L0_16x16
    w.put_se(mvd.0); // mvd_l0 x
    w.put_se(mvd.1); // mvd_l0 y
    w.put_ue(0); // coded_block_pattern: 0
}

/// Minimal IDR I-slice RBSP (header only; no macroblock data is read by
/// the motion path).
pub fn i_slice_rbsp() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_ue(0); // first_mb_in_slice
    w.put_ue(2); // slice_type: I
    w.put_ue(0); // pic_parameter_set_id
    w.put_bits(0, 4); // frame_num
    w.put_ue(0); // idr_pic_id
    w.put_bit(false); // no_output_of_prior_pics_flag
    w.put_bit(false); // long_term_reference_flag
    w.put_se(0); // slice_qp_delta
    w.finish()
}

/// Join NAL units with 4-byte start codes.
pub fn annex_b_stream(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn boxed(four_cc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(four_cc);
    out.extend_from_slice(payload);
    out
}

fn full_box_payload(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 0];
    out.extend_from_slice(body);
    out
}

/// One-sample MP4: avcC carries the SPS/PPS NALs, the mdat carries the
/// slice NAL behind a 4-byte length prefix.
pub fn single_sample_mp4(sps_nal: &[u8], pps_nal: &[u8], slice_nal: &[u8]) -> Vec<u8> {
    let mut sample = ((slice_nal.len()) as u32).to_be_bytes().to_vec();
    sample.extend_from_slice(slice_nal);

    let build = |chunk_offset: u32| -> Vec<u8> {
        let mut avcc = vec![1, 66, 0, 10];
        avcc.push(0xFC | 3); // length_size_minus_one = 3
        avcc.push(0xE0 | 1); // one SPS
        avcc.extend_from_slice(&(sps_nal.len() as u16).to_be_bytes());
        avcc.extend_from_slice(sps_nal);
        avcc.push(1); // one PPS
        avcc.extend_from_slice(&(pps_nal.len() as u16).to_be_bytes());
        avcc.extend_from_slice(pps_nal);
        let avcc = boxed(b"avcC", &avcc);

        let mut avc1_payload = vec![0u8; 78];
        avc1_payload.extend_from_slice(&avcc);
        let avc1 = boxed(b"avc1", &avc1_payload);

        let mut stsd_body = 1u32.to_be_bytes().to_vec();
        stsd_body.extend_from_slice(&avc1);
        let stsd = boxed(b"stsd", &full_box_payload(&stsd_body));

        let mut stco_body = 1u32.to_be_bytes().to_vec();
        stco_body.extend_from_slice(&chunk_offset.to_be_bytes());
        let stco = boxed(b"stco", &full_box_payload(&stco_body));

        let mut stsc_body = 1u32.to_be_bytes().to_vec();
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        let stsc = boxed(b"stsc", &full_box_payload(&stsc_body));

        let mut stsz_body = 0u32.to_be_bytes().to_vec();
        stsz_body.extend_from_slice(&1u32.to_be_bytes());
        stsz_body.extend_from_slice(&(sample.len() as u32).to_be_bytes());
        let stsz = boxed(b"stsz", &full_box_payload(&stsz_body));

        let mut stbl_body = stsd.clone();
        stbl_body.extend_from_slice(&stco);
        stbl_body.extend_from_slice(&stsc);
        stbl_body.extend_from_slice(&stsz);
        let stbl = boxed(b"stbl", &stbl_body);
        let minf = boxed(b"minf", &stbl);
        let mdia = boxed(b"mdia", &minf);
        let trak = boxed(b"trak", &mdia);
        let moov = boxed(b"moov", &trak);

        let ftyp = boxed(b"ftyp", b"isom\x00\x00\x00\x00isom");
        let mdat = boxed(b"mdat", &sample);

        let mut out = ftyp;
        out.extend_from_slice(&moov);
        out.extend_from_slice(&mdat);
        out
    };

    // Two passes: the sample offset depends only on the fixed layout
    let probe = build(0);
    let chunk_offset = (probe.len() - sample.len()) as u32;
    build(chunk_offset)
}
