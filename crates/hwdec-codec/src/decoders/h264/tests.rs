use std::sync::{Arc, Mutex};

use super::*;
use crate::accelerator::NullAccelerator;
use crate::config::StreamFormat;
use crate::parsers::h264::{Pps, parse_pps, parse_sps};
use crate::test_streams::h264::{PpsBuilder, SliceBuilder, SpsBuilder, end_of_sequence};
use crate::test_streams::{annex_b, length_prefixed};

/// 记录全部配置与提交的加速器
#[derive(Clone, Default)]
struct Recorder {
    jobs: Arc<Mutex<Vec<PictureJob>>>,
    formats: Arc<Mutex<Vec<FormatInfo>>>,
}

impl Recorder {
    fn jobs(&self) -> Vec<PictureJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Accelerator for Recorder {
    fn configure(&mut self, format: &FormatInfo) -> HwdecResult<()> {
        self.formats.lock().unwrap().push(format.clone());
        Ok(())
    }

    fn submit(&mut self, job: &PictureJob) -> HwdecResult<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

struct Stream {
    sps: Sps,
    pps: Pps,
    headers: Vec<Vec<u8>>,
}

impl Stream {
    fn new(builder: SpsBuilder) -> Self {
        let pps_builder = PpsBuilder::new(0, 0);
        Self {
            sps: parse_sps(&builder.rbsp()).unwrap(),
            pps: parse_pps(&pps_builder.rbsp(), |_| Some(1)).unwrap(),
            headers: vec![builder.nal(), pps_builder.nal()],
        }
    }

    fn slice(&self, builder: SliceBuilder) -> Vec<u8> {
        builder.nal(&self.sps, &self.pps)
    }

    /// SPS + PPS + 第一幅图像
    fn first(&self, builder: SliceBuilder) -> Vec<u8> {
        let mut nals = self.headers.clone();
        nals.push(self.slice(builder));
        annex_b(&nals)
    }

    fn picture(&self, builder: SliceBuilder) -> Vec<u8> {
        annex_b(&[self.slice(builder)])
    }
}

fn started(accel: impl Accelerator + 'static) -> H264Decoder {
    let mut dec = H264Decoder::new(Box::new(accel));
    dec.start(&DecoderConfig::default()).unwrap();
    dec
}

/// 送入缓冲区, 遇到 FormatChange 时按协议重新提交
fn decode(dec: &mut H264Decoder, data: Vec<u8>) -> DecodeStatus {
    let buffer = VideoBuffer::from_data(data);
    let mut status = dec.decode(&buffer);
    while status == DecodeStatus::FormatChange {
        assert!(dec.format_info().is_some(), "FormatChange 后应能查询格式");
        status = dec.decode(&buffer);
    }
    status
}

fn drain_pocs(dec: &mut H264Decoder) -> Vec<i32> {
    std::iter::from_fn(|| dec.get_output()).map(|p| p.poc).collect()
}

#[test]
fn test_idr_p_p_flush_outputs_in_poc_order() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = started(NullAccelerator::new());

    assert_eq!(decode(&mut dec, stream.first(SliceBuilder::idr())), DecodeStatus::Success);
    assert_eq!(decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(2))), DecodeStatus::Success);
    assert_eq!(decode(&mut dec, stream.picture(SliceBuilder::p(2).poc_lsb(4))), DecodeStatus::Success);

    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0, 2, 4]);
    assert!(dec.dpb().is_empty(), "flush 后 DPB 应为空");
}

#[test]
fn test_first_sps_activation_reports_format_change() {
    let stream = Stream::new(SpsBuilder::new(176, 144).max_num_ref_frames(2).bitstream_restriction(0, 3));
    let recorder = Recorder::default();
    let mut dec = started(recorder.clone());

    let buffer = VideoBuffer::from_data(stream.first(SliceBuilder::idr()));
    assert_eq!(dec.decode(&buffer), DecodeStatus::FormatChange);
    let format = dec.format_info().cloned().unwrap();
    assert_eq!((format.width, format.height), (176, 144));
    assert_eq!((format.surface_width, format.surface_height), (176, 144));
    assert_eq!(format.dpb_size, 3);
    assert_eq!(format.surface_count, 3 + crate::config::DEFAULT_EXTRA_SURFACES);
    assert_eq!(recorder.formats.lock().unwrap().len(), 1);

    assert_eq!(dec.decode(&buffer), DecodeStatus::Success, "重新提交后应继续解码");
    dec.flush();
    assert_eq!(recorder.jobs().len(), 1, "IDR 只应提交一次");
}

#[test]
fn test_b_frame_reordered_and_output_directly() {
    let stream = Stream::new(
        SpsBuilder::new(64, 64)
            .max_num_ref_frames(1)
            .bitstream_restriction(1, 2),
    );
    let mut dec = started(NullAccelerator::new());

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(4)));
    decode(&mut dec, stream.picture(SliceBuilder::b(2).poc_lsb(2)));
    assert_eq!(dec.pending_output(), 0);

    dec.flush();
    let pocs = drain_pocs(&mut dec);
    assert_eq!(pocs, vec![0, 2, 4]);
    assert!(pocs.windows(2).all(|w| w[0] <= w[1]), "输出 POC 应非递减");
}

#[test]
fn test_b_slice_reference_lists_submitted() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let recorder = Recorder::default();
    let mut dec = started(recorder.clone());

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(8)));
    decode(&mut dec, stream.picture(SliceBuilder::b(2).poc_lsb(4).num_ref_idx(1, 1)));
    dec.flush();

    let jobs = recorder.jobs();
    assert_eq!(jobs.len(), 3);
    let p_job = &jobs[1];
    assert_eq!(p_job.slices[0].ref_list0.len(), 1);
    assert_eq!(p_job.slices[0].ref_list0[0].poc, 0);

    let b_job = &jobs[2];
    assert_eq!(b_job.poc, 4);
    assert_eq!(b_job.references.len(), 2, "DPB 中应有两幅参考图像");
    let list0: Vec<_> = b_job.slices[0].ref_list0.iter().map(|r| r.poc).collect();
    let list1: Vec<_> = b_job.slices[0].ref_list1.iter().map(|r| r.poc).collect();
    assert_eq!(list0, vec![0, 8]);
    assert_eq!(list1, vec![8, 0]);
    assert_eq!(b_job.slices[0].ref_list0[0].surface, jobs[0].surface);
}

#[test]
fn test_frame_num_gap_inserts_non_existing_frames() {
    let stream = Stream::new(SpsBuilder::new(64, 64).gaps_allowed(true));
    let mut dec = started(NullAccelerator::new());

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    for frame_num in 1..=5 {
        decode(&mut dec, stream.picture(SliceBuilder::p(frame_num).poc_lsb(2 * frame_num)));
    }
    assert_eq!(decode(&mut dec, stream.picture(SliceBuilder::p(8).poc_lsb(16))), DecodeStatus::Success);

    let dummies: Vec<_> = dec
        .dpb()
        .iter()
        .filter(|pic| pic.non_existing)
        .map(|pic| pic.frame_num)
        .collect();
    assert_eq!(dummies, vec![6, 7], "应恰好插入 frame_num 6 和 7");
    assert!(dec.dpb().num_references() <= 4, "参考帧数不应超过 max_num_ref_frames");

    dec.flush();
    let pocs = drain_pocs(&mut dec);
    assert_eq!(pocs, vec![0, 2, 4, 6, 8, 10, 16], "不存在帧不应输出");
}

#[test]
fn test_gap_filling_can_be_disabled() {
    let stream = Stream::new(SpsBuilder::new(64, 64).gaps_allowed(true));
    let mut dec = H264Decoder::new(Box::new(NullAccelerator::new()));
    let config = DecoderConfig {
        enable_gap_filling: false,
        ..Default::default()
    };
    dec.start(&config).unwrap();

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    decode(&mut dec, stream.picture(SliceBuilder::p(3).poc_lsb(6)));
    assert!(dec.dpb().iter().all(|pic| !pic.non_existing));
}

#[test]
fn test_idr_no_output_of_prior_pics_discards_dpb() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = started(NullAccelerator::new());

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(2)));
    decode(&mut dec, stream.picture(SliceBuilder::p(2).poc_lsb(4)));
    decode(
        &mut dec,
        stream.picture(SliceBuilder::idr().idr_pic_id(1).no_output_of_prior_pics()),
    );
    // 下一幅图像开始时第二个 IDR 入库
    decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(2)));

    assert_eq!(dec.pending_output(), 0, "旧图像应被丢弃而不是输出");
    assert_eq!(dec.dpb().len(), 1, "DPB 只应保留新 IDR");
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0, 2]);
}

#[test]
fn test_dpb_occupancy_never_exceeds_capacity() {
    let stream = Stream::new(
        SpsBuilder::new(64, 64)
            .max_num_ref_frames(2)
            .bitstream_restriction(0, 2),
    );
    let mut dec = started(NullAccelerator::new());

    decode(&mut dec, stream.first(SliceBuilder::idr()));
    let mut outputs = Vec::new();
    for frame_num in 1..12 {
        let status = decode(&mut dec, stream.picture(SliceBuilder::p(frame_num).poc_lsb(2 * frame_num)));
        assert_eq!(status, DecodeStatus::Success);
        assert!(dec.dpb().len() <= dec.dpb().capacity(), "DPB 超出容量");
        outputs.extend(drain_pocs(&mut dec));
    }
    dec.flush();
    outputs.extend(drain_pocs(&mut dec));
    let expected: Vec<i32> = (0..12).map(|n| 2 * n).collect();
    assert_eq!(outputs, expected);
}

#[test]
fn test_no_surface_then_resubmit() {
    let stream = Stream::new(
        SpsBuilder::new(64, 64)
            .max_num_ref_frames(1)
            .bitstream_restriction(0, 1),
    );
    let mut dec = H264Decoder::new(Box::new(NullAccelerator::new()));
    let config = DecoderConfig {
        extra_surfaces: 1,
        ..Default::default()
    };
    dec.start(&config).unwrap();
    assert_eq!(decode(&mut dec, stream.first(SliceBuilder::idr())), DecodeStatus::Success);
    assert_eq!(dec.format_info().map(|f| f.surface_count), Some(2));
    assert_eq!(decode(&mut dec, stream.picture(SliceBuilder::p(1).poc_lsb(2))), DecodeStatus::Success);

    // IDR 已输出并占用一个表面, P(1) 占用另一个
    let p2 = VideoBuffer::from_data(stream.picture(SliceBuilder::p(2).poc_lsb(4)));
    assert_eq!(dec.decode(&p2), DecodeStatus::NoSurface);
    let out = dec.get_output().unwrap();
    assert_eq!(out.poc, 0);
    drop(out);

    assert_eq!(dec.decode(&p2), DecodeStatus::Success, "释放输出后重新提交应成功");
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![2, 4]);
}

#[test]
fn test_field_pair_shares_surface() {
    let stream = Stream::new(SpsBuilder::new(64, 64).frame_mbs_only(false));
    let recorder = Recorder::default();
    let mut dec = started(recorder.clone());

    decode(&mut dec, stream.first(SliceBuilder::idr().field(false)));
    decode(&mut dec, stream.picture(SliceBuilder::idr().field(true).poc_lsb(1)));
    decode(&mut dec, stream.picture(SliceBuilder::p(1).field(false).poc_lsb(4)));
    decode(&mut dec, stream.picture(SliceBuilder::p(1).field(true).poc_lsb(5)));

    assert_eq!(dec.dpb().len(), 2, "两个场对各占一个条目");
    dec.flush();

    let jobs = recorder.jobs();
    assert_eq!(jobs.len(), 4);
    assert_eq!(jobs[0].surface, jobs[1].surface, "同一帧的两场应共用表面");
    assert_eq!(jobs[0].structure, crate::accelerator::PictureStructure::TopField);
    assert_eq!(jobs[1].structure, crate::accelerator::PictureStructure::BottomField);
    // 第二帧顶场: 参考上一帧两场, 同奇偶性优先
    let refs: Vec<_> = jobs[2].slices[0].ref_list0.iter().map(|r| r.poc).collect();
    assert_eq!(refs, vec![0]);

    assert_eq!(drain_pocs(&mut dec), vec![0, 4]);
}

#[test]
fn test_multiple_slices_form_one_picture() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let recorder = Recorder::default();
    let mut dec = started(recorder.clone());

    let mut nals = stream.headers.clone();
    nals.push(stream.slice(SliceBuilder::idr()));
    nals.push(stream.slice(SliceBuilder::idr().first_mb(8)));
    decode(&mut dec, annex_b(&nals));
    decode(
        &mut dec,
        annex_b(&[
            stream.slice(SliceBuilder::p(1).poc_lsb(2)),
            stream.slice(SliceBuilder::p(1).poc_lsb(2).first_mb(8)),
        ]),
    );
    dec.flush();

    let jobs = recorder.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].slices.len(), 2);
    assert_eq!(jobs[1].slices.len(), 2);
}

#[test]
fn test_malformed_nal_reports_invalid_data_and_continues() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = started(NullAccelerator::new());
    decode(&mut dec, stream.first(SliceBuilder::idr()));

    let bad = stream.slice(SliceBuilder::p(1).pps_id(5).poc_lsb(2));
    let good = stream.slice(SliceBuilder::p(1).poc_lsb(2));
    assert_eq!(decode(&mut dec, annex_b(&[bad, good])), DecodeStatus::InvalidData);

    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0, 2], "损坏 NAL 之后的图像仍应解码");
}

#[test]
fn test_end_of_sequence_flushes_dpb() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = started(NullAccelerator::new());

    let mut nals = stream.headers.clone();
    nals.push(stream.slice(SliceBuilder::idr()));
    nals.push(stream.slice(SliceBuilder::p(1).poc_lsb(2)));
    nals.push(end_of_sequence());
    assert_eq!(decode(&mut dec, annex_b(&nals)), DecodeStatus::Success);
    assert_eq!(drain_pocs(&mut dec), vec![0, 2]);

    // 序列结束后 POC 状态重置, 新 IDR 可继续解码
    decode(&mut dec, stream.picture(SliceBuilder::idr().idr_pic_id(1)));
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0]);
}

#[test]
fn test_resolution_change_outputs_old_sequence_first() {
    let small = Stream::new(SpsBuilder::new(64, 64));
    let large = Stream::new(SpsBuilder::new(128, 96));
    let mut dec = started(NullAccelerator::new());

    decode(&mut dec, small.first(SliceBuilder::idr()));
    decode(&mut dec, small.picture(SliceBuilder::p(1).poc_lsb(2)));

    let buffer = VideoBuffer::from_data(large.first(SliceBuilder::idr().idr_pic_id(1)));
    assert_eq!(dec.decode(&buffer), DecodeStatus::FormatChange);
    assert_eq!(dec.format_info().map(|f| (f.width, f.height)), Some((128, 96)));
    assert_eq!(drain_pocs(&mut dec), vec![0, 2], "旧序列应在格式变化时全部输出");

    assert_eq!(dec.decode(&buffer), DecodeStatus::Success);
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0]);
}

#[test]
fn test_avcc_codec_data_with_length_prefixed_input() {
    let builder = SpsBuilder::new(64, 64);
    let stream = Stream::new(builder.clone());
    let sps_nal = builder.nal();
    let pps_nal = PpsBuilder::new(0, 0).nal();

    let mut avcc = vec![1, 66, 0, 30, 0xFF, 0xE1];
    avcc.extend_from_slice(&(sps_nal.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&sps_nal);
    avcc.push(1);
    avcc.extend_from_slice(&(pps_nal.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&pps_nal);

    let mut dec = H264Decoder::new(Box::new(NullAccelerator::new()));
    let config = DecoderConfig {
        codec_data: Some(avcc),
        ..Default::default()
    };
    dec.start(&config).unwrap();

    let idr = length_prefixed(&[stream.slice(SliceBuilder::idr())], 4);
    assert_eq!(decode(&mut dec, idr), DecodeStatus::Success);
    let p = length_prefixed(&[stream.slice(SliceBuilder::p(1).poc_lsb(2))], 4);
    assert_eq!(decode(&mut dec, p), DecodeStatus::Success);
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0, 2]);
}

#[test]
fn test_length_prefixed_stream_format() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = H264Decoder::new(Box::new(NullAccelerator::new()));
    let config = DecoderConfig {
        stream_format: StreamFormat::LengthPrefixed { nal_length_size: 2 },
        ..Default::default()
    };
    dec.start(&config).unwrap();

    let mut nals = stream.headers.clone();
    nals.push(stream.slice(SliceBuilder::idr()));
    assert_eq!(decode(&mut dec, length_prefixed(&nals, 2)), DecodeStatus::Success);
    dec.flush();
    assert_eq!(drain_pocs(&mut dec), vec![0]);
}

#[test]
fn test_decode_before_start_fails() {
    let mut dec = H264Decoder::new(Box::new(NullAccelerator::new()));
    let buffer = VideoBuffer::from_data(vec![0, 0, 1, 0x09, 0xF0]);
    assert_eq!(dec.decode(&buffer), DecodeStatus::Fail);
}

#[test]
fn test_stop_releases_format() {
    let stream = Stream::new(SpsBuilder::new(64, 64));
    let mut dec = started(NullAccelerator::new());
    decode(&mut dec, stream.first(SliceBuilder::idr()));
    dec.stop();
    assert!(dec.format_info().is_none());
    assert_eq!(drain_pocs(&mut dec), vec![0], "stop 前的图像仍可取出");
}
