//! H.265 short-term reference picture set 语法解析.
//!
//! 同时支持显式编码与 inter_ref_pic_set_prediction (由已有 RPS 推导).

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

/// 单个 RPS 中负向或正向条目的上限
const MAX_DELTA_POCS: usize = 16;

/// delta_poc_s0/s1_minus1 与 abs_delta_rps_minus1 的上限 (0..=2^15-1)
const MAX_DELTA_MINUS1: u32 = 0x7FFF;

fn read_delta_minus1(br: &mut BitReader, name: &str) -> HwdecResult<i32> {
    let value = br.read_ue()?;
    if value > MAX_DELTA_MINUS1 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: {} 超出范围, value={}",
            name, value
        )));
    }
    Ok(value as i32)
}

/// 已展开的短期参考图像集
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortTermRps {
    /// DeltaPocS0 (负向, 按距离由近到远)
    pub delta_poc_s0: Vec<i32>,
    /// UsedByCurrPicS0
    pub used_by_curr_pic_s0: Vec<bool>,
    /// DeltaPocS1 (正向, 按距离由近到远)
    pub delta_poc_s1: Vec<i32>,
    /// UsedByCurrPicS1
    pub used_by_curr_pic_s1: Vec<bool>,
}

impl ShortTermRps {
    /// NumNegativePics
    pub fn num_negative(&self) -> usize {
        self.delta_poc_s0.len()
    }

    /// NumPositivePics
    pub fn num_positive(&self) -> usize {
        self.delta_poc_s1.len()
    }

    /// NumDeltaPocs
    pub fn num_delta_pocs(&self) -> usize {
        self.num_negative() + self.num_positive()
    }

    /// 被当前图像引用的条目数
    pub fn num_used_by_curr(&self) -> usize {
        self.used_by_curr_pic_s0
            .iter()
            .chain(&self.used_by_curr_pic_s1)
            .filter(|&&used| used)
            .count()
    }

    fn push_s0(&mut self, delta: i32, used: bool) {
        self.delta_poc_s0.push(delta);
        self.used_by_curr_pic_s0.push(used);
    }

    fn push_s1(&mut self, delta: i32, used: bool) {
        self.delta_poc_s1.push(delta);
        self.used_by_curr_pic_s1.push(used);
    }
}

/// 解析 st_ref_pic_set(idx)
///
/// `sets` 为 SPS 中已解析的前 idx 个 RPS; `num_sets` 为 num_short_term_ref_pic_sets.
/// 片头中的 RPS 以 `idx == num_sets` 调用.
pub fn parse_st_ref_pic_set(
    br: &mut BitReader,
    idx: usize,
    sets: &[ShortTermRps],
    num_sets: usize,
) -> HwdecResult<ShortTermRps> {
    let inter_ref_pic_set_prediction = idx != 0 && br.read_flag()?;

    if inter_ref_pic_set_prediction {
        let delta_idx = if idx == num_sets {
            br.read_ue()? as usize + 1
        } else {
            1
        };
        let ref_idx = idx.checked_sub(delta_idx).ok_or_else(|| {
            HwdecError::InvalidData(format!(
                "HEVC: delta_idx_minus1 超出范围, idx={}, delta_idx={}",
                idx, delta_idx
            ))
        })?;
        let ref_rps = sets.get(ref_idx).ok_or_else(|| {
            HwdecError::InvalidData(format!("HEVC: 引用的 RPS 不存在, ref_idx={}", ref_idx))
        })?;

        let sign = br.read_flag()?;
        let abs_delta_rps_minus1 = read_delta_minus1(br, "abs_delta_rps_minus1")?;
        let delta_rps = (1 - 2 * i32::from(sign)) * (abs_delta_rps_minus1 + 1);

        let count = ref_rps.num_delta_pocs() + 1;
        let mut used_by_curr = Vec::with_capacity(count);
        let mut use_delta = Vec::with_capacity(count);
        for _ in 0..count {
            let used = br.read_flag()?;
            used_by_curr.push(used);
            use_delta.push(used || br.read_flag()?);
        }

        Ok(derive_inter_rps(ref_rps, delta_rps, &used_by_curr, &use_delta))
    } else {
        let num_negative = br.read_ue()? as usize;
        let num_positive = br.read_ue()? as usize;
        if num_negative > MAX_DELTA_POCS || num_positive > MAX_DELTA_POCS {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: RPS 条目过多, negative={}, positive={}",
                num_negative, num_positive
            )));
        }

        let mut rps = ShortTermRps::default();
        let mut poc = 0i32;
        for _ in 0..num_negative {
            poc -= read_delta_minus1(br, "delta_poc_s0_minus1")? + 1;
            let used = br.read_flag()?;
            rps.push_s0(poc, used);
        }
        poc = 0;
        for _ in 0..num_positive {
            poc += read_delta_minus1(br, "delta_poc_s1_minus1")? + 1;
            let used = br.read_flag()?;
            rps.push_s1(poc, used);
        }
        Ok(rps)
    }
}

/// 由参考 RPS 与 deltaRps 推导新 RPS (式 7-61/7-62)
fn derive_inter_rps(
    ref_rps: &ShortTermRps,
    delta_rps: i32,
    used_by_curr: &[bool],
    use_delta: &[bool],
) -> ShortTermRps {
    let num_neg = ref_rps.num_negative();
    let num_delta = ref_rps.num_delta_pocs();
    let mut rps = ShortTermRps::default();

    for j in (0..ref_rps.num_positive()).rev() {
        let d_poc = ref_rps.delta_poc_s1[j] + delta_rps;
        if d_poc < 0 && use_delta[num_neg + j] {
            rps.push_s0(d_poc, used_by_curr[num_neg + j]);
        }
    }
    if delta_rps < 0 && use_delta[num_delta] {
        rps.push_s0(delta_rps, used_by_curr[num_delta]);
    }
    for j in 0..num_neg {
        let d_poc = ref_rps.delta_poc_s0[j] + delta_rps;
        if d_poc < 0 && use_delta[j] {
            rps.push_s0(d_poc, used_by_curr[j]);
        }
    }

    for j in (0..num_neg).rev() {
        let d_poc = ref_rps.delta_poc_s0[j] + delta_rps;
        if d_poc > 0 && use_delta[j] {
            rps.push_s1(d_poc, used_by_curr[j]);
        }
    }
    if delta_rps > 0 && use_delta[num_delta] {
        rps.push_s1(delta_rps, used_by_curr[num_delta]);
    }
    for j in 0..ref_rps.num_positive() {
        let d_poc = ref_rps.delta_poc_s1[j] + delta_rps;
        if d_poc > 0 && use_delta[num_neg + j] {
            rps.push_s1(d_poc, used_by_curr[num_neg + j]);
        }
    }

    rps
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwdec_core::BitWriter;

    #[test]
    fn test_explicit_rps() {
        let mut bw = BitWriter::new();
        bw.write_ue(2); // num_negative_pics
        bw.write_ue(1); // num_positive_pics
        bw.write_ue(0); // -1
        bw.write_flag(true);
        bw.write_ue(1); // -3
        bw.write_flag(false);
        bw.write_ue(1); // +2
        bw.write_flag(true);
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        let rps = parse_st_ref_pic_set(&mut br, 0, &[], 1).unwrap();
        assert_eq!(rps.delta_poc_s0, vec![-1, -3]);
        assert_eq!(rps.used_by_curr_pic_s0, vec![true, false]);
        assert_eq!(rps.delta_poc_s1, vec![2]);
        assert_eq!(rps.num_used_by_curr(), 2);
    }

    #[test]
    fn test_inter_rps_prediction() {
        // 参考 RPS: {-1, -2}, deltaRps = -1 -> {-1, -2, -3}
        let ref_rps = ShortTermRps {
            delta_poc_s0: vec![-1, -2],
            used_by_curr_pic_s0: vec![true, true],
            ..Default::default()
        };
        let mut bw = BitWriter::new();
        bw.write_flag(true); // inter_ref_pic_set_prediction_flag
        bw.write_flag(true); // delta_rps_sign
        bw.write_ue(0); // abs_delta_rps_minus1
        for _ in 0..3 {
            bw.write_flag(true); // used_by_curr_pic_flag
        }
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        let rps = parse_st_ref_pic_set(&mut br, 1, std::slice::from_ref(&ref_rps), 2).unwrap();
        assert_eq!(rps.delta_poc_s0, vec![-1, -2, -3]);
        assert!(rps.delta_poc_s1.is_empty());
        assert_eq!(rps.used_by_curr_pic_s0, vec![true, true, true]);
    }

    #[test]
    fn test_inter_rps_prediction_positive_delta() {
        // 参考 RPS: {-2 | +2}, deltaRps = +1 -> {-1 | +1, +3}
        let ref_rps = ShortTermRps {
            delta_poc_s0: vec![-2],
            used_by_curr_pic_s0: vec![true],
            delta_poc_s1: vec![2],
            used_by_curr_pic_s1: vec![true],
        };
        let mut bw = BitWriter::new();
        bw.write_flag(true);
        bw.write_flag(false); // sign = +
        bw.write_ue(0);
        for _ in 0..3 {
            bw.write_flag(true);
        }
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        let rps = parse_st_ref_pic_set(&mut br, 1, std::slice::from_ref(&ref_rps), 2).unwrap();
        assert_eq!(rps.delta_poc_s0, vec![-1]);
        assert_eq!(rps.delta_poc_s1, vec![1, 3]);
    }

    #[test]
    fn test_delta_poc_out_of_range_rejected() {
        let mut bw = BitWriter::new();
        bw.write_ue(1); // num_negative_pics
        bw.write_ue(0); // num_positive_pics
        bw.write_ue(0x7FFF_FFFF); // delta_poc_s0_minus1
        bw.write_flag(true);
        let data = bw.finish();
        let err = parse_st_ref_pic_set(&mut BitReader::new(&data), 0, &[], 1).unwrap_err();
        assert!(matches!(err, HwdecError::InvalidData(_)), "错误: {}", err);
        assert!(err.to_string().contains("delta_poc_s0_minus1"));

        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(0x8000); // 比上限大 1
        bw.write_flag(true);
        let data = bw.finish();
        let err = parse_st_ref_pic_set(&mut BitReader::new(&data), 0, &[], 1).unwrap_err();
        assert!(err.to_string().contains("delta_poc_s1_minus1"), "错误: {}", err);

        // 上限本身合法
        let mut bw = BitWriter::new();
        bw.write_ue(1);
        bw.write_ue(0);
        bw.write_ue(0x7FFF);
        bw.write_flag(true);
        let data = bw.finish();
        let rps = parse_st_ref_pic_set(&mut BitReader::new(&data), 0, &[], 1).unwrap();
        assert_eq!(rps.delta_poc_s0, vec![-0x8000]);
    }
}
