//! H.264 NAL 头与 avcC 解析.
//!
//! NAL 头只有一个字节: forbidden_zero_bit(1) nal_ref_idc(2) nal_unit_type(5).

use hwdec_core::{HwdecError, HwdecResult};

use crate::parsers::bytestream::remove_emulation_prevention;

/// nal_unit_type (表 7-1), 解码前端不关心的类型归入 `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像的 slice
    Slice,
    /// 数据分区 A/B/C
    SliceDpa,
    SliceDpb,
    SliceDpc,
    /// IDR 图像的 slice
    SliceIdr,
    Sei,
    Sps,
    Pps,
    Aud,
    EndOfSequence,
    EndOfStream,
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(id: u8) -> Self {
        match id & 0x1F {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            other => Self::Other(other),
        }
    }
}

impl NalUnitType {
    /// 编码后的 nal_unit_type 值
    pub fn id(self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::Other(id) => id,
        }
    }

    /// 类型 1..=5 属于 VCL
    pub fn is_vcl(self) -> bool {
        (1..=5).contains(&self.id())
    }

    pub fn is_idr(self) -> bool {
        self == Self::SliceIdr
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Slice => "NonIDR",
            Self::SliceDpa => "DPA",
            Self::SliceDpb => "DPB",
            Self::SliceDpc => "DPC",
            Self::SliceIdr => "IDR",
            Self::Sei => "SEI",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
            Self::Aud => "AUD",
            Self::EndOfSequence => "EOS",
            Self::EndOfStream => "EOB",
            Self::Other(id) => return write!(f, "NAL#{}", id),
        };
        f.write_str(name)
    }
}

/// 一个 NAL 单元
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    /// nal_ref_idc, 0 表示非参考
    pub ref_idc: u8,
    /// 头字节之后的负载, 仍含防竞争字节
    pub payload: Vec<u8>,
}

impl NalUnit {
    /// 解析以头字节开头的 NAL
    pub fn parse(data: &[u8]) -> HwdecResult<Self> {
        let (&header, payload) = data
            .split_first()
            .ok_or_else(|| HwdecError::InvalidData("H.264: 空 NAL".into()))?;
        if header & 0x80 != 0 {
            return Err(HwdecError::InvalidData(format!(
                "H.264: forbidden_zero_bit 置位, header=0x{:02X}",
                header
            )));
        }
        Ok(Self {
            nal_type: NalUnitType::from(header),
            ref_idc: header >> 5,
            payload: payload.to_vec(),
        })
    }

    /// 去除防竞争字节后的 RBSP
    pub fn rbsp(&self) -> Vec<u8> {
        remove_emulation_prevention(&self.payload)
    }
}

/// AVCDecoderConfigurationRecord 中解码前端用到的部分
#[derive(Debug)]
pub struct AvccConfig {
    /// SPS NAL (含头字节)
    pub sps_list: Vec<Vec<u8>>,
    /// PPS NAL (含头字节)
    pub pps_list: Vec<Vec<u8>>,
    /// 样本中 NAL 长度字段的字节数
    pub length_size: usize,
}

/// 解析 avcC box 负载
pub fn parse_avcc_config(data: &[u8]) -> HwdecResult<AvccConfig> {
    let mut cursor = RecordCursor { data, pos: 0 };
    let header = cursor.take(6, "头部")?;
    if header[0] != 1 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: avcC configurationVersion={} 不受支持",
            header[0]
        )));
    }
    let length_size = usize::from(header[4] & 0x03) + 1;

    let sps_count = usize::from(header[5] & 0x1F);
    let sps_list = cursor.take_sets(sps_count, "SPS")?;
    let pps_count = usize::from(cursor.take(1, "numOfPictureParameterSets")?[0]);
    let pps_list = cursor.take_sets(pps_count, "PPS")?;

    Ok(AvccConfig {
        sps_list,
        pps_list,
        length_size,
    })
}

struct RecordCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordCursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> HwdecResult<&'a [u8]> {
        let end = self.pos + len;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| {
            HwdecError::InvalidData(format!(
                "H.264: avcC {} 截断, need={}, remain={}",
                what,
                len,
                self.data.len().saturating_sub(self.pos)
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    /// 读取 `count` 个带 16 位长度前缀的参数集
    fn take_sets(&mut self, count: usize, what: &str) -> HwdecResult<Vec<Vec<u8>>> {
        (0..count)
            .map(|_| {
                let len = self.take(2, what)?;
                let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
                if len == 0 {
                    return Err(HwdecError::InvalidData(format!("H.264: avcC {} 长度为 0", what)));
                }
                Ok(self.take(len, what)?.to_vec())
            })
            .collect()
    }
}
