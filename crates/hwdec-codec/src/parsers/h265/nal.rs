//! H.265 NAL 头与 hvcC 解析.
//!
//! NAL 头两个字节:
//!
//! ```text
//! forbidden_zero_bit(1) nal_unit_type(6) nuh_layer_id(6) nuh_temporal_id_plus1(3)
//! ```

use hwdec_core::{HwdecError, HwdecResult};

use crate::parsers::bytestream::remove_emulation_prevention;

/// nal_unit_type (表 7-1), 保留类型与解码前端不处理的类型归入 `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcNalUnitType {
    TrailN,
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    Cra,
    Vps,
    Sps,
    Pps,
    Aud,
    Eos,
    Eob,
    PrefixSei,
    SuffixSei,
    Other(u8),
}

/// 已命名类型与编号的对应表
const NAMED_TYPES: [(HevcNalUnitType, u8); 24] = [
    (HevcNalUnitType::TrailN, 0),
    (HevcNalUnitType::TrailR, 1),
    (HevcNalUnitType::TsaN, 2),
    (HevcNalUnitType::TsaR, 3),
    (HevcNalUnitType::StsaN, 4),
    (HevcNalUnitType::StsaR, 5),
    (HevcNalUnitType::RadlN, 6),
    (HevcNalUnitType::RadlR, 7),
    (HevcNalUnitType::RaslN, 8),
    (HevcNalUnitType::RaslR, 9),
    (HevcNalUnitType::BlaWLp, 16),
    (HevcNalUnitType::BlaWRadl, 17),
    (HevcNalUnitType::BlaNLp, 18),
    (HevcNalUnitType::IdrWRadl, 19),
    (HevcNalUnitType::IdrNLp, 20),
    (HevcNalUnitType::Cra, 21),
    (HevcNalUnitType::Vps, 32),
    (HevcNalUnitType::Sps, 33),
    (HevcNalUnitType::Pps, 34),
    (HevcNalUnitType::Aud, 35),
    (HevcNalUnitType::Eos, 36),
    (HevcNalUnitType::Eob, 37),
    (HevcNalUnitType::PrefixSei, 39),
    (HevcNalUnitType::SuffixSei, 40),
];

impl From<u8> for HevcNalUnitType {
    fn from(id: u8) -> Self {
        let id = id & 0x3F;
        NAMED_TYPES
            .iter()
            .find(|&&(_, named)| named == id)
            .map_or(Self::Other(id), |&(nal_type, _)| nal_type)
    }
}

impl HevcNalUnitType {
    /// 编码后的 nal_unit_type 值
    pub fn id(self) -> u8 {
        match self {
            Self::Other(id) => id,
            named => NAMED_TYPES
                .iter()
                .find(|&&(nal_type, _)| nal_type == named)
                .map_or(0, |&(_, id)| id),
        }
    }

    /// 0..=31 为 VCL
    pub fn is_vcl(self) -> bool {
        self.id() < 32
    }

    /// BLA / IDR / CRA 以及保留的 IRAP 类型 22, 23
    pub fn is_irap(self) -> bool {
        (16..=23).contains(&self.id())
    }

    pub fn is_idr(self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    pub fn is_bla(self) -> bool {
        matches!(self, Self::BlaWLp | Self::BlaWRadl | Self::BlaNLp)
    }

    pub fn is_cra(self) -> bool {
        self == Self::Cra
    }

    pub fn is_rasl(self) -> bool {
        matches!(self, Self::RaslN | Self::RaslR)
    }

    pub fn is_radl(self) -> bool {
        matches!(self, Self::RadlN | Self::RadlR)
    }

    /// 子层非参考图像: 14 以内的偶数类型 (含保留的 RSV_VCL_N10/12/14)
    pub fn is_sub_layer_non_reference(self) -> bool {
        let id = self.id();
        id <= 14 && id % 2 == 0
    }
}

impl std::fmt::Display for HevcNalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(id) => write!(f, "NAL#{}", id),
            named => write!(f, "{:?}", named),
        }
    }
}

/// 一个 HEVC NAL 单元
#[derive(Debug, Clone)]
pub struct HevcNalUnit {
    pub nal_type: HevcNalUnitType,
    /// nuh_layer_id, 基本层为 0
    pub layer_id: u8,
    /// TemporalId = nuh_temporal_id_plus1 - 1
    pub temporal_id: u8,
    /// 两字节头之后的负载, 仍含防竞争字节
    pub payload: Vec<u8>,
}

impl HevcNalUnit {
    /// 解析以两字节头开头的 NAL
    pub fn parse(data: &[u8]) -> HwdecResult<Self> {
        let [b0, b1, payload @ ..] = data else {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: NAL 长度 {} 不足以容纳头部",
                data.len()
            )));
        };
        if b0 & 0x80 != 0 {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: forbidden_zero_bit 置位, header=0x{:02X}{:02X}",
                b0, b1
            )));
        }
        let temporal_id = (b1 & 0x07).checked_sub(1).ok_or_else(|| {
            HwdecError::InvalidData("HEVC: nuh_temporal_id_plus1 为 0".into())
        })?;

        Ok(Self {
            nal_type: HevcNalUnitType::from(b0 >> 1),
            layer_id: ((b0 & 0x01) << 5) | (b1 >> 3),
            temporal_id,
            payload: payload.to_vec(),
        })
    }

    /// 去除防竞争字节后的 RBSP
    pub fn rbsp(&self) -> Vec<u8> {
        remove_emulation_prevention(&self.payload)
    }
}

/// HEVCDecoderConfigurationRecord 中解码前端用到的部分
#[derive(Debug, Default)]
pub struct HvccConfig {
    pub vps_list: Vec<Vec<u8>>,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
    /// 样本中 NAL 长度字段的字节数
    pub length_size: usize,
}

/// hvcC 固定头部长度
const HVCC_HEADER_LEN: usize = 23;

/// 解析 hvcC box 负载
pub fn parse_hvcc_config(data: &[u8]) -> HwdecResult<HvccConfig> {
    let truncated = |what: &str| HwdecError::InvalidData(format!("HEVC: hvcC {} 截断", what));
    let header = data.get(..HVCC_HEADER_LEN).ok_or_else(|| truncated("头部"))?;

    let mut config = HvccConfig {
        length_size: usize::from(header[21] & 0x03) + 1,
        ..Default::default()
    };
    let mut rest = &data[HVCC_HEADER_LEN..];
    for _ in 0..header[22] {
        let [kind, n0, n1, tail @ ..] = rest else {
            return Err(truncated("数组头"));
        };
        let nal_type = HevcNalUnitType::from(*kind);
        rest = tail;

        for _ in 0..u16::from_be_bytes([*n0, *n1]) {
            let [l0, l1, tail @ ..] = rest else {
                return Err(truncated("NAL 长度"));
            };
            let len = usize::from(u16::from_be_bytes([*l0, *l1]));
            if tail.len() < len {
                return Err(HwdecError::InvalidData(format!(
                    "HEVC: hvcC NAL 截断, declared_len={}, remain={}",
                    len,
                    tail.len()
                )));
            }
            let (nal, tail) = tail.split_at(len);
            rest = tail;

            let list = match nal_type {
                HevcNalUnitType::Vps => &mut config.vps_list,
                HevcNalUnitType::Sps => &mut config.sps_list,
                HevcNalUnitType::Pps => &mut config.pps_list,
                _ => continue,
            };
            list.push(nal.to_vec());
        }
    }
    Ok(config)
}
