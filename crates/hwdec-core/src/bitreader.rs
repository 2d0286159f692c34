//! RBSP 比特读取器.
//!
//! 参数集与片头解析共用. 位序为 MSB first, 支持 u(n)、ue(v)、se(v)
//! 以及 more_rbsp_data() 判定.

use crate::{HwdecError, HwdecResult};

/// RBSP 比特读取器
///
/// 只维护一个绝对位位置, 读取越界返回 [`HwdecError::Eof`].
///
/// ```
/// use hwdec_core::bitreader::BitReader;
///
/// // 1 | 010 | 011 | 00100 -> ue 值 0, 1, 2, 3
/// let data = [0b1010_0110, 0b0100_0000];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.read_ue().unwrap(), 1);
/// assert_eq!(br.read_ue().unwrap(), 2);
/// assert_eq!(br.read_ue().unwrap(), 3);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 已消耗的位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 已读取的位数
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 剩余位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    fn take_bit(&mut self) -> HwdecResult<u32> {
        let byte = *self.data.get(self.pos / 8).ok_or(HwdecError::Eof)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    /// u(1)
    pub fn read_flag(&mut self) -> HwdecResult<bool> {
        Ok(self.take_bit()? == 1)
    }

    /// u(n), n 不超过 32
    pub fn read_bits(&mut self, n: u32) -> HwdecResult<u32> {
        if n > 32 {
            return Err(HwdecError::InvalidArgument(format!(
                "单次最多读取 32 位, 请求 {} 位",
                n
            )));
        }
        if n as usize > self.bits_left() {
            return Err(HwdecError::Eof);
        }

        let mut value = 0u64;
        let mut remaining = n as usize;
        while remaining > 0 {
            let offset = self.pos % 8;
            let chunk = remaining.min(8 - offset);
            let byte = self.data[self.pos / 8] as u64;
            let bits = (byte >> (8 - offset - chunk)) & ((1 << chunk) - 1);
            value = (value << chunk) | bits;
            self.pos += chunk;
            remaining -= chunk;
        }
        Ok(value as u32)
    }

    /// ue(v)
    pub fn read_ue(&mut self) -> HwdecResult<u32> {
        let mut zeros = 0u32;
        while self.take_bit()? == 0 {
            zeros += 1;
            if zeros > 32 {
                return Err(HwdecError::InvalidData("ue(v) 前导零过长".into()));
            }
        }
        let info = u64::from(self.read_bits(zeros)?);
        let code = (1u64 << zeros) - 1 + info;
        u32::try_from(code).map_err(|_| HwdecError::InvalidData(format!("ue(v) 溢出: {}", code)))
    }

    /// se(v)
    pub fn read_se(&mut self) -> HwdecResult<i32> {
        let code = i64::from(self.read_ue()?);
        let magnitude = (code + 1) >> 1;
        let value = if code % 2 == 0 { -magnitude } else { magnitude };
        Ok(value as i32)
    }

    pub fn skip_bits(&mut self, n: usize) -> HwdecResult<()> {
        if n > self.bits_left() {
            return Err(HwdecError::Eof);
        }
        self.pos += n;
        Ok(())
    }

    /// more_rbsp_data(): 当前位置是否位于 rbsp_stop_one_bit 之前
    pub fn more_rbsp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };
        let stop_bit = last * 8 + 7 - self.data[last].trailing_zeros() as usize;
        self.pos < stop_bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_read_across_bytes() {
        let data = [0xA5, 0x3C, 0xFF, 0x01, 0x80];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(3).unwrap(), 0b101);
        assert_eq!(br.read_bits(9).unwrap(), 0b0_0101_0011);
        assert_eq!(br.bits_read(), 12);
        assert_eq!(br.read_bits(0).unwrap(), 0);
        assert_eq!(br.read_bits(28).unwrap(), 0x0CFF_0180);
        assert_eq!(br.bits_left(), 0);
        assert!(matches!(br.read_flag(), Err(HwdecError::Eof)));
    }

    #[test]
    fn test_read_full_32_bits() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(32).unwrap(), 0xDEAD_BEEF);
        assert!(br.read_bits(33).is_err());
    }

    #[test]
    fn test_signed_exp_golomb() {
        // ue 码字 1..=4 对应 se 值 1, -1, 2, -2
        let data = [0b0100_1100, 0b1000_0101];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_se().unwrap(), 1);
        assert_eq!(br.read_se().unwrap(), -1);
        assert_eq!(br.read_se().unwrap(), 2);
        assert_eq!(br.read_se().unwrap(), -2);
    }

    #[test]
    fn test_exp_golomb_all_zero_errors() {
        let data = [0u8; 8];
        let mut br = BitReader::new(&data);
        assert!(br.read_ue().is_err());
    }

    #[test]
    fn test_skip_and_overrun() {
        let data = [0x00, 0x80];
        let mut br = BitReader::new(&data);
        br.skip_bits(8).unwrap();
        assert!(br.read_flag().unwrap());
        assert!(br.skip_bits(8).is_err(), "越界跳过应失败");
        assert_eq!(br.bits_read(), 9);
    }

    #[test]
    fn test_more_rbsp_data_stops_at_stop_bit() {
        // 数据 101, 随后是 rbsp_stop_one_bit 与填充零
        let data = [0b1011_0000];
        let mut br = BitReader::new(&data);
        assert!(br.more_rbsp_data());
        br.read_bits(3).unwrap();
        assert!(!br.more_rbsp_data());
        assert!(!BitReader::new(&[0, 0]).more_rbsp_data());
    }
}
