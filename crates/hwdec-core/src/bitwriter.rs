//! RBSP 比特写入器, [`BitReader`](crate::bitreader::BitReader) 的逆操作.
//!
//! 用于合成测试码流与改写片头.

/// RBSP 比特写入器
///
/// ```
/// use hwdec_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0);
/// bw.write_bits(0b001, 3);
/// assert_eq!(bw.finish(), vec![0b1011_1001]);
/// ```
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    /// 尚未凑满一字节的位, 右对齐
    pending: u32,
    pending_len: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的位数
    pub fn bits_written(&self) -> usize {
        self.bytes.len() * 8 + self.pending_len as usize
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bits(u32::from(flag), 1);
    }

    /// u(n): 写入 `value` 的低 n 位
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "单次最多写入 32 位, 请求 {} 位", n);
        let mut remaining = n;
        while remaining > 0 {
            let room = 8 - self.pending_len;
            let chunk = remaining.min(room);
            let bits = ((u64::from(value) >> (remaining - chunk)) & ((1 << chunk) - 1)) as u32;
            self.pending = (self.pending << chunk) | bits;
            self.pending_len += chunk;
            remaining -= chunk;
            if self.pending_len == 8 {
                self.bytes.push(self.pending as u8);
                self.pending = 0;
                self.pending_len = 0;
            }
        }
    }

    /// ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        // 前导零与码字拆开写, 码字可能长达 33 位
        self.write_bits(0, len - 1);
        if len > 32 {
            self.write_bits(1, 1);
            self.write_bits(code as u32, 32);
        } else {
            self.write_bits(code as u32, len);
        }
    }

    /// se(v)
    pub fn write_se(&mut self, value: i32) {
        let value = i64::from(value);
        let code = if value > 0 { 2 * value - 1 } else { -2 * value };
        self.write_ue(code as u32);
    }

    /// rbsp_trailing_bits(): 停止位后补零到字节边界
    pub fn write_trailing_bits(&mut self) {
        self.write_bits(1, 1);
        self.align_to_byte();
    }

    /// 补零到字节边界
    pub fn align_to_byte(&mut self) {
        if self.pending_len > 0 {
            self.write_bits(0, 8 - self.pending_len);
        }
    }

    /// 补齐并返回字节
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_fixed_width_write_across_bytes() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_bits(0x1FF, 9);
        bw.write_bits(0xABCD, 16);
        assert_eq!(bw.bits_written(), 28);
        assert_eq!(bw.finish(), vec![0b1011_1111, 0b1111_1010, 0b1011_1100, 0b1101_0000]);
    }

    #[test]
    fn test_exp_golomb_read_back_by_reader() {
        let unsigned = [0u32, 1, 2, 7, 255, 65_535, 1 << 20, u32::MAX];
        let signed = [-3, -1, 0, 1, 4, i32::MIN + 1];
        let mut bw = BitWriter::new();
        for &v in &unsigned {
            bw.write_ue(v);
        }
        for &v in &signed {
            bw.write_se(v);
        }
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        for &v in &unsigned {
            assert_eq!(br.read_ue().unwrap(), v, "ue(v) 读写不一致: {}", v);
        }
        for &v in &signed {
            assert_eq!(br.read_se().unwrap(), v, "se(v) 读写不一致: {}", v);
        }
        assert!(!br.more_rbsp_data(), "停止位之后不应有数据");
    }

    #[test]
    fn test_stop_bit_alignment() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_trailing_bits();
        assert_eq!(bw.bits_written(), 8);
        bw.align_to_byte();
        assert_eq!(bw.finish(), vec![0b1011_0000]);
    }
}
