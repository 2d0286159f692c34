//! NAL 分割与防竞争字节.
//!
//! H.264/H.265 共用两种封装:
//!
//! ```text
//! Annex B:     00 00 01 | NAL | 00 00 00 01 | NAL ...
//! 长度前缀:    len(1~4 字节, 大端) | NAL | len | NAL ...
//! ```

use hwdec_core::{HwdecError, HwdecResult};

const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// 按起始码切分 Annex B 码流, 返回的 NAL 含头字节, 不含起始码
///
/// 第一个起始码之前的字节被丢弃. 每个 NAL 尾部的零字节 (trailing_zero_8bits
/// 以及四字节起始码的首字节) 被去除.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let mut nal_begin = None;
    let mut pos = 0;
    while pos + START_CODE.len() <= data.len() {
        if data[pos..pos + START_CODE.len()] != START_CODE {
            pos += 1;
            continue;
        }
        if let Some(begin) = nal_begin {
            push_trimmed(&mut nals, &data[begin..pos]);
        }
        pos += START_CODE.len();
        nal_begin = Some(pos);
    }
    if let Some(begin) = nal_begin {
        push_trimmed(&mut nals, &data[begin..]);
    }
    nals
}

fn push_trimmed<'a>(nals: &mut Vec<&'a [u8]>, nal: &'a [u8]) {
    let len = nal.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
    if len > 0 {
        nals.push(&nal[..len]);
    }
}

/// 按长度前缀切分, `length_size` 为 avcC/hvcC 的 lengthSizeMinusOne + 1
///
/// 长度为 0 的 NAL 被跳过, 末尾不足一个长度字段的字节被忽略.
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> HwdecResult<Vec<&[u8]>> {
    if !matches!(length_size, 1..=4) {
        return Err(HwdecError::InvalidArgument(format!(
            "NAL 长度字段必须为 1~4 字节, 实际={}",
            length_size
        )));
    }

    let mut nals = Vec::new();
    let mut rest = data;
    while rest.len() >= length_size {
        let (prefix, tail) = rest.split_at(length_size);
        let len = prefix.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        if len > tail.len() {
            return Err(HwdecError::InvalidData(format!(
                "NAL 长度超出缓冲区, declared_len={}, remain={}",
                len,
                tail.len()
            )));
        }
        let (nal, tail) = tail.split_at(len);
        if !nal.is_empty() {
            nals.push(nal);
        }
        rest = tail;
    }
    Ok(nals)
}

/// NAL 负载转 RBSP: 删除 `00 00` 之后的 `03`
pub fn remove_emulation_prevention(payload: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(payload.len());
    let mut zero_run = 0;
    for &byte in payload {
        if zero_run == 2 && byte == 0x03 {
            zero_run = 0;
            continue;
        }
        zero_run = if byte == 0 { (zero_run + 1).min(2) } else { 0 };
        rbsp.push(byte);
    }
    rbsp
}

/// RBSP 转 NAL 负载: `00 00` 之后遇到 `00..=03` 时插入 `03`
pub fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zero_run = 0;
    for &byte in rbsp {
        if zero_run == 2 && byte <= 0x03 {
            payload.push(0x03);
            zero_run = 0;
        }
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
        payload.push(byte);
    }
    payload
}
