//! H.264 图像记录.

use bitflags::bitflags;

use crate::accelerator::PictureStructure;
use crate::surface::Surface;

bitflags! {
    /// 场掩码: 描述图像包含的场, 或某种参考标记覆盖的场
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldMask: u8 {
        /// 顶场
        const TOP = 1 << 0;
        /// 底场
        const BOTTOM = 1 << 1;
        /// 完整帧 (两场)
        const FRAME = Self::TOP.bits() | Self::BOTTOM.bits();
    }
}

impl FieldMask {
    /// 由 slice header 的 field_pic_flag / bottom_field_flag 推导
    pub fn from_slice(field_pic: bool, bottom_field: bool) -> Self {
        match (field_pic, bottom_field) {
            (false, _) => Self::FRAME,
            (true, false) => Self::TOP,
            (true, true) => Self::BOTTOM,
        }
    }

    /// 相反奇偶性的场; 帧保持不变
    pub fn opposite(self) -> Self {
        if self == Self::TOP {
            Self::BOTTOM
        } else if self == Self::BOTTOM {
            Self::TOP
        } else {
            self
        }
    }

    /// 是否为单场
    pub fn is_field(self) -> bool {
        self == Self::TOP || self == Self::BOTTOM
    }

    /// 转换为加速器使用的图像结构
    pub fn structure(self) -> PictureStructure {
        if self == Self::TOP {
            PictureStructure::TopField
        } else if self == Self::BOTTOM {
            PictureStructure::BottomField
        } else {
            PictureStructure::Frame
        }
    }
}

/// H.264 图像 (帧或互补场对)
///
/// 第一场入 DPB 后, 第二场解码完成时并入同一条目.
#[derive(Debug, Clone)]
pub struct H264Picture {
    /// 解码表面, "不存在" 帧没有表面
    pub surface: Option<Surface>,
    /// 输入时间戳
    pub timestamp: i64,
    /// 已解码的场
    pub fields: FieldMask,
    /// 首个解码的场 (帧图像为 FRAME)
    pub first_field: FieldMask,
    /// frame_num
    pub frame_num: u32,
    /// FrameNumWrap, 每幅新图像开始时重新计算
    pub frame_num_wrap: i32,
    /// TopFieldOrderCnt
    pub top_poc: i32,
    /// BottomFieldOrderCnt
    pub bottom_poc: i32,
    /// PicOrderCnt
    pub poc: i32,
    /// 标记为短期参考的场
    pub short_term: FieldMask,
    /// 标记为长期参考的场
    pub long_term: FieldMask,
    /// LongTermFrameIdx
    pub long_term_frame_idx: u32,
    /// 仍待输出
    pub output_needed: bool,
    /// IdrPicFlag
    pub idr: bool,
    /// nal_ref_idc != 0
    pub nal_ref: bool,
    /// 带 memory_management_control_operation 5
    pub mmco5: bool,
    /// 由 frame_num 间隙合成的 "不存在" 帧
    pub non_existing: bool,
}

impl H264Picture {
    /// 创建一幅新图像
    pub fn new(surface: Option<Surface>, structure: FieldMask, frame_num: u32) -> Self {
        Self {
            surface,
            timestamp: crate::buffer::NO_TIMESTAMP,
            fields: structure,
            first_field: structure,
            frame_num,
            frame_num_wrap: frame_num as i32,
            top_poc: 0,
            bottom_poc: 0,
            poc: 0,
            short_term: FieldMask::empty(),
            long_term: FieldMask::empty(),
            long_term_frame_idx: 0,
            output_needed: false,
            idr: false,
            nal_ref: false,
            mmco5: false,
            non_existing: false,
        }
    }

    /// 创建 frame_num 间隙中的 "不存在" 帧
    pub fn non_existing(frame_num: u32, poc: i32) -> Self {
        let mut pic = Self::new(None, FieldMask::FRAME, frame_num);
        pic.top_poc = poc;
        pic.bottom_poc = poc;
        pic.poc = poc;
        pic.nal_ref = true;
        pic.non_existing = true;
        pic
    }

    /// 是否为帧图像或已配对的场对
    pub fn is_complete_frame(&self) -> bool {
        self.fields == FieldMask::FRAME
    }

    /// 是否仍有任何场用于参考
    pub fn is_reference(&self) -> bool {
        !(self.short_term | self.long_term).is_empty()
    }

    /// 两场均为短期参考 (帧解码时可作为参考帧)
    pub fn is_short_term_frame(&self) -> bool {
        self.short_term == FieldMask::FRAME
    }

    /// 两场均为长期参考
    pub fn is_long_term_frame(&self) -> bool {
        self.long_term == FieldMask::FRAME
    }

    /// 指定场的 POC
    pub fn field_poc(&self, parity: FieldMask) -> i32 {
        if parity == FieldMask::TOP {
            self.top_poc
        } else if parity == FieldMask::BOTTOM {
            self.bottom_poc
        } else {
            self.poc
        }
    }

    /// 按已解码的场重新计算 PicOrderCnt
    pub fn update_poc(&mut self) {
        self.poc = if self.fields == FieldMask::FRAME {
            self.top_poc.min(self.bottom_poc)
        } else if self.fields == FieldMask::BOTTOM {
            self.bottom_poc
        } else {
            self.top_poc
        };
    }

    /// 取消全部参考标记
    pub fn unmark(&mut self) {
        self.short_term = FieldMask::empty();
        self.long_term = FieldMask::empty();
    }
}
