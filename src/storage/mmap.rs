use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use crate::error::Result;

pub struct MmapRegion;

impl MmapRegion {
    /// 只读映射文件的 `[offset, offset + len)`
    ///
    /// 调用方保证这段数据已经写入（并 sync）到文件里。
    pub fn map_readonly(file: &File, offset: u64, len: usize) -> Result<Mmap> {
        // memmap2 内部处理页对齐
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file)? };
        Ok(map)
    }
}
