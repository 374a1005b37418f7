use std::io::{ErrorKind, Read};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::defs::{MAGIC, MAJOR_VERSION, MINOR_VERSION};
use crate::error::{DumpError, Result};

/// 默认读缓冲
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

pub type GraphDigest = [u8; 32];

/// 解析过程的取消 / 进度钩子，每次补充缓冲区时调用
pub trait ParseMonitor: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// `consumed`：相对起点已经消费的字节数
    fn update_progress(&self, consumed: u64);
}

/// 二进制游标：缓冲 + big-endian 基本类型 + 分块无关的滚动摘要
pub struct BinarySource<R> {
    reader: R,
    buf: Box<[u8]>,
    pos: usize,
    limit: usize,
    /// buf[0] 对应的绝对偏移
    buffer_offset: u64,
    base: u64,
    digest: Sha256,
    digesting: bool,
    digest_from: usize,
    monitor: Option<Arc<dyn ParseMonitor>>,
}

impl<R: Read> BinarySource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; capacity.max(16)].into_boxed_slice(),
            pos: 0,
            limit: 0,
            buffer_offset: 0,
            base: 0,
            digest: Sha256::new(),
            digesting: false,
            digest_from: 0,
            monitor: None,
        }
    }

    /// 读取的是某个子区间：mark 从 `offset` 开始计
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.buffer_offset = offset;
        self.base = offset;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ParseMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// 当前绝对偏移
    pub fn mark(&self) -> u64 {
        self.buffer_offset + self.pos as u64
    }

    fn digest_pending(&mut self) {
        if self.digesting && self.pos > self.digest_from {
            self.digest.update(&self.buf[self.digest_from..self.pos]);
            self.digest_from = self.pos;
        }
    }

    fn fill(&mut self) -> Result<()> {
        if let Some(monitor) = &self.monitor {
            if monitor.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            monitor.update_progress(self.mark() - self.base);
        }
        // 压缩前先把已消费的字节计入摘要
        self.digest_pending();
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.limit, 0);
            self.limit -= self.pos;
            self.buffer_offset += self.pos as u64;
            self.pos = 0;
            self.digest_from = 0;
        }
        loop {
            match self.reader.read(&mut self.buf[self.limit..]) {
                Ok(0) => return Err(DumpError::Eof),
                Ok(n) => {
                    self.limit += n;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn ensure(&mut self, n: usize) -> Result<()> {
        if n > self.buf.len() {
            return Err(DumpError::decode(format!(
                "record of {} bytes exceeds buffer of {}",
                n,
                self.buf.len()
            )));
        }
        while self.limit - self.pos < n {
            self.fill()?;
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// 读取 `len` 个原始字节（可超过缓冲区大小）
    pub fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(self.buf.len()));
        let mut remaining = len;
        while remaining > 0 {
            self.ensure(1)?;
            let n = remaining.min(self.limit - self.pos);
            let start = self.pos;
            out.extend_from_slice(&self.buf[start..start + n]);
            self.pos += n;
            remaining -= n;
        }
        Ok(out)
    }

    /// i32 长度前缀的字节块；负长度表示 null
    pub fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_exact_vec(len as usize).map(Some)
    }

    pub fn read_string(&mut self) -> Result<Arc<str>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(DumpError::decode(format!(
                "negative string length {} at {}",
                len,
                self.mark()
            )));
        }
        let bytes = self.read_exact_vec(len as usize)?;
        let s = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Ok(Arc::from(s))
    }

    pub fn read_ints_to_string(&mut self, len: usize) -> Result<String> {
        let mut out = String::from("[");
        for i in 0..len {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.read_i32()?.to_string());
        }
        out.push(']');
        Ok(out)
    }

    pub fn read_doubles_to_string(&mut self, len: usize) -> Result<String> {
        let mut out = String::from("[");
        for i in 0..len {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.read_f64()?.to_string());
        }
        out.push(']');
        Ok(out)
    }

    /// 不消费地查看接下来的 `n` 个字节
    pub fn peek_bytes(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        Ok(&self.buf[self.pos..self.pos + n])
    }

    /// 检查可选的 `BIGV` 头；存在则消费并校验版本
    pub fn read_header(&mut self) -> Result<bool> {
        if self.peek_bytes(MAGIC.len())? != MAGIC {
            return Ok(false);
        }
        self.pos += MAGIC.len();
        let major = self.read_u8()?;
        let minor = self.read_u8()?;
        if major > MAJOR_VERSION || (major == MAJOR_VERSION && minor > MINOR_VERSION) {
            return Err(DumpError::VersionMismatch { major, minor });
        }
        Ok(true)
    }

    pub fn start_digest(&mut self) {
        self.digest = Sha256::new();
        self.digesting = true;
        self.digest_from = self.pos;
    }

    pub fn finish_digest(&mut self) -> GraphDigest {
        self.digest_pending();
        self.digesting = false;
        self.digest.finalize_reset().into()
    }
}
