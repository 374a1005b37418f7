use std::io;

/// 加载过程中的错误分类
///
/// - `Eof`：流在结构中途结束（截断），由 driver 合成关闭事件后吞掉
/// - `Decode` / `VersionMismatch`：记录格式错误，终止当前解析
/// - `RangeNotReady`：请求的子区间尚未送达
/// - `Cancelled`：feedback 已取消
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    #[error("unexpected end of stream")]
    Eof,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported dump version {major}.{minor}")]
    VersionMismatch { major: u8, minor: u8 },

    #[error("range [{start}, {end}) not ready, {available} bytes delivered")]
    RangeNotReady { start: u64, end: u64, available: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl DumpError {
    pub fn decode(msg: impl Into<String>) -> Self {
        DumpError::Decode(msg.into())
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, DumpError::Eof)
    }
}

impl From<io::Error> for DumpError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => DumpError::Eof,
            _ => DumpError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_maps_to_eof() {
        let e: DumpError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(e.is_eof());
    }

    #[test]
    fn other_io_errors_stay_io() {
        let e: DumpError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, DumpError::Io(_)));
    }
}
