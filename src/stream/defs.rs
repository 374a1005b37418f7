//! 线上格式常量（big-endian，tag 前缀）

use crate::pool::PoolKind;

pub const MAGIC: [u8; 4] = *b"BIGV";
pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;

// 根记录
pub const BEGIN_GROUP: u8 = 0x00;
pub const BEGIN_GRAPH: u8 = 0x01;
pub const CLOSE_GROUP: u8 = 0x02;

// 常量池对象
pub const POOL_NEW: u8 = 0x00;
pub const POOL_STRING: u8 = 0x01;
pub const POOL_ENUM: u8 = 0x02;
pub const POOL_CLASS: u8 = 0x03;
pub const POOL_METHOD: u8 = 0x04;
pub const POOL_NULL: u8 = 0x05;
pub const POOL_NODE_CLASS: u8 = 0x06;
pub const POOL_FIELD: u8 = 0x07;
pub const POOL_SIGNATURE: u8 = 0x08;

// 属性值
pub const PROPERTY_POOL: u8 = 0x00;
pub const PROPERTY_INT: u8 = 0x01;
pub const PROPERTY_LONG: u8 = 0x02;
pub const PROPERTY_DOUBLE: u8 = 0x03;
pub const PROPERTY_FLOAT: u8 = 0x04;
pub const PROPERTY_TRUE: u8 = 0x05;
pub const PROPERTY_FALSE: u8 = 0x06;
pub const PROPERTY_ARRAY: u8 = 0x07;
pub const PROPERTY_SUBGRAPH: u8 = 0x08;

pub const KLASS: u8 = 0x00;
pub const ENUM_KLASS: u8 = 0x01;

pub fn pool_tag(kind: PoolKind) -> u8 {
    match kind {
        PoolKind::String => POOL_STRING,
        PoolKind::Enum => POOL_ENUM,
        PoolKind::Klass => POOL_CLASS,
        PoolKind::Method => POOL_METHOD,
        PoolKind::NodeClass => POOL_NODE_CLASS,
        PoolKind::Field => POOL_FIELD,
        PoolKind::Signature => POOL_SIGNATURE,
    }
}

pub fn pool_kind(tag: u8) -> Option<PoolKind> {
    match tag {
        POOL_STRING => Some(PoolKind::String),
        POOL_ENUM => Some(PoolKind::Enum),
        POOL_CLASS => Some(PoolKind::Klass),
        POOL_METHOD => Some(PoolKind::Method),
        POOL_NODE_CLASS => Some(PoolKind::NodeClass),
        POOL_FIELD => Some(PoolKind::Field),
        POOL_SIGNATURE => Some(PoolKind::Signature),
        _ => None,
    }
}
