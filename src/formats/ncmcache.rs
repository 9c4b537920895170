//! 网易云音乐缓存文件（`.uc!`）。
//!
//! 缓存文件没有任何头尾结构，整个文件与固定字节 0xA3 逐位异或。

use crate::model::{ContainerDescriptor, FormatTag};

const CACHE_MASK: u8 = 0xA3;

pub(crate) fn parse() -> ContainerDescriptor {
    ContainerDescriptor::bare(FormatTag::NcmCache, 0, None)
}

pub(crate) fn apply(buf: &mut [u8]) {
    for byte in buf {
        *byte ^= CACHE_MASK;
    }
}
