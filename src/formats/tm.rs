//! QQ 音乐安卓端 `.tm*` 文件。
//!
//! 这种"加密"只是把 MP4 头部 8 个字节换成了 `QQMU` 标记，
//! 还原时按位置覆写回标准 `ftyp` 头，其余内容原样就是明文。

use std::io::{ErrorKind, Read};

use crate::error::{Result, TakiyashaError};
use crate::model::{ContainerDescriptor, FormatTag};

const MAGIC: [u8; 4] = *b"QQMU";
/// 被替换掉的原始 MP4 头。
const REAL_HEADER: [u8; 8] = [0x00, 0x00, 0x00, 0x1C, 0x66, 0x74, 0x79, 0x70];

pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<ContainerDescriptor> {
    let mut head = [0u8; 8];
    reader.read_exact(&mut head).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            TakiyashaError::MalformedContainer("TM 文件不足 8 字节".into())
        } else {
            TakiyashaError::UnderlyingIo(e)
        }
    })?;
    if head[..4] != MAGIC {
        return Err(TakiyashaError::MalformedContainer(format!(
            "文件头不是 QQMU 标记: {}",
            hex::encode(&head[..4])
        )));
    }
    Ok(ContainerDescriptor::bare(FormatTag::Tm, 0, None))
}

/// 按位置覆写，不是异或：只有前 8 个字节需要还原。
pub(crate) fn apply(buf: &mut [u8], offset: u64) {
    if offset >= REAL_HEADER.len() as u64 {
        return;
    }
    let start = offset as usize;
    let n = (REAL_HEADER.len() - start).min(buf.len());
    buf[..n].copy_from_slice(&REAL_HEADER[start..start + n]);
}
