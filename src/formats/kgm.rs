//! 酷狗 KGM / VPR 容器（仅识别）。
//!
//! 这两种容器共用一套结构：16 字节魔数，偏移 0x10 处的小端 u32
//! 给出头部总长，偏移 0x1C 处是 16 字节文件密钥，音频从头部
//! 之后开始。它们的掩码表不在本库可靠掌握的范围内，因此解析器
//! 只验证结构、定位音频区域并原样取出密钥，真正打开时会以
//! `UnsupportedFileType` 拒绝。

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, TakiyashaError};
use crate::model::{ContainerDescriptor, FormatTag};

pub(crate) const KGM_MAGIC: [u8; 16] = [
    0x7C, 0xD5, 0x32, 0xEB, 0x86, 0x02, 0x7F, 0x4B,
    0xA8, 0xAF, 0xA6, 0x8E, 0x0F, 0xFF, 0x99, 0x14,
];
pub(crate) const VPR_MAGIC: [u8; 16] = [
    0x05, 0x28, 0xBC, 0x96, 0xE9, 0xE4, 0x5A, 0x43,
    0x91, 0xAA, 0xBD, 0xD0, 0x7A, 0xF5, 0x36, 0x31,
];

const KEY_OFFSET: u64 = 0x1C;
const KEY_LEN: usize = 16;

pub(crate) fn parse<R: Read + Seek>(reader: &mut R) -> Result<ContainerDescriptor> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 16];
    reader.read_exact(&mut magic)?;
    let format = match magic {
        KGM_MAGIC => FormatTag::Kgm,
        VPR_MAGIC => FormatTag::Vpr,
        _ => {
            return Err(TakiyashaError::MalformedContainer(format!(
                "文件头既不是 KGM 也不是 VPR 魔数: {}",
                hex::encode(magic)
            )));
        }
    };

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let header_len = u64::from(u32::from_le_bytes(len_buf));
    if header_len > file_len {
        return Err(TakiyashaError::MalformedContainer(format!(
            "声称的头部长度 {header_len} 超出文件大小 {file_len}"
        )));
    }
    if file_len < KEY_OFFSET + KEY_LEN as u64 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "文件长度 {file_len} 容不下 0x1C 处的密钥块"
        )));
    }

    // 掩码推导要求密钥以 NUL 结尾
    reader.seek(SeekFrom::Start(KEY_OFFSET))?;
    let mut file_key = vec![0u8; KEY_LEN];
    reader.read_exact(&mut file_key)?;
    file_key.push(0);

    let mut descriptor = ContainerDescriptor::bare(format, header_len, None);
    descriptor.embedded_key_material = Some(file_key);
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn kugou_file(magic: &[u8; 16], header_len: u32, total_len: usize) -> Vec<u8> {
        let mut file = magic.to_vec();
        file.extend_from_slice(&header_len.to_le_bytes());
        file.resize(total_len, 0);
        file
    }

    #[test]
    fn recognizes_kgm_and_extracts_file_key() {
        let mut file = kugou_file(&KGM_MAGIC, 0x40, 0x80);
        file[0x1C..0x2C].copy_from_slice(b"sixteen byte key");
        let descriptor = parse(&mut Cursor::new(file)).expect("解析 KGM 容器失败");
        assert_eq!(descriptor.format, FormatTag::Kgm);
        assert_eq!(descriptor.data_offset, 0x40);

        let key = descriptor.embedded_key_material.expect("应取出文件密钥");
        assert_eq!(&key[..16], b"sixteen byte key");
        assert_eq!(key[16], 0, "密钥末尾应补 NUL");
    }

    #[test]
    fn recognizes_vpr() {
        let file = kugou_file(&VPR_MAGIC, 0x30, 0x30);
        let descriptor = parse(&mut Cursor::new(file)).expect("解析 VPR 容器失败");
        assert_eq!(descriptor.format, FormatTag::Vpr);
    }

    #[test]
    fn rejects_file_too_short_for_key() {
        let file = kugou_file(&KGM_MAGIC, 0x20, 0x20);
        let err = parse(&mut Cursor::new(file)).unwrap_err();
        assert!(matches!(err, TakiyashaError::MalformedContainer(_)));
    }

    #[test]
    fn rejects_header_longer_than_file() {
        let file = kugou_file(&KGM_MAGIC, 0x1000, 0x40);
        let err = parse(&mut Cursor::new(file)).unwrap_err();
        assert!(matches!(err, TakiyashaError::MalformedContainer(_)));
    }

    #[test]
    fn rejects_unknown_magic() {
        let file = kugou_file(&[0u8; 16], 0x20, 0x40);
        let err = parse(&mut Cursor::new(file)).unwrap_err();
        assert!(matches!(err, TakiyashaError::MalformedContainer(_)));
    }
}
