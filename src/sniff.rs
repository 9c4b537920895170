//! 明文音频类型嗅探。
//!
//! 解密完成后，音频的真实容器类型要靠内容判断（加密文件的
//! 扩展名只反映厂商格式）。嗅探只看头部 16 字节，遇到 ID3v2
//! 标签会先跳过标签再看一次。结论只用于推测输出扩展名，
//! 嗅探不出来不算错误。

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::Result;
use crate::model::ContainerKind;

const PROBE_LEN: usize = 16;

/// ASF 头对象的 GUID。
const WMA_GUID: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11,
    0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];

const AUDIO_SIGNATURES: &[(&[u8], ContainerKind)] = &[
    (b"fLaC", ContainerKind::Flac),
    (b"OggS", ContainerKind::Ogg),
    (b"TTA", ContainerKind::Tta),
    (b"MAC ", ContainerKind::Ape),
    (&[0xFF, 0xF2], ContainerKind::Mp3),
    (&[0xFF, 0xF3], ContainerKind::Mp3),
    (&[0xFF, 0xFB], ContainerKind::Mp3),
    (&[0xFF, 0xF1], ContainerKind::Aac),
    (b"FRM8", ContainerKind::Dff),
    (b"RIFF", ContainerKind::Wav),
    (&WMA_GUID, ContainerKind::Wma),
];

/// 嗅探明文音频的容器类型。
///
/// 返回前会把读取位置还原到调用时的位置。认不出来返回
/// `Ok(None)`，只有底层 I/O 出错才返回 `Err`。
pub fn sniff_audio<R: Read + Seek>(reader: &mut R) -> Result<Option<ContainerKind>> {
    let saved = reader.stream_position()?;
    let mut pos = 0u64;

    let kind = loop {
        reader.seek(SeekFrom::Start(pos))?;
        let mut probe = [0u8; PROBE_LEN];
        let mut filled = 0usize;
        while filled < probe.len() {
            let n = reader.read(&mut probe[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let head = &probe[..filled];

        // ID3v2 标签长度是 4 字节 7 位制（syncsafe），不含 10 字节标签头
        if head.len() >= 10 && head.starts_with(b"ID3") {
            let tag_size = syncsafe_u28(&probe[6..10]);
            pos += 10 + u64::from(tag_size);
            debug!(tag_size, next_probe = pos, "跳过 ID3v2 标签");
            continue;
        }

        break match_signature(head);
    };

    reader.seek(SeekFrom::Start(saved))?;
    Ok(kind)
}

fn match_signature(head: &[u8]) -> Option<ContainerKind> {
    for (magic, kind) in AUDIO_SIGNATURES {
        if head.starts_with(magic) {
            return Some(*kind);
        }
    }
    // ISO BMFF 的 ftyp 品牌盒在偏移 4 处
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return Some(ContainerKind::M4a);
    }
    None
}

fn syncsafe_u28(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7F))
}
