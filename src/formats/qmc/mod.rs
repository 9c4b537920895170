//! QQ 音乐系列容器（QMCv1 / QMCv2）。
//!
//! QMCv1 没有任何头尾结构，整个文件就是静态表加密的音频。
//! QMCv2（`.mflac*` / `.mgg*`）把密钥材料挂在文件尾部，
//! 有三种尾部布局，靠最后 4 个字节区分。

pub(crate) mod ciphers;
pub mod keys;
pub(crate) mod tea;

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::{Result, TakiyashaError};
use crate::formats::CipherState;
use crate::model::{ContainerDescriptor, FormatTag, MetadataMap};

use ciphers::{DynamicMap, SegmentRc4};

/// 尾部长度字段允许的上限。超过它的数值说明这不是 QMCv2 尾部。
const TAIL_KEY_LEN_LIMIT: u64 = 0x300;
/// Map 与 RC4 密钥流的长度分界。
const RC4_KEY_LEN_THRESHOLD: usize = 300;

/// QMCv1 文件没有可解析的结构，区域就是整个文件。
pub(crate) fn parse_v1() -> ContainerDescriptor {
    ContainerDescriptor::bare(FormatTag::QmcV1, 0, None)
}

/// 解析 QMCv2 尾部，返回容器描述。
///
/// 最后 4 字节决定布局：
/// * `STag` - 密钥存在厂商数据库里，文件内没有；
/// * `QTag` - 尾部携带逗号分隔的 ekey、歌曲 ID 和一个未知字段，
///   其长度以大端 u32 写在 `QTag` 之前；
/// * 其余 - 按小端 u32 读出 ekey 长度（EncV2 固定的 549 字节尾
///   也落在这条路径里），随后是 ekey 本体。
pub(crate) fn parse_v2<R: Read + Seek>(reader: &mut R) -> Result<ContainerDescriptor> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < 4 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "文件只有 {file_len} 字节，容不下 QMCv2 尾部"
        )));
    }

    reader.seek(SeekFrom::End(-4))?;
    let mut tail = [0u8; 4];
    reader.read_exact(&mut tail)?;

    match &tail {
        b"STag" => {
            // 密钥不在文件里，整个文件都视作音频区域，
            // 打开时必须由调用方提供密钥
            debug!("QMCv2 尾部为 STag，密钥需要外部提供");
            Ok(ContainerDescriptor::bare(FormatTag::QmcV2, 0, None))
        }
        b"QTag" => parse_qtag(reader, file_len),
        _ => {
            let key_len = u64::from(u32::from_le_bytes(tail));
            if key_len == 0 || key_len > TAIL_KEY_LEN_LIMIT {
                return Err(TakiyashaError::MalformedContainer(format!(
                    "尾部数值 {key_len} 不在合法的 ekey 长度范围内"
                )));
            }
            if key_len + 4 > file_len {
                return Err(TakiyashaError::MalformedContainer(format!(
                    "ekey 长度 {key_len} 超出文件大小 {file_len}"
                )));
            }

            reader.seek(SeekFrom::End(-(4 + key_len as i64)))?;
            let mut key_material = vec![0u8; key_len as usize];
            reader.read_exact(&mut key_material)?;

            debug!(key_len, "QMCv2 尾部携带长度前缀的 ekey");
            Ok(ContainerDescriptor {
                format: FormatTag::QmcV2,
                data_offset: 0,
                data_length: Some(file_len - (4 + key_len)),
                embedded_key_material: Some(key_material),
                embedded_metadata: None,
                cover_data: None,
            })
        }
    }
}

fn parse_qtag<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<ContainerDescriptor> {
    if file_len < 8 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "文件只有 {file_len} 字节，容不下 QTag 尾部"
        )));
    }

    reader.seek(SeekFrom::End(-8))?;
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let qtag_len = u64::from(u32::from_be_bytes(len_buf));
    if qtag_len + 8 > file_len {
        return Err(TakiyashaError::MalformedContainer(format!(
            "QTag 声称的长度 {qtag_len} 超出文件大小 {file_len}"
        )));
    }

    reader.seek(SeekFrom::End(-(8 + qtag_len as i64)))?;
    let mut qtag = vec![0u8; qtag_len as usize];
    reader.read_exact(&mut qtag)?;

    let fields: Vec<&[u8]> = qtag.split(|&b| b == b',').collect();
    if fields.len() != 3 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "QTag 应有 3 个字段，实际有 {} 个",
            fields.len()
        )));
    }
    let song_id: u64 = std::str::from_utf8(fields[1])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            TakiyashaError::MalformedContainer("QTag 的歌曲 ID 字段不是数字".into())
        })?;

    let mut metadata = MetadataMap::new();
    metadata.insert("songid".into(), song_id.into());

    debug!(qtag_len, song_id, "QMCv2 尾部携带 QTag");
    Ok(ContainerDescriptor {
        format: FormatTag::QmcV2,
        data_offset: 0,
        data_length: Some(file_len - (qtag_len + 8)),
        embedded_key_material: Some(fields[0].to_vec()),
        embedded_metadata: Some(metadata),
        cover_data: None,
    })
}

/// 解开 ekey 并按明文密钥长度选择 QMCv2 的密钥流。
pub(crate) fn select_v2_cipher(key_material: &[u8]) -> Result<CipherState> {
    let key = keys::decrypt_ekey(key_material)?;
    // 参考实现以 300 为界：短密钥走 Map，长密钥走分段 RC4
    if key.len() < RC4_KEY_LEN_THRESHOLD {
        debug!(key_len = key.len(), "选择 Map 密钥流");
        Ok(CipherState::QmcMap(DynamicMap::new(key)))
    } else {
        debug!(key_len = key.len(), "选择分段 RC4 密钥流");
        Ok(CipherState::QmcRc4(SegmentRc4::new(key)))
    }
}
