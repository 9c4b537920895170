//! 网易云音乐 NCM 容器。
//!
//! NCM 是这批格式里结构最完整的容器：文件头之后依次是
//! AES 包裹的 RC4 密钥、AES 包裹的 JSON 元数据、CRC32、
//! 内嵌封面，最后才是加密音频。音频部分用的不是标准 RC4，
//! 而是从 RC4 置换盒派生的 256 字节查找表，密钥流以 256
//! 字节为周期无限重复。

use std::io::{Read, Seek, SeekFrom};

use aes::Aes128;
use base64::{Engine, prelude::BASE64_STANDARD};
use block_padding::Pkcs7;
use cipher::{BlockDecryptMut, KeyInit};
use ecb::Decryptor as EcbModeDecryptor;
use tracing::debug;

use crate::error::{Result, TakiyashaError};
use crate::model::{ContainerDescriptor, FormatTag, MetadataMap};

type Aes128EcbDecryptor = EcbModeDecryptor<Aes128>;

const MAGIC: [u8; 8] = *b"CTENFDAM";
/// 解开 RC4 密钥用的固定 AES 密钥。
const CORE_KEY: [u8; 16] = *b"hzHRAmso5kInbaxW";
/// 解开元数据用的固定 AES 密钥。
const META_KEY: [u8; 16] = *b"#14ljk_!\\]&0U<'(";
const RC4_KEY_PREFIX: &[u8] = b"neteasecloudmusic";
const META_PREFIX: &[u8] = b"163 key(Don't modify):";
const MUSIC_PREFIX: &[u8] = b"music:";

/// 解析 NCM 容器，解开密钥与元数据，定位音频区域。
pub(crate) fn parse<R: Read + Seek>(reader: &mut R) -> Result<ContainerDescriptor> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(TakiyashaError::MalformedContainer(format!(
            "文件头不是 NCM 魔数: {}",
            hex::encode(magic)
        )));
    }
    reader.seek(SeekFrom::Current(2))?;

    // 密钥块整体与 0x64 异或，得到 AES 包裹的 RC4 密钥。
    // 解开 AES 是密钥派生的职责，这里原样存入描述符
    let mut key_block = read_length_prefixed(reader, file_len, "密钥块")?;
    for byte in &mut key_block {
        *byte ^= 0x64;
    }
    if key_block.is_empty() {
        return Err(TakiyashaError::MalformedContainer(
            "密钥块长度为 0".into(),
        ));
    }

    // 元数据块整体与 0x63 异或，允许为空
    let meta_block = read_length_prefixed(reader, file_len, "元数据块")?;
    let metadata = if meta_block.is_empty() {
        None
    } else {
        Some(decrypt_metadata(meta_block)?)
    };

    // CRC32 与一个保留字节
    reader.seek(SeekFrom::Current(5))?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let cover_space = u64::from(u32::from_le_bytes(len_buf));
    reader.read_exact(&mut len_buf)?;
    let cover_size = u64::from(u32::from_le_bytes(len_buf));
    if cover_size > cover_space {
        return Err(TakiyashaError::MalformedContainer(format!(
            "封面实际大小 {cover_size} 超过预留空间 {cover_space}"
        )));
    }
    let pos = reader.stream_position()?;
    if cover_space > file_len - pos {
        return Err(TakiyashaError::MalformedContainer(format!(
            "封面空间 {cover_space} 超出文件剩余空间"
        )));
    }
    let cover_data = if cover_size > 0 {
        let mut cover = vec![0u8; cover_size as usize];
        reader.read_exact(&mut cover)?;
        Some(cover)
    } else {
        None
    };
    reader.seek(SeekFrom::Current((cover_space - cover_size) as i64))?;

    let data_offset = reader.stream_position()?;
    debug!(
        data_offset,
        wrapped_key_len = key_block.len(),
        has_metadata = metadata.is_some(),
        has_cover = cover_data.is_some(),
        "NCM 容器解析完成"
    );
    Ok(ContainerDescriptor {
        format: FormatTag::Ncm,
        data_offset,
        data_length: None,
        embedded_key_material: Some(key_block),
        embedded_metadata: metadata,
        cover_data,
    })
}

/// 读一个"小端 u32 长度 + 内容"块，长度经过文件剩余空间校验。
fn read_length_prefixed<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
    what: &str,
) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u64::from(u32::from_le_bytes(len_buf));
    let pos = reader.stream_position()?;
    if len > file_len - pos {
        return Err(TakiyashaError::MalformedContainer(format!(
            "{what}长度 {len} 超出文件剩余空间"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// 用固定的 CORE_KEY 解开 AES 包裹的 RC4 密钥。
pub(crate) fn unwrap_rc4_key(wrapped: &[u8]) -> Result<Vec<u8>> {
    let plain = aes_ecb_decrypt(&CORE_KEY, wrapped)?;
    let key = plain.strip_prefix(RC4_KEY_PREFIX).ok_or_else(|| {
        TakiyashaError::MalformedContainer("解出的密钥缺少 neteasecloudmusic 前缀".into())
    })?;
    if key.is_empty() {
        return Err(TakiyashaError::MalformedContainer(
            "NCM 密钥去掉前缀后为空".into(),
        ));
    }
    Ok(key.to_vec())
}

fn decrypt_metadata(mut block: Vec<u8>) -> Result<MetadataMap> {
    for byte in &mut block {
        *byte ^= 0x63;
    }
    let stripped = block.strip_prefix(META_PREFIX).ok_or_else(|| {
        TakiyashaError::MalformedContainer("元数据块缺少 163 key 前缀".into())
    })?;
    let decoded = BASE64_STANDARD.decode(stripped).map_err(|e| {
        TakiyashaError::MalformedContainer(format!("元数据不是有效的 Base64: {e}"))
    })?;
    let plain = aes_ecb_decrypt(&META_KEY, &decoded)?;
    let json = plain.strip_prefix(MUSIC_PREFIX).ok_or_else(|| {
        TakiyashaError::MalformedContainer("解出的元数据缺少 music: 前缀".into())
    })?;
    serde_json::from_slice(json).map_err(|e| {
        TakiyashaError::MalformedContainer(format!("元数据不是有效的 JSON 对象: {e}"))
    })
}

fn aes_ecb_decrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "AES 密文长度 {} 不是块大小的整数倍",
            data.len()
        )));
    }
    let mut buffer = data.to_vec();
    let plain = Aes128EcbDecryptor::new(key.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| TakiyashaError::MalformedContainer(format!("AES-ECB 解密失败: {e}")))?;
    Ok(plain.to_vec())
}

/// NCM 音频密钥流：RC4 置换盒派生的 256 字节查找表。
#[derive(Debug, Clone)]
pub(crate) struct NcmKeystream {
    lut: [u8; 256],
}

impl NcmKeystream {
    pub(crate) fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(TakiyashaError::MalformedContainer(
                "NCM 密钥为空，无法生成密钥流".into(),
            ));
        }

        // 标准 RC4 KSA
        let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j = 0u8;
        for i in 0..256usize {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, usize::from(j));
        }

        // 查找表不走 PRGA，而是对每个位置做一次固定的双重间接寻址
        let mut lut = [0u8; 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            let j = (i + 1) & 0xFF;
            let si = usize::from(s[j]);
            let sj = usize::from(s[(j + si) & 0xFF]);
            *slot = s[(si + sj) & 0xFF];
        }
        Ok(Self { lut })
    }

    pub(crate) fn mask_at(&self, offset: u64) -> u8 {
        self.lut[(offset & 0xFF) as usize]
    }

    pub(crate) fn apply(&self, buf: &mut [u8], offset: u64) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= self.mask_at(offset + i as u64);
        }
    }
}
