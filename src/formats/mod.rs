//! 各厂商容器的解析入口与密钥流派生。
//!
//! 每种格式拆成两步：`parse_container` 只读结构（定位音频区域、
//! 取出密钥材料与元数据），`derive_cipher` 把密钥材料变成可以
//! 随机访问的密钥流状态。两步之间只靠 [`ContainerDescriptor`]
//! 传递信息，方便调用方在中间检查或替换密钥。

pub(crate) mod kgm;
pub(crate) mod ncm;
pub(crate) mod ncmcache;
pub mod qmc;
pub(crate) mod tm;

use std::io::{Read, Seek};

use tracing::debug;

use crate::error::{Result, TakiyashaError};
use crate::model::{ContainerDescriptor, FormatTag};

/// 一个已打开文件的密钥流状态。
///
/// 除 TM 外都是异或型密钥流，解密与加密是同一个操作；
/// TM 的按位置覆写只有解密方向。
#[derive(Debug, Clone)]
pub(crate) enum CipherState {
    NcmLut(ncm::NcmKeystream),
    CacheXor,
    QmcStatic,
    QmcMap(qmc::ciphers::DynamicMap),
    QmcRc4(qmc::ciphers::SegmentRc4),
    TmOverlay,
}

impl CipherState {
    /// 原地把密文还原为明文。`offset` 是缓冲区首字节在音频
    /// 区域内的偏移（区域起点记 0）。
    pub(crate) fn apply(&self, buf: &mut [u8], offset: u64) {
        match self {
            Self::NcmLut(keystream) => keystream.apply(buf, offset),
            Self::CacheXor => ncmcache::apply(buf),
            Self::QmcStatic => qmc::ciphers::StaticMap::apply(buf, offset),
            Self::QmcMap(cipher) => cipher.apply(buf, offset),
            Self::QmcRc4(cipher) => cipher.apply(buf, offset),
            Self::TmOverlay => tm::apply(buf, offset),
        }
    }
}

/// 按给定格式解析容器结构。
pub(crate) fn parse_container<R: Read + Seek>(
    format: FormatTag,
    reader: &mut R,
) -> Result<ContainerDescriptor> {
    debug!(%format, "解析容器");
    match format {
        FormatTag::Ncm => ncm::parse(reader),
        FormatTag::NcmCache => Ok(ncmcache::parse()),
        FormatTag::QmcV1 => Ok(qmc::parse_v1()),
        FormatTag::QmcV2 => qmc::parse_v2(reader),
        FormatTag::Kgm | FormatTag::Vpr => kgm::parse(reader),
        FormatTag::Tm => tm::parse(reader),
    }
}

/// 从容器描述派生密钥流。
///
/// `user_key` 优先于文件内嵌的密钥材料，也是 STag 这类密钥
/// 外置文件的唯一解法。
pub(crate) fn derive_cipher(
    descriptor: &ContainerDescriptor,
    user_key: Option<&[u8]>,
) -> Result<CipherState> {
    match descriptor.format {
        FormatTag::Ncm => {
            let wrapped = descriptor
                .embedded_key_material
                .as_deref()
                .ok_or_else(|| {
                    TakiyashaError::MalformedContainer("NCM 容器描述缺少密钥材料".into())
                })?;
            let rc4_key = ncm::unwrap_rc4_key(wrapped)?;
            Ok(CipherState::NcmLut(ncm::NcmKeystream::new(&rc4_key)?))
        }
        FormatTag::NcmCache => Ok(CipherState::CacheXor),
        FormatTag::QmcV1 => Ok(CipherState::QmcStatic),
        FormatTag::QmcV2 => {
            let material = user_key
                .or(descriptor.embedded_key_material.as_deref())
                .ok_or_else(|| {
                    TakiyashaError::MissingKey("QMCv2 文件未携带 ekey，需要外部提供".into())
                })?;
            qmc::select_v2_cipher(material)
        }
        FormatTag::Kgm => Err(TakiyashaError::UnsupportedFileType(
            "KGM（仅识别容器，无法解密）".into(),
        )),
        FormatTag::Vpr => Err(TakiyashaError::UnsupportedFileType(
            "VPR（仅识别容器，无法解密）".into(),
        )),
        FormatTag::Tm => Ok(CipherState::TmOverlay),
    }
}
