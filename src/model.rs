//! 定义了库的核心数据结构，包括格式标签、探测结果、容器描述符和
//! 明文音频容器类型。

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, EnumString};

/// 枚举：受支持的加密封装格式。
///
/// 粒度为"容器家族"：QMCv2 内部的 Map/RC4 分支取决于解开后的密钥长度，
/// 在探测阶段无从得知，因此归属于密钥派生的结果而不是这里。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum FormatTag {
    /// 网易云音乐 NCM 容器（`CTENFDAM` 魔数，内嵌 RC4 密钥与元数据）。
    Ncm,
    /// 网易云音乐缓存文件（`.uc!`，整个文件与常量 0xA3 异或）。
    NcmCache,
    /// QQ 音乐 v1（`.qmc*`，全文件静态置换表，无头部）。
    QmcV1,
    /// QQ 音乐 v2（`.mflac*`/`.mgg*`，尾部携带密钥块）。
    QmcV2,
    /// 酷狗 KGM 容器。可识别，但尚无经过验证的解密实现。
    Kgm,
    /// 酷狗 VPR 容器。可识别，但尚无经过验证的解密实现。
    Vpr,
    /// QQ 音乐安卓端 `.tm*`（`QQMU` 魔数，仅头部 8 字节被覆写）。
    Tm,
}

impl FormatTag {
    /// 该格式是否有可用的解密实现。
    ///
    /// KGM/VPR 的掩码流密码没有可靠的参考实现，
    /// 只做识别，不做解密。
    #[must_use]
    pub const fn is_decryptable(self) -> bool {
        !matches!(self, FormatTag::Kgm | FormatTag::Vpr)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatTag::Ncm => write!(f, "NCM"),
            FormatTag::NcmCache => write!(f, "NCM 缓存"),
            FormatTag::QmcV1 => write!(f, "QMCv1"),
            FormatTag::QmcV2 => write!(f, "QMCv2"),
            FormatTag::Kgm => write!(f, "KGM"),
            FormatTag::Vpr => write!(f, "VPR"),
            FormatTag::Tm => write!(f, "TM"),
        }
    }
}

/// 探测结论的依据来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// 由文件扩展名唯一确定。
    Extension,
    /// 由文件头部的内容签名确定。
    Signature {
        /// 得出结论时实际检查的前缀字节数。
        probe_len: usize,
    },
    /// 两级探测均未命中，调用方要求按最宽容的旧格式兜底。
    LegacyFallback,
}

/// 格式探测的结果：匹配到的格式加上结论的依据。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionResult {
    /// 匹配到的格式。
    pub format: FormatTag,
    /// 结论的依据来源。
    pub source: DetectionSource,
}

impl DetectionResult {
    /// 该结论是否只是兜底猜测（输出可能不是有效音频）。
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self.source, DetectionSource::LegacyFallback)
    }
}

/// NCM 元数据块解出的键值映射。
pub type MetadataMap = serde_json::Map<String, serde_json::Value>;

/// 容器解析的产物：密文音频区域的位置，以及容器内嵌的密钥、
/// 元数据与封面（如果该格式携带）。
///
/// 由对应格式的解析器一次性构造，之后只读。
#[derive(Debug, Clone)]
pub struct ContainerDescriptor {
    /// 容器格式。
    pub format: FormatTag,
    /// 密文音频区域在文件内的起始偏移。
    /// 始终位于所有头部 / 密钥 / 元数据区域之后。
    pub data_offset: u64,
    /// 密文音频区域的长度；`None` 表示一直到文件末尾。
    /// 存在时保证 `data_offset + data_length` 不超过文件大小。
    pub data_length: Option<u64>,
    /// 容器内嵌的原始密钥材料（未解开）。解开是密钥派生的职责。
    pub embedded_key_material: Option<Vec<u8>>,
    /// 容器内嵌的元数据映射（NCM 的歌曲信息、QMCv2 QTag 的歌曲 ID）。
    pub embedded_metadata: Option<MetadataMap>,
    /// 容器内嵌的封面图片字节（目前仅 NCM 携带）。
    pub cover_data: Option<Vec<u8>>,
}

impl ContainerDescriptor {
    /// 构造一个只有数据区域的最小描述符（无内嵌密钥 / 元数据）。
    #[must_use]
    pub fn bare(format: FormatTag, data_offset: u64, data_length: Option<u64>) -> Self {
        Self {
            format,
            data_offset,
            data_length,
            embedded_key_material: None,
            embedded_metadata: None,
            cover_data: None,
        }
    }
}

/// 枚举：解密后明文音频的容器类型，用于推测输出文件扩展名。
///
/// 仅作参考，与解密正确性无关。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum ContainerKind {
    /// FLAC 无损。
    Flac,
    /// Ogg 封装。
    Ogg,
    /// MPEG 音频（MP3）。
    Mp3,
    /// ADTS AAC。
    Aac,
    /// ISO BMFF（M4A 等）。
    M4a,
    /// RIFF WAVE。
    Wav,
    /// ASF（WMA）。
    Wma,
    /// Monkey's Audio。
    Ape,
    /// True Audio。
    Tta,
    /// DSDIFF。
    Dff,
}

impl ContainerKind {
    /// 转换为常用的文件扩展名字符串（不带点）。
    #[must_use]
    pub const fn to_extension_str(self) -> &'static str {
        match self {
            ContainerKind::Flac => "flac",
            ContainerKind::Ogg => "ogg",
            ContainerKind::Mp3 => "mp3",
            ContainerKind::Aac => "aac",
            ContainerKind::M4a => "m4a",
            ContainerKind::Wav => "wav",
            ContainerKind::Wma => "wma",
            ContainerKind::Ape => "ape",
            ContainerKind::Tta => "tta",
            ContainerKind::Dff => "dff",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_extension_str())
    }
}
