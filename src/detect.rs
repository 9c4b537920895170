//! 加密格式探测。
//!
//! 探测按"扩展名 → 内容签名 → 兜底"的顺序进行：扩展名能唯一
//! 确定格式时直接采信；`.tm*` 这种既可能是 QMCv1 也可能是 TM 的
//! 扩展名交给内容签名裁决；两者都无结论时，可选的兜底分支把
//! 文件当作最老的无密钥格式 QMCv1 处理。整个过程只读不写，
//! 探头读过的字节会把读取位置还原回去。

use std::io::{Read, Seek, SeekFrom};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::formats::kgm::{KGM_MAGIC, VPR_MAGIC};
use crate::model::{DetectionResult, DetectionSource, FormatTag};

/// 内容签名探头的长度，取所有签名的最大值。
const PROBE_LEN: usize = 16;

enum ExtensionRule {
    Definite(FormatTag),
    /// `.tm[0-9]`：QQ 音乐安卓端给 QMCv1 和 TM 文件用过同一批扩展名。
    QmcV1OrTm,
}

static EXTENSION_RULES: LazyLock<Vec<(Regex, ExtensionRule)>> = LazyLock::new(|| {
    let rule = |pattern: &str| Regex::new(pattern).expect("内置的扩展名正则编译失败");
    vec![
        (rule(r"(?i)^\.ncm$"), ExtensionRule::Definite(FormatTag::Ncm)),
        (rule(r"(?i)^\.uc!$"), ExtensionRule::Definite(FormatTag::NcmCache)),
        (
            rule(r"(?i)^\.qmc[0-9a-z]{1,4}$"),
            ExtensionRule::Definite(FormatTag::QmcV1),
        ),
        (
            rule(r"(?i)^\.mflac[0-9a-z]?$"),
            ExtensionRule::Definite(FormatTag::QmcV2),
        ),
        (
            rule(r"(?i)^\.mgg[0-9a-z]?$"),
            ExtensionRule::Definite(FormatTag::QmcV2),
        ),
        (rule(r"(?i)^\.kgma?$"), ExtensionRule::Definite(FormatTag::Kgm)),
        (rule(r"(?i)^\.vpr$"), ExtensionRule::Definite(FormatTag::Vpr)),
        (rule(r"(?i)^\.tm[0-9]$"), ExtensionRule::QmcV1OrTm),
    ]
});

/// 内容签名表，按长度从长到短排列，先命中的优先。
/// QMCv1 的几条是常见音频头与静态表异或后的"加密已知明文"。
const SIGNATURES: &[(&[u8], FormatTag)] = &[
    (&KGM_MAGIC, FormatTag::Kgm),
    (&VPR_MAGIC, FormatTag::Vpr),
    (b"CTENFDAM", FormatTag::Ncm),
    (b"QQMU", FormatTag::Tm),
    (&[0xA5, 0x06, 0xB7, 0x89], FormatTag::QmcV1), // fLaC
    (&[0x8C, 0x2D, 0xB1, 0x99], FormatTag::QmcV1), // OggS
    (&[0x8A, 0x0E, 0xE5], FormatTag::QmcV1),       // ID3
    (&[0x3C, 0xB8], FormatTag::QmcV1),             // MP3 帧同步
    (&[0x3C, 0xB9], FormatTag::QmcV1),
    (&[0x3C, 0xB1], FormatTag::QmcV1),
];

/// 完整的格式探测流程。
///
/// `legacy_fallback` 打开时，扩展名和签名都认不出的文件会被
/// 当作 QMCv1 返回，`DetectionResult::is_fallback` 为真；
/// 关闭时这类文件返回 `None`。
///
/// # 参数
/// * `file_name` - 用于扩展名判断的文件名（带不带路径均可）。
/// * `probe` - 文件内容探头，传 `None` 则只凭扩展名判断。
///   探测结束后读取位置保持不变。
/// * `legacy_fallback` - 是否启用 QMCv1 兜底。
pub fn detect_format<R: Read + Seek>(
    file_name: &str,
    probe: Option<&mut R>,
    legacy_fallback: bool,
) -> Result<Option<DetectionResult>> {
    match classify_extension(file_name) {
        Some(ExtensionRule::Definite(format)) => {
            debug!(file_name, %format, "扩展名唯一确定格式");
            Ok(Some(DetectionResult {
                format: *format,
                source: DetectionSource::Extension,
            }))
        }
        Some(ExtensionRule::QmcV1OrTm) => {
            if let Some(reader) = probe {
                if let Some(result) = detect_by_signature(reader)? {
                    if matches!(result.format, FormatTag::Tm | FormatTag::QmcV1) {
                        debug!(file_name, format = %result.format, "签名裁决了歧义扩展名");
                        return Ok(Some(result));
                    }
                }
            }
            // 两种候选里 QMCv1 更老也更常见，签名无结论时按它处理
            debug!(file_name, "歧义扩展名无签名可依，按 QMCv1 兜底");
            Ok(Some(DetectionResult {
                format: FormatTag::QmcV1,
                source: DetectionSource::LegacyFallback,
            }))
        }
        None => {
            if let Some(reader) = probe {
                if let Some(result) = detect_by_signature(reader)? {
                    return Ok(Some(result));
                }
            }
            if legacy_fallback {
                debug!(file_name, "启用兜底，按 QMCv1 处理");
                return Ok(Some(DetectionResult {
                    format: FormatTag::QmcV1,
                    source: DetectionSource::LegacyFallback,
                }));
            }
            Ok(None)
        }
    }
}

/// 只靠内容签名探测，适用于拿不到文件名的场合。
///
/// 返回前会把读取位置还原到调用时的位置。
pub fn detect_by_signature<R: Read + Seek>(reader: &mut R) -> Result<Option<DetectionResult>> {
    let saved = reader.stream_position()?;
    reader.seek(SeekFrom::Start(0))?;

    let mut probe = [0u8; PROBE_LEN];
    let mut filled = 0usize;
    while filled < probe.len() {
        let n = reader.read(&mut probe[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    reader.seek(SeekFrom::Start(saved))?;

    let head = &probe[..filled];
    for (magic, format) in SIGNATURES {
        if head.starts_with(magic) {
            debug!(%format, sig_len = magic.len(), "内容签名命中");
            return Ok(Some(DetectionResult {
                format: *format,
                source: DetectionSource::Signature {
                    probe_len: magic.len(),
                },
            }));
        }
    }
    Ok(None)
}

fn classify_extension(file_name: &str) -> Option<&'static ExtensionRule> {
    let dot = file_name.rfind('.')?;
    let ext = &file_name[dot..];
    EXTENSION_RULES
        .iter()
        .find_map(|(regex, rule)| regex.is_match(ext).then_some(rule))
}
