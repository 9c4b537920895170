#![warn(missing_docs)]

//! # Takiyasha
//!
//! 一个解开流媒体音乐加密文件的 Rust 库：识别各厂商的加密容器，
//! 取出内嵌的密钥、元数据与封面，并把密文音频包装成支持随机
//! 访问的解密读取流。
//!
//! 仅供个人学习与备份自购音乐使用。
//!
//! ## 支持的格式
//!
//! - **NCM** (`.ncm`): 网易云音乐，内嵌密钥、元数据与封面。
//! - **NCM 缓存** (`.uc!`): 整个文件与常量异或。
//! - **QMCv1** (`.qmc*`): QQ 音乐旧版，静态置换表。
//! - **QMCv2** (`.mflac*` / `.mgg*`): QQ 音乐新版，ekey 挂在文件
//!   尾部，密钥流按密钥长度分 Map 与分段 RC4 两种，另支持
//!   EncV2 密钥信封。
//! - **TM** (`.tm0` 等): QQ 音乐安卓端，只有头 8 字节被替换。
//! - **KGM / VPR** (`.kgm` / `.kgma` / `.vpr`): 酷狗格式，能识别
//!   容器但暂不支持解密。
//!
//! ## 打开文件
//!
//! ```rust,no_run
//! use std::io::Read;
//!
//! use takiyasha::open;
//!
//! let mut stream = open("晴天.ncm")
//!     .unwrap()
//!     .expect("不是受支持的加密格式");
//! println!("加密格式: {}", stream.format());
//! if let Some(kind) = stream.audio_kind().unwrap() {
//!     println!("音频类型: {kind}");
//! }
//!
//! let mut audio = Vec::new();
//! stream.read_to_end(&mut audio).unwrap();
//! ```
//!
//! ## 从内存读取
//!
//! ```rust
//! use std::io::{Cursor, Read};
//!
//! use takiyasha::{OpenOptions, open_reader};
//!
//! // 网易云缓存文件只是整个文件与 0xA3 逐字节异或
//! let encrypted: Vec<u8> = b"fLaC pretend audio".iter().map(|b| b ^ 0xA3).collect();
//!
//! let mut stream = open_reader(
//!     Cursor::new(encrypted),
//!     Some("03bd677952d2f9cce24c9b4891b1c6a9.uc!"),
//!     &OpenOptions::default(),
//! )
//! .unwrap()
//! .expect("不是受支持的加密格式");
//!
//! let mut audio = Vec::new();
//! stream.read_to_end(&mut audio).unwrap();
//! assert!(audio.starts_with(b"fLaC"));
//! ```

pub mod detect;
pub mod error;
mod formats;
pub mod model;
pub mod sniff;
pub mod stream;

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use tracing::info;

pub use crate::{
    detect::{detect_by_signature, detect_format},
    error::{Result, TakiyashaError},
    formats::qmc::keys::{decrypt_ekey, encrypt_ekey},
    model::{
        ContainerDescriptor, ContainerKind, DetectionResult, DetectionSource, FormatTag,
        MetadataMap,
    },
    sniff::sniff_audio,
    stream::DecryptedStream,
};

// ==========================================================
//  顶层 API
// ==========================================================

/// 打开文件时的可选项。
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// 外部提供的 QMCv2 密钥（Base64 的 ekey 文本）。
    ///
    /// 对 STag 尾部的文件这是唯一途径；文件自带密钥材料时，
    /// 这里给出的值优先。
    pub user_key: Option<Vec<u8>>,
    /// 跳过格式探测，强制按此格式解析。
    pub force_format: Option<FormatTag>,
    /// 是否允许读取文件内容做签名探测，默认开。
    ///
    /// 关掉后只凭扩展名判断；歧义扩展名（`.tm*`）失去签名
    /// 裁决，一律按 QMCv1 兜底。
    pub detect_content: bool,
    /// 扩展名与内容签名都认不出时，按 QMCv1 兜底处理。
    pub legacy_fallback: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            user_key: None,
            force_format: None,
            detect_content: true,
            legacy_fallback: false,
        }
    }
}

/// 以默认选项打开一个加密音乐文件。
///
/// 格式按"扩展名 → 内容签名"的顺序自动探测。需要外部密钥、
/// 强制格式或兜底行为时用 [`open_with`]。
///
/// # 参数
/// * `path` - 加密文件路径。
///
/// # 返回
/// 识别出加密格式时返回 `Ok(Some(流))`；扩展名与内容签名都
/// 没有命中且未开启兜底时返回 `Ok(None)`。打不开文件、容器
/// 损坏或缺少密钥等问题照常作为 [`TakiyashaError`] 返回。
pub fn open<P: AsRef<Path>>(path: P) -> Result<Option<DecryptedStream<File>>> {
    open_with(path, &OpenOptions::default())
}

/// 按给定选项打开一个加密音乐文件。
pub fn open_with<P: AsRef<Path>>(
    path: P,
    options: &OpenOptions,
) -> Result<Option<DecryptedStream<File>>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_name = path.file_name().and_then(|name| name.to_str());
    open_reader(file, file_name, options)
}

/// 打开任意 `Read + Seek` 数据源。
///
/// # 参数
/// * `reader` - 密文数据源，要求可随机定位。
/// * `file_name` - 仅用于扩展名探测，拿不到就传 `None`，
///   此时只靠内容签名判断。
/// * `options` - 见 [`OpenOptions`]。
///
/// # 返回
/// 与 [`open`] 一致：认不出格式返回 `Ok(None)`。
pub fn open_reader<R: Read + Seek>(
    mut reader: R,
    file_name: Option<&str>,
    options: &OpenOptions,
) -> Result<Option<DecryptedStream<R>>> {
    let format = match options.force_format {
        Some(forced) => {
            info!(format = %forced, "按调用方指定的格式处理");
            forced
        }
        None => {
            let probe = if options.detect_content {
                Some(&mut reader)
            } else {
                None
            };
            let detected =
                detect::detect_format(file_name.unwrap_or(""), probe, options.legacy_fallback)?;
            match detected {
                Some(result) => {
                    info!(
                        format = %result.format,
                        fallback = result.is_fallback(),
                        "探测到加密格式"
                    );
                    result.format
                }
                None => {
                    info!(
                        file_name = file_name.unwrap_or("(未命名输入)"),
                        "未匹配到任何受支持的加密格式"
                    );
                    return Ok(None);
                }
            }
        }
    };

    let descriptor = formats::parse_container(format, &mut reader)?;
    let cipher = formats::derive_cipher(&descriptor, options.user_key.as_deref())?;
    DecryptedStream::new(reader, descriptor, cipher).map(Some)
}
