//! 定义了整个 `takiyasha` 库的错误类型 `TakiyashaError`。

use std::io;
use thiserror::Error;

/// `takiyasha` 库的通用错误枚举。
///
/// 所有错误都只针对单个文件的处理流程，不会影响其它文件；
/// 批量调用方可以自行决定跳过还是中止。
#[derive(Error, Debug)]
pub enum TakiyashaError {
    /// 格式可以识别，但尚无经过验证的解密实现（如 KGM/VPR）。
    ///
    /// 探测阶段认不出格式不算错误，[`crate::open`] 一族
    /// 对那种情况返回 `Ok(None)`。
    #[error("不支持的文件类型: {0}")]
    UnsupportedFileType(String),

    /// 已识别格式的容器结构不符合预期（头部截断、长度不一致、
    /// 密钥块无法解开等）。
    #[error("容器数据损坏或格式不正确: {0}")]
    MalformedContainer(String),

    /// 该格式的密钥无法从文件本身推导，需要调用方提供而未提供。
    ///
    /// 与 [`TakiyashaError::MalformedContainer`] 区分开，
    /// 以便调用方提示用户补充密钥而不是把文件当作损坏处理。
    #[error("缺少必需的外部密钥: {0}")]
    MissingKey(String),

    /// 底层文件系统 I/O 错误 (源自 `io::Error`)
    #[error("I/O 错误: {0}")]
    UnderlyingIo(#[from] io::Error),
}

/// `TakiyashaError` 的 `Result` 类型别名，方便在函数签名中使用。
pub type Result<T> = std::result::Result<T, TakiyashaError>;
