//! 解密读取流。
//!
//! [`DecryptedStream`] 把"密文文件 + 密钥流"包装成只读的
//! `Read + Seek` 流，读出来的就是明文音频。流内偏移 0 对应
//! 容器中音频区域的起点，任意位置的读取代价与位置无关，
//! 因此可以拿它直接喂给需要随机访问的标签库或播放器。

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

use tracing::trace;

use crate::error::Result;
use crate::formats::CipherState;
use crate::model::{ContainerDescriptor, ContainerKind, FormatTag, MetadataMap};
use crate::sniff;

/// 一个边读边解密的只读流。
///
/// 通过 [`crate::open`] 或 [`crate::open_reader`] 获得。流内偏移
/// 从音频区域起点算起，容器头尾（密钥、元数据、封面等）不会
/// 出现在读出的字节里。
///
/// 流内部带着读取位置且不加锁，多个消费者共用会互相干扰，
/// 每个消费者应各自持有一个流。
#[derive(Debug)]
pub struct DecryptedStream<R> {
    inner: R,
    descriptor: ContainerDescriptor,
    cipher: CipherState,
    /// 流内逻辑位置，0 即音频区域起点。
    pos: u64,
    /// 音频区域长度。
    len: u64,
}

impl<R: Read + Seek> DecryptedStream<R> {
    pub(crate) fn new(
        mut inner: R,
        descriptor: ContainerDescriptor,
        cipher: CipherState,
    ) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        let available = file_len.saturating_sub(descriptor.data_offset);
        let len = match descriptor.data_length {
            Some(declared) => declared.min(available),
            None => available,
        };
        inner.seek(SeekFrom::Start(descriptor.data_offset))?;
        Ok(Self {
            inner,
            descriptor,
            cipher,
            pos: 0,
            len,
        })
    }

    /// 音频区域的总长度（明文字节数）。
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// 音频区域是否为空。
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 该文件的加密格式。
    #[must_use]
    pub fn format(&self) -> FormatTag {
        self.descriptor.format
    }

    /// 容器解析的完整产物。
    #[must_use]
    pub fn descriptor(&self) -> &ContainerDescriptor {
        &self.descriptor
    }

    /// 容器内嵌的元数据（目前只有 NCM 和 QTag 尾部的 QMCv2 会有）。
    #[must_use]
    pub fn metadata(&self) -> Option<&MetadataMap> {
        self.descriptor.embedded_metadata.as_ref()
    }

    /// 容器内嵌的封面图片（目前只有 NCM 会有）。
    #[must_use]
    pub fn cover_data(&self) -> Option<&[u8]> {
        self.descriptor.cover_data.as_deref()
    }

    /// 元数据里的歌曲 ID。兼容 QTag 的 `songid` 与 NCM 的 `musicId`。
    #[must_use]
    pub fn song_id(&self) -> Option<u64> {
        let metadata = self.metadata()?;
        metadata
            .get("songid")
            .or_else(|| metadata.get("musicId"))
            .and_then(serde_json::Value::as_u64)
    }

    /// 嗅探明文音频的容器类型，读取位置保持不变。
    pub fn audio_kind(&mut self) -> Result<Option<ContainerKind>> {
        sniff::sniff_audio(self)
    }

    /// 拆开流，拿回底层读取器。
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for DecryptedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        self.inner
            .seek(SeekFrom::Start(self.descriptor.data_offset + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.cipher.apply(&mut buf[..n], self.pos);
        self.pos += n as u64;
        trace!(pos = self.pos, bytes = n, "读取并解密");
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for DecryptedStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::End(offset) => i128::from(self.len) + i128::from(offset),
            SeekFrom::Current(offset) => i128::from(self.pos) + i128::from(offset),
        };
        let new_pos = u64::try_from(target).map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "试图移动到音频区域起点之前")
        })?;
        self.pos = new_pos;
        Ok(new_pos)
    }
}
