//! TEA 分组密码，以及腾讯在 QMC 密钥封装中使用的 CBC 变体。
//!
//! **警告**：
//! 这里的 CBC 并非标准 CBC！
//! 它在密文链上额外叠加了一层明文链，并自带
//! `头部字节 + 随机填充 + 2 字节盐 + 正文 + 7 字节零尾` 的封套框架。
//! 本实现仅用于 QMC 密钥块的解包，不应用于实际安全目的。

use rand::Rng;

use crate::error::{Result, TakiyashaError};

const BLOCK_SIZE: usize = 8;
const SALT_LEN: usize = 2;
const ZERO_LEN: usize = 7;

/// TEA 分组密码（ECB，单块）。
///
/// 16 字节密钥按大端序拆成 4 个 u32；`rounds` 必须为偶数，
/// 每两轮为一个完整的 Feistel 周期。QMC 的密钥封装固定使用 32 轮。
pub(crate) struct Tea {
    key: [u32; 4],
    cycles: u32,
}

impl Tea {
    const DELTA: u32 = 0x9E37_79B9;

    pub(crate) fn new(key: &[u8; 16], rounds: u32) -> Self {
        debug_assert!(rounds % 2 == 0, "TEA 轮数必须为偶数");
        let mut k = [0u32; 4];
        for (i, word) in k.iter_mut().enumerate() {
            *word = u32::from_be_bytes([
                key[i * 4],
                key[i * 4 + 1],
                key[i * 4 + 2],
                key[i * 4 + 3],
            ]);
        }
        Self {
            key: k,
            cycles: rounds / 2,
        }
    }

    pub(crate) fn encrypt_block(&self, block: [u8; 8]) -> [u8; 8] {
        let [k0, k1, k2, k3] = self.key;
        let mut v0 = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let mut v1 = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
        let mut sum = 0u32;

        for _ in 0..self.cycles {
            sum = sum.wrapping_add(Self::DELTA);
            v0 = v0.wrapping_add(
                (v1 << 4).wrapping_add(k0) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k1),
            );
            v1 = v1.wrapping_add(
                (v0 << 4).wrapping_add(k2) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k3),
            );
        }

        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&v0.to_be_bytes());
        out[4..].copy_from_slice(&v1.to_be_bytes());
        out
    }

    pub(crate) fn decrypt_block(&self, block: [u8; 8]) -> [u8; 8] {
        let [k0, k1, k2, k3] = self.key;
        let mut v0 = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let mut v1 = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
        let mut sum = Self::DELTA.wrapping_mul(self.cycles);

        for _ in 0..self.cycles {
            v1 = v1.wrapping_sub(
                (v0 << 4).wrapping_add(k2) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k3),
            );
            v0 = v0.wrapping_sub(
                (v1 << 4).wrapping_add(k0) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k1),
            );
            sum = sum.wrapping_sub(Self::DELTA);
        }

        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&v0.to_be_bytes());
        out[4..].copy_from_slice(&v1.to_be_bytes());
        out
    }
}

/// 腾讯 TEA CBC 封套。
///
/// 解密端的链式状态（`dest` 块、前后两个 IV 窗口、块内游标）
/// 必须与加密端逐字节对应，任何偏差都会破坏整段输出。
pub(crate) struct TencentTea {
    block_cipher: Tea,
}

impl TencentTea {
    pub(crate) fn new(key: &[u8; 16], rounds: u32) -> Self {
        Self {
            block_cipher: Tea::new(key, rounds),
        }
    }

    /// 解开封套，返回正文。
    ///
    /// 框架：首块头部字节的低 3 位是填充长度，之后依次为随机填充、
    /// 2 字节盐、正文、7 字节零尾；零尾在解密后校验，
    /// 不通过视为密钥或数据损坏。
    pub(crate) fn decrypt(&self, cipherdata: &[u8]) -> Result<Vec<u8>> {
        if cipherdata.len() % BLOCK_SIZE != 0 || cipherdata.len() < BLOCK_SIZE * 2 {
            return Err(TakiyashaError::MalformedContainer(format!(
                "TEA 封套长度无效: {} (应为 8 的倍数且不小于 16)",
                cipherdata.len()
            )));
        }

        let mut first = [0u8; 8];
        first.copy_from_slice(&cipherdata[..BLOCK_SIZE]);
        let dest = self.block_cipher.decrypt_block(first);

        let pad_len = (dest[0] & 0x7) as usize;
        let overhead = 1 + pad_len + SALT_LEN + ZERO_LEN;
        if cipherdata.len() < overhead {
            return Err(TakiyashaError::MalformedContainer(format!(
                "TEA 封套过短: 总长 {} 字节装不下 {} 字节的框架",
                cipherdata.len(),
                overhead
            )));
        }
        let body_len = cipherdata.len() - overhead;

        let mut iv_current = [0u8; 8];
        iv_current.copy_from_slice(&cipherdata[..BLOCK_SIZE]);
        let mut walker = CbcWalker {
            block_cipher: &self.block_cipher,
            cipherdata,
            pos: BLOCK_SIZE,
            dest,
            iv_previous: [0u8; 8],
            iv_current,
            dest_idx: 1 + pad_len,
        };

        for _ in 0..SALT_LEN {
            walker.next_byte();
        }

        let mut body = vec![0u8; body_len];
        for byte in &mut body {
            *byte = walker.next_byte();
        }

        // 参考实现只校验零尾的前 6 个字节
        for _ in 0..ZERO_LEN - 1 {
            if walker.next_byte() != 0 {
                return Err(TakiyashaError::MalformedContainer(
                    "TEA 封套零值校验失败，密钥或数据已损坏".to_string(),
                ));
            }
        }

        Ok(body)
    }

    /// 构造封套并加密正文。随机数只影响填充与盐，不影响可解性。
    pub(crate) fn encrypt(&self, plaindata: &[u8]) -> Vec<u8> {
        let raw_len = plaindata.len() + 1 + SALT_LEN + ZERO_LEN;
        let pad_len = match raw_len % BLOCK_SIZE {
            0 => 0,
            r => BLOCK_SIZE - r,
        };
        let out_len = raw_len + pad_len;

        let mut rng = rand::rng();
        let mut writer = CbcBuilder {
            block_cipher: &self.block_cipher,
            src: [0u8; 8],
            src_idx: 1,
            iv_plain: [0u8; 8],
            iv_crypt: [0u8; 8],
            out: Vec::with_capacity(out_len),
        };
        writer.src[0] = (rng.random::<u8>() & 0xF8) | pad_len as u8;

        for _ in 0..pad_len {
            writer.push(rng.random());
        }
        for _ in 0..SALT_LEN {
            writer.push(rng.random());
        }
        for &byte in plaindata {
            writer.push(byte);
        }
        for _ in 0..ZERO_LEN {
            writer.push(0);
        }

        writer.finish()
    }
}

/// 解密端的逐字节游标：一次产出一个 `正文字节 = dest ^ iv_previous`，
/// 块耗尽时向前取下一个密文块。
struct CbcWalker<'a> {
    block_cipher: &'a Tea,
    cipherdata: &'a [u8],
    pos: usize,
    dest: [u8; 8],
    iv_previous: [u8; 8],
    iv_current: [u8; 8],
    dest_idx: usize,
}

impl CbcWalker<'_> {
    fn next_byte(&mut self) -> u8 {
        if self.dest_idx == BLOCK_SIZE {
            self.advance_block();
        }
        let byte = self.dest[self.dest_idx] ^ self.iv_previous[self.dest_idx];
        self.dest_idx += 1;
        byte
    }

    fn advance_block(&mut self) {
        self.iv_previous = self.iv_current;
        self.iv_current
            .copy_from_slice(&self.cipherdata[self.pos..self.pos + BLOCK_SIZE]);

        let mut block = [0u8; 8];
        for (i, b) in block.iter_mut().enumerate() {
            *b = self.dest[i] ^ self.iv_current[i];
        }
        self.dest = self.block_cipher.decrypt_block(block);

        self.pos += BLOCK_SIZE;
        self.dest_idx = 0;
    }
}

/// 加密端的逐字节游标，与 [`CbcWalker`] 的状态机互为镜像。
struct CbcBuilder<'a> {
    block_cipher: &'a Tea,
    src: [u8; 8],
    src_idx: usize,
    iv_plain: [u8; 8],
    iv_crypt: [u8; 8],
    out: Vec<u8>,
}

impl CbcBuilder<'_> {
    fn push(&mut self, byte: u8) {
        if self.src_idx == BLOCK_SIZE {
            self.flush_block();
        }
        self.src[self.src_idx] = byte;
        self.src_idx += 1;
    }

    fn flush_block(&mut self) {
        for (i, b) in self.src.iter_mut().enumerate() {
            *b ^= self.iv_crypt[i];
        }
        let encrypted = self.block_cipher.encrypt_block(self.src);

        let mut block = [0u8; 8];
        for (i, b) in block.iter_mut().enumerate() {
            *b = encrypted[i] ^ self.iv_plain[i];
        }
        self.out.extend_from_slice(&block);

        self.iv_plain = self.src;
        self.iv_crypt = block;
        self.src_idx = 0;
    }

    fn finish(mut self) -> Vec<u8> {
        if self.src_idx == BLOCK_SIZE {
            self.flush_block();
        }
        self.out
    }
}
