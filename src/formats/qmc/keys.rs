//! QMCv2 逐文件密钥（ekey）的解包与打包。
//!
//! ekey 是一段 Base64 文本，解出的前 8 字节（配方）与固定的
//! 8 字节常量交错成 TEA 密钥，再用它解开其余部分。
//! EncV2 变体在外面多套了两层固定密钥的 TEA 信封。

use base64::{Engine, prelude::BASE64_STANDARD};

use super::tea::TencentTea;
use crate::error::{Result, TakiyashaError};

/// 与配方字节交错的固定常量。
const SIMPLE_KEY: [u8; 8] = [0x69, 0x56, 0x46, 0x38, 0x2B, 0x20, 0x15, 0x0B];

/// EncV2 信封的明文前缀。
const ENC_V2_MARKER: &[u8; 18] = b"QQMusic EncV2,Key:";
/// EncV2 外层 TEA 密钥。
const ENC_V2_KEY1: [u8; 16] = *b"386ZJY!@#*$%^&)(";
/// EncV2 内层 TEA 密钥。
const ENC_V2_KEY2: [u8; 16] = *b"**#!(#$%&^a1cZ,T";

const TEA_ROUNDS: u32 = 32;

/// 把 8 字节配方与 [`SIMPLE_KEY`] 交错成 16 字节 TEA 密钥。
fn tea_key_from_recipe(recipe: &[u8; 8]) -> [u8; 16] {
    let mut tea_key = [0u8; 16];
    for i in 0..8 {
        tea_key[i << 1] = SIMPLE_KEY[i];
        tea_key[(i << 1) + 1] = recipe[i];
    }
    tea_key
}

/// 解密一段 ekey，返回可直接送入密钥流的明文密钥。
///
/// 自动识别 EncV2 信封并逐层剥开。输入两端的 ASCII 空白
/// （常见于从文件或环境变量读来的密钥）会先被剔除。
///
/// # 参数
/// * `ekey` - Base64 形式的加密密钥，来自文件尾部或用户提供。
///
/// # 返回
/// 成功时返回明文密钥字节；输入不是合法 Base64、长度不足或
/// 信封校验失败时返回 [`TakiyashaError::MalformedContainer`]。
pub fn decrypt_ekey(ekey: &[u8]) -> Result<Vec<u8>> {
    let trimmed = ekey.trim_ascii();
    let mut decoded = BASE64_STANDARD
        .decode(trimmed)
        .map_err(|e| TakiyashaError::MalformedContainer(format!("ekey 不是有效的 Base64: {e}")))?;

    if decoded.starts_with(ENC_V2_MARKER) {
        let wrapped = &decoded[ENC_V2_MARKER.len()..];
        let outer = TencentTea::new(&ENC_V2_KEY1, TEA_ROUNDS).decrypt(wrapped)?;
        let inner = TencentTea::new(&ENC_V2_KEY2, TEA_ROUNDS).decrypt(&outer)?;
        decoded = BASE64_STANDARD.decode(&inner).map_err(|e| {
            TakiyashaError::MalformedContainer(format!("EncV2 内层不是有效的 Base64: {e}"))
        })?;
    }

    if decoded.len() < 8 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "ekey 解码后只有 {} 字节，不足以容纳配方",
            decoded.len()
        )));
    }

    let mut recipe = [0u8; 8];
    recipe.copy_from_slice(&decoded[..8]);
    let tea_key = tea_key_from_recipe(&recipe);
    let rest = TencentTea::new(&tea_key, TEA_ROUNDS).decrypt(&decoded[8..])?;

    let mut key = Vec::with_capacity(8 + rest.len());
    key.extend_from_slice(&recipe);
    key.extend_from_slice(&rest);
    Ok(key)
}

/// 把明文密钥打包成 v1 形式的 ekey。
///
/// # 参数
/// * `key` - 至少 8 字节的明文密钥。
///
/// # 返回
/// Base64 文本。明文不足 8 字节时返回
/// [`TakiyashaError::MalformedContainer`]。
pub fn encrypt_ekey(key: &[u8]) -> Result<String> {
    if key.len() < 8 {
        return Err(TakiyashaError::MalformedContainer(format!(
            "明文密钥只有 {} 字节，不足以提取配方",
            key.len()
        )));
    }

    let mut recipe = [0u8; 8];
    recipe.copy_from_slice(&key[..8]);
    let tea_key = tea_key_from_recipe(&recipe);
    let body = TencentTea::new(&tea_key, TEA_ROUNDS).encrypt(&key[8..]);

    let mut envelope = Vec::with_capacity(8 + body.len());
    envelope.extend_from_slice(&recipe);
    envelope.extend_from_slice(&body);
    Ok(BASE64_STANDARD.encode(&envelope))
}
