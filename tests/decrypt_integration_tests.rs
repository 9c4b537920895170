use std::io::{Cursor, Read, Seek, SeekFrom};

use aes::Aes128;
use base64::{Engine, prelude::BASE64_STANDARD};
use block_padding::Pkcs7;
use cipher::{BlockEncryptMut, KeyInit};
use ecb::Encryptor as EcbModeEncryptor;

use takiyasha::{
    ContainerKind, FormatTag, OpenOptions, TakiyashaError, encrypt_ekey, open_reader,
};

type Aes128EcbEncryptor = EcbModeEncryptor<Aes128>;

const NCM_CORE_KEY: [u8; 16] = *b"hzHRAmso5kInbaxW";
const NCM_META_KEY: [u8; 16] = *b"#14ljk_!\\]&0U<'(";

/// 一段以 fLaC 魔数开头的伪音频。
fn flac_like_audio(len: usize) -> Vec<u8> {
    let mut audio: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
    audio[..4].copy_from_slice(b"fLaC");
    audio
}

fn aes_ecb_encrypt(key: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    let msg_len = plain.len();
    let padded_len = (msg_len / 16 + 1) * 16;
    let mut buffer = plain.to_vec();
    buffer.resize(padded_len, 0);
    Aes128EcbEncryptor::new(key.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, msg_len)
        .unwrap_or_else(|e| panic!("AES 加密失败: {e}"))
        .to_vec()
}

/// 独立实现的 NCM 查找表，用来准备密文音频。
fn ncm_lut(rc4_key: &[u8]) -> [u8; 256] {
    let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j = 0u8;
    for i in 0..256usize {
        j = j.wrapping_add(s[i]).wrapping_add(rc4_key[i % rc4_key.len()]);
        s.swap(i, usize::from(j));
    }
    std::array::from_fn(|i| {
        let j = (i + 1) & 0xFF;
        let si = usize::from(s[j]);
        let sj = usize::from(s[(j + si) & 0xFF]);
        s[(si + sj) & 0xFF]
    })
}

fn build_ncm(rc4_key: &[u8], meta_json: &str, cover: &[u8], plain_audio: &[u8]) -> Vec<u8> {
    let mut file = b"CTENFDAM".to_vec();
    file.extend_from_slice(&[0, 0]);

    let mut key_plain = b"neteasecloudmusic".to_vec();
    key_plain.extend_from_slice(rc4_key);
    let mut key_block = aes_ecb_encrypt(&NCM_CORE_KEY, &key_plain);
    for byte in &mut key_block {
        *byte ^= 0x64;
    }
    file.extend_from_slice(&(key_block.len() as u32).to_le_bytes());
    file.extend_from_slice(&key_block);

    let mut meta_plain = b"music:".to_vec();
    meta_plain.extend_from_slice(meta_json.as_bytes());
    let sealed = aes_ecb_encrypt(&NCM_META_KEY, &meta_plain);
    let mut meta_block = b"163 key(Don't modify):".to_vec();
    meta_block.extend_from_slice(BASE64_STANDARD.encode(&sealed).as_bytes());
    for byte in &mut meta_block {
        *byte ^= 0x63;
    }
    file.extend_from_slice(&(meta_block.len() as u32).to_le_bytes());
    file.extend_from_slice(&meta_block);

    file.extend_from_slice(&[0u8; 5]);
    file.extend_from_slice(&(cover.len() as u32).to_le_bytes());
    file.extend_from_slice(&(cover.len() as u32).to_le_bytes());
    file.extend_from_slice(cover);

    let lut = ncm_lut(rc4_key);
    file.extend(
        plain_audio
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ lut[i & 0xFF]),
    );
    file
}

/// 尾部的"ekey + 小端长度"两段。
fn qmc_v2_tail(key: &[u8]) -> Vec<u8> {
    let ekey = encrypt_ekey(key).unwrap_or_else(|e| panic!("打包 ekey 失败: {e}"));
    let mut tail = ekey.clone().into_bytes();
    tail.extend_from_slice(&(ekey.len() as u32).to_le_bytes());
    tail
}

/// QMCv2 密钥流是异或，对明文走一遍解密流就得到密文。
fn qmc_v2_encrypt(key: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut staged = plain.to_vec();
    staged.extend_from_slice(&qmc_v2_tail(key));

    let mut stream = open_reader(
        Cursor::new(staged),
        Some("staged.mflac"),
        &OpenOptions::default(),
    )
    .unwrap_or_else(|e| panic!("准备密文失败: {e}"))
    .expect("准备密文时应识别出格式");
    let mut ciphertext = Vec::new();
    stream
        .read_to_end(&mut ciphertext)
        .unwrap_or_else(|e| panic!("准备密文失败: {e}"));
    ciphertext
}

#[test]
fn test_ncm_end_to_end() {
    let rc4_key = b"ncm-demo-rc4-key";
    let plain = flac_like_audio(2048);
    let file = build_ncm(
        rc4_key,
        r#"{"musicId": 2801, "artist": "测试歌手", "format": "flac"}"#,
        b"JPEG-COVER-BYTES",
        &plain,
    );

    let mut stream = open_reader(Cursor::new(file), Some("晴天.ncm"), &OpenOptions::default())
        .expect("打开 NCM 文件失败")
        .expect("应当识别出 NCM 格式");

    assert_eq!(stream.format(), FormatTag::Ncm);
    assert_eq!(stream.len(), plain.len() as u64);
    assert_eq!(stream.song_id(), Some(2801), "应从元数据里取到歌曲 ID");
    assert_eq!(stream.cover_data(), Some(&b"JPEG-COVER-BYTES"[..]));

    let metadata = stream.metadata().expect("应解出元数据");
    assert_eq!(metadata["artist"], "测试歌手");
    assert_eq!(metadata["format"], "flac");

    assert_eq!(
        stream.audio_kind().expect("探测音频类型失败"),
        Some(ContainerKind::Flac)
    );

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取解密音频失败");
    assert_eq!(out, plain, "解出的音频应与明文一致");

    // 随机访问
    stream
        .seek(SeekFrom::Start(1000))
        .expect("定位到 1000 失败");
    let mut window = [0u8; 32];
    stream.read_exact(&mut window).expect("读取窗口失败");
    assert_eq!(window[..], plain[1000..1032]);
}

#[test]
fn test_qmc_v1_round_trip() {
    // 超过 0x7FFF，覆盖掩码表索引回绕
    let plain = flac_like_audio(40_000);

    let mut enc_stream = open_reader(
        Cursor::new(plain.clone()),
        Some("demo.qmc0"),
        &OpenOptions::default(),
    )
    .expect("打开明文失败")
    .expect("应当识别出 QMCv1 格式");
    let mut ciphertext = Vec::new();
    enc_stream.read_to_end(&mut ciphertext).expect("加密失败");
    assert_ne!(ciphertext, plain);

    let mut stream = open_reader(
        Cursor::new(ciphertext),
        Some("demo.qmcflac"),
        &OpenOptions::default(),
    )
    .expect("打开 QMCv1 文件失败")
    .expect("应当识别出 QMCv1 格式");
    assert_eq!(stream.format(), FormatTag::QmcV1);
    assert_eq!(stream.len(), plain.len() as u64);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);

    stream
        .seek(SeekFrom::Start(0x7FF0))
        .expect("定位到掩码表边界附近失败");
    let mut window = [0u8; 64];
    stream.read_exact(&mut window).expect("读取窗口失败");
    assert_eq!(window[..], plain[0x7FF0..0x7FF0 + 64]);
}

#[test]
fn test_qmc_v2_map_pipeline() {
    let key: Vec<u8> = (0..64usize).map(|i| (i * 7 % 255 + 1) as u8).collect();
    let plain = flac_like_audio(8192);
    let mut file = qmc_v2_encrypt(&key, &plain);
    file.extend_from_slice(&qmc_v2_tail(&key));

    let mut stream = open_reader(Cursor::new(file), Some("song.mflac"), &OpenOptions::default())
        .expect("打开 QMCv2 文件失败")
        .expect("应当识别出 QMCv2 格式");
    assert_eq!(stream.format(), FormatTag::QmcV2);
    assert_eq!(stream.len(), plain.len() as u64, "尾部不应计入音频长度");
    assert_eq!(
        stream.audio_kind().expect("探测音频类型失败"),
        Some(ContainerKind::Flac)
    );

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test]
fn test_qmc_v2_rc4_random_access() {
    let key: Vec<u8> = (0..512usize).map(|i| (i * 11 % 255 + 1) as u8).collect();
    // 跨过三个 RC4 段
    let plain = flac_like_audio(3 * 5120 + 513);
    let mut file = qmc_v2_encrypt(&key, &plain);
    file.extend_from_slice(&qmc_v2_tail(&key));

    let mut stream = open_reader(Cursor::new(file), Some("song.mgg"), &OpenOptions::default())
        .expect("打开 QMCv2 文件失败")
        .expect("应当识别出 QMCv2 格式");
    assert_eq!(stream.len(), plain.len() as u64);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);

    // 首段、段边界与段中间都要能随机访问
    for start in [0usize, 100, 127, 128, 5119, 5120, 5121, 10_240, 15_000] {
        stream
            .seek(SeekFrom::Start(start as u64))
            .unwrap_or_else(|e| panic!("定位到 {start} 失败: {e}"));
        let mut window = [0u8; 33];
        stream
            .read_exact(&mut window)
            .unwrap_or_else(|e| panic!("在 {start} 处读取失败: {e}"));
        assert_eq!(window[..], plain[start..start + 33], "偏移 {start} 处的内容不一致");
    }
}

#[test]
fn test_qmc_v2_qtag_song_id() {
    let key: Vec<u8> = (0..64usize).map(|i| (i + 1) as u8).collect();
    let plain = flac_like_audio(1024);
    let ciphertext = qmc_v2_encrypt(&key, &plain);

    let ekey = encrypt_ekey(&key).expect("打包 ekey 失败");
    let qtag = format!("{ekey},335916420,2");
    let mut file = ciphertext;
    file.extend_from_slice(qtag.as_bytes());
    file.extend_from_slice(&(qtag.len() as u32).to_be_bytes());
    file.extend_from_slice(b"QTag");

    let mut stream = open_reader(
        Cursor::new(file),
        Some("song.mflac0"),
        &OpenOptions::default(),
    )
    .expect("打开 QTag 文件失败")
    .expect("应当识别出 QMCv2 格式");
    assert_eq!(stream.song_id(), Some(335916420));

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test]
fn test_qmc_v2_stag_requires_external_key() {
    let key: Vec<u8> = (0..80usize).map(|i| (i * 3 % 255 + 1) as u8).collect();
    let plain = flac_like_audio(2000);
    let mut file = qmc_v2_encrypt(&key, &plain);
    file.extend_from_slice(b"STag");

    let err = open_reader(
        Cursor::new(file.clone()),
        Some("song.mflac"),
        &OpenOptions::default(),
    )
    .unwrap_err();
    assert!(
        matches!(err, TakiyashaError::MissingKey(_)),
        "没有外部密钥时应报 MissingKey"
    );

    let options = OpenOptions {
        user_key: Some(encrypt_ekey(&key).expect("打包 ekey 失败").into_bytes()),
        ..Default::default()
    };
    let mut stream = open_reader(Cursor::new(file), Some("song.mflac"), &options)
        .expect("带密钥打开失败")
        .expect("应当识别出 QMCv2 格式");

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    // STag 文件没有长度字段，尾部 4 字节也会被当作音频解出来
    assert_eq!(out.len(), plain.len() + 4);
    assert_eq!(out[..plain.len()], plain[..]);
}

#[test]
fn test_tm_header_restoration() {
    // 真实 TM 文件只是把 M4A 头 8 字节换成 QQMU 魔数
    let mut plain = vec![0u8; 512];
    plain[..8].copy_from_slice(&[0x00, 0x00, 0x00, 0x1C, 0x66, 0x74, 0x79, 0x70]);
    plain[8..12].copy_from_slice(b"M4A ");
    for (i, byte) in plain.iter_mut().enumerate().skip(12) {
        *byte = (i * 3) as u8;
    }

    let mut file = plain.clone();
    file[..8].copy_from_slice(b"QQMU\x01\x02\x03\x04");

    let mut stream = open_reader(Cursor::new(file), Some("song.tm3"), &OpenOptions::default())
        .expect("打开 TM 文件失败")
        .expect("应当识别出 TM 格式");
    assert_eq!(stream.format(), FormatTag::Tm);
    assert_eq!(
        stream.audio_kind().expect("探测音频类型失败"),
        Some(ContainerKind::M4a)
    );

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test]
fn test_ncm_cache_round_trip() {
    let plain = flac_like_audio(300);
    let encrypted: Vec<u8> = plain.iter().map(|b| b ^ 0xA3).collect();

    let mut stream = open_reader(
        Cursor::new(encrypted),
        Some("1397345908.uc!"),
        &OpenOptions::default(),
    )
    .expect("打开缓存文件失败")
    .expect("应当识别出缓存格式");
    assert_eq!(stream.format(), FormatTag::NcmCache);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test]
fn test_qmc_v1_known_keystream() {
    // 全零输入读出来的就是掩码序列本身
    let zeros = vec![0u8; 16];
    let mut stream = open_reader(
        Cursor::new(zeros),
        Some("zeros.qmc3"),
        &OpenOptions::default(),
    )
    .expect("打开失败")
    .expect("应当识别出 QMCv1 格式");
    let mut masks = vec![0u8; 16];
    stream.read_exact(&mut masks).expect("读取失败");
    insta::assert_snapshot!(hex::encode_upper(&masks), @"C34AD6CA9067F752D8A166629F5B0900");
}

#[test]
fn test_kgm_is_recognized_but_not_decrypted() {
    let mut file = vec![
        0x7C, 0xD5, 0x32, 0xEB, 0x86, 0x02, 0x7F, 0x4B,
        0xA8, 0xAF, 0xA6, 0x8E, 0x0F, 0xFF, 0x99, 0x14,
    ];
    file.extend_from_slice(&0x400u32.to_le_bytes());
    file.resize(0x800, 0);

    let err = open_reader(Cursor::new(file), Some("song.kgm"), &OpenOptions::default())
        .unwrap_err();
    assert!(
        matches!(err, TakiyashaError::UnsupportedFileType(_)),
        "KGM 只识别不解密"
    );
}
