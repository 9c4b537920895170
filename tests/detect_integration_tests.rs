use std::io::{Cursor, Read};

use takiyasha::{
    DetectionSource, FormatTag, OpenOptions, TakiyashaError, detect_format, open, open_reader,
    open_with,
};

fn cache_bytes(plain: &[u8]) -> Vec<u8> {
    plain.iter().map(|b| b ^ 0xA3).collect()
}

#[test_log::test]
fn test_extension_wins_over_content() {
    // 扩展名唯一确定时不看内容，装着 KGM 魔数也按 NCM 对待
    let mut reader = Cursor::new(vec![
        0x7C, 0xD5, 0x32, 0xEB, 0x86, 0x02, 0x7F, 0x4B,
        0xA8, 0xAF, 0xA6, 0x8E, 0x0F, 0xFF, 0x99, 0x14,
    ]);
    let result = detect_format("mislabeled.ncm", Some(&mut reader), false)
        .expect("探测不应出 I/O 错")
        .expect("应有结论");
    assert_eq!(result.format, FormatTag::Ncm);
    assert_eq!(result.source, DetectionSource::Extension);
}

#[test_log::test]
fn test_ambiguous_extension_probe_keeps_position() {
    let mut reader = Cursor::new(b"QQMU\x00\x00\x00\x00 body".to_vec());
    reader.set_position(5);

    let result = detect_format("song.tm0", Some(&mut reader), false)
        .expect("探测不应出 I/O 错")
        .expect("应有结论");
    assert_eq!(result.format, FormatTag::Tm);
    assert_eq!(reader.position(), 5, "探测不应移动读取位置");
}

#[test_log::test]
fn test_legacy_fallback_opens_unknown_bytes() {
    let garbage = b"not any known format at all".to_vec();
    let options = OpenOptions {
        legacy_fallback: true,
        ..Default::default()
    };

    let stream = open_reader(Cursor::new(garbage.clone()), Some("mystery.bin"), &options)
        .expect("兜底开启时应能打开")
        .expect("兜底命中不该是 None");
    assert_eq!(stream.format(), FormatTag::QmcV1);
    assert_eq!(stream.len(), garbage.len() as u64);
}

#[test_log::test]
fn test_open_from_path() {
    let plain = b"fLaC from the cache directory".to_vec();
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("1209323601.uc!");
    std::fs::write(&path, cache_bytes(&plain)).expect("写入临时文件失败");

    let mut stream = open(&path)
        .expect("按路径打开失败")
        .expect("应当识别出缓存格式");
    assert_eq!(stream.format(), FormatTag::NcmCache);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test_log::test]
fn test_open_with_forced_format_from_path() {
    // 扩展名不认识，靠 force_format 打开
    let plain = b"forced cache payload".to_vec();
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("exported.dat");
    std::fs::write(&path, cache_bytes(&plain)).expect("写入临时文件失败");

    let options = OpenOptions {
        force_format: Some(FormatTag::NcmCache),
        ..Default::default()
    };
    let mut stream = open_with(&path, &options)
        .expect("强制格式打开失败")
        .expect("强制格式下不该是 None");

    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("读取失败");
    assert_eq!(out, plain);
}

#[test_log::test]
fn test_tm_path_resolved_by_signature() {
    let mut file = b"QQMU\xAA\xBB\xCC\xDD".to_vec();
    file.extend_from_slice(&[0x11u8; 64]);

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("song.tm0");
    std::fs::write(&path, &file).expect("写入临时文件失败");

    let stream = open(&path)
        .expect("打开 TM 文件失败")
        .expect("应当识别出 TM 格式");
    assert_eq!(stream.format(), FormatTag::Tm);
}

#[test_log::test]
fn test_content_probe_can_be_disabled() {
    // 内容是 NCM 魔数，但扩展名认不出；关掉内容探测后应当放弃
    let mut file = b"CTENFDAM".to_vec();
    file.extend_from_slice(&[0u8; 64]);

    let options = OpenOptions {
        detect_content: false,
        ..Default::default()
    };
    let stream = open_reader(Cursor::new(file), Some("renamed.bin"), &options)
        .expect("只看扩展名时认不出不该是错误");
    assert!(stream.is_none());
}

#[test_log::test]
fn test_unknown_path_yields_none() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("holiday-photo.jpg");
    std::fs::write(&path, b"\xFF\xD8\xFF\xE0 definitely a picture").expect("写入临时文件失败");

    let stream = open(&path).expect("认不出格式不该是错误");
    assert!(stream.is_none());
}

#[test_log::test]
fn test_open_missing_file_reports_io_error() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let err = open(dir.path().join("不存在.ncm")).unwrap_err();
    assert!(matches!(err, TakiyashaError::UnderlyingIo(_)));
}
