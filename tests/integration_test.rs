//! 集成测试
//!
//! 测试完整的摘要计算、双文件写入和回读校验流程

use fw_digest_inject::{
    digest_bytes, CommitMode, Error, InjectConfig, Injector, DIGEST_SIZE, MAGIC_MARKER,
};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 辅助函数：生成二进制镜像（负载 + 全0尾部）
fn binary_image(payload: &[u8]) -> Vec<u8> {
    let mut data = payload.to_vec();
    data.extend_from_slice(&[0u8; DIGEST_SIZE]);
    data
}

/// 辅助函数：生成在指定偏移处包含标记的链接镜像
fn linked_image(len: usize, marker_offsets: &[usize]) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
    for &offset in marker_offsets {
        data[offset..offset + MAGIC_MARKER.len()].copy_from_slice(&MAGIC_MARKER);
    }
    data
}

/// 辅助函数：把两个镜像写入临时目录
fn write_images(bin: &[u8], elf: &[u8]) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let bin_path = dir.path().join("firmware.bin");
    let elf_path = dir.path().join("firmware.elf");
    fs::write(&bin_path, bin).unwrap();
    fs::write(&elf_path, elf).unwrap();
    (dir, bin_path, elf_path)
}

fn staged(bin: &Path, elf: &Path) -> Injector {
    let config = InjectConfig::default().with_commit(CommitMode::Staged);
    Injector::with_config(bin, elf, config).unwrap()
}

#[test]
fn test_reference_scenario() {
    // 100字节二进制（68字节负载 + 32字节0），标记位于5和50
    let payload: Vec<u8> = (0..68u8).collect();
    let bin = binary_image(&payload);
    let elf = linked_image(120, &[5, 50]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let injector = Injector::new(&bin_path, &elf_path);
    let report = injector.run().unwrap();
    let expected = digest_bytes(&payload);

    assert_eq!(report.digest, expected);
    assert_eq!(report.marker_offset, Some(50));
    assert_eq!(report.linked_patch_offset, Some(66));

    let bin_after = fs::read(&bin_path).unwrap();
    assert_eq!(bin_after.len(), 100);
    assert_eq!(&bin_after[..68], payload.as_slice());
    assert_eq!(&bin_after[68..], expected.as_bytes());

    let elf_after = fs::read(&elf_path).unwrap();
    assert_eq!(elf_after.len(), elf.len());
    assert_eq!(&elf_after[..66], &elf[..66]);
    assert_eq!(&elf_after[66..98], expected.as_bytes());
    assert_eq!(&elf_after[98..], &elf[98..]);

    // 回读
    assert_eq!(injector.verify(&report).unwrap(), expected);
}

#[test]
fn test_marker_disambiguation() {
    let bin = binary_image(b"firmware payload");
    let elf = linked_image(100, &[5, 40]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let report = Injector::new(&bin_path, &elf_path).run().unwrap();
    assert_eq!(report.marker_offset, Some(40));
    assert_eq!(report.linked_patch_offset, Some(56));

    let elf_after = fs::read(&elf_path).unwrap();
    assert_eq!(&elf_after[56..88], report.digest.as_bytes());
    // 写入位置之前的字节不应被修改
    assert_eq!(&elf_after[..56], &elf[..56]);
}

#[test]
fn test_marker_at_offset_zero() {
    let bin = binary_image(b"zero");
    let elf = linked_image(80, &[0, 24]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let report = Injector::new(&bin_path, &elf_path).run().unwrap();
    assert_eq!(report.marker_offset, Some(24));
    assert_eq!(report.linked_patch_offset, Some(40));
}

#[test]
fn test_skip_without_second_marker() {
    for markers in [&[][..], &[10][..]] {
        let bin = binary_image(b"no marker");
        let elf = linked_image(90, markers);
        let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

        let injector = Injector::new(&bin_path, &elf_path);
        let report = injector.run().unwrap();

        assert_eq!(report.marker_offset, None);
        assert!(!report.linked_patched());
        assert_eq!(fs::read(&elf_path).unwrap(), elf, "标记 {:?}", markers);

        // 二进制仍然被写入
        assert_eq!(injector.verify(&report).unwrap(), digest_bytes(b"no marker"));
    }
}

#[test]
fn test_idempotent_rerun() {
    let mut rng = rand::thread_rng();

    for len in [0usize, 1, 31, 32, 33, 1000, 4096] {
        let mut payload = vec![0u8; len];
        rng.fill(payload.as_mut_slice());

        // 尾部先填入随机垃圾
        let mut bin = payload.clone();
        let mut garbage = [0u8; DIGEST_SIZE];
        rng.fill(&mut garbage[..]);
        bin.extend_from_slice(&garbage);

        let elf = linked_image(200, &[16, 100]);
        let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

        let injector = Injector::new(&bin_path, &elf_path);
        let first = injector.run().unwrap();
        let bin_once = fs::read(&bin_path).unwrap();
        let elf_once = fs::read(&elf_path).unwrap();

        let second = injector.run().unwrap();
        assert_eq!(first.digest, second.digest, "负载长度 {}", len);
        assert_eq!(first.digest, digest_bytes(&payload));
        assert_eq!(fs::read(&bin_path).unwrap(), bin_once);
        assert_eq!(fs::read(&elf_path).unwrap(), elf_once);
    }
}

#[test]
fn test_undersized_binary_rejected() {
    let bin = vec![0x42u8; DIGEST_SIZE - 1];
    let elf = linked_image(100, &[5, 40]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    for injector in [Injector::new(&bin_path, &elf_path), staged(&bin_path, &elf_path)] {
        let result = injector.run();
        assert!(matches!(result, Err(Error::FileTooSmall { .. })));

        // 两个文件都不应被修改
        assert_eq!(fs::read(&bin_path).unwrap(), bin);
        assert_eq!(fs::read(&elf_path).unwrap(), elf);
    }
}

#[test]
fn test_exact_trailer_size_binary() {
    let bin = vec![0u8; DIGEST_SIZE];
    let elf = linked_image(64, &[0, 8]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let report = Injector::new(&bin_path, &elf_path).run().unwrap();
    assert_eq!(report.digest, digest_bytes(b""));
    assert_eq!(report.linked_patch_offset, Some(24));
}

#[test]
fn test_missing_binary() {
    let dir = tempfile::tempdir().unwrap();
    let elf_path = dir.path().join("firmware.elf");
    let elf = linked_image(100, &[5, 40]);
    fs::write(&elf_path, &elf).unwrap();

    let result = Injector::new(dir.path().join("missing.bin"), &elf_path).run();
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(fs::read(&elf_path).unwrap(), elf);
}

#[test]
fn test_missing_linked_image_in_place_keeps_trailer() {
    // 原地模式没有回滚：二进制已经写入，链接镜像失败
    let payload = b"partial failure".to_vec();
    let dir = tempfile::tempdir().unwrap();
    let bin_path = dir.path().join("firmware.bin");
    fs::write(&bin_path, binary_image(&payload)).unwrap();

    let result = Injector::new(&bin_path, dir.path().join("missing.elf")).run();
    assert!(matches!(result, Err(Error::Io(_))));

    let bin_after = fs::read(&bin_path).unwrap();
    assert_eq!(&bin_after[payload.len()..], digest_bytes(&payload).as_bytes());
}

#[test]
fn test_missing_linked_image_staged_keeps_both() {
    let bin = binary_image(b"staged failure");
    let dir = tempfile::tempdir().unwrap();
    let bin_path = dir.path().join("firmware.bin");
    fs::write(&bin_path, &bin).unwrap();

    let result = staged(&bin_path, &dir.path().join("missing.elf")).run();
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(fs::read(&bin_path).unwrap(), bin);
}

#[test]
fn test_marker_patch_past_end() {
    // 第二个标记太靠近文件末尾，放不下32字节摘要
    let bin = binary_image(b"edge");
    let elf = linked_image(60, &[0, 40]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let result = staged(&bin_path, &elf_path).run();
    assert!(matches!(
        result,
        Err(Error::FileTooSmall {
            expected: 88,
            actual: 60
        })
    ));
    assert_eq!(fs::read(&bin_path).unwrap(), bin);
    assert_eq!(fs::read(&elf_path).unwrap(), elf);

    let result = Injector::new(&bin_path, &elf_path).run();
    assert!(matches!(result, Err(Error::FileTooSmall { .. })));
    // 原地模式下二进制已写入，链接镜像没有被扩展
    assert_eq!(fs::read(&elf_path).unwrap(), elf);
    assert_ne!(fs::read(&bin_path).unwrap(), bin);
}

#[test]
fn test_staged_matches_in_place() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    let bin = binary_image(&payload);
    let elf = linked_image(512, &[64, 300]);

    let (_dir_a, bin_a, elf_a) = write_images(&bin, &elf);
    let (dir_b, bin_b, elf_b) = write_images(&bin, &elf);

    let report_a = Injector::new(&bin_a, &elf_a).run().unwrap();
    let injector_b = staged(&bin_b, &elf_b);
    let report_b = injector_b.run().unwrap();

    assert_eq!(report_a.digest, report_b.digest);
    assert_eq!(report_a.linked_patch_offset, report_b.linked_patch_offset);
    assert_eq!(fs::read(&bin_a).unwrap(), fs::read(&bin_b).unwrap());
    assert_eq!(fs::read(&elf_a).unwrap(), fs::read(&elf_b).unwrap());
    injector_b.verify(&report_b).unwrap();

    // 不留临时文件
    let leftovers: Vec<_> = fs::read_dir(dir_b.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
#[test]
fn test_staged_preserves_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let bin = binary_image(b"perm");
    let elf = linked_image(100, &[5, 40]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);
    fs::set_permissions(&elf_path, fs::Permissions::from_mode(0o755)).unwrap();

    staged(&bin_path, &elf_path).run().unwrap();

    let mode = fs::metadata(&elf_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn test_custom_occurrence() {
    // 写入第一个标记之后
    let bin = binary_image(b"custom");
    let elf = linked_image(100, &[5, 40]);
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let config = InjectConfig {
        marker_occurrence: 0,
        ..InjectConfig::default()
    };
    let report = Injector::with_config(&bin_path, &elf_path, config)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.marker_offset, Some(5));
    assert_eq!(report.linked_patch_offset, Some(21));
}

#[test]
fn test_info_block_mismatch_does_not_block_patch() {
    // 前后信息块内容不同只是诊断，仍然写入
    let payload = vec![0x33u8; 48];
    let bin = binary_image(&payload);
    let mut elf = linked_image(128, &[0, 48]);
    elf[8..12].copy_from_slice(&0x0800_0000u32.to_le_bytes());
    elf[12..16].copy_from_slice(&0x0800_0030u32.to_le_bytes());
    elf[56..60].copy_from_slice(&0x0800_0000u32.to_le_bytes());
    elf[60..64].copy_from_slice(&0x0800_0040u32.to_le_bytes());
    let (_dir, bin_path, elf_path) = write_images(&bin, &elf);

    let report = Injector::new(&bin_path, &elf_path).run().unwrap();
    assert_eq!(report.linked_patch_offset, Some(64));
    assert_eq!(&fs::read(&elf_path).unwrap()[64..96], report.digest.as_bytes());
}

#[test]
fn test_huge_patch_offset_rejected() {
    // 偏移相加溢出时报错，不能回绕写到标记上
    let bin = binary_image(b"overflow");
    let elf = linked_image(100, &[5, 40]);

    let config = InjectConfig::from_bytes(
        br#"{"marker":[52,18,213,30,33,67,213,30],"marker_occurrence":1,"marker_patch_offset":18446744073709551615}"#,
    )
    .unwrap();
    assert_eq!(config.marker_patch_offset, usize::MAX);

    for commit in [CommitMode::InPlace, CommitMode::Staged] {
        let (_dir, bin_path, elf_path) = write_images(&bin, &elf);
        let injector =
            Injector::with_config(&bin_path, &elf_path, config.clone().with_commit(commit)).unwrap();

        assert!(matches!(
            injector.run(),
            Err(Error::FileTooSmall {
                expected: u64::MAX,
                ..
            })
        ));
        assert_eq!(fs::read(&elf_path).unwrap(), elf, "{:?}", commit);
    }
}

#[test]
fn test_staged_keeps_existing_tmp_sibling() {
    let bin = binary_image(b"sibling");
    let elf = linked_image(100, &[5, 40]);
    let (dir, bin_path, elf_path) = write_images(&bin, &elf);

    let bin_sibling = dir.path().join("firmware.bin.tmp");
    let elf_sibling = dir.path().join("firmware.elf.tmp");
    fs::write(&bin_sibling, b"unrelated bin").unwrap();
    fs::write(&elf_sibling, b"unrelated elf").unwrap();

    let injector = staged(&bin_path, &elf_path);
    let report = injector.run().unwrap();
    injector.verify(&report).unwrap();

    assert_eq!(fs::read(&bin_sibling).unwrap(), b"unrelated bin");
    assert_eq!(fs::read(&elf_sibling).unwrap(), b"unrelated elf");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);
}
