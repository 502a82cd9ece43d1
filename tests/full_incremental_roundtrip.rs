//! End-to-end round trip across the CLI-level verbs: build two full
//! packages for a synthetic two-component board, diff them into an
//! incremental package, then parse all three and check every invariant
//! spec.md §8 calls out for the combined path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ota_pack::chunker::DiffConfig;
use ota_pack::{
    build_incremental_package, build_package, parse_package, read_package, BsdiffDiffer,
    BuildOptions, Compressor, Descriptor, IncrementalOptions, Lz4Compressor, PackageConfig,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ota_pack_integration_{tag}_{}",
        uuid::Uuid::new_v4()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut f = fs::File::create(&path).unwrap();
    f.write_all(data).unwrap();
    path
}

#[test]
fn full_then_incremental_then_parse_round_trips() {
    let dir = scratch_dir("main");

    // v1 images: two components, ARC and QRK.
    let arc_v1 = vec![0x00u8; 8192];
    let quark_v1: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();

    let arc_v1_path = write_file(&dir, "arc_v1.bin", &arc_v1);
    let quark_v1_path = write_file(&dir, "quark_v1.bin", &quark_v1);

    let cfg = PackageConfig {
        output_directory: dir.clone(),
        input_directory: dir.clone(),
        ..Default::default()
    };

    let mut v1_descriptors = vec![
        Descriptor::new(*b"ARC", 0, arc_v1_path),
        Descriptor::new(*b"QRK", 1, quark_v1_path),
    ];
    build_package(
        &mut v1_descriptors,
        &cfg,
        &BuildOptions {
            compression: true,
            ..Default::default()
        },
        "v1.ota.bin",
        &Lz4Compressor,
    )
    .expect("v1 full package build failed");

    // v2 images: ARC changes in its back half; QRK is untouched.
    let mut arc_v2 = vec![0x00u8; 4096];
    arc_v2.extend(vec![0x11u8; 4096]);
    let quark_v2 = quark_v1.clone();

    let arc_v2_path = write_file(&dir, "arc_v2.bin", &arc_v2);
    let quark_v2_path = write_file(&dir, "quark_v2.bin", &quark_v2);

    let mut v2_descriptors = vec![
        Descriptor::new(*b"ARC", 0, arc_v2_path),
        Descriptor::new(*b"QRK", 1, quark_v2_path),
    ];
    build_package(
        &mut v2_descriptors,
        &cfg,
        &BuildOptions {
            compression: true,
            description_file: Some(dir.join("v2.description.json")),
            ..Default::default()
        },
        "v2.ota.bin",
        &Lz4Compressor,
    )
    .expect("v2 full package build failed");

    // Round-trip property: parsing v1/v2 recovers exactly the compressed
    // payloads that were written, keyed by magic.
    let (v1_parsed, v1_bytes) = read_package(&dir.join("v1.ota.bin")).unwrap();
    assert_eq!(v1_parsed.entries.len(), 2);
    let arc_payload = v1_parsed.component(&v1_bytes, *b"ARC").unwrap();
    assert_eq!(Lz4Compressor.decompress(arc_payload).unwrap(), arc_v1);

    // Build the incremental package from v1 -> v2.
    let incremental_opts = IncrementalOptions {
        diff: DiffConfig {
            chunk_size: 4096,
            temp_directory: dir.join("staging"),
            ..Default::default()
        },
        inputs_compressed: true,
        description_file: Some(dir.join("incremental.description.json")),
    };

    // The declared source_path values are the file names the diff streams
    // are written under, independent of the raw images' names.
    let diff_descriptors = vec![
        Descriptor::new(*b"ARC", 0, "arc.patch"),
        Descriptor::new(*b"QRK", 1, "quark.patch"),
    ];

    build_incremental_package(
        &dir.join("v1.ota.bin"),
        &dir.join("v2.ota.bin"),
        &diff_descriptors,
        &cfg,
        &incremental_opts,
        "incremental.ota.bin",
        &Lz4Compressor,
        &BsdiffDiffer,
    )
    .expect("incremental package build failed");

    let incremental_bytes = fs::read(dir.join("incremental.ota.bin")).unwrap();
    let incremental_parsed = parse_package(&incremental_bytes).unwrap();

    assert_eq!(incremental_parsed.entries.len(), 2);
    assert_eq!(incremental_parsed.entries[0].magic, *b"ARC");
    assert_eq!(incremental_parsed.entries[1].magic, *b"QRK");

    // Size-accounting invariant (spec.md §8): file_size == 28 + 16*K + sum(length).
    let expected_size: u64 = 28
        + 16 * incremental_parsed.entries.len() as u64
        + incremental_parsed
            .entries
            .iter()
            .map(|e| e.length as u64)
            .sum::<u64>();
    assert_eq!(incremental_bytes.len() as u64, expected_size);

    // Offset monotonicity (spec.md §8).
    let mut running = 0u32;
    for entry in &incremental_parsed.entries {
        assert_eq!(entry.offset, running);
        running += entry.length;
    }

    assert!(dir.join("v2.description.json").exists());
    assert!(dir.join("incremental.description.json").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn identical_full_packages_reject_incremental_diff() {
    let dir = scratch_dir("identical");
    let data = vec![0x77u8; 4096];
    let src = write_file(&dir, "arc.bin", &data);

    let cfg = PackageConfig {
        output_directory: dir.clone(),
        input_directory: dir.clone(),
        ..Default::default()
    };

    let mut descriptors = vec![Descriptor::new(*b"ARC", 0, src)];
    build_package(
        &mut descriptors,
        &cfg,
        &BuildOptions {
            compression: true,
            ..Default::default()
        },
        "same.bin",
        &Lz4Compressor,
    )
    .unwrap();

    let opts = IncrementalOptions {
        diff: DiffConfig {
            chunk_size: 4096,
            temp_directory: dir.join("staging"),
            ..Default::default()
        },
        inputs_compressed: true,
        description_file: None,
    };

    let diff_descriptors = vec![Descriptor::new(*b"ARC", 0, "arc.patch")];

    // Diffing a package against itself: every component is byte-identical,
    // so the per-component chunked diff must reject with IdenticalInputs.
    let result = build_incremental_package(
        &dir.join("same.bin"),
        &dir.join("same.bin"),
        &diff_descriptors,
        &cfg,
        &opts,
        "incremental.bin",
        &Lz4Compressor,
        &BsdiffDiffer,
    );
    assert!(result.is_err());

    fs::remove_dir_all(&dir).ok();
}
