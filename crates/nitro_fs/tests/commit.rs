mod common;

use nitro_fs::compression::{self, CompressionKind};
use nitro_fs::error::Error;
use nitro_fs::FileSystem;
use pretty_assertions::assert_eq;
use tracing::info;
use tracing_test::traced_test;

use common::{narc, pattern, RomBuilder};

#[traced_test]
#[test]
fn commit_compressed_rom_file() -> Result<(), Error> {
    let mut builder = RomBuilder::new();
    builder
        .file(0, "packed.bin", compression::compress(CompressionKind::Lz77, &pattern(256))?)
        .file(0, "after.bin", b"neighbour".to_vec());
    let mut fs = FileSystem::new(builder.build()?)?;

    let index = fs.find("packed.bin")?.index;
    let edited = b"EDITED!!".repeat(32);
    fs.data_mut(index)?.copy_from_slice(&edited);
    let size = fs.commit(index)?;
    info!("Committed {size} bytes");
    assert_eq!(fs.stored(index)?.len(), size);
    assert_eq!(fs.data(index)?, &edited[..]);

    let fs = FileSystem::new(fs.into_rom())?;
    let node = fs.find("packed.bin")?;
    assert_eq!(fs.object(node.index)?.compression, CompressionKind::Lz77);
    assert_eq!(fs.data(node.index)?, &edited[..]);
    assert_eq!(fs.data(fs.find("after.bin")?.index)?, b"neighbour");
    Ok(())
}

#[traced_test]
#[test]
fn commit_that_outgrows_its_span() -> Result<(), Error> {
    let mut builder = RomBuilder::new();
    builder
        .file(0, "zeros.bin", compression::compress(CompressionKind::Lz77, &[0; 512])?)
        .file(0, "after.bin", b"neighbour".to_vec());
    let mut fs = FileSystem::new(builder.build()?)?;
    let before = fs.rom().to_vec();

    let index = fs.find("zeros.bin")?.index;
    let reserved = fs.get(index)?.reserved_size;
    for (i, byte) in fs.data_mut(index)?.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(167) ^ (i >> 3) as u8;
    }

    match fs.commit(index) {
        Err(Error::ReencodeOverflow { needed, reserved: available }) => {
            assert!(needed > available);
            assert_eq!(available, reserved);
        }
        other => panic!("expected an overflow, got {other:?}"),
    }
    assert_eq!(fs.rom(), &before[..]);
    Ok(())
}

#[traced_test]
#[test]
fn commit_stops_at_boot_binary() -> Result<(), Error> {
    let mut builder = RomBuilder::new();
    builder
        .file(0, "zeros.bin", compression::compress(CompressionKind::Lz77, &[0; 512])?)
        .arm9(vec![0xE1; 0x400], 0x0200_0000);
    let mut fs = FileSystem::new(builder.build()?)?;
    let before = fs.rom().to_vec();

    let index = fs.find("zeros.bin")?.index;
    let start = fs.object(index)?.source.range.start;
    let arm9 = fs.layout().arm9.clone().unwrap_or_default();
    let reserved = fs.get(index)?.reserved_size;
    info!("zeros.bin reserves {reserved:#x} bytes up to arm9 at {:#x}", arm9.start);
    assert_eq!(start + reserved, arm9.start);

    for (i, byte) in fs.data_mut(index)?.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(167) ^ (i >> 3) as u8;
    }
    assert!(matches!(
        fs.commit(index),
        Err(Error::ReencodeOverflow { .. })
    ));

    let reloaded = FileSystem::new(fs.into_rom())?;
    assert_eq!(reloaded.rom()[arm9.clone()], before[arm9.clone()]);
    assert_eq!(reloaded.data(reloaded.find("arm9.bin")?.index)?, &[0xE1; 0x400][..]);
    Ok(())
}

#[traced_test]
#[test]
fn commit_through_nested_archive() -> Result<(), Error> {
    let children = vec![
        compression::compress(CompressionKind::Rle, &[5; 64])?,
        b"second".to_vec(),
    ];
    let mut builder = RomBuilder::new();
    builder.file(0, "pack.narc", narc(&children));
    let mut fs = FileSystem::new(builder.build()?)?;

    let archive = fs.find("pack.narc")?.index;
    let child = fs.children(archive)?[0].index;
    fs.data_mut(child)?.fill(9);
    fs.commit(child)?;

    // the change only reaches the ROM with the archive
    let reloaded = FileSystem::new(fs.rom().to_vec())?;
    let stale = reloaded.children(reloaded.find("pack.narc")?.index)?[0].index;
    assert_eq!(reloaded.data(stale)?, &[5; 64][..]);

    fs.commit(archive)?;
    let reloaded = FileSystem::new(fs.into_rom())?;
    let nodes = reloaded.children(reloaded.find("pack.narc")?.index)?;
    assert_eq!(reloaded.data(nodes[0].index)?, &[9; 64][..]);
    assert_eq!(
        reloaded.object(nodes[0].index)?.compression,
        CompressionKind::Rle
    );
    assert_eq!(reloaded.data(nodes[1].index)?, b"second");
    Ok(())
}

#[traced_test]
#[test]
fn boot_binaries_and_folders_are_not_committed() -> Result<(), Error> {
    let mut builder = RomBuilder::new();
    let folder = builder.folder(0, "folder");
    builder
        .file(folder, "a.bin", vec![1; 8])
        .arm9(vec![0xE1; 0x40], 0x0200_0000);
    let mut fs = FileSystem::new(builder.build()?)?;

    let arm9 = fs.find("arm9.bin")?.index;
    assert!(matches!(fs.commit(arm9), Err(Error::CustomError(_))));
    assert!(matches!(fs.commit(folder), Err(Error::CustomError(_))));
    assert!(matches!(fs.commit(fs.size()), Err(Error::NodeNotFound(_))));
    Ok(())
}
