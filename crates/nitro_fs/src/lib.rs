//! This library unpacks the file system and resources of **Nintendo DS** ROM images.
//!
//! # ROM File System
//!
//! A ROM image carries its files in two tables located by the ROM header:
//!
//! - the **file name table** (FNT) describes the directory tree, see [`filesystem`]
//! - the **file allocation table** (FAT) holds one `(start, end)` pair of byte offsets per file
//!
//! | Offset (bytes) | Field            | Description                                    |
//! |----------------|------------------|------------------------------------------------|
//! | 0x0000         | Start            | 4 bytes: offset of the first byte of the file  |
//! | 0x0004         | End              | 4 bytes: offset past the last byte of the file |
//!
//! Files are frequently compressed with one of the BIOS compression formats (LZ77, LZ11, RLE,
//! Huffman) and the boot binaries with a backwards LZ variant, see [`compression`]. Some files
//! are nested archives (`NARC`) with a small file system of their own, see [`archive`].
//!
//! ## Loading
//!
//! [`FileSystem`] resolves every listed file, decompresses it and identifies the resource it
//! contains through the [`TypeRegistry`]. Nested archives are expanded into child nodes of their
//! file on a pool of worker threads. All decoded bytes end up in one shared buffer owned by an
//! [`Archive`], tree nodes refer to its objects by index.
//!
//! ## Resources
//!
//! | Tag    | Kind                          | Parsed fields                                 |
//! |--------|-------------------------------|-----------------------------------------------|
//! | `NCLR` | [`ResourceKind::Palette`]      | bit depth, color data                         |
//! | `NCGR` | [`ResourceKind::TileGraphics`] | size in tiles, bit depth, tiling, pixel data  |
//! | `NSCR` | [`ResourceKind::Tilemap`]      | size in pixels, map entries                   |
//! | `NARC` | [`ResourceKind::Archive`]      | allocation table, name table, file image      |
//!
//! Any other data is kept as an opaque [`ResourceKind::Buffer`].
//!
//! ## Additional Information
//!
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Editing**: decoded bytes can be changed in place and re-encoded into the span the stored
//!   file occupied with [`FileSystem::commit`]
//!

pub mod archive;
pub mod compression;
pub mod error;
pub mod filesystem;
pub mod registry;
pub mod resource;
pub mod rom;

pub use archive::{Archive, ArchiveObject, ResourceIndex};
pub use compression::CompressionKind;
pub use filesystem::{FileSystem, FileSystemObject, FileSystemOptions, NodeKind};
pub use registry::{ResourceInfo, ResourceKind, TypeId, TypeRegistry};
pub use resource::Resource;
pub use rom::{OverlayEntry, Processor, RomHeader, RomLayout};
