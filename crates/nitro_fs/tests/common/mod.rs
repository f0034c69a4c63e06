//! In-memory ROM images for the integration tests
#![allow(dead_code)]

use std::io::Cursor;

use binrw::BinWrite;
use nitro_fs::error::Result;
use nitro_fs::rom::{BootBinary, OverlayEntry, RomHeader, TableRange};

enum Child {
    Folder(usize),
    File(String, Vec<u8>),
}

struct Folder {
    name: String,
    parent: usize,
    children: Vec<Child>,
}

/// Builds a ROM image with a header, a file name table and a file allocation table
pub struct RomBuilder {
    folders: Vec<Folder>,
    extra_files: Vec<Vec<u8>>,
    arm9: Option<(Vec<u8>, u32)>,
    arm9_overlays: Vec<OverlayEntry>,
}

fn align(out: &mut Vec<u8>, to: usize) {
    while out.len() % to != 0 {
        out.push(0xFF);
    }
}

impl RomBuilder {
    pub fn new() -> RomBuilder {
        RomBuilder {
            folders: vec![Folder {
                name: String::new(),
                parent: 0,
                children: Vec::new(),
            }],
            extra_files: Vec::new(),
            arm9: None,
            arm9_overlays: Vec::new(),
        }
    }

    /// Adds a folder below `parent` and returns its id
    pub fn folder(&mut self, parent: usize, name: &str) -> usize {
        let id = self.folders.len();
        self.folders.push(Folder {
            name: name.to_string(),
            parent,
            children: Vec::new(),
        });
        self.folders[parent].children.push(Child::Folder(id));
        id
    }

    pub fn file(&mut self, folder: usize, name: &str, data: Vec<u8>) -> &mut Self {
        self.folders[folder]
            .children
            .push(Child::File(name.to_string(), data));
        self
    }

    pub fn arm9(&mut self, data: Vec<u8>, ram_address: u32) -> &mut Self {
        self.arm9 = Some((data, ram_address));
        self
    }

    /// Adds an overlay stored as an unlisted file after every listed one
    pub fn arm9_overlay(&mut self, id: u32, data: Vec<u8>, compressed: bool) -> &mut Self {
        let size = data.len() as u32;

        self.arm9_overlays.push(OverlayEntry {
            id,
            ram_address: 0x0210_0000,
            ram_size: size,
            file_id: 0,
            compressed: if compressed { 0x0100_0000 | size } else { 0 },
            ..Default::default()
        });
        self.extra_files.push(data);
        self
    }

    fn name_table(&self) -> (Vec<u8>, Vec<Vec<u8>>) {
        let count = self.folders.len();
        let mut records = Vec::new();
        let mut tables = Vec::new();
        let mut files = Vec::new();

        for (id, folder) in self.folders.iter().enumerate() {
            let offset = count * 8 + tables.len();
            let relation = if id == 0 {
                count as u16
            } else {
                0xF000 | folder.parent as u16
            };
            records.extend_from_slice(&(offset as u32).to_le_bytes());
            records.extend_from_slice(&(files.len() as u16).to_le_bytes());
            records.extend_from_slice(&relation.to_le_bytes());

            for child in &folder.children {
                match child {
                    Child::File(name, data) => {
                        tables.push(name.len() as u8);
                        tables.extend_from_slice(name.as_bytes());
                        files.push(data.clone());
                    }
                    Child::Folder(child) => {
                        let name = &self.folders[*child].name;
                        tables.push(0x80 | name.len() as u8);
                        tables.extend_from_slice(name.as_bytes());
                        tables.extend_from_slice(&(0xF000 | *child as u16).to_le_bytes());
                    }
                }
            }
            tables.push(0);
        }

        records.extend(tables);
        (records, files)
    }

    /// Lays out the image and fills in the header
    pub fn build(&self) -> Result<Vec<u8>> {
        let (fnt, mut files) = self.name_table();
        let first_overlay = files.len() as u32;
        files.extend(self.extra_files.iter().cloned());

        let mut rom = vec![0u8; 0x200];
        let mut header = RomHeader::default();
        header.title[..4].copy_from_slice(b"TEST");
        header.game_code.copy_from_slice(b"NTRE");

        header.fnt = TableRange {
            offset: rom.len() as u32,
            size: fnt.len() as u32,
        };
        rom.extend(fnt);
        align(&mut rom, 4);

        let fat_offset = rom.len();
        header.fat = TableRange {
            offset: fat_offset as u32,
            size: files.len() as u32 * 8,
        };
        rom.resize(fat_offset + files.len() * 8, 0);
        align(&mut rom, 0x10);

        for (id, data) in files.iter().enumerate() {
            let start = rom.len() as u32;
            rom.extend_from_slice(data);
            let end = rom.len() as u32;
            rom[fat_offset + id * 8..fat_offset + id * 8 + 4].copy_from_slice(&start.to_le_bytes());
            rom[fat_offset + id * 8 + 4..fat_offset + id * 8 + 8]
                .copy_from_slice(&end.to_le_bytes());
            align(&mut rom, 0x10);
        }

        if let Some((arm9, ram_address)) = &self.arm9 {
            header.arm9 = BootBinary {
                rom_offset: rom.len() as u32,
                entry: *ram_address,
                ram_address: *ram_address,
                size: arm9.len() as u32,
            };
            rom.extend_from_slice(arm9);
            align(&mut rom, 0x10);
        }

        if !self.arm9_overlays.is_empty() {
            let mut table = Vec::new();
            for (i, entry) in self.arm9_overlays.iter().enumerate() {
                let entry = OverlayEntry {
                    file_id: first_overlay + i as u32,
                    ..*entry
                };
                entry.write(&mut Cursor::new(&mut table))?;
            }
            header.arm9_overlays = TableRange {
                offset: rom.len() as u32,
                size: table.len() as u32,
            };
            rom.extend(table);
        }

        let mut bytes = Vec::new();
        header.write(&mut Cursor::new(&mut bytes))?;
        rom[..bytes.len()].copy_from_slice(&bytes);
        let crc = RomHeader::compute_crc(&rom);
        rom[0x15E..0x160].copy_from_slice(&crc.to_le_bytes());

        Ok(rom)
    }
}

/// Frames files as a nested archive
pub fn narc(files: &[Vec<u8>]) -> Vec<u8> {
    let mut btaf = (files.len() as u32).to_le_bytes().to_vec();
    let mut gmif = Vec::new();
    for file in files {
        btaf.extend_from_slice(&(gmif.len() as u32).to_le_bytes());
        gmif.extend_from_slice(file);
        btaf.extend_from_slice(&(gmif.len() as u32).to_le_bytes());
        align(&mut gmif, 4);
    }
    let btnf = [4u32.to_le_bytes(), 0x0001_0000u32.to_le_bytes()].concat();

    let sections = [(b"BTAF", btaf), (b"BTNF", btnf), (b"GMIF", gmif)];
    let total = 16 + sections.iter().map(|(_, s)| 8 + s.len()).sum::<usize>();
    let mut out = b"NARC".to_vec();
    out.extend_from_slice(&0x0100_FFFEu32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&[0x10, 0x00, 0x03, 0x00]);
    for (tag, section) in sections {
        out.extend_from_slice(tag);
        out.extend_from_slice(&(8 + section.len() as u32).to_le_bytes());
        out.extend_from_slice(&section);
    }
    out
}

/// A 16 color palette resource
pub fn palette() -> Vec<u8> {
    let mut pltt: Vec<u8> = [3u32, 0, 0x20, 0x10]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    pltt.extend((0..16u16).flat_map(|c| (c * 0x421).to_le_bytes()));

    let mut out = b"RLCN".to_vec();
    out.extend_from_slice(&0x0100_FEFFu32.to_le_bytes());
    out.extend_from_slice(&(16 + 8 + pltt.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0x10, 0x00, 0x01, 0x00]);
    out.extend_from_slice(b"TTLP");
    out.extend_from_slice(&(8 + pltt.len() as u32).to_le_bytes());
    out.extend(pltt);
    out
}

/// Repeating test pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b"NITRO-FS"[i % 8]).collect()
}
