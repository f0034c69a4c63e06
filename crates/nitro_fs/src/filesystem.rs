//! Directory tree over a ROM image.
//!
//! ## File name table
//!
//! The name table starts with one 8 byte record per folder, the root first:
//!
//! | Offset (bytes) | Field          | Description                                               |
//! |----------------|----------------|-----------------------------------------------------------|
//! | 0x0000         | Sub-table      | 4 bytes: offset of the folder's entries in the table      |
//! | 0x0004         | First file     | 2 bytes: allocation table index of the folder's first file|
//! | 0x0006         | Relation       | 2 bytes: folder count on the root, parent id otherwise    |
//!
//! Each folder's entries start with a length byte. Bit 7 marks a folder, the low bits give the
//! length of the name that follows. Folder entries end with the folder's 2 byte id. A zero
//! length ends the entries of the current folder.
//!
//! ## Node order
//!
//! Folders take the first indices in the order of their records, followed by the listed files,
//! the boot binaries and overlay tables, and finally the files of every expanded nested archive.

use std::borrow::Cow;
use std::io::Cursor;
use std::ops::Range;
use std::thread;

use binrw::BinRead;
use bon::Builder;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, instrument, warn};

use crate::archive::{
    write_stored, AllocationRef, Archive, ArchiveObject, ArchivePlan, Origin, ResourceIndex,
    SourceSpan,
};
use crate::compression::{self, blz, CompressionKind};
use crate::error::{Error, NodeNotFoundError, Result};
use crate::registry::{ResourceKind, TypeRegistry};
use crate::rom::{self, OverlayEntry, Processor, RomHeader, RomLayout};

/// What a node of the tree stands for
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The top folder
    Root,

    /// A folder below the root
    #[default]
    Folder,

    /// A file, decoded into the given object
    File(ResourceIndex),
}

/// One node of the tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystemObject {
    pub name: String,

    /// Names from the root down, joined with `/`. The root's path is empty.
    pub path: String,

    pub parent: Option<usize>,

    /// Number of direct child folders
    pub folders: usize,

    /// Number of direct child files
    pub files: usize,

    /// Index of the first child folder
    pub folder_hint: Option<usize>,

    /// Index of the first child file
    pub file_hint: Option<usize>,

    pub index: usize,

    pub kind: NodeKind,

    /// Bytes the stored form of a file may occupy
    pub reserved_size: usize,
}

impl FileSystemObject {
    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    /// Object holding the decoded bytes of a file
    pub fn resource(&self) -> Option<ResourceIndex> {
        match self.kind {
            NodeKind::File(index) => Some(index),
            _ => None,
        }
    }
}

/// Options for how a ROM image is loaded
#[derive(Debug, Clone, Copy, Builder)]
pub struct FileSystemOptions {
    /// Threads expanding nested archives, defaults to the available parallelism
    pub workers: Option<usize>,

    /// Whether nested archives get child nodes for their files
    #[builder(default = true)]
    pub expand_archives: bool,

    /// Whether compressed files are decoded
    #[builder(default = true)]
    pub decompress: bool,
}

impl Default for FileSystemOptions {
    fn default() -> Self {
        FileSystemOptions::builder().build()
    }
}

impl FileSystemOptions {
    fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }
}

#[derive(BinRead, Debug, Copy, Clone)]
#[br(little)]
struct FolderRecord {
    sub_table_offset: u32,
    first_file_id: u16,
    relation: u16,
}

#[derive(Debug, Clone)]
enum EntryTarget {
    Folder(usize),
    File(usize),
}

#[derive(Debug, Clone)]
struct NameEntry {
    name: String,
    folder: usize,
    target: EntryTarget,
}

fn read_folders(fnt: &[u8]) -> Result<Vec<FolderRecord>> {
    let mut reader = Cursor::new(fnt);
    let root = FolderRecord::read(&mut reader)
        .map_err(|_| Error::malformed("name table is shorter than its root record"))?;

    if root.relation & 0xF000 != 0 {
        return Err(Error::malformed(format!(
            "root record has relation {:#06x}",
            root.relation
        )));
    }

    let count = (root.relation & 0x0FFF) as usize;
    if count == 0 || count * 8 > fnt.len() {
        return Err(Error::malformed(format!(
            "{count} folder records don't fit into a name table of {:#x} bytes",
            fnt.len()
        )));
    }

    let mut folders = vec![root];
    for id in 1..count {
        let record = FolderRecord::read(&mut reader)?;
        let parent = (record.relation & 0x0FFF) as usize;
        if parent >= count {
            return Err(Error::malformed(format!(
                "folder {id} has parent {parent} outside of {count} folders"
            )));
        }
        folders.push(record);
    }

    Ok(folders)
}

fn read_entries(fnt: &[u8], folders: &[FolderRecord]) -> Result<Vec<NameEntry>> {
    let truncated = |pos: usize| {
        Error::malformed(format!(
            "name table entry at {pos:#x} exceeds {:#x} bytes",
            fnt.len()
        ))
    };

    let mut entries = Vec::new();
    let mut folder = 0;
    let mut pos = folders[0].sub_table_offset as usize;
    let mut file_id = folders[0].first_file_id as usize;

    loop {
        let len = *fnt.get(pos).ok_or_else(|| truncated(pos))?;
        pos += 1;

        match len {
            0 => {
                folder += 1;
                if folder == folders.len() {
                    break;
                }
                pos = folders[folder].sub_table_offset as usize;
                file_id = folders[folder].first_file_id as usize;
            }
            0xFF => break,
            _ => {
                let name_len = (len & 0x7F) as usize;
                let name = fnt.get(pos..pos + name_len).ok_or_else(|| truncated(pos))?;
                let name = String::from_utf8_lossy(name).into_owned();
                pos += name_len;

                let target = if len & 0x80 != 0 {
                    let id = fnt
                        .get(pos..pos + 2)
                        .map(LittleEndian::read_u16)
                        .ok_or_else(|| truncated(pos))?;
                    pos += 2;

                    let id = (id & 0x0FFF) as usize;
                    if id == 0 || id >= folders.len() {
                        return Err(Error::malformed(format!(
                            "folder entry {name:?} refers to folder {id} of {}",
                            folders.len()
                        )));
                    }
                    EntryTarget::Folder(id)
                } else {
                    file_id += 1;
                    EntryTarget::File(file_id - 1)
                };

                entries.push(NameEntry {
                    name,
                    folder,
                    target,
                });
            }
        }
    }

    Ok(entries)
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn folder_paths(nodes: &[FileSystemObject]) -> Result<Vec<String>> {
    (0..nodes.len())
        .map(|id| {
            let mut names = Vec::new();
            let mut current = id;
            while let Some(parent) = nodes[current].parent {
                names.push(nodes[current].name.as_str());
                current = parent;
                if names.len() > nodes.len() {
                    return Err(Error::malformed(format!("folder {id} is its own ancestor")));
                }
            }
            names.reverse();
            Ok(names.join("/"))
        })
        .collect()
}

/// A file listed directly in the ROM, decoded during the size pass
struct TopFile<'a> {
    node: usize,
    data: Cow<'a, [u8]>,
    kind: CompressionKind,
    stored: Range<usize>,
    allocation: Option<AllocationRef>,
    reserved_size: usize,
}

/// A nested archive with the slots its files are decoded into
struct ExpandJob {
    node: usize,
    object: usize,
    path: String,
    source: Range<usize>,
    plan: ArchivePlan,
    position: usize,
    first_object: usize,
    first_node: usize,
}

fn take_front<'a, T>(slice: &mut &'a mut [T], len: usize) -> &'a mut [T] {
    let (front, rest) = std::mem::take(slice).split_at_mut(len);
    *slice = rest;
    front
}

fn expand_group(
    decoded: &[u8],
    jobs: &[ExpandJob],
    mut arena: &mut [u8],
    mut objects: &mut [ArchiveObject],
    mut nodes: &mut [FileSystemObject],
) -> Result<()> {
    for job in jobs {
        let count = job.plan.len();
        let job_arena = take_front(&mut arena, job.plan.reserved_bytes());
        let job_objects = take_front(&mut objects, count);
        let job_nodes = take_front(&mut nodes, count);

        job.plan.fill(
            &decoded[job.source.clone()],
            Origin::Container(ResourceIndex(job.object)),
            job_arena,
            job.position,
            job_objects,
        )?;

        for (i, (object, node)) in job_objects.iter().zip(job_nodes.iter_mut()).enumerate() {
            *node = FileSystemObject {
                name: object.name.clone(),
                path: join(&job.path, &object.name),
                parent: Some(job.node),
                index: job.first_node + i,
                kind: NodeKind::File(ResourceIndex(job.first_object + i)),
                reserved_size: object.reserved_size,
                ..Default::default()
            };
        }
        debug!(path = %job.path, files = count, "expanded nested archive");
    }
    Ok(())
}

/// Navigable file system of a ROM image
///
/// ```no_run
/// fn list_rom(path: &str) -> nitro_fs::error::Result<()> {
///     let fs = nitro_fs::FileSystem::new(std::fs::read(path)?)?;
///
///     for node in fs.traverse(0, false, true)? {
///         println!("{}", node.path);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileSystem {
    rom: Vec<u8>,
    layout: RomLayout,
    nodes: Vec<FileSystemObject>,
    archive: Archive,
    folder_count: usize,
    supported: usize,
}

impl FileSystem {
    /// Loads a ROM image using the tables its header points at
    pub fn new(rom: Vec<u8>) -> Result<FileSystem> {
        FileSystem::with_options(rom, FileSystemOptions::default())
    }

    /// Loads a ROM image using the tables its header points at
    pub fn with_options(rom: Vec<u8>, options: FileSystemOptions) -> Result<FileSystem> {
        let header = RomHeader::parse(&rom)?;
        if !header.verify_crc(&rom) {
            warn!(
                expected = header.header_crc,
                actual = RomHeader::compute_crc(&rom),
                "header checksum mismatch"
            );
        }
        let layout = RomLayout::from_header(&header, rom.len())?;
        FileSystem::with_layout(rom, layout, options)
    }

    /// Loads a ROM image from explicitly located tables
    #[instrument(skip_all, fields(size = rom.len()), err)]
    pub fn with_layout(
        rom: Vec<u8>,
        layout: RomLayout,
        options: FileSystemOptions,
    ) -> Result<FileSystem> {
        let rom_bytes: &[u8] = &rom;
        let bounded = |name: &str, range: &Range<usize>| {
            rom_bytes.get(range.clone()).ok_or_else(|| {
                Error::malformed(format!(
                    "{name} {range:#x?} exceeds {:#x} bytes",
                    rom_bytes.len()
                ))
            })
        };
        let fnt = bounded("name table", &layout.fnt)?;
        let fat = bounded("allocation table", &layout.fat)?;

        let records = read_folders(fnt)?;
        let entries = read_entries(fnt, &records)?;
        let folder_count = records.len();

        let mut nodes: Vec<FileSystemObject> = records
            .iter()
            .enumerate()
            .map(|(index, record)| FileSystemObject {
                parent: (index > 0).then_some((record.relation & 0x0FFF) as usize),
                index,
                kind: if index == 0 {
                    NodeKind::Root
                } else {
                    NodeKind::Folder
                },
                ..Default::default()
            })
            .collect();

        let mut listed = Vec::new();
        for entry in entries {
            match entry.target {
                EntryTarget::Folder(id) => nodes[id].name = entry.name,
                EntryTarget::File(file_id) => listed.push((entry, file_id)),
            }
        }
        for (id, path) in folder_paths(&nodes)?.into_iter().enumerate() {
            nodes[id].path = path;
        }

        // a file may grow up to whatever region follows it
        let mut starts: Vec<usize> = fat
            .chunks_exact(8)
            .map(|pair| LittleEndian::read_u32(pair) as usize)
            .chain(layout.region_starts())
            .collect();
        starts.sort_unstable();
        let reserve_until = |start: usize, end: usize| {
            let next = starts.partition_point(|&s| s <= start);
            let limit = starts.get(next).copied().unwrap_or(rom_bytes.len());
            limit.min(rom_bytes.len()).max(end) - start
        };

        let mut top_files = Vec::new();
        for (entry, file_id) in listed {
            let pair = fat.get(file_id * 8..file_id * 8 + 8).ok_or_else(|| {
                Error::malformed(format!(
                    "file {:?} uses allocation entry {file_id} outside of the table",
                    entry.name
                ))
            })?;
            let start = LittleEndian::read_u32(pair) as usize;
            let end = LittleEndian::read_u32(&pair[4..]) as usize;
            if start > end || end > rom_bytes.len() {
                return Err(Error::malformed(format!(
                    "file {file_id} spans {start:#x}..{end:#x} outside of {:#x} bytes",
                    rom_bytes.len()
                )));
            }

            let stored = &rom_bytes[start..end];
            let reserved_size = reserve_until(start, end);
            let (data, kind) = if options.decompress {
                let decoded = compression::decompress(stored);
                (decoded.data, decoded.kind)
            } else {
                (Cow::Borrowed(stored), CompressionKind::None)
            };

            let index = nodes.len();
            let path = join(&nodes[entry.folder].path, &entry.name);
            debug!(%path, file_id, ?kind, "resolved file");
            nodes.push(FileSystemObject {
                name: entry.name,
                path,
                parent: Some(entry.folder),
                index,
                reserved_size,
                ..Default::default()
            });
            top_files.push(TopFile {
                node: index,
                data,
                kind,
                stored: start..end,
                allocation: Some(AllocationRef {
                    origin: Origin::Rom,
                    offset: layout.fat.start + file_id * 8,
                    base: 0,
                }),
                reserved_size,
            });
        }

        let synthetic = [
            ("arm9.bin", &layout.arm9),
            ("arm7.bin", &layout.arm7),
            ("arm9ovt.bin", &layout.arm9_overlay_table),
            ("arm7ovt.bin", &layout.arm7_overlay_table),
        ];
        for (name, range) in synthetic {
            let Some(range) = range else {
                continue;
            };
            let stored = bounded(name, range)?;

            let (data, kind) = match name {
                "arm9.bin" if options.decompress => {
                    match rom::decompress_arm9(stored, layout.arm9_ram_address) {
                        Ok(decoded) => decoded,
                        Err(err) => {
                            warn!(%err, "keeping arm9 as stored");
                            (Cow::Borrowed(stored), CompressionKind::None)
                        }
                    }
                }
                _ => (Cow::Borrowed(stored), CompressionKind::None),
            };

            let index = nodes.len();
            nodes.push(FileSystemObject {
                name: name.to_string(),
                path: name.to_string(),
                parent: Some(0),
                index,
                reserved_size: range.len(),
                ..Default::default()
            });
            top_files.push(TopFile {
                node: index,
                data,
                kind,
                stored: range.clone(),
                allocation: None,
                reserved_size: range.len(),
            });
        }

        let top_bytes: usize = top_files.iter().map(|file| file.data.len()).sum();
        let top_count = top_files.len();

        let registry = TypeRegistry::global();
        let mut jobs = Vec::new();
        let mut position = top_bytes;
        let mut source = 0;
        let mut first_object = top_count;
        let mut first_node = nodes.len();
        for (object, file) in top_files.iter().enumerate() {
            let range = source..source + file.data.len();
            source = range.end;

            let is_archive = registry.kind(registry.identify(&file.data)) == ResourceKind::Archive;
            if !options.expand_archives || !is_archive {
                continue;
            }

            let path = &nodes[file.node].path;
            let plan = match ArchivePlan::new(&file.data, options.decompress) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(%path, %err, "nested archive contributes no files");
                    continue;
                }
            };

            let count = plan.len();
            let reserved = plan.reserved_bytes();
            let node = &mut nodes[file.node];
            node.files = count;
            node.file_hint = (count > 0).then_some(first_node);

            jobs.push(ExpandJob {
                node: file.node,
                object,
                path: node.path.clone(),
                source: range,
                position,
                first_object,
                first_node,
                plan,
            });
            position += reserved;
            first_object += count;
            first_node += count;
        }

        let mut arena = vec![0u8; position];
        let mut objects = Vec::with_capacity(first_object);
        let mut offset = 0;
        for file in &top_files {
            let len = file.data.len();
            arena[offset..offset + len].copy_from_slice(&file.data);

            let mut object = ArchiveObject::decode(&file.data, offset, file.kind);
            object.name = nodes[file.node].name.clone();
            object.source = SourceSpan {
                origin: Origin::Rom,
                range: file.stored.clone(),
            };
            object.allocation = file.allocation;
            object.reserved_size = file.reserved_size;

            nodes[file.node].kind = NodeKind::File(ResourceIndex(objects.len()));
            objects.push(object);
            offset += len;
        }
        drop(top_files);

        objects.resize(first_object, ArchiveObject::default());
        nodes.resize(first_node, FileSystemObject::default());

        for (parent, child) in nodes
            .iter()
            .filter_map(|node| node.parent.map(|parent| (parent, node.index)))
            .filter(|&(_, child)| child < folder_count + top_count)
            .collect::<Vec<_>>()
        {
            let parent = &mut nodes[parent];
            if child < folder_count {
                parent.folders += 1;
                parent.folder_hint = Some(parent.folder_hint.map_or(child, |h| h.min(child)));
            } else {
                parent.files += 1;
                parent.file_hint = Some(parent.file_hint.map_or(child, |h| h.min(child)));
            }
        }

        if !jobs.is_empty() {
            let workers = options.worker_count().min(jobs.len());
            let group_size = jobs.len().div_ceil(workers);
            debug!(archives = jobs.len(), workers, "expanding nested archives");

            let (decoded, mut arena_tail) = arena.split_at_mut(top_bytes);
            let decoded: &[u8] = decoded;
            let mut object_tail = &mut objects[top_count..];
            let mut node_tail = &mut nodes[folder_count + top_count..];

            thread::scope(|scope| -> Result<()> {
                let mut handles = Vec::with_capacity(workers);
                for group in jobs.chunks(group_size) {
                    let bytes: usize = group.iter().map(|job| job.plan.reserved_bytes()).sum();
                    let count: usize = group.iter().map(|job| job.plan.len()).sum();

                    let arena = take_front(&mut arena_tail, bytes);
                    let objects = take_front(&mut object_tail, count);
                    let nodes = take_front(&mut node_tail, count);
                    handles.push(
                        scope.spawn(move || expand_group(decoded, group, arena, objects, nodes)),
                    );
                }

                for handle in handles {
                    handle
                        .join()
                        .map_err(|_| Error::CustomError("archive worker panicked".to_string()))??;
                }
                Ok(())
            })?;
        }

        let supported = objects.iter().filter(|object| object.is_supported()).count();
        info!(
            folders = folder_count,
            files = nodes.len() - folder_count,
            supported,
            "loaded file system"
        );

        Ok(FileSystem {
            rom,
            layout,
            nodes,
            archive: Archive::from_parts(arena, objects),
            folder_count,
            supported,
        })
    }

    /// Number of nodes, folders and files
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes, same as [`FileSystem::size`]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of folders including the root
    pub fn folder_count(&self) -> usize {
        self.folder_count
    }

    /// Number of file nodes, including files of nested archives
    pub fn file_count(&self) -> usize {
        self.nodes.len() - self.folder_count
    }

    /// Number of files recognised as structured resources
    pub fn supported_files(&self) -> usize {
        self.supported
    }

    /// All nodes in index order
    pub fn nodes(&self) -> &[FileSystemObject] {
        &self.nodes
    }

    /// The root folder
    pub fn root(&self) -> &FileSystemObject {
        &self.nodes[0]
    }

    /// Node at `index`
    pub fn get(&self, index: usize) -> Result<&FileSystemObject> {
        self.nodes
            .get(index)
            .ok_or_else(|| NodeNotFoundError::Index(index).into())
    }

    /// Node whose path is exactly `path`, leading and trailing `/` are ignored
    pub fn find(&self, path: &str) -> Result<&FileSystemObject> {
        let path = path.trim_matches('/');
        self.nodes
            .iter()
            .find(|node| node.path == path)
            .ok_or_else(|| NodeNotFoundError::Path(path.to_string()).into())
    }

    fn scan_children(
        &self,
        index: usize,
        hint: Option<usize>,
        count: usize,
    ) -> impl Iterator<Item = &FileSystemObject> + '_ {
        hint.into_iter().flat_map(move |hint| {
            self.nodes[hint..]
                .iter()
                .filter(move |child| child.parent == Some(index))
                .take(count)
        })
    }

    /// Direct children of `index`, folders first
    pub fn children(&self, index: usize) -> Result<Vec<&FileSystemObject>> {
        let node = self.get(index)?;
        Ok(self
            .scan_children(index, node.folder_hint, node.folders)
            .chain(self.scan_children(index, node.file_hint, node.files))
            .collect())
    }

    /// Every node below `index` in depth-first order.
    ///
    /// Folders are only listed with `include_folders`, the files of nested archives only with
    /// `recurse_into_files`.
    pub fn traverse(
        &self,
        index: usize,
        include_folders: bool,
        recurse_into_files: bool,
    ) -> Result<Vec<&FileSystemObject>> {
        let mut out = Vec::new();
        let mut stack = self.children(index)?;
        stack.reverse();

        while let Some(node) = stack.pop() {
            let descend = if node.is_file() {
                out.push(node);
                recurse_into_files && node.files > 0
            } else {
                if include_folders {
                    out.push(node);
                }
                true
            };

            if descend {
                let mut children = self.children(node.index)?;
                children.reverse();
                stack.extend(children);
            }
        }

        Ok(out)
    }

    fn resource_of(&self, index: usize) -> Result<ResourceIndex> {
        let node = self.get(index)?;
        node.resource()
            .ok_or_else(|| Error::CustomError(format!("/{} is not a file", node.path)))
    }

    /// Object a file node was decoded into
    pub fn object(&self, index: usize) -> Result<&ArchiveObject> {
        let resource = self.resource_of(index)?;
        self.archive
            .get(resource.0)
            .ok_or_else(|| NodeNotFoundError::Index(resource.0).into())
    }

    /// Decoded bytes of a file node
    pub fn data(&self, index: usize) -> Result<&[u8]> {
        self.archive.data(self.resource_of(index)?.0)
    }

    /// Mutable decoded bytes of a file node, see [`FileSystem::commit`]
    pub fn data_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        let resource = self.resource_of(index)?;
        self.archive.data_mut(resource.0)
    }

    /// Stored form of a file node, before any decompression
    pub fn stored(&self, index: usize) -> Result<&[u8]> {
        let resource = self.resource_of(index)?;
        let object = self.object(index)?;
        match object.source.origin {
            Origin::Rom => Ok(&self.rom[object.source.range.clone()]),
            _ => self
                .archive
                .stored(resource.0)
                .ok_or_else(|| Error::malformed("stored range outside of its container")),
        }
    }

    /// Shared table of every decoded object
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Opens a file node that is a nested archive on its own, at any depth
    pub fn open_archive(&self, index: usize) -> Result<Archive> {
        self.archive.open_nested(self.resource_of(index)?.0)
    }

    /// Re-encodes a file node and writes it back into its stored span.
    ///
    /// Listed ROM files update their allocation table entry. Files of nested archives are written
    /// into the archive's decoded bytes, so the archive itself has to be committed afterwards for
    /// the change to reach the ROM. Boot binaries and overlay tables have no allocation entry and
    /// can't be committed. Returns the new stored size.
    #[instrument(skip(self), err)]
    pub fn commit(&mut self, index: usize) -> Result<usize> {
        let resource = self.resource_of(index)?.0;
        let object = &self.archive.objects()[resource];
        let Some(allocation) = object.allocation else {
            return Err(Error::CustomError(format!(
                "/{} has no allocation entry",
                self.nodes[index].path
            )));
        };
        let origin = object.source.origin;
        let start = object.source.range.start;

        if origin != Origin::Rom {
            return self.archive.commit(resource);
        }

        let encoded = self.archive.reencode(resource)?;
        write_stored(&mut self.rom, allocation, start, &encoded);
        self.archive.set_stored_len(resource, encoded.len());
        self.archive.refresh(resource)?;

        debug!(path = %self.nodes[index].path, size = encoded.len(), "committed");
        Ok(encoded.len())
    }

    /// The ROM image, including committed changes
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// Takes the ROM image, including committed changes
    pub fn into_rom(self) -> Vec<u8> {
        self.rom
    }

    /// Tables the file system was built from
    pub fn layout(&self) -> &RomLayout {
        &self.layout
    }

    /// Overlay records of one processor, empty when the ROM has no table for it
    pub fn overlays(&self, processor: Processor) -> Result<Vec<OverlayEntry>> {
        let table = match processor {
            Processor::Arm9 => &self.layout.arm9_overlay_table,
            Processor::Arm7 => &self.layout.arm7_overlay_table,
        };
        match table {
            Some(range) => rom::read_overlay_table(&self.rom[range.clone()]),
            None => Ok(Vec::new()),
        }
    }

    /// Decoded contents of an overlay
    pub fn overlay_data(&self, entry: &OverlayEntry) -> Result<Vec<u8>> {
        let id = entry.file_id as usize;
        let pair = self
            .rom
            .get(self.layout.fat.start + id * 8..self.layout.fat.start + id * 8 + 8)
            .filter(|_| id * 8 + 8 <= self.layout.fat.len())
            .ok_or_else(|| {
                Error::malformed(format!("overlay {} uses missing file {id}", entry.id))
            })?;
        let start = LittleEndian::read_u32(pair) as usize;
        let end = LittleEndian::read_u32(&pair[4..]) as usize;
        let stored = self.rom.get(start..end).ok_or_else(|| {
            Error::malformed(format!("overlay {} spans {start:#x}..{end:#x}", entry.id))
        })?;

        if entry.is_compressed() {
            blz::decompress(stored)
        } else {
            Ok(stored.to_vec())
        }
    }
}
