//! Decoding of nested archives (`NARC`) into one shared buffer.
//!
//! Decoding runs in two passes. The planning pass walks the allocation table and peeks at each
//! stored file to find out how many bytes its decoded form needs, without decoding anything.
//! The fill pass then decodes every file straight into its slot of a buffer allocated up front.
//! Objects only store offsets into that buffer, so cloning an [`Archive`] is a plain deep copy.

use std::borrow::Cow;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument, warn};

use crate::compression::{self, CompressionKind};
use crate::error::{CorruptionError, Error, NodeNotFoundError, Result};
use crate::registry::{ResourceInfo, ResourceKind, TypeRegistry};
use crate::resource::{NarcLayout, Resource};

/// Index into the object table of an [`Archive`]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIndex(pub usize);

/// Buffer a stored range refers to
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The ROM image owning the archive
    #[default]
    Rom,

    /// The decoded bytes of another object, which is a nested archive
    Container(ResourceIndex),

    /// The bytes an archive was opened from
    Input,
}

/// Where the stored (possibly compressed) form of an object lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub origin: Origin,
    pub range: Range<usize>,
}

/// Allocation table entry to update when an object is re-encoded
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct AllocationRef {
    /// Buffer holding the allocation table
    pub origin: Origin,

    /// Offset of the `(begin, end)` pair
    pub offset: usize,

    /// Value subtracted from absolute offsets before they are stored
    pub base: usize,
}

/// One decoded file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveObject {
    /// Identification of the decoded bytes
    pub info: ResourceInfo,

    /// `<index>.<TAG>` for archived files, the listed name for ROM files
    pub name: String,

    /// Offset of the decoded bytes in the shared buffer
    pub position: usize,

    /// Length of the decoded bytes
    pub len: usize,

    /// Structure of the decoded bytes
    pub resource: Resource,

    /// Compression that was undone while decoding
    pub compression: CompressionKind,

    /// Location of the stored bytes
    pub source: SourceSpan,

    /// Allocation entry of the stored bytes, absent for files without one
    pub allocation: Option<AllocationRef>,

    /// Bytes the stored form may occupy without overlapping its neighbour
    pub reserved_size: usize,
}

impl ArchiveObject {
    /// Identifies and parses decoded bytes.
    ///
    /// Bytes that carry a known tag but fail to parse are kept as opaque data.
    pub(crate) fn decode(data: &[u8], position: usize, compression: CompressionKind) -> Self {
        let registry = TypeRegistry::global();
        let mut info = registry.info(data);
        let resource = match registry.parse(info.type_id, data) {
            Ok(resource) => resource,
            Err(err) => {
                warn!(tag = %info.tag(), %err, "keeping resource as opaque data");
                info = registry.opaque_info(data);
                Resource::Buffer
            }
        };

        ArchiveObject {
            info,
            position,
            len: data.len(),
            resource,
            compression,
            ..Default::default()
        }
    }

    /// Decoded byte range in the shared buffer
    pub fn range(&self) -> Range<usize> {
        self.position..self.position + self.len
    }

    /// Whether the decoded bytes were recognised as a structured resource
    pub fn is_supported(&self) -> bool {
        self.info.kind() != ResourceKind::Buffer
    }
}

#[derive(Debug, Clone)]
struct ChildPlan {
    stored: Range<usize>,
    kind: CompressionKind,
    offset: usize,
    reserve: usize,
    reserved_size: usize,
}

/// Ratio of decoded to stored bytes no stream of a kind can exceed
fn max_expansion(kind: CompressionKind) -> Option<usize> {
    match kind {
        CompressionKind::Copy => Some(1),
        CompressionKind::Lz77 => Some(9),
        CompressionKind::Lz11 => Some(16_000),
        CompressionKind::Rle => Some(66),
        _ => None,
    }
}

/// Size pass over one nested archive
#[derive(Debug, Clone)]
pub(crate) struct ArchivePlan {
    layout: NarcLayout,
    children: Vec<ChildPlan>,
    reserved: usize,
}

impl ArchivePlan {
    /// Validates the archive structure and reserves space for every file.
    ///
    /// Each file reserves the larger of its stored and declared decoded size, so a stream that
    /// later fails to decode can still be kept as stored. Declared sizes the stream can't
    /// possibly reach are treated as uncompressed data.
    pub fn new(bytes: &[u8], decompress: bool) -> Result<ArchivePlan> {
        let registry = TypeRegistry::global();
        let Resource::Archive(layout) = registry.parse(registry.identify(bytes), bytes)? else {
            return Err(Error::malformed("not a nested archive"));
        };

        let ranges = layout.file_ranges(bytes)?;
        let spans = layout.reserved_sizes(&ranges);

        let mut children = Vec::with_capacity(layout.file_count);
        let mut reserved = 0usize;
        for (stored, reserved_size) in ranges.into_iter().zip(spans) {
            let raw = &bytes[stored.clone()];

            let mut kind = if decompress {
                compression::sniff(raw)
            } else {
                CompressionKind::None
            };
            let declared = compression::decompressed_size(raw, Some(kind));
            match max_expansion(kind) {
                Some(ratio) if declared <= raw.len().saturating_mul(ratio) => {}
                _ => kind = CompressionKind::None,
            }

            let reserve = if kind == CompressionKind::None {
                raw.len()
            } else {
                declared.max(raw.len())
            };

            children.push(ChildPlan {
                reserved_size,
                stored,
                kind,
                offset: reserved,
                reserve,
            });
            reserved += reserve;
        }

        Ok(ArchivePlan {
            layout,
            children,
            reserved,
        })
    }

    /// Number of archived files
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Bytes the decoded files need in the shared buffer
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    /// Decodes every file into `arena`, which starts at `position` of the shared buffer.
    ///
    /// `bytes` are the archive's own decoded bytes, found at `origin`. A file that fails to
    /// decode is kept as stored. Producing more bytes than planned is an error.
    pub fn fill(
        &self,
        bytes: &[u8],
        origin: Origin,
        arena: &mut [u8],
        position: usize,
        objects: &mut [ArchiveObject],
    ) -> Result<()> {
        if arena.len() != self.reserved || objects.len() != self.children.len() {
            return Err(CorruptionError::SizeMismatch {
                expected: self.reserved,
                actual: arena.len(),
            }
            .into());
        }

        for (index, (child, object)) in self.children.iter().zip(objects.iter_mut()).enumerate() {
            let stored = &bytes[child.stored.clone()];
            let (data, kind) = match child.kind {
                CompressionKind::None => (Cow::Borrowed(stored), CompressionKind::None),
                kind => match compression::decompress_as(kind, stored) {
                    Ok(decoded) => (Cow::Owned(decoded), kind),
                    Err(err) => {
                        warn!(index, ?kind, %err, "keeping archived file as stored");
                        (Cow::Borrowed(stored), CompressionKind::None)
                    }
                },
            };

            if data.len() > child.reserve {
                return Err(CorruptionError::SizeMismatch {
                    expected: child.reserve,
                    actual: data.len(),
                }
                .into());
            }
            arena[child.offset..child.offset + data.len()].copy_from_slice(&data);

            *object = ArchiveObject::decode(&data, position + child.offset, kind);
            object.name = format!("{index}.{}", object.info.tag());
            object.source = SourceSpan {
                origin,
                range: child.stored.clone(),
            };
            object.allocation = Some(AllocationRef {
                origin,
                offset: self.layout.entry_offset(index),
                base: self.layout.data.start,
            });
            object.reserved_size = child.reserved_size;
        }

        Ok(())
    }
}

/// Decoded files of a nested archive in one contiguous buffer
///
/// ```no_run
/// fn list_archive(bytes: &[u8]) -> nitro_fs::error::Result<()> {
///     let archive = nitro_fs::Archive::new(bytes)?;
///
///     for object in archive.objects() {
///         println!("{} ({} bytes)", object.name, object.len);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    pub(crate) data: Vec<u8>,
    pub(crate) objects: Vec<ArchiveObject>,
    input: Vec<u8>,
}

impl Archive {
    /// Decodes every file of a nested archive.
    ///
    /// A compressed archive is decompressed first.
    #[instrument(skip_all, fields(size = bytes.len()), err)]
    pub fn new(bytes: &[u8]) -> Result<Archive> {
        let input = compression::decompress(bytes).data.into_owned();
        let plan = ArchivePlan::new(&input, true)?;

        let mut data = vec![0; plan.reserved_bytes()];
        let mut objects = vec![ArchiveObject::default(); plan.len()];
        plan.fill(&input, Origin::Input, &mut data, 0, &mut objects)?;

        debug!(files = objects.len(), bytes = data.len(), "decoded archive");
        Ok(Archive {
            data,
            objects,
            input,
        })
    }

    pub(crate) fn from_parts(data: Vec<u8>, objects: Vec<ArchiveObject>) -> Archive {
        Archive {
            data,
            objects,
            input: Vec::new(),
        }
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the archive holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All objects in table order
    pub fn objects(&self) -> &[ArchiveObject] {
        &self.objects
    }

    /// Object at `index`
    pub fn get(&self, index: usize) -> Option<&ArchiveObject> {
        self.objects.get(index)
    }

    /// First object named `name`
    pub fn by_name(&self, name: &str) -> Result<&ArchiveObject> {
        self.objects
            .iter()
            .find(|object| object.name == name)
            .ok_or_else(|| NodeNotFoundError::Path(name.to_string()).into())
    }

    fn object(&self, index: usize) -> Result<&ArchiveObject> {
        self.objects
            .get(index)
            .ok_or_else(|| NodeNotFoundError::Index(index).into())
    }

    /// Decoded bytes of object `index`
    pub fn data(&self, index: usize) -> Result<&[u8]> {
        let range = self.object(index)?.range();
        Ok(&self.data[range])
    }

    /// Mutable decoded bytes of object `index`, see [`Archive::commit`]
    pub fn data_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        let range = self.object(index)?.range();
        Ok(&mut self.data[range])
    }

    /// The whole shared buffer
    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    /// Archive bytes this archive was opened from, including committed changes
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Stored form of object `index`, `None` when it lives in a ROM image
    pub fn stored(&self, index: usize) -> Option<&[u8]> {
        let object = self.objects.get(index)?;
        let range = object.source.range.clone();
        match object.source.origin {
            Origin::Rom => None,
            Origin::Input => self.input.get(range),
            Origin::Container(parent) => {
                let parent = self.objects.get(parent.0)?;
                self.data
                    .get(parent.position + range.start..parent.position + range.end)
            }
        }
    }

    /// Opens an object that is itself a nested archive
    pub fn open_nested(&self, index: usize) -> Result<Archive> {
        let object = self.object(index)?;
        if object.resource.as_archive().is_none() {
            return Err(Error::CustomError(format!(
                "{} is not a nested archive",
                object.name
            )));
        }
        Archive::new(self.data(index)?)
    }

    /// Re-encodes object `index` with its original compression.
    ///
    /// Fails with [`Error::ReencodeOverflow`] when the result exceeds the reserved span.
    pub(crate) fn reencode(&self, index: usize) -> Result<Vec<u8>> {
        let object = self.object(index)?;
        let encoded = compression::compress(object.compression, self.data(index)?)?;
        if encoded.len() > object.reserved_size {
            return Err(Error::ReencodeOverflow {
                needed: encoded.len(),
                reserved: object.reserved_size,
            });
        }
        Ok(encoded)
    }

    /// Re-parses object `index` after its bytes changed
    pub(crate) fn refresh(&mut self, index: usize) -> Result<()> {
        let object = self.object(index)?;
        let decoded = ArchiveObject::decode(
            &self.data[object.range()],
            object.position,
            object.compression,
        );

        let object = &mut self.objects[index];
        object.info = decoded.info;
        object.resource = decoded.resource;
        Ok(())
    }

    /// Records that object `index` is now stored as `len` bytes
    pub(crate) fn set_stored_len(&mut self, index: usize, len: usize) {
        let range = &mut self.objects[index].source.range;
        range.end = range.start + len;
    }

    /// Re-encodes object `index` and writes it back where it is stored.
    ///
    /// The allocation table of the containing archive is updated with the new size. Changes to
    /// a file inside a nested archive only reach the ROM once that archive is committed too.
    /// Returns the new stored size.
    #[instrument(skip(self), err)]
    pub fn commit(&mut self, index: usize) -> Result<usize> {
        let encoded = self.reencode(index)?;
        let object = self.object(index)?;
        let source = object.source.clone();
        let Some(allocation) = object.allocation else {
            return Err(Error::CustomError(format!(
                "{} has no allocation entry",
                object.name
            )));
        };
        if source.origin == Origin::Rom {
            return Err(Error::CustomError(format!(
                "{} is stored in a ROM image",
                object.name
            )));
        }

        let target = match source.origin {
            Origin::Rom | Origin::Input => &mut self.input[..],
            Origin::Container(parent) => {
                let parent = self.object(parent.0)?.range();
                &mut self.data[parent]
            }
        };

        write_stored(target, allocation, source.range.start, &encoded);
        self.set_stored_len(index, encoded.len());
        self.refresh(index)?;
        Ok(encoded.len())
    }
}

/// Copies `encoded` to `start` and stores its end in the allocation entry
pub(crate) fn write_stored(
    target: &mut [u8],
    allocation: AllocationRef,
    start: usize,
    encoded: &[u8],
) {
    target[start..start + encoded.len()].copy_from_slice(encoded);
    let end = start + encoded.len() - allocation.base;
    LittleEndian::write_u32(&mut target[allocation.offset + 4..], end as u32);
}
