//! Magic number to resource kind lookup.
//!
//! Every structured resource starts with a four character tag. The registry holds one entry per
//! supported kind in registration order, followed by a catch-all [`ResourceKind::Buffer`] entry
//! that any unrecognised data resolves to.

use std::fmt;
use std::sync::OnceLock;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::resource::{self, Resource};

/// Index of a kind inside a [`TypeRegistry`]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub usize);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The resource layouts this crate understands
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Color palette (`NCLR`)
    Palette,

    /// Character/tile graphics (`NCGR`)
    TileGraphics,

    /// Screen/tile map (`NSCR`)
    Tilemap,

    /// Nested archive (`NARC`)
    Archive,

    /// Opaque data
    Buffer,
}

impl ResourceKind {
    /// Magic number of the kind, [`ResourceKind::Buffer`] has none
    pub const fn magic(&self) -> u32 {
        match self {
            ResourceKind::Palette => u32::from_be_bytes(*b"NCLR"),
            ResourceKind::TileGraphics => u32::from_be_bytes(*b"NCGR"),
            ResourceKind::Tilemap => u32::from_be_bytes(*b"NSCR"),
            ResourceKind::Archive => u32::from_be_bytes(*b"NARC"),
            ResourceKind::Buffer => 0,
        }
    }
}

type Parser = fn(&[u8]) -> Result<Resource>;

#[derive(Debug, Clone)]
struct Entry {
    kind: ResourceKind,
    magic: u32,
    decoded_size: usize,
    parser: Parser,
}

/// Ordered table of the supported resource kinds
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: Vec<Entry>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Builds the table of every kind this crate can parse
    pub fn new() -> TypeRegistry {
        let entry = |kind: ResourceKind, decoded_size: usize, parser: Parser| Entry {
            kind,
            magic: kind.magic(),
            decoded_size,
            parser,
        };

        TypeRegistry {
            entries: vec![
                entry(ResourceKind::Palette, 0x28, resource::parse_palette),
                entry(ResourceKind::TileGraphics, 0x30, resource::parse_tile_graphics),
                entry(ResourceKind::Tilemap, 0x24, resource::parse_tilemap),
                entry(ResourceKind::Archive, 0x1C, resource::parse_archive),
                entry(ResourceKind::Buffer, 0, resource::parse_buffer),
            ],
        }
    }

    /// Registry shared by the whole process
    pub fn global() -> &'static TypeRegistry {
        static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TypeRegistry::new)
    }

    /// Number of registered kinds, including the catch-all
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the catch-all opaque kind
    pub fn buffer_id(&self) -> TypeId {
        TypeId(self.entries.len() - 1)
    }

    fn entry(&self, id: TypeId) -> &Entry {
        self.entries
            .get(id.0)
            .unwrap_or(&self.entries[self.entries.len() - 1])
    }

    /// Finds the kind of `bytes` from its leading tag.
    ///
    /// The tag is compared in both byte orders since the framings differ in how they store it.
    /// A kind is only reported when `bytes` holds at least its decoded size.
    pub fn identify(&self, bytes: &[u8]) -> TypeId {
        let Some(lead) = bytes.get(..4) else {
            return self.buffer_id();
        };
        let word = u32::from_be_bytes([lead[0], lead[1], lead[2], lead[3]]);

        self.entries
            .iter()
            .position(|entry| {
                entry.kind != ResourceKind::Buffer
                    && (word == entry.magic || word.swap_bytes() == entry.magic)
                    && bytes.len() >= entry.decoded_size
            })
            .map(TypeId)
            .unwrap_or_else(|| self.buffer_id())
    }

    /// Size of the fixed header record parsed for a kind
    pub fn decoded_size(&self, id: TypeId) -> usize {
        self.entry(id).decoded_size
    }

    /// Magic number registered for a kind
    pub fn magic_number(&self, id: TypeId) -> u32 {
        self.entry(id).magic
    }

    /// Largest decoded size across every kind
    pub fn max_resource_size(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.decoded_size)
            .max()
            .unwrap_or_default()
    }

    /// Kind registered under `id`
    pub fn kind(&self, id: TypeId) -> ResourceKind {
        self.entry(id).kind
    }

    /// Structurally parses `bytes` as the kind registered under `id`
    pub fn parse(&self, id: TypeId, bytes: &[u8]) -> Result<Resource> {
        (self.entry(id).parser)(bytes)
    }

    /// Identifies `bytes` and describes the result
    pub fn info(&self, bytes: &[u8]) -> ResourceInfo {
        let type_id = self.identify(bytes);
        if self.kind(type_id) == ResourceKind::Buffer {
            return self.opaque_info(bytes);
        }

        ResourceInfo {
            size: self.decoded_size(type_id),
            type_id,
            magic: self.magic_number(type_id),
        }
    }

    /// Describes `bytes` as opaque data regardless of its tag
    pub fn opaque_info(&self, bytes: &[u8]) -> ResourceInfo {
        ResourceInfo {
            size: 0,
            type_id: self.buffer_id(),
            magic: bytes.get(..4).map(LittleEndian::read_u32).unwrap_or_default(),
        }
    }

    /// Renders a magic number as four characters.
    ///
    /// With `flip` the bytes are rendered in little endian order. Anything outside
    /// `[A-Za-z0-9]` is shown as `?`.
    pub fn tag_name(magic: u32, flip: bool) -> String {
        let mut bytes = magic.to_be_bytes();
        if flip {
            bytes.reverse();
        }

        bytes
            .iter()
            .map(|&b| {
                if b.is_ascii_alphanumeric() {
                    b as char
                } else {
                    '?'
                }
            })
            .collect()
    }
}

/// Identification result for one resource
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceInfo {
    /// Size of the kind's fixed header record
    pub size: usize,

    /// Kind in the [`TypeRegistry::global`] table
    pub type_id: TypeId,

    /// Registered magic number, or the leading four bytes of opaque data
    pub magic: u32,
}

impl ResourceInfo {
    /// Kind in the [`TypeRegistry::global`] table
    pub fn kind(&self) -> ResourceKind {
        TypeRegistry::global().kind(self.type_id)
    }

    /// Four character tag used to name objects of this resource
    pub fn tag(&self) -> String {
        TypeRegistry::tag_name(self.magic, self.kind() == ResourceKind::Buffer)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::registry::{ResourceKind, TypeId, TypeRegistry};

    fn padded(lead: &[u8], len: usize) -> Vec<u8> {
        let mut bytes = lead.to_vec();
        bytes.resize(len, 0);
        bytes
    }

    #[traced_test]
    #[test]
    fn identify_both_byte_orders() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.identify(&padded(b"RLCN", 0x28)), TypeId(0));
        assert_eq!(registry.identify(&padded(b"NCLR", 0x28)), TypeId(0));
        assert_eq!(registry.identify(&padded(b"NARC", 0x1C)), TypeId(3));
        assert_eq!(
            registry.kind(registry.identify(&padded(b"RCSN", 0x24))),
            ResourceKind::Tilemap
        );
    }

    #[traced_test]
    #[test]
    fn unknown_or_short_data_is_opaque() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.identify(b"????"), registry.buffer_id());
        assert_eq!(registry.identify(b"NA"), registry.buffer_id());
        // Tag matches but the header record doesn't fit
        assert_eq!(registry.identify(&padded(b"RGCN", 0x20)), registry.buffer_id());
        assert_eq!(registry.kind(registry.buffer_id()), ResourceKind::Buffer);
    }

    #[traced_test]
    #[test]
    fn sizes_and_magic_numbers() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.max_resource_size(), 0x30);
        assert_eq!(registry.decoded_size(TypeId(2)), 0x24);
        assert_eq!(registry.magic_number(TypeId(3)), 0x4E41_5243);
        assert_eq!(registry.magic_number(registry.buffer_id()), 0);
    }

    #[traced_test]
    #[test]
    fn tag_names() {
        assert_eq!(TypeRegistry::tag_name(0x4E43_4C52, false), "NCLR");
        assert_eq!(TypeRegistry::tag_name(0x4E43_4C52, true), "RLCN");
        assert_eq!(TypeRegistry::tag_name(0x0041_2D7A, false), "?A?z");
    }

    #[traced_test]
    #[test]
    fn opaque_info_keeps_leading_bytes() {
        let info = TypeRegistry::global().info(b"BMD0 and more");
        assert_eq!(info.kind(), ResourceKind::Buffer);
        assert_eq!(info.size, 0);
        assert_eq!(info.tag(), "BMD0");

        let info = TypeRegistry::global().info(&padded(b"RLCN", 0x28));
        assert_eq!(info.tag(), "NCLR");
    }
}
