//! C5 — reader/writer for the single-module binary container (spec §3, §4.1, §6).
//!
//! Layout: header {magic `SWMO`, version, flags, section-count, timestamp,
//! CRC32 with the checksum field zeroed during computation}, an ordered
//! section-header table {type, size, absolute offset}, then payloads.
//!
//! Bit-exact per spec §6: magic `0x53574D4F`, version `1`, section types
//! Metadata=0x02 Exports=0x03 Imports=0x04 Bytecode=0x05 Debug=0x06
//! Natives=0x07 Constants=0x08 End=0xFF, CRC32-IEEE over the file with
//! the checksum field zeroed, little-endian integers throughout.

use crate::module_system::error::{ModuleError, Result};
use std::io::{Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: u32 = 0x5357_4D4F;
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8 + 4; // magic,version,flags,section_count,timestamp,crc
const CHECKSUM_OFFSET: usize = 4 + 2 + 2 + 4 + 8;
const SECTION_HEADER_LEN: usize = 1 + 8 + 8; // type, size, offset

/// A module-format section type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Module name/version.
    Metadata,
    /// Export descriptors.
    Exports,
    /// Import descriptors.
    Imports,
    /// Compiled bytecode (`BCDS`-serialized [`crate::bytecode::Chunk`]).
    Bytecode,
    /// Debug info (line tables, source map). Opaque payload.
    Debug,
    /// Native-binding descriptors.
    Natives,
    /// Constant pool, if stored separately from Bytecode.
    Constants,
    /// Terminator; readers may stop once they see it.
    End,
    /// Any section type this reader does not recognize; skipped.
    Unknown(u8),
}

impl SectionType {
    fn to_byte(self) -> u8 {
        match self {
            SectionType::Metadata => 0x02,
            SectionType::Exports => 0x03,
            SectionType::Imports => 0x04,
            SectionType::Bytecode => 0x05,
            SectionType::Debug => 0x06,
            SectionType::Natives => 0x07,
            SectionType::Constants => 0x08,
            SectionType::End => 0xFF,
            SectionType::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> SectionType {
        match b {
            0x02 => SectionType::Metadata,
            0x03 => SectionType::Exports,
            0x04 => SectionType::Imports,
            0x05 => SectionType::Bytecode,
            0x06 => SectionType::Debug,
            0x07 => SectionType::Natives,
            0x08 => SectionType::Constants,
            0xFF => SectionType::End,
            other => SectionType::Unknown(other),
        }
    }
}

struct RawSection {
    ty: SectionType,
    payload: Vec<u8>,
}

/// Export kind, as recorded in a Metadata/Exports section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// A callable.
    Function,
    /// A mutable binding.
    Variable,
    /// An immutable binding with a literal value.
    Constant,
    /// A class definition.
    Class,
    /// A struct definition.
    Struct,
    /// A trait/interface definition.
    Trait,
}

impl ExportKind {
    fn to_byte(self) -> u8 {
        match self {
            ExportKind::Function => 0,
            ExportKind::Variable => 1,
            ExportKind::Constant => 2,
            ExportKind::Class => 3,
            ExportKind::Struct => 4,
            ExportKind::Trait => 5,
        }
    }

    fn from_byte(b: u8) -> Result<ExportKind> {
        Ok(match b {
            0 => ExportKind::Function,
            1 => ExportKind::Variable,
            2 => ExportKind::Constant,
            3 => ExportKind::Class,
            4 => ExportKind::Struct,
            5 => ExportKind::Trait,
            other => return Err(ModuleError::Corrupt(format!("unknown export kind {other}"))),
        })
    }
}

/// One export descriptor, as recorded in the Exports section.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    /// Exported name.
    pub name: String,
    /// Export kind.
    pub kind: ExportKind,
    /// Byte offset of this export's definition within the Bytecode
    /// section, for functions.
    pub bytecode_offset: u32,
    /// A human-readable type signature, e.g. `()->Int`.
    pub signature: String,
}

/// One import descriptor, as recorded in the Imports section.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    /// The module being imported from.
    pub module: String,
    /// The imported name.
    pub name: String,
    /// A local alias, if renamed on import.
    pub alias: Option<String>,
}

/// One native-binding descriptor: exported name -> native symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeBinding {
    /// The script-visible export name.
    pub export_name: String,
    /// The native (C ABI) symbol to resolve at load time.
    pub native_symbol: String,
    /// A human-readable type signature.
    pub signature: String,
}

/// Builds a single-module binary container.
///
/// Every `add_*` call appends exactly one section; sections are never
/// coalesced. Call [`ModuleWriter::finalize`] once all sections have
/// been added.
#[derive(Default)]
pub struct ModuleWriter {
    sections: Vec<RawSection>,
}

impl ModuleWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a Metadata section.
    pub fn add_metadata(&mut self, name: &str, version: &str) -> &mut Self {
        let mut payload = Vec::new();
        write_lp_string(&mut payload, name);
        write_lp_string(&mut payload, version);
        self.sections.push(RawSection {
            ty: SectionType::Metadata,
            payload,
        });
        self
    }

    /// Appends one Exports-section record. Each call appends a fresh
    /// one-entry section rather than coalescing into a prior one,
    /// matching the writer's no-coalescing contract.
    pub fn add_export(
        &mut self,
        name: &str,
        kind: ExportKind,
        bytecode_offset: u32,
        signature: &str,
    ) -> &mut Self {
        let mut payload = Vec::new();
        write_lp_string(&mut payload, name);
        payload.push(kind.to_byte());
        payload.extend_from_slice(&bytecode_offset.to_le_bytes());
        write_lp_string(&mut payload, signature);
        self.sections.push(RawSection {
            ty: SectionType::Exports,
            payload,
        });
        self
    }

    /// Appends one Imports-section record.
    pub fn add_import(&mut self, module: &str, name: &str, alias: Option<&str>) -> &mut Self {
        let mut payload = Vec::new();
        write_lp_string(&mut payload, module);
        write_lp_string(&mut payload, name);
        write_lp_string(&mut payload, alias.unwrap_or(""));
        self.sections.push(RawSection {
            ty: SectionType::Imports,
            payload,
        });
        self
    }

    /// Appends a Bytecode section containing raw `BCDS`-serialized bytes.
    pub fn add_bytecode(&mut self, bytes: &[u8]) -> &mut Self {
        self.sections.push(RawSection {
            ty: SectionType::Bytecode,
            payload: bytes.to_vec(),
        });
        self
    }

    /// Appends a Natives-section record binding an export to a native
    /// symbol.
    pub fn add_native_binding(
        &mut self,
        export_name: &str,
        native_symbol: &str,
        signature: &str,
    ) -> &mut Self {
        let mut payload = Vec::new();
        write_lp_string(&mut payload, export_name);
        write_lp_string(&mut payload, native_symbol);
        write_lp_string(&mut payload, signature);
        self.sections.push(RawSection {
            ty: SectionType::Natives,
            payload,
        });
        self
    }

    /// Writes the header, the section-header table, then the payloads,
    /// and patches in the CRC32 computed with the checksum field zeroed.
    pub fn finalize(&mut self) -> Vec<u8> {
        self.sections.push(RawSection {
            ty: SectionType::End,
            payload: Vec::new(),
        });

        let section_count = self.sections.len();
        let table_offset = HEADER_LEN;
        let payloads_offset = table_offset + section_count * SECTION_HEADER_LEN;

        let mut out = vec![0u8; payloads_offset];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[6..8].copy_from_slice(&0u16.to_le_bytes()); // flags
        out[8..12].copy_from_slice(&(section_count as u32).to_le_bytes());
        out[12..20].copy_from_slice(&now_secs().to_le_bytes());
        // checksum bytes [20..24] stay zero for now.

        let mut offset = payloads_offset;
        for (i, section) in self.sections.iter().enumerate() {
            let header_at = table_offset + i * SECTION_HEADER_LEN;
            out[header_at] = section.ty.to_byte();
            out[header_at + 1..header_at + 9]
                .copy_from_slice(&(section.payload.len() as u64).to_le_bytes());
            out[header_at + 9..header_at + 17].copy_from_slice(&(offset as u64).to_le_bytes());
            out.extend_from_slice(&section.payload);
            offset += section.payload.len();
        }

        let crc = crc32fast::hash(&out);
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn write_lp_string(out: &mut Vec<u8>, s: &str) {
    // u32 length including the trailing NUL, followed by the bytes
    // (NUL included), per spec §4.1's wire convention.
    let len = s.len() as u32 + 1;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn read_lp_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut len_buf = [0u8; 4];
    cursor
        .read_exact(&mut len_buf)
        .map_err(|_| ModuleError::Truncated("string length".into()))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ModuleError::Corrupt("zero-length length-prefixed string".into()));
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ModuleError::Truncated("string bytes".into()))?;
    buf.pop(); // trailing NUL
    String::from_utf8(buf).map_err(|_| ModuleError::Corrupt("string is not UTF-8".into()))
}

/// A parsed single-module binary container.
#[derive(Debug)]
pub struct ModuleReader {
    metadata_name: Option<String>,
    metadata_version: Option<String>,
    exports: Vec<ExportRecord>,
    imports: Vec<ImportRecord>,
    natives: Vec<NativeBinding>,
    bytecode: Vec<u8>,
    raw: Vec<u8>,
}

impl ModuleReader {
    /// Parses `bytes` as a module-format container.
    pub fn parse(bytes: &[u8]) -> Result<ModuleReader> {
        if bytes.len() < HEADER_LEN {
            return Err(ModuleError::Truncated("header".into()));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(ModuleError::InvalidFormat("bad magic".into()));
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }
        let section_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;

        let table_offset = HEADER_LEN;
        let table_end = table_offset + section_count * SECTION_HEADER_LEN;
        if bytes.len() < table_end {
            return Err(ModuleError::Truncated("section table".into()));
        }

        let mut reader = ModuleReader {
            metadata_name: None,
            metadata_version: None,
            exports: Vec::new(),
            imports: Vec::new(),
            natives: Vec::new(),
            bytecode: Vec::new(),
            raw: bytes.to_vec(),
        };

        for i in 0..section_count {
            let header_at = table_offset + i * SECTION_HEADER_LEN;
            let ty = SectionType::from_byte(bytes[header_at]);
            let size =
                u64::from_le_bytes(bytes[header_at + 1..header_at + 9].try_into().unwrap())
                    as usize;
            let offset =
                u64::from_le_bytes(bytes[header_at + 9..header_at + 17].try_into().unwrap())
                    as usize;
            if offset + size > bytes.len() {
                return Err(ModuleError::Truncated(format!("section {i} payload")));
            }
            let payload = &bytes[offset..offset + size];
            reader.parse_section(ty, payload)?;
        }

        Ok(reader)
    }

    fn parse_section(&mut self, ty: SectionType, payload: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(payload);
        match ty {
            SectionType::Metadata => {
                self.metadata_name = Some(read_lp_string(&mut cursor)?);
                self.metadata_version = Some(read_lp_string(&mut cursor)?);
            }
            SectionType::Exports => {
                let name = read_lp_string(&mut cursor)?;
                let mut kind_byte = [0u8; 1];
                cursor
                    .read_exact(&mut kind_byte)
                    .map_err(|_| ModuleError::Truncated("export kind".into()))?;
                let kind = ExportKind::from_byte(kind_byte[0])?;
                let mut offset_buf = [0u8; 4];
                cursor
                    .read_exact(&mut offset_buf)
                    .map_err(|_| ModuleError::Truncated("export offset".into()))?;
                let bytecode_offset = u32::from_le_bytes(offset_buf);
                let signature = read_lp_string(&mut cursor)?;
                self.exports.push(ExportRecord {
                    name,
                    kind,
                    bytecode_offset,
                    signature,
                });
            }
            SectionType::Imports => {
                let module = read_lp_string(&mut cursor)?;
                let name = read_lp_string(&mut cursor)?;
                let alias = read_lp_string(&mut cursor)?;
                self.imports.push(ImportRecord {
                    module,
                    name,
                    alias: if alias.is_empty() { None } else { Some(alias) },
                });
            }
            SectionType::Bytecode => {
                self.bytecode = payload.to_vec();
            }
            SectionType::Natives => {
                let export_name = read_lp_string(&mut cursor)?;
                let native_symbol = read_lp_string(&mut cursor)?;
                let signature = read_lp_string(&mut cursor)?;
                self.natives.push(NativeBinding {
                    export_name,
                    native_symbol,
                    signature,
                });
            }
            // Debug, Constants, End, and any unrecognized section type
            // are skipped — unknown sections are self-describing via
            // the section-header table and require no interpretation.
            SectionType::Debug | SectionType::Constants | SectionType::End | SectionType::Unknown(_) => {}
        }
        Ok(())
    }

    /// The module name recorded in the Metadata section.
    pub fn name(&self) -> Option<&str> {
        self.metadata_name.as_deref()
    }

    /// The version recorded in the Metadata section.
    pub fn version(&self) -> Option<&str> {
        self.metadata_version.as_deref()
    }

    /// The number of export records.
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    /// Returns the export record at `index`, in definition order.
    pub fn get_export(&self, index: usize) -> Option<&ExportRecord> {
        self.exports.get(index)
    }

    /// All import records, in definition order.
    pub fn imports(&self) -> &[ImportRecord] {
        &self.imports
    }

    /// All native-binding records.
    pub fn natives(&self) -> &[NativeBinding] {
        &self.natives
    }

    /// The raw bytecode-section bytes (a `BCDS`-serialized chunk).
    pub fn get_bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Re-reads the file, zeros the checksum field in memory, recomputes
    /// CRC32, and compares against the stored value.
    pub fn verify(&self) -> bool {
        if self.raw.len() < HEADER_LEN {
            return false;
        }
        let stored =
            u32::from_le_bytes(self.raw[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap());
        let mut copy = self.raw.clone();
        copy[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&[0, 0, 0, 0]);
        crc32fast::hash(&copy) == stored
    }
}
