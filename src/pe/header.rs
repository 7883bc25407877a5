//! DOS stub, NT signature, COFF file header, and the optional header — widened
//! in memory to a single PE32+-shaped representation regardless of which one
//! was on disk, per spec §4.2.

use super::util::*;
use nom::error::{context, ErrorKind};
use nom::{bytes::complete::tag, combinator::map_res, number::complete::*, sequence::tuple};
use std::convert::TryFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Machine {
    Unknown = 0,
    AMD64 = 0x8664,
    IA64 = 0x200,
    I386 = 0x14C,
    ARM64 = 0xAA64,
    ARM = 0x1C0,
}

impl TryFrom<u16> for Machine {
    type Error = u16;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            0 => Ok(Self::Unknown),
            0x8664 => Ok(Self::AMD64),
            0x200 => Ok(Self::IA64),
            0x14C => Ok(Self::I386),
            0xAA64 => Ok(Self::ARM64),
            0x1C0 => Ok(Self::ARM),
            _ => Err(n),
        }
    }
}

impl_parse_for_enum!(Machine, le_u16);

impl Machine {
    /// Whether this machine type implies a 64-bit (PE32+) image.
    pub fn is_64(self) -> bool {
        matches!(self, Machine::AMD64 | Machine::IA64 | Machine::ARM64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Subsystem {
    Unknown = 0,
    /// Device drivers and native Windows processes
    Native = 1,
    /// Windows GUI subsystem
    WindowsGui = 2,
    /// Windows character subsystem
    WindowsCui = 3,
    /// OS/2 character subsystem
    Os2Cui = 5,
    PosixCui = 7,
    /// Native Win9x driver
    NativeWindows = 8,
    /// Windows CE
    WindowsCeGui = 9,
    /// EFI application
    EfiApplication = 10,
    /// EFI driver with boot services
    EfiBootServiceDriver = 11,
    /// EFI driver with runtime services
    EfiRuntimeDriver = 12,
    /// EFI ROM Image
    EfiRom = 13,
    Xbox = 14,
    WindowsBootApplication = 16,
}

impl TryFrom<u16> for Subsystem {
    type Error = u16;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Native),
            2 => Ok(Self::WindowsGui),
            3 => Ok(Self::WindowsCui),
            5 => Ok(Self::Os2Cui),
            7 => Ok(Self::PosixCui),
            8 => Ok(Self::NativeWindows),
            9 => Ok(Self::WindowsCeGui),
            10 => Ok(Self::EfiApplication),
            11 => Ok(Self::EfiBootServiceDriver),
            12 => Ok(Self::EfiRuntimeDriver),
            13 => Ok(Self::EfiRom),
            14 => Ok(Self::Xbox),
            16 => Ok(Self::WindowsBootApplication),
            _ => Err(n),
        }
    }
}

impl_parse_for_enum!(Subsystem, le_u16);

/// The 16 well-known data-directory slots, in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum DirectoryIndex {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Security = 4,
    BaseRelocation = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImportDescriptor = 13,
    ComDescriptor = 14,
    Reserved = 15,
}

pub const NUM_DIRECTORIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }

    fn parse(i: Input) -> Result<Self> {
        let (i, (virtual_address, size)) = tuple((le_u32, le_u32))(i)?;
        Ok((
            i,
            Self {
                virtual_address,
                size,
            },
        ))
    }
}

/// All 16 directory entries. `NumberOfRvaAndSizes` on disk may be fewer than
/// 16 (older linkers); slots beyond it are left zeroed rather than read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDirectorySet {
    entries: [DataDirectory; NUM_DIRECTORIES],
}

impl DataDirectorySet {
    pub fn get(&self, idx: DirectoryIndex) -> DataDirectory {
        self.entries[idx as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, DataDirectory)> + '_ {
        self.entries.iter().copied().enumerate()
    }

    fn parse(i: Input, count: u32) -> Result<Self> {
        let count = (count as usize).min(NUM_DIRECTORIES);
        let mut entries = [DataDirectory::default(); NUM_DIRECTORIES];
        let mut rest = i;
        for slot in entries.iter_mut().take(count) {
            let (next, dir) = context("DataDirectory", DataDirectory::parse)(rest)?;
            *slot = dir;
            rest = next;
        }
        Ok((rest, Self { entries }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl FileHeader {
    fn parse(i: Input) -> Result<Self> {
        let (
            i,
            (
                machine,
                number_of_sections,
                time_date_stamp,
                pointer_to_symbol_table,
                number_of_symbols,
                size_of_optional_header,
                characteristics,
            ),
        ) = tuple((
            context("Machine", Machine::parse),
            context("NumberOfSections", le_u16),
            context("TimeDateStamp", le_u32),
            context("PointerToSymbolTable", le_u32),
            context("NumberOfSymbols", le_u32),
            context("SizeOfOptionalHeader", le_u16),
            context("Characteristics", le_u16),
        ))(i)?;
        Ok((
            i,
            Self {
                machine,
                number_of_sections,
                time_date_stamp,
                pointer_to_symbol_table,
                number_of_symbols,
                size_of_optional_header,
                characteristics,
            },
        ))
    }
}

/// `IMAGE_OPTIONAL_HEADER`, widened: PE32 (magic `0x10B`) fields are promoted
/// to the same u64 shape PE32+ (magic `0x20B`) uses, so downstream code never
/// branches on bitness again once this struct exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalHeader {
    pub is_64: bool,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    /// Present only in PE32; zero when widened from PE32+.
    pub base_of_data: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_os_version: u16,
    pub minor_os_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: DataDirectorySet,
}

const PE32_MAGIC: u16 = 0x10B;
const PE32PLUS_MAGIC: u16 = 0x20B;

impl OptionalHeader {
    fn parse(i: Input) -> Result<Self> {
        let (i, magic) = context(
            "OptionalHeaderMagic",
            map_res(le_u16, |m| match m {
                PE32_MAGIC | PE32PLUS_MAGIC => Ok(m),
                _ => Err(ErrorKind::Alt),
            }),
        )(i)?;
        if magic == PE32PLUS_MAGIC {
            Self::parse_pe32_plus(i)
        } else {
            Self::parse_pe32(i)
        }
    }

    fn parse_pe32(i: Input) -> Result<Self> {
        let (
            i,
            (
                major_linker_version,
                minor_linker_version,
                size_of_code,
                size_of_initialized_data,
                size_of_uninitialized_data,
                address_of_entry_point,
                base_of_code,
                base_of_data,
                image_base,
                section_alignment,
                file_alignment,
                major_os_version,
                minor_os_version,
                major_image_version,
                minor_image_version,
                major_subsystem_version,
                minor_subsystem_version,
                win32_version_value,
                size_of_image,
                size_of_headers,
                checksum,
                subsystem,
                dll_characteristics,
                size_of_stack_reserve,
                size_of_stack_commit,
                size_of_heap_reserve,
                size_of_heap_commit,
                loader_flags,
                number_of_rva_and_sizes,
            ),
        ) = tuple((
            context("MajorLinkerVersion", le_u8),
            context("MinorLinkerVersion", le_u8),
            context("SizeOfCode", le_u32),
            context("SizeOfInitializedData", le_u32),
            context("SizeOfUninitializedData", le_u32),
            context("AddressOfEntryPoint", le_u32),
            context("BaseOfCode", le_u32),
            context("BaseOfData", le_u32),
            context("ImageBase", le_u32),
            context("SectionAlignment", le_u32),
            context("FileAlignment", le_u32),
            context("MajorOperatingSystemVersion", le_u16),
            context("MinorOperatingSystemVersion", le_u16),
            context("MajorImageVersion", le_u16),
            context("MinorImageVersion", le_u16),
            context("MajorSubsystemVersion", le_u16),
            context("MinorSubsystemVersion", le_u16),
            context("Win32VersionValue", le_u32),
            context("SizeOfImage", le_u32),
            context("SizeOfHeaders", le_u32),
            context("CheckSum", le_u32),
            context("Subsystem", Subsystem::parse),
            context("DllCharacteristics", le_u16),
            context("SizeOfStackReserve", le_u32),
            context("SizeOfStackCommit", le_u32),
            context("SizeOfHeapReserve", le_u32),
            context("SizeOfHeapCommit", le_u32),
            context("LoaderFlags", le_u32),
            context("NumberOfRvaAndSizes", le_u32),
        ))(i)?;

        let (i, data_directories) = context("DataDirectories", |i| {
            DataDirectorySet::parse(i, number_of_rva_and_sizes)
        })(i)?;

        Ok((
            i,
            Self {
                is_64: false,
                major_linker_version,
                minor_linker_version,
                size_of_code,
                size_of_initialized_data,
                size_of_uninitialized_data,
                address_of_entry_point,
                base_of_code,
                base_of_data,
                image_base: image_base as u64,
                section_alignment,
                file_alignment,
                major_os_version,
                minor_os_version,
                major_image_version,
                minor_image_version,
                major_subsystem_version,
                minor_subsystem_version,
                win32_version_value,
                size_of_image,
                size_of_headers,
                checksum,
                subsystem,
                dll_characteristics,
                size_of_stack_reserve: size_of_stack_reserve as u64,
                size_of_stack_commit: size_of_stack_commit as u64,
                size_of_heap_reserve: size_of_heap_reserve as u64,
                size_of_heap_commit: size_of_heap_commit as u64,
                loader_flags,
                number_of_rva_and_sizes,
                data_directories,
            },
        ))
    }

    fn parse_pe32_plus(i: Input) -> Result<Self> {
        let (
            i,
            (
                major_linker_version,
                minor_linker_version,
                size_of_code,
                size_of_initialized_data,
                size_of_uninitialized_data,
                address_of_entry_point,
                base_of_code,
                image_base,
                section_alignment,
                file_alignment,
                major_os_version,
                minor_os_version,
                major_image_version,
                minor_image_version,
                major_subsystem_version,
                minor_subsystem_version,
                win32_version_value,
                size_of_image,
                size_of_headers,
                checksum,
                subsystem,
                dll_characteristics,
                size_of_stack_reserve,
                size_of_stack_commit,
                size_of_heap_reserve,
                size_of_heap_commit,
                loader_flags,
                number_of_rva_and_sizes,
            ),
        ) = tuple((
            context("MajorLinkerVersion", le_u8),
            context("MinorLinkerVersion", le_u8),
            context("SizeOfCode", le_u32),
            context("SizeOfInitializedData", le_u32),
            context("SizeOfUninitializedData", le_u32),
            context("AddressOfEntryPoint", le_u32),
            context("BaseOfCode", le_u32),
            context("ImageBase", le_u64),
            context("SectionAlignment", le_u32),
            context("FileAlignment", le_u32),
            context("MajorOperatingSystemVersion", le_u16),
            context("MinorOperatingSystemVersion", le_u16),
            context("MajorImageVersion", le_u16),
            context("MinorImageVersion", le_u16),
            context("MajorSubsystemVersion", le_u16),
            context("MinorSubsystemVersion", le_u16),
            context("Win32VersionValue", le_u32),
            context("SizeOfImage", le_u32),
            context("SizeOfHeaders", le_u32),
            context("CheckSum", le_u32),
            context("Subsystem", Subsystem::parse),
            context("DllCharacteristics", le_u16),
            context("SizeOfStackReserve", le_u64),
            context("SizeOfStackCommit", le_u64),
            context("SizeOfHeapReserve", le_u64),
            context("SizeOfHeapCommit", le_u64),
            context("LoaderFlags", le_u32),
            context("NumberOfRvaAndSizes", le_u32),
        ))(i)?;

        let (i, data_directories) = context("DataDirectories", |i| {
            DataDirectorySet::parse(i, number_of_rva_and_sizes)
        })(i)?;

        Ok((
            i,
            Self {
                is_64: true,
                major_linker_version,
                minor_linker_version,
                size_of_code,
                size_of_initialized_data,
                size_of_uninitialized_data,
                address_of_entry_point,
                base_of_code,
                base_of_data: 0,
                image_base,
                section_alignment,
                file_alignment,
                major_os_version,
                minor_os_version,
                major_image_version,
                minor_image_version,
                major_subsystem_version,
                minor_subsystem_version,
                win32_version_value,
                size_of_image,
                size_of_headers,
                checksum,
                subsystem,
                dll_characteristics,
                size_of_stack_reserve,
                size_of_stack_commit,
                size_of_heap_reserve,
                size_of_heap_commit,
                loader_flags,
                number_of_rva_and_sizes,
                data_directories,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtHeaders {
    pub file_header: FileHeader,
    pub optional_header: OptionalHeader,
}

impl NtHeaders {
    const PE_MAGIC: &'static [u8] = &[0x50, 0x45, 0x00, 0x00];

    /// Reads the DOS stub's `e_lfanew` at offset `0x3c`, seeks there, and
    /// parses `"PE\0\0"` + the COFF file header + the optional header.
    pub fn parse(i: Input) -> Result<Self> {
        let e_lfanew = u32::from_le_bytes([i[0x3c], i[0x3d], i[0x3e], i[0x3f]]) as usize;
        let (rest, (_, file_header, optional_header)) = tuple((
            context("PeSignature", tag(Self::PE_MAGIC)),
            context("FileHeader", FileHeader::parse),
            context("OptionalHeader", OptionalHeader::parse),
        ))(&i[e_lfanew..])?;
        Ok((
            rest,
            Self {
                file_header,
                optional_header,
            },
        ))
    }
}

/// Verifies the `'MZ'` DOS signature at the start of the file and returns the
/// `e_lfanew` field pointing at the NT headers.
pub fn dos_header_e_lfanew(i: Input) -> Result<u32> {
    let (i, _) = context("DosSignature", tag(&b"MZ"[..]))(i)?;
    Ok((i, u32::from_le_bytes([i[0x3a], i[0x3b], i[0x3c], i[0x3d]])))
}
