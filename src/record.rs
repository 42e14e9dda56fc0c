/*!
    identity record stored in the EEPROM of every module

    The record is a fixed 256 bytes structure, big-endian, protected by a CRC32 over everything but the checksum itself. Its upper half is the factory-locked part of the 24AA02E48 memory: a read-only pad of `0xff` followed by the EUI-48 of the board.

    | offset | size | field |
    |--------|------|-------|
    | 0      | 4    | CRC32 of bytes `4 .. 256` |
    | 4      | 2    | [MAGIC] |
    | 6      | 10   | board name |
    | 16     | 2    | board id, see [Board] |
    | 18     | 6    | data revision, major, minor, variant, port, vendor id |
    | 24     | 8    | vendor data |
    | 32     | 16   | project data |
    | 48     | 16   | user data |
    | 64     | 64   | board data |
    | 128    | 122  | read-only pad |
    | 250    | 6    | EUI-48 |

    records are plain values: modifying one means building a new one with the `with_*` methods, then encoding it again.
*/

use core::{fmt, str::FromStr};
use crc::{Crc, CRC_32_ISO_HDLC};
use packbytes::{FromBytes, ToBytes};
use thiserror::Error;
use log::*;


/// size of an encoded record
pub const RECORD_SIZE: usize = 256;
/// constant identifying a record
pub const MAGIC: u16 = 0x391e;
/// fill byte of the read-only pad
pub const PAD: u8 = 0xff;
/// first byte covered by the checksum
const CHECKSUMMED: usize = 4;
/// maximum length of the board name
pub const NAME_SIZE: usize = 10;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// human readable board name, as stored in the record
pub type Name = heapless::String<NAME_SIZE>;


/// exact memory layout of a record
#[derive(Clone, FromBytes, ToBytes, Debug)]
struct Layout {
    checksum: u32,
    magic: u16,
    name: [u8; 10],
    board: u16,
    data_rev: u8,
    major: u8,
    minor: u8,
    variant: u8,
    port: u8,
    vendor: u8,
    vendor_data: [u8; 8],
    project_data: [u8; 16],
    user_data: [u8; 16],
    board_data: [u8; 64],
    pad: [u8; 122],
    eui48: [u8; 6],
}

/// how much to trust the data being decoded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// reject any record with bad magic, pad or checksum
    Strict,
    /// only warn about bad magic, pad or checksum, for inspecting foreign or corrupted memories
    Lenient,
}

/// error raised by record encoding, decoding and catalogue lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record must be 256 bytes long, got {0}")]
    Length(usize),
    #[error("invalid magic {0:#06x}")]
    BadMagic(u16),
    #[error("unexpected data in read-only pad")]
    BadPad,
    #[error("checksum mismatch, stored {stored:#010x} computed {computed:#010x}")]
    BadChecksum {stored: u32, computed: u32},
    #[error("board name is not text or longer than 10 bytes")]
    Name,
    #[error("unknown board id {0}")]
    UnknownBoard(u16),
    #[error("unknown vendor id {0}")]
    UnknownVendor(u8),
    #[error("unknown variant for this board")]
    UnknownVariant,
    #[error("malformed EUI-48")]
    Eui48,
    #[error("malformed hardware revision")]
    HwRev,
    #[error("board data too long")]
    BoardData,
}


/// content of an identity record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// board name, usually the board label
    pub name: Name,
    /// board id, index in [Board]
    pub board: u16,
    /// revision of the record data format
    pub data_rev: u8,
    /// hardware major revision
    pub major: u8,
    /// hardware minor revision
    pub minor: u8,
    /// index in the board's variants list
    pub variant: u8,
    /// index of the board in a multi-board module
    pub port: u8,
    /// vendor id, index in [Vendor]
    pub vendor: u8,
    /// vendor reserved: serial number or anything else
    pub vendor_data: [u8; 8],
    /// project reserved
    pub project_data: [u8; 16],
    /// user reserved
    pub user_data: [u8; 16],
    /// board specific data
    pub board_data: [u8; 64],
    /// globally unique hardware address
    pub eui48: Eui48,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            name: truncated(Board::Invalid.label()),
            board: 0,
            data_rev: 0,
            major: 0,
            minor: 0,
            variant: 0,
            port: 0,
            vendor: 0,
            vendor_data: [0xff; 8],
            project_data: [0xff; 16],
            user_data: [0xff; 16],
            board_data: [0xff; 64],
            eui48: Eui48::UNSET,
        }
    }
}

impl Record {
    /// default record for the given board and hardware revision, named after the board
    pub fn new(board: Board, major: u8, minor: u8) -> Self {
        Self {
            name: truncated(board.label()),
            board: board.index(),
            major,
            minor,
            .. Default::default()
        }
    }

    /// serialize to the memory layout, computing the checksum
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut name = [0u8; NAME_SIZE];
        name[.. self.name.len()].copy_from_slice(self.name.as_bytes());
        let layout = Layout {
            checksum: 0,
            magic: MAGIC,
            name,
            board: self.board,
            data_rev: self.data_rev,
            major: self.major,
            minor: self.minor,
            variant: self.variant,
            port: self.port,
            vendor: self.vendor,
            vendor_data: self.vendor_data,
            project_data: self.project_data,
            user_data: self.user_data,
            board_data: self.board_data,
            pad: [PAD; 122],
            eui48: self.eui48.0,
        };
        let mut data: [u8; RECORD_SIZE] = layout.to_be_bytes();
        let checksum = CRC32.checksum(&data[CHECKSUMMED ..]);
        data[.. CHECKSUMMED].copy_from_slice(&checksum.to_be_bytes());
        data
    }

    /**
        deserialize from the memory layout

        checks are done in order magic, pad, checksum, so the first deviating part is reported. In [Validation::Lenient] they only produce warnings.
    */
    pub fn decode(data: &[u8], validation: Validation) -> Result<Self, RecordError> {
        let data: [u8; RECORD_SIZE] = data.try_into()
            .map_err(|_| RecordError::Length(data.len()))?;
        let layout = Layout::from_be_bytes(data);
        let strict = validation == Validation::Strict;

        if layout.magic != MAGIC {
            if strict {return Err(RecordError::BadMagic(layout.magic))}
            warn!("invalid magic {:#06x}", layout.magic);
        }
        if layout.pad.iter().any(|&byte| byte != PAD) {
            if strict {return Err(RecordError::BadPad)}
            warn!("unexpected data in read-only pad");
        }
        let computed = CRC32.checksum(&data[CHECKSUMMED ..]);
        if computed != layout.checksum {
            if strict {return Err(RecordError::BadChecksum {stored: layout.checksum, computed})}
            warn!("invalid checksum {:#010x}, expected {:#010x}", layout.checksum, computed);
        }

        let end = layout.name.iter()
            .rposition(|&byte| byte != 0x00 && byte != 0xff)
            .map_or(0, |last| last+1);
        let name = core::str::from_utf8(&layout.name[.. end])
            .map_err(|_| RecordError::Name)?;

        Ok(Self {
            name: Name::try_from(name).map_err(|_| RecordError::Name)?,
            board: layout.board,
            data_rev: layout.data_rev,
            major: layout.major,
            minor: layout.minor,
            variant: layout.variant,
            port: layout.port,
            vendor: layout.vendor,
            vendor_data: layout.vendor_data,
            project_data: layout.project_data,
            user_data: layout.user_data,
            board_data: layout.board_data,
            eui48: Eui48(layout.eui48),
        })
    }

    /// same record with an other hardware address
    pub fn with_eui48(self, eui48: Eui48) -> Self {
        Self {eui48, .. self}
    }
    /// same record with an other name, fails if it does not fit
    pub fn with_name(self, name: &str) -> Result<Self, RecordError> {
        Ok(Self {name: Name::try_from(name).map_err(|_| RecordError::Name)?, .. self})
    }
    /// same record with an other vendor
    pub fn with_vendor(self, vendor: Vendor) -> Self {
        Self {vendor: vendor.index(), .. self}
    }
    /// same record with an other port index
    pub fn with_port(self, port: u8) -> Self {
        Self {port, .. self}
    }
    /// same record with the variant of given name, which must exist for this board
    pub fn with_variant(self, variant: &str) -> Result<Self, RecordError> {
        let variants = self.board()?.variants();
        let index = variants.iter()
            .position(|v| v.eq_ignore_ascii_case(variant))
            .ok_or(RecordError::UnknownVariant)?;
        Ok(Self {variant: index as u8, .. self})
    }
    /// same record with given board data
    pub fn with_board_data(self, board_data: [u8; 64]) -> Self {
        Self {board_data, .. self}
    }
    /**
        same record with the opaque data blocks (vendor, project, user, board) copied from `old`

        this is what should be used when rewriting the identity of a board that already carries data from other parties
    */
    pub fn preserving_data(self, old: &Record) -> Self {
        Self {
            vendor_data: old.vendor_data,
            project_data: old.project_data,
            user_data: old.user_data,
            board_data: old.board_data,
            .. self
        }
    }

    /// board from the catalogue
    pub fn board(&self) -> Result<Board, RecordError> {
        Board::from_index(self.board).ok_or(RecordError::UnknownBoard(self.board))
    }
    /// vendor from the catalogue
    pub fn vendor(&self) -> Result<Vendor, RecordError> {
        Vendor::from_index(self.vendor).ok_or(RecordError::UnknownVendor(self.vendor))
    }
    /// variant name, if the board has variants
    pub fn variant_name(&self) -> Option<&'static str> {
        self.board().ok()?.variants().get(usize::from(self.variant)).copied()
    }
    pub fn hw_rev(&self) -> HwRev {
        HwRev {major: self.major, minor: self.minor}
    }
    /// full board designation, like `Urukul-AD9910/v1.1`
    pub fn title(&self) -> Title<'_> {
        Title(self)
    }
    /// hardware revision of an Almazny mezzanine, stored in the last two bytes of a Mirny board data
    pub fn almazny_hw_rev(&self) -> Option<HwRev> {
        if self.board != Board::Mirny.index() || self.variant_name() != Some("Almazny")
            {return None}
        Some(HwRev {major: self.board_data[62], minor: self.board_data[63]})
    }
}

/// board data for a Mirny carrying an Almazny mezzanine: given data padded, then the mezzanine revision
pub fn almazny_board_data(revision: HwRev, data: &[u8]) -> Result<[u8; 64], RecordError> {
    let mut board_data = [0xff; 64];
    if data.len() > 62
        {return Err(RecordError::BoardData)}
    board_data[.. data.len()].copy_from_slice(data);
    board_data[62] = revision.major;
    board_data[63] = revision.minor;
    Ok(board_data)
}

fn truncated(label: &str) -> Name {
    let mut name = Name::new();
    for c in label.chars() {
        if name.push(c).is_err() {break}
    }
    name
}

/// display helper for [Record::title]
pub struct Title<'r>(&'r Record);
impl fmt::Display for Title<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.board() {
            Ok(board) => write!(f, "{}", board)?,
            Err(_) => write!(f, "{}", self.0.name)?,
        }
        if let Some(variant) = self.0.variant_name() {
            write!(f, "-{}", variant)?;
        }
        write!(f, "/{}", self.0.hw_rev())
    }
}


/// hardware revision, displayed as `v1.1`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HwRev {
    pub major: u8,
    pub minor: u8,
}
impl fmt::Display for HwRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}
impl FromStr for HwRev {
    type Err = RecordError;
    /// accepts `v1.1`, `1.1`, and ignores anything after a second dot like in `v1.1.2`
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let text = text.strip_prefix('v').unwrap_or(text);
        let mut parts = text.splitn(3, '.');
        let mut next = || parts.next()
            .and_then(|part| part.parse::<u8>().ok())
            .ok_or(RecordError::HwRev);
        Ok(Self {major: next()?, minor: next()?})
    }
}


/// EUI-48 hardware address, displayed as `aa-bb-cc-dd-ee-ff`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eui48(pub [u8; 6]);
impl Eui48 {
    /// value of an erased memory
    pub const UNSET: Self = Self([0xff; 6]);
}
impl fmt::Display for Eui48 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}", a, b, c, d, e, g)
    }
}
/// compact form without separators, as used in labels and urls
impl fmt::LowerHex for Eui48 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
impl FromStr for Eui48 {
    type Err = RecordError;
    /// accepts `-` or `:` separated octets
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut eui48 = [0; 6];
        let mut octets = text.trim().split(['-', ':']);
        for byte in eui48.iter_mut() {
            let octet = octets.next().ok_or(RecordError::Eui48)?;
            if octet.len() != 2
                {return Err(RecordError::Eui48)}
            *byte = u8::from_str_radix(octet, 16).map_err(|_| RecordError::Eui48)?;
        }
        if octets.next().is_some()
            {return Err(RecordError::Eui48)}
        Ok(Self(eui48))
    }
}


/**
    define a closed catalogue of labels, indexed by their position

    new entries must always be appended at the end, as indexes are stored in memories
*/
macro_rules! catalogue {
    ($(#[$meta:meta])* $name:ident: $index:ty {$($entry:ident = $label:literal),* $(,)?}) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($entry),*
        }
        impl $name {
            /// every entry, in index order
            pub const ALL: &'static [Self] = &[$(Self::$entry),*];

            /// index stored in records
            pub const fn index(self) -> $index {self as $index}
            /// entry at given index, if any
            pub fn from_index(index: $index) -> Option<Self> {
                Self::ALL.get(usize::from(index)).copied()
            }
            /// label of the entry, as printed on boards
            pub const fn label(self) -> &'static str {
                match self {
                    $(Self::$entry => $label),*
                }
            }
            /// entry of given label, case insensitive
            pub fn from_label(label: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|entry| entry.label().eq_ignore_ascii_case(label))
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

catalogue! {
    /**
        known boards

        Identifiers are the positions in this list, `Kasli_soc` being 24 and `Driver` 25.
        Beware that an older deployment tool merged `Kasli_soc` and `Driver` into a single entry, so memories it programmed store every board after them one lower: its Thermostat (25), Thermostat-EEM (26), Pounder (27) and EEM_FMC_Carrier (28) decode here as Driver, Thermostat, Thermostat-EEM and Pounder.
    */
    Board: u16 {
        Invalid = "invalid",
        VhdciCarrier = "VHDCI_Carrier",
        SaymaRtm = "Sayma_RTM",
        SaymaAmc = "Sayma_AMC",
        Metlino = "Metlino",
        Kasli = "Kasli",
        DioBnc = "DIO_BNC",
        DioSma = "DIO_SMA",
        DioRj45 = "DIO_RJ45",
        Urukul = "Urukul",
        Zotino = "Zotino",
        Novogorny = "Novogorny",
        Sampler = "Sampler",
        Grabber = "Grabber",
        Mirny = "Mirny",
        Banker = "Banker",
        Humpback = "Humpback",
        Stabilizer = "Stabilizer",
        Fastino = "Fastino",
        Phaser = "Phaser",
        Clocker = "Clocker",
        Booster = "Booster",
        BoosterChannel = "Booster_Channel",
        DioMcx = "DIO_MCX",
        KasliSoc = "Kasli_soc",
        Driver = "Driver",
        Thermostat = "Thermostat",
        ThermostatEem = "Thermostat-EEM",
        Pounder = "Pounder",
        EemFmcCarrier = "EEM_FMC_Carrier",
    }
}

catalogue! {
    /// known vendors
    Vendor: u8 {
        Invalid = "invalid",
        Technosystem = "Technosystem",
        Creotech = "Creotech",
        Quartiq = "QUARTIQ",
    }
}

impl Board {
    /// names of the board variants, in index order
    pub fn variants(self) -> &'static [&'static str] {
        match self {
            Board::Urukul => &["AD9910", "AD9912"],
            Board::Phaser => &["Baseband", "Upconverter"],
            Board::Mirny => &["Base", "Almazny"],
            _ => &[],
        }
    }
    /// short functional description
    pub fn description(self) -> Option<&'static str> {
        Some(match self {
            Board::Kasli => "8/12 EEM A7 FPGA",
            Board::DioBnc => "8x iso BNC IO",
            Board::DioSma => "8x iso SMA IO",
            Board::DioRj45 => "16x LVDS RJ45 IO",
            Board::Urukul => "4x 1GS/s DDS",
            Board::Zotino => "32x 1MS/s 16b DAC",
            Board::Novogorny => "8x 16b ADC",
            Board::Sampler => "8x 1.5MS/s 16b ADC",
            Board::Grabber => "CCD frame grabber",
            Board::Mirny => "4x 53-13600MHz PLL",
            Board::Banker => "128x IO+FPGA",
            Board::Humpback => "uC+FPGA carrier",
            Board::Stabilizer => "2x 16b ADC+DAC+uC",
            Board::Fastino => "32x 2MS/s 16b DAC",
            Board::Phaser => "2x RF DAC + LF ADC",
            Board::Clocker => "2x4 clock fan out",
            Board::Booster => "8x RF power amp",
            Board::BoosterChannel => "RFPA module",
            Board::DioMcx => "16x MCX IO",
            Board::KasliSoc => "12 EEM ZYNQ SoC",
            Board::Driver => "Current source",
            Board::Thermostat => "2x NTC-TEC",
            Board::ThermostatEem => "16x NTC, 4x TEC",
            Board::Pounder => "2x DDS Transceiver",
            Board::EemFmcCarrier => "A7 FMC carrier",
            _ => return None,
        })
    }
}
