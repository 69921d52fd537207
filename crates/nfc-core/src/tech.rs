//! RF technology identifiers, technology sets, and discovery bit masks.

use serde::{Deserialize, Serialize};

/// Technology discriminator for a discovered endpoint.
///
/// Values match the host-side technology constants used across the
/// stack, so they can travel through logs and dumps unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Technology {
    NfcA = 1,
    NfcB = 2,
    IsoDep = 3,
    NfcF = 4,
    NfcV = 5,
    Ndef = 6,
    NdefFormatable = 7,
    MifareClassic = 8,
    MifareUltralight = 9,
    NfcBarcode = 10,
}

impl Technology {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NfcA),
            2 => Some(Self::NfcB),
            3 => Some(Self::IsoDep),
            4 => Some(Self::NfcF),
            5 => Some(Self::NfcV),
            6 => Some(Self::Ndef),
            7 => Some(Self::NdefFormatable),
            8 => Some(Self::MifareClassic),
            9 => Some(Self::MifareUltralight),
            10 => Some(Self::NfcBarcode),
            _ => None,
        }
    }

    /// Whether a tag reached over this technology can ever be
    /// NDEF-formatted. Barcode and ISO-DEP-only tags cannot.
    pub fn is_formattable(self) -> bool {
        matches!(
            self,
            Self::NfcA
                | Self::NfcF
                | Self::NfcV
                | Self::NdefFormatable
                | Self::MifareClassic
                | Self::MifareUltralight
        )
    }

    /// Whether an NDEF message on this technology can be locked down.
    pub fn can_make_read_only(self) -> bool {
        matches!(
            self,
            Self::Ndef | Self::NdefFormatable | Self::MifareClassic | Self::MifareUltralight
        )
    }
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NfcA => "NFC-A",
            Self::NfcB => "NFC-B",
            Self::IsoDep => "ISO-DEP",
            Self::NfcF => "NFC-F",
            Self::NfcV => "NFC-V",
            Self::Ndef => "NDEF",
            Self::NdefFormatable => "NDEF-FORMATABLE",
            Self::MifareClassic => "MIFARE-CLASSIC",
            Self::MifareUltralight => "MIFARE-UL",
            Self::NfcBarcode => "BARCODE",
        };
        f.write_str(name)
    }
}

/// Order-irrelevant set of technologies supported by one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechSet(Vec<Technology>);

impl TechSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, tech: Technology) {
        if !self.0.contains(&tech) {
            self.0.push(tech);
        }
    }

    pub fn remove(&mut self, tech: Technology) {
        self.0.retain(|t| *t != tech);
    }

    pub fn contains(&self, tech: Technology) -> bool {
        self.0.contains(&tech)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Technology> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Technology> for TechSet {
    fn from_iter<I: IntoIterator<Item = Technology>>(iter: I) -> Self {
        let mut set = Self::new();
        for tech in iter {
            set.insert(tech);
        }
        set
    }
}

impl std::fmt::Display for TechSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for tech in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{tech}")?;
            first = false;
        }
        Ok(())
    }
}

/// Bit mask of RF technologies for poll/listen configuration.
pub type TechMask = u32;

pub mod tech_mask {
    use super::TechMask;

    pub const NONE: TechMask = 0;
    pub const A: TechMask = 0x01;
    pub const B: TechMask = 0x02;
    pub const F: TechMask = 0x04;
    pub const V: TechMask = 0x08;
    pub const ACTIVE: TechMask = 0x10;
}

/// Role negotiated for a peer-to-peer link, fixed at discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMode {
    Initiator,
    Target,
}
