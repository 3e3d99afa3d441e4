//! Region mapping
//!
//! The organization is partitioned into a fixed set of geographic regions.
//! Each region has a canonical identifier (`utrecht`) used internally and in
//! query scoping, and a role name (`Regio_Utrecht`) issued by the identity
//! provider. The mapping is a bijection over the closed set below, with the
//! sentinel `all` <-> `Regio_All` covering every region.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Prefix shared by every region role name
pub const REGION_ROLE_PREFIX: &str = "Regio_";

/// Canonical id of the "all regions" sentinel
pub const ALL_REGIONS_ID: &str = "all";

/// Role name of the "all regions" sentinel
pub const ALL_REGIONS_ROLE: &str = "Regio_All";

/// A single geographic partition of the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Utrecht,
    Limburg,
    GroningenDrenthe,
    ZuidHolland,
    NoordHolland,
    Oost,
    BrabantZeeland,
    Friesland,
    Duitsland,
}

impl Region {
    /// Every region, in canonical order
    pub const ALL: [Region; 9] = [
        Region::Utrecht,
        Region::Limburg,
        Region::GroningenDrenthe,
        Region::ZuidHolland,
        Region::NoordHolland,
        Region::Oost,
        Region::BrabantZeeland,
        Region::Friesland,
        Region::Duitsland,
    ];

    /// Canonical identifier
    pub fn id(self) -> &'static str {
        match self {
            Region::Utrecht => "utrecht",
            Region::Limburg => "limburg",
            Region::GroningenDrenthe => "groningen_drenthe",
            Region::ZuidHolland => "zuid_holland",
            Region::NoordHolland => "noord_holland",
            Region::Oost => "oost",
            Region::BrabantZeeland => "brabant_zeeland",
            Region::Friesland => "friesland",
            Region::Duitsland => "duitsland",
        }
    }

    /// Role name issued by the identity provider
    pub fn role_name(self) -> &'static str {
        match self {
            Region::Utrecht => "Regio_Utrecht",
            Region::Limburg => "Regio_Limburg",
            Region::GroningenDrenthe => "Regio_Groningen/Drenthe",
            Region::ZuidHolland => "Regio_Zuid-Holland",
            Region::NoordHolland => "Regio_Noord-Holland",
            Region::Oost => "Regio_Oost",
            Region::BrabantZeeland => "Regio_Brabant/Zeeland",
            Region::Friesland => "Regio_Friesland",
            Region::Duitsland => "Regio_Duitsland",
        }
    }

    /// Human readable name, as stored on member records
    pub fn display_name(self) -> &'static str {
        &self.role_name()[REGION_ROLE_PREFIX.len()..]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Canonical region identifier or the `all` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionToken {
    /// Every region
    All,
    /// One specific region
    Region(Region),
}

impl RegionToken {
    /// Canonical identifier (`all` for the sentinel)
    pub fn id(self) -> &'static str {
        match self {
            RegionToken::All => ALL_REGIONS_ID,
            RegionToken::Region(region) => region.id(),
        }
    }

    /// Whether this token covers `region`
    pub fn covers(self, region: Region) -> bool {
        match self {
            RegionToken::All => true,
            RegionToken::Region(own) => own == region,
        }
    }
}

impl From<Region> for RegionToken {
    fn from(region: Region) -> Self {
        RegionToken::Region(region)
    }
}

impl fmt::Display for RegionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RegionToken {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegionMapper::parse_region(s).ok_or_else(|| AuthzError::InvalidRegion(s.to_string()))
    }
}

impl Serialize for RegionToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for RegionToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Regions a subject may scope queries to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessibleRegions {
    /// Unrestricted
    All,
    /// Exactly these regions (sorted, possibly empty)
    Regions(Vec<Region>),
}

impl AccessibleRegions {
    /// Whether `region` is accessible
    pub fn contains(&self, region: Region) -> bool {
        match self {
            AccessibleRegions::All => true,
            AccessibleRegions::Regions(regions) => regions.contains(&region),
        }
    }

    /// True when no region at all is accessible
    pub fn is_empty(&self) -> bool {
        matches!(self, AccessibleRegions::Regions(regions) if regions.is_empty())
    }
}

/// Bidirectional mapping between region tokens and region role names
pub struct RegionMapper;

impl RegionMapper {
    /// Role name for a region token
    pub fn to_role_name(token: RegionToken) -> &'static str {
        match token {
            RegionToken::All => ALL_REGIONS_ROLE,
            RegionToken::Region(region) => region.role_name(),
        }
    }

    /// Region token for a role name, `None` when the role is not a region role
    pub fn to_region_token(role_name: &str) -> Option<RegionToken> {
        if role_name == ALL_REGIONS_ROLE {
            return Some(RegionToken::All);
        }
        if !role_name.starts_with(REGION_ROLE_PREFIX) {
            return None;
        }
        Region::ALL
            .iter()
            .find(|region| region.role_name() == role_name)
            .map(|region| RegionToken::Region(*region))
    }

    /// Parse a canonical region identifier (`utrecht`, `all`)
    pub fn parse_region(id: &str) -> Option<RegionToken> {
        if id == ALL_REGIONS_ID {
            return Some(RegionToken::All);
        }
        Region::ALL
            .iter()
            .find(|region| region.id() == id)
            .map(|region| RegionToken::Region(*region))
    }

    /// Parse the region stored on a record
    ///
    /// Accepts a canonical id or a display name (`Noord-Holland`); display
    /// names compare case-insensitively. The sentinel is not a record region.
    pub fn parse_record_region(value: &str) -> Option<Region> {
        let value = value.trim();
        Region::ALL.iter().copied().find(|region| {
            region.id() == value || region.display_name().eq_ignore_ascii_case(value)
        })
    }
}
