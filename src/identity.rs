//! Board identity — decodes the firmware revision code into a structured
//! hardware description.
//!
//! The revision line in the platform info blob carries one of two encodings:
//!
//! * 6 hex digits ("new-style", boards from 2012 on): a packed bitfield —
//!   board revision, type code, processor, manufacturer and RAM size each
//!   occupy a fixed window counted from the low end of the 32-bit value.
//! * 4 hex digits ("old-style"): an opaque serial looked up in a fixed table
//!   of known boards. Codes not in the table fall back to a bare
//!   revision-3 record rather than an error.
//!
//! Anything else leaves every hardware field unset; callers treat absent
//! fields as Unknown.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::AppError;

// ── data model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Processor {
    #[serde(rename = "BCM2835")]
    Bcm2835,
    #[serde(rename = "BCM2836")]
    Bcm2836,
    #[serde(rename = "BCM2837")]
    Bcm2837,
    #[serde(rename = "BCM2711")]
    Bcm2711,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Manufacturer {
    #[serde(rename = "Sony US")]
    SonyUs,
    #[serde(rename = "Sony Japan")]
    SonyJapan,
    Egoman,
    Embest,
    Qisda,
    Stadium,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RamSize {
    #[serde(rename = "256M")]
    M256,
    #[serde(rename = "512M")]
    M512,
    #[serde(rename = "1024M")]
    M1024,
    #[serde(rename = "2048M")]
    M2048,
    #[serde(rename = "4096M")]
    M4096,
    Unknown,
}

/// Resolved hardware variant. Fields the encoding does not cover stay `None`
/// and are omitted from the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Model label, e.g. "B+", "CM", "Zero W", "Unknown".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Board revision within the model line.
    #[serde(rename = "rev", skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    /// Pi generation implied by the type code (-1 for Alpha/Internal).
    #[serde(rename = "pi", skip_serializing_if = "Option::is_none")]
    pub generation: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<Processor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<Manufacturer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<RamSize>,
    /// Pin-layout group name; present only for models in a supported group.
    #[serde(rename = "gpio_type", skip_serializing_if = "Option::is_none")]
    pub gpio_layout: Option<String>,
}

// ── GPIO layout groups ────────────────────────────────────────────────────────

struct ModelGroup {
    name: &'static str,
    models: &'static [&'static str],
    supported: bool,
}

/// Model labels grouped by pin layout. Only supported groups yield a
/// `gpio_layout`; note the new-style "Unknown" label lands in group "b".
const MODEL_GROUPS: &[ModelGroup] = &[
    ModelGroup { name: "zero", models: &["Zero", "Zero+"], supported: false },
    ModelGroup { name: "a", models: &["A", "A+"], supported: false },
    ModelGroup { name: "b", models: &["B", "B+", "Unknown"], supported: true },
    ModelGroup { name: "cm", models: &["CM", "CM+"], supported: true },
    ModelGroup { name: "unknown", models: &["Alpha", "Internal"], supported: false },
];

fn gpio_layout_for(model: &str) -> Option<String> {
    MODEL_GROUPS
        .iter()
        .find(|g| g.models.contains(&model))
        .filter(|g| g.supported)
        .map(|g| g.name.to_string())
}

// ── decoding ──────────────────────────────────────────────────────────────────

/// Pull the revision string out of the platform info blob: the text after
/// the "Revision" token up to the line break, then the value after the
/// first `": "` separator, trimmed.
fn extract_revision(platform_info: &str) -> Result<String, AppError> {
    let after_token = platform_info
        .split_once("Revision")
        .ok_or_else(|| AppError::IdentityParse("no Revision field in platform info".into()))?
        .1;
    let line = after_token.lines().next().unwrap_or("");
    let value = line
        .split_once(": ")
        .ok_or_else(|| {
            AppError::IdentityParse(format!("revision line not splittable: {line:?}"))
        })?
        .1;
    Ok(value.trim().to_string())
}

/// New-style packed bitfield, low end up: revision [0..4), type [4..12),
/// processor [12..16), manufacturer [16..20), RAM [20..23).
fn decode_new_style(code: u32) -> DeviceIdentity {
    let (model, generation) = match (code >> 4) & 0xff {
        0x00 => ("A", 1),
        0x01 => ("B", 1),
        0x02 => ("A+", 1),
        0x03 => ("B+", 1),
        0x04 => ("B", 2),
        0x05 => ("Alpha", -1),
        0x06 => ("CM", 1),
        0x08 => ("B", 3),
        0x09 => ("Zero", 0),
        0x0a => ("CM", 3),
        0x0c => ("Zero W", 0),
        0x0d => ("B+", 3),
        0x0e => ("A+", 3),
        0x0f => ("Internal", -1),
        0x10 => ("CM+", 3),
        0x11 => ("B", 4),
        _ => ("Unknown", 3),
    };

    let processor = match (code >> 12) & 0xf {
        0 => Processor::Bcm2835,
        1 => Processor::Bcm2836,
        2 => Processor::Bcm2837,
        3 => Processor::Bcm2711,
        _ => Processor::Unknown,
    };

    let manufacturer = match (code >> 16) & 0xf {
        0 => Manufacturer::SonyUs,
        1 => Manufacturer::Egoman,
        2 | 4 => Manufacturer::Embest,
        3 => Manufacturer::SonyJapan,
        5 => Manufacturer::Stadium,
        _ => Manufacturer::Unknown,
    };

    let ram = match (code >> 20) & 0x7 {
        0 => RamSize::M256,
        1 => RamSize::M512,
        2 => RamSize::M1024,
        3 => RamSize::M2048,
        4 => RamSize::M4096,
        _ => RamSize::Unknown,
    };

    DeviceIdentity {
        model: Some(model.to_string()),
        revision: Some(code & 0xf),
        generation: Some(generation),
        processor: Some(processor),
        manufacturer: Some(manufacturer),
        ram: Some(ram),
        gpio_layout: None,
    }
}

/// Old-style exact-match table. Codes not listed fall back to a bare
/// revision-3 record — permissive on purpose, not an error.
fn decode_legacy(revision: &str) -> DeviceIdentity {
    use Manufacturer::{Egoman, Qisda, SonyUs};

    let (model, rev, ram, manufacturer) = match revision {
        "0002" | "0003" => ("Model B", 1, RamSize::M256, None),
        "0004" => ("Model B", 2, RamSize::M256, Some(SonyUs)),
        "0005" => ("Model B", 2, RamSize::M256, Some(Qisda)),
        "0006" => ("Model B", 2, RamSize::M256, Some(Egoman)),
        "0007" => ("Model A", 2, RamSize::M256, Some(Egoman)),
        "0008" => ("Model A", 2, RamSize::M256, Some(SonyUs)),
        "0009" => ("Model A", 2, RamSize::M256, Some(Qisda)),
        "000d" => ("Model B", 2, RamSize::M512, Some(Egoman)),
        "000e" => ("Model B", 2, RamSize::M512, Some(SonyUs)),
        "000f" => ("Model B", 2, RamSize::M512, Some(Qisda)),
        "0011" | "0014" => ("Compute Module", 0, RamSize::M512, None),
        "0012" => ("Model A+", 3, RamSize::M256, None),
        "0010" | "0013" => ("Model B+", 3, RamSize::M512, None),
        _ => {
            // don't know — assume revision 3, P1 connector
            return DeviceIdentity { revision: Some(3), ..DeviceIdentity::default() };
        }
    };

    DeviceIdentity {
        model: Some(model.to_string()),
        revision: Some(rev),
        generation: Some(1),
        processor: Some(Processor::Bcm2835),
        manufacturer,
        ram: Some(ram),
        gpio_layout: None,
    }
}

fn decode(platform_info: &str) -> Result<DeviceIdentity, AppError> {
    let revision = extract_revision(platform_info)?;
    let is_hex = !revision.is_empty() && revision.chars().all(|c| c.is_ascii_hexdigit());

    let mut identity = match revision.len() {
        6 if is_hex => {
            // length and charset were checked above
            let code = u32::from_str_radix(&revision, 16)
                .map_err(|e| AppError::IdentityParse(format!("bad revision {revision:?}: {e}")))?;
            decode_new_style(code)
        }
        4 if is_hex => decode_legacy(&revision),
        _ => DeviceIdentity::default(),
    };

    identity.gpio_layout = identity.model.as_deref().and_then(gpio_layout_for);
    Ok(identity)
}

// ── resolver ──────────────────────────────────────────────────────────────────

/// Reads the platform info blob once and caches the decoded identity for the
/// resolver's lifetime. A read failure is not cached, so a later call may
/// retry; a successful decode is final.
#[derive(Debug)]
pub struct DeviceIdentityResolver {
    cpuinfo_path: PathBuf,
    cache: OnceCell<DeviceIdentity>,
}

impl DeviceIdentityResolver {
    pub fn new(cpuinfo_path: PathBuf) -> Self {
        Self { cpuinfo_path, cache: OnceCell::new() }
    }

    /// Resolve the device identity, reading the platform info blob at most
    /// once on success.
    pub async fn resolve(&self) -> Result<&DeviceIdentity, AppError> {
        self.cache
            .get_or_try_init(|| async {
                let text = tokio::fs::read_to_string(&self.cpuinfo_path).await.map_err(|e| {
                    AppError::PlatformUnavailable(format!(
                        "cannot read {}: {e}",
                        self.cpuinfo_path.display()
                    ))
                })?;
                let identity = decode(&text)?;
                debug!(model = identity.model.as_deref().unwrap_or("Unknown"), "board identified");
                Ok(identity)
            })
            .await
    }

    /// The cached identity, if [`resolve`](Self::resolve) has succeeded.
    pub fn cached(&self) -> Option<&DeviceIdentity> {
        self.cache.get()
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────
