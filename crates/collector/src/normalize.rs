//! Turns the free-form product names rendered by the price site into a
//! structured [`ProductIdentity`]. Pure and stateless: identical input yields
//! an identical identity.

use {
    model::{Chipset, ProductIdentity},
    regex::Regex,
    std::sync::OnceLock,
};

/// Brands the price site lists for the 4070 family. Matching is
/// case-insensitive; the canonical spelling below is what gets persisted.
const BRANDS: &[&str] = &[
    "ASUS", "MSI", "GIGABYTE", "ZOTAC", "PALIT", "GAINWARD", "EMTEK", "INNO3D", "GALAX",
    "COLORFUL", "PNY",
];

/// Tokens that never contribute to the lineup name: chipset words, memory
/// spec noise and marketing filler.
const NOISE_TOKENS: &[&str] = &[
    "지포스", "geforce", "rtx", "super", "ti", "oc", "overclock", "오버클럭", "d6", "d6x",
    "gddr6", "gddr6x", "graphics", "card", "그래픽카드",
];

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("chipset is not in the RTX 4070 family: {0:?}")]
    ChipsetNot4070Series(String),
    #[error("no known brand in {0:?}")]
    BrandMissing(String),
    #[error("no vram spec in {0:?}")]
    VramMissing(String),
}

pub fn normalize(raw: &str) -> Result<ProductIdentity, NormalizationError> {
    let chipset = detect_chipset(raw)
        .ok_or_else(|| NormalizationError::ChipsetNot4070Series(raw.to_string()))?;
    let brand = detect_brand(raw).ok_or_else(|| NormalizationError::BrandMissing(raw.to_string()))?;
    let vram = detect_vram(raw).ok_or_else(|| NormalizationError::VramMissing(raw.to_string()))?;
    let is_oc = detect_oc(raw);
    let model_name = detect_model_name(raw, brand).unwrap_or_else(|| fallback_name(brand, chipset));
    Ok(ProductIdentity {
        brand: brand.to_string(),
        chipset,
        model_name,
        vram,
        is_oc,
    })
}

/// Longest qualifier wins: "4070 Ti Super" is also a "4070 Ti" and a
/// "4070 Super" substring-wise, so the order of the checks matters. Missing
/// spaces ("4070TI SUPER") are tolerated.
fn detect_chipset(raw: &str) -> Option<Chipset> {
    let lower = raw.to_lowercase();
    let rest = &lower[lower.find("4070")? + "4070".len()..];
    let rest = rest.trim_start_matches([' ', '-']);
    let qualifier: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == ' ' || *c == '-')
        .collect();
    let qualifier = qualifier.replace('-', " ");
    let mut words = qualifier.split_whitespace();
    Some(match (words.next(), words.next()) {
        (Some("ti"), Some("super")) => Chipset::Rtx4070TiSuper,
        (Some("ti"), _) => Chipset::Rtx4070Ti,
        (Some("super"), _) => Chipset::Rtx4070Super,
        // "4070TI" / "4070TISUPER" squeeze the qualifier against the digits.
        (Some(first), _) if first.starts_with("tisuper") => Chipset::Rtx4070TiSuper,
        (Some(first), _) if first.starts_with("ti") => Chipset::Rtx4070Ti,
        (Some(first), _) if first.starts_with("super") => Chipset::Rtx4070Super,
        _ => Chipset::Rtx4070,
    })
}

fn detect_brand(raw: &str) -> Option<&'static str> {
    let lower = raw.to_lowercase();
    BRANDS
        .iter()
        .find(|brand| lower.contains(&brand.to_lowercase()))
        .copied()
}

fn detect_vram(raw: &str) -> Option<String> {
    static VRAM: OnceLock<Regex> = OnceLock::new();
    let re = VRAM.get_or_init(|| Regex::new(r"(?i)(\d+)GB").expect("static regex"));
    let digits = re.captures(raw)?.get(1)?.as_str();
    Some(format!("{digits}GB"))
}

fn detect_oc(raw: &str) -> bool {
    static OC: OnceLock<Regex> = OnceLock::new();
    let re = OC.get_or_init(|| Regex::new(r"(?i)\boc\b|overclock").expect("static regex"));
    re.is_match(raw) || raw.contains("오버클럭")
}

/// The residual lineup token: the first word that is not the brand, not
/// chipset/memory noise and not a digit-bearing spec code.
fn detect_model_name(raw: &str, brand: &str) -> Option<String> {
    raw.split_whitespace()
        .filter(|token| !token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| !token.eq_ignore_ascii_case(brand))
        .filter(|token| {
            let lower = token.to_lowercase();
            !NOISE_TOKENS.contains(&lower.as_str()) && !lower.is_empty()
        })
        .map(|token| token.to_string())
        .next()
}

/// Products whose whole name is spec tokens still need a non-empty lineup
/// name to form the `(brand, model_name)` key. A short stable hash keeps the
/// key deterministic.
fn fallback_name(brand: &str, chipset: Chipset) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in brand.bytes().chain(chipset.as_str().bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{brand}-{hash:08x}", hash = hash as u32)
}
