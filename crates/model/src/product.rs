use serde::{Deserialize, Serialize};

/// Product category for any row that carries a chipset. The price site lists
/// GPUs under this literal category name.
pub const CATEGORY: &str = "그래픽카드";

/// The closed set of GPU cores this pipeline tracks.
///
/// Everything outside the RTX 4070 family is rejected at normalization time,
/// so a persisted chipset is always one of these four values.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Chipset {
    #[serde(rename = "RTX 4070")]
    #[strum(serialize = "RTX 4070")]
    Rtx4070,
    #[serde(rename = "RTX 4070 Super")]
    #[strum(serialize = "RTX 4070 Super")]
    Rtx4070Super,
    #[serde(rename = "RTX 4070 Ti")]
    #[strum(serialize = "RTX 4070 Ti")]
    Rtx4070Ti,
    #[serde(rename = "RTX 4070 Ti Super")]
    #[strum(serialize = "RTX 4070 Ti Super")]
    Rtx4070TiSuper,
}

impl Chipset {
    pub const ALL: [Chipset; 4] = [
        Chipset::Rtx4070,
        Chipset::Rtx4070Super,
        Chipset::Rtx4070Ti,
        Chipset::Rtx4070TiSuper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chipset::Rtx4070 => "RTX 4070",
            Chipset::Rtx4070Super => "RTX 4070 Super",
            Chipset::Rtx4070Ti => "RTX 4070 Ti",
            Chipset::Rtx4070TiSuper => "RTX 4070 Ti Super",
        }
    }
}

/// Structured identity of a GPU variant, produced by the normalizer and used
/// as the upsert key into the products table.
///
/// `(brand, model_name)` is the natural key; chipset, vram and the OC flag
/// are spec attributes that may be updated when a product is re-observed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub brand: String,
    pub chipset: Chipset,
    pub model_name: String,
    pub vram: String,
    pub is_oc: bool,
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    #[test]
    fn chipset_round_trips_through_display() {
        for chipset in Chipset::ALL {
            assert_eq!(Chipset::from_str(chipset.as_str()).unwrap(), chipset);
            assert_eq!(chipset.to_string(), chipset.as_str());
        }
    }

    #[test]
    fn chipset_serde_uses_canonical_names() {
        let json = serde_json::to_string(&Chipset::Rtx4070TiSuper).unwrap();
        assert_eq!(json, "\"RTX 4070 Ti Super\"");
        let back: Chipset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Chipset::Rtx4070TiSuper);
    }
}
