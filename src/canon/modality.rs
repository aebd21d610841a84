//! Semantic tag of a volume, taken from the last `_`-separated segment of its name.

use std::fmt;

/// Volume modality as encoded in BIDS-style template file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Modality {
    /// T1-weighted intensity image
    T1w,
    /// T2-weighted intensity image
    T2w,
    /// Proton-density intensity image
    PD,
    /// Binary brain/tissue mask
    Mask,
    /// Discrete segmentation (integer labels)
    Dseg,
    /// Probabilistic segmentation (values in [0, 1])
    Probseg,
    /// Any other suffix, case preserved
    Other(String),
}

impl Modality {
    /// Intensity images are the ones eligible for normalization.
    pub fn is_intensity(&self) -> bool {
        matches!(self, Self::T1w | Self::T2w | Self::PD)
    }

    /// Suffix as it appears in file names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::T1w => "T1w",
            Self::T2w => "T2w",
            Self::PD => "PD",
            Self::Mask => "mask",
            Self::Dseg => "dseg",
            Self::Probseg => "probseg",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File name without its volume extension.
pub fn stem_of(file_name: &str) -> &str {
    if let Some(stem) = file_name.strip_suffix(".nii.gz") {
        stem
    } else if let Some(stem) = file_name.strip_suffix(".nii") {
        stem
    } else {
        file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem)
    }
}

/// Classify a stem by its final `_` segment. Matching is case-sensitive.
pub fn classify(stem: &str) -> Modality {
    let tag = stem.rsplit('_').next().unwrap_or(stem);
    match tag {
        "T1w" => Modality::T1w,
        "T2w" => Modality::T2w,
        "PD" => Modality::PD,
        "mask" => Modality::Mask,
        "dseg" => Modality::Dseg,
        "probseg" => Modality::Probseg,
        other => Modality::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_final_segment() {
        assert_eq!(classify("tpl-MNI152NLin2009cAsym_res-01_T1w"), Modality::T1w);
        assert_eq!(classify("tpl-X_res-02_label-brain_mask"), Modality::Mask);
        assert_eq!(classify("tpl-X_atlas-HOSPA_dseg"), Modality::Dseg);
        assert_eq!(classify("tpl-X_label-GM_probseg"), Modality::Probseg);
        assert_eq!(classify("PD"), Modality::PD);
    }

    #[test]
    fn unknown_and_case_sensitive() {
        assert_eq!(classify("tpl-X_t1w"), Modality::Other("t1w".into()));
        assert_eq!(classify("tpl-X_bold"), Modality::Other("bold".into()));
        assert_eq!(classify("tpl-X_"), Modality::Other(String::new()));
    }

    #[test]
    fn stem_strips_volume_extension() {
        assert_eq!(stem_of("tpl-X_res-01_T1w.nii.gz"), "tpl-X_res-01_T1w");
        assert_eq!(stem_of("tpl-X_desc-1.5mm_T2w.nii"), "tpl-X_desc-1.5mm_T2w");
        assert_eq!(stem_of("template_description.json"), "template_description");
        assert_eq!(stem_of("README"), "README");
    }

    #[test]
    fn intensity_modalities() {
        assert!(Modality::T2w.is_intensity());
        assert!(!Modality::Probseg.is_intensity());
        assert_eq!(Modality::Other("bold".into()).to_string(), "bold");
    }
}
