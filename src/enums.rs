use std::str::FromStr;
use thiserror::Error;

/// Final mapping from a windowed intensity to an output value or color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClutMode {
    #[default]
    Normal,
    Inverse,
    Rainbow,
}

/// Common CT windows, in Hounsfield units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowPreset {
    CtBone,
    CtCranium,
    CtLung,
    CtAbdomen,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl FromStr for ClutMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(ClutMode::Normal),
            "inverse" => Ok(ClutMode::Inverse),
            "rainbow" => Ok(ClutMode::Rainbow),
            _ => Err(ParseEnumError {
                kind: "CLUT mode",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for WindowPreset {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bone" | "ct-bone" => Ok(WindowPreset::CtBone),
            "cranium" | "ct-cranium" => Ok(WindowPreset::CtCranium),
            "lung" | "ct-lung" => Ok(WindowPreset::CtLung),
            "abdomen" | "ct-abdomen" => Ok(WindowPreset::CtAbdomen),
            _ => Err(ParseEnumError {
                kind: "window preset",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("Rainbow".parse::<ClutMode>(), Ok(ClutMode::Rainbow));
        assert_eq!("inverse".parse::<ClutMode>(), Ok(ClutMode::Inverse));
        assert_eq!("lung".parse::<WindowPreset>(), Ok(WindowPreset::CtLung));
        assert_eq!("ct-bone".parse::<WindowPreset>(), Ok(WindowPreset::CtBone));
        assert!("sepia".parse::<ClutMode>().is_err());
    }
}
